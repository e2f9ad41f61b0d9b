//! Command parameter definitions and rendering

use serde::{Deserialize, Serialize};

/// Formal description of one option a command accepts.
///
/// `prefix` is whatever goes before the value, including any trailing space
/// or `=`:
///
/// ```text
/// tool -i foo.fna          prefix = "-i "
/// tool -ifoo.fna           prefix = "-i"
/// tool --input=foo.fna     prefix = "--input="
/// tool foo.fna             prefix = None
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandBlueprintParam {
    /// Label for the parameter, unique within its command
    pub name: String,

    /// Literal text preceding the value (None for positional arguments)
    pub prefix: Option<String>,

    /// Render order. Not required to be unique; ties keep declaration order.
    pub position: u16,

    /// Short description (<= 100 characters)
    pub short_desc: String,

    /// Verbose description
    pub long_desc: String,

    pub is_optional: bool,

    /// Interface hint only, no effect on execution
    pub is_primary_option: bool,

    /// Option/prefix only with no value to pass, e.g. `wc -l`
    pub has_no_value: bool,

    /// Wrap the value in quotes when rendering
    pub has_quoted_value: bool,

    pub default_value: Option<String>,
}

impl CommandBlueprintParam {
    /// Create a required parameter with the given prefix
    pub fn new(name: impl Into<String>, prefix: Option<&str>, position: u16) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.map(str::to_string),
            position,
            short_desc: String::new(),
            long_desc: String::new(),
            is_optional: false,
            is_primary_option: true,
            has_no_value: false,
            has_quoted_value: false,
            default_value: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.is_optional = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn quoted(mut self) -> Self {
        self.has_quoted_value = true;
        self
    }

    pub fn flag(mut self) -> Self {
        self.has_no_value = true;
        self
    }

    /// Default value, if it is usable (non-empty)
    pub fn usable_default(&self) -> Option<&str> {
        self.default_value.as_deref().filter(|v| !v.is_empty())
    }

    /// Render the value part only, falling back to the default.
    ///
    /// Returns `None` for flag-only params and when no value is available.
    /// Quoting switches to single quotes if the value contains a double quote;
    /// a value holding both quote characters is not escaped.
    pub fn render_value(&self, value: Option<&str>) -> Option<String> {
        if self.has_no_value {
            return None;
        }

        let value = match value {
            Some(v) => v,
            None => self.usable_default()?,
        };

        if self.has_quoted_value {
            if value.contains('"') {
                Some(format!("'{}'", value))
            } else {
                Some(format!("\"{}\"", value))
            }
        } else {
            Some(value.to_string())
        }
    }

    /// Render the full fragment (prefix directly followed by the value).
    ///
    /// Returns `None` when a value is needed but neither an override nor a
    /// usable default exists.
    pub fn render(&self, value: Option<&str>) -> Option<String> {
        let prefix = self.prefix.as_deref().unwrap_or("");

        if self.has_no_value {
            return Some(prefix.trim().to_string());
        }

        let rendered = self.render_value(value)?;
        Some(format!("{}{}", prefix, rendered))
    }
}

/// A concrete per-command override of a blueprint parameter's value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParam {
    /// Name of the blueprint parameter this overrides
    pub name: String,

    /// Copied from the blueprint parameter
    pub prefix: Option<String>,

    pub value: String,
}
