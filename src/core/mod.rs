//! Core domain models
//!
//! Blueprints (immutable templates) and the instance trees built from them.

pub mod blueprint;
pub mod condition;
pub mod config;
pub mod param;
pub mod state;
pub mod step;

pub use blueprint::*;
pub use condition::*;
pub use param::*;
pub use state::*;
pub use step::*;
