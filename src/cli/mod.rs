//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, RunCommand, ShowCommand, ValidateCommand};
use std::ffi::OsString;

/// Build and run workflows from blueprint files
#[derive(Debug, Parser, Clone)]
#[command(name = "flowprint")]
#[command(version = "0.1.0")]
#[command(about = "Build workflow instances from blueprints and run them", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Build a blueprint into a new run and execute it
    Run(RunCommand),

    /// Validate a blueprint file
    Validate(ValidateCommand),

    /// Show run history
    History(HistoryCommand),

    /// Show the step tree of a saved run
    Show(ShowCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
