//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Process exit codes
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    /// The command ran but did not exit successfully
    pub const EXEC_FAILED: i32 = 1;
    /// Settings could not be loaded (2 is taken by clap usage errors)
    pub const CONFIG_ERROR: i32 = 3;
    /// Logging or the async runtime could not be set up
    pub const SETUP_FAILED: i32 = 4;
    /// Any other error
    pub const UNEXPECTED_FAILURE: i32 = 5;
    /// The command could not be started (not found, not executable, bad working directory)
    pub const COMMAND_NOT_STARTED: i32 = 127;
}

#[derive(Debug, Parser)]
#[command(name = "ci-poll", version, about = "Run CI build commands with live output")]
pub struct Cli {
    /// Settings file (defaults to <config dir>/ci-poll/config.toml)
    #[arg(long, global = true, env = "CI_POLL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a command with its output forwarded to this console
    Exec {
        /// Executable name or path
        command: String,

        /// Arguments passed to the command unchanged
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}
