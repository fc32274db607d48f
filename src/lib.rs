//! ci-poll - runs CI build commands with their output forwarded live
//!
//! The library exposes the command runner used by the `ci-poll` binary:
//! - [`host::CommandRunner`] spawns a command and forwards its output
//! - [`settings::Settings`] configures logging and how children are launched
//! - [`logging`] sets up tracing on stderr

pub mod cli;
pub mod host;
pub mod logging;
pub mod settings;
