//! Logging configuration using tracing
//!
//! Logs always go to stderr. Stdout belongs to the trace line and the
//! forwarded output of the child process.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Pick the log filter: `debug` when verbose, otherwise `RUST_LOG` or `info`
fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Initialize the logging system
pub fn init(verbose: bool, json: bool) -> anyhow::Result<()> {
    let filter = filter(verbose);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}
