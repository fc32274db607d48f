//! ci-poll - runs CI build commands with their output forwarded live

use ci_poll::cli::{exit_codes, Cli, Commands};
use ci_poll::host::ExecutionError;
use ci_poll::logging;
use ci_poll::settings::Settings;
use clap::Parser;

fn main() {
    let exit_code = run(Cli::parse());
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> i32 {
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::CONFIG_ERROR;
        }
    };

    // Initialize logging
    let verbose = cli.verbose || settings.log.verbose;
    let json = cli.json_logs || settings.log.json;
    if let Err(e) = logging::init(verbose, json) {
        eprintln!("Failed to initialize logging: {}", e);
        return exit_codes::SETUP_FAILED;
    }

    dispatch(cli.command, &settings)
}

fn dispatch(command: Commands, settings: &Settings) -> i32 {
    // Create tokio runtime for async commands
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            return exit_codes::SETUP_FAILED;
        }
    };

    match command {
        Commands::Exec { command, args } => rt.block_on(async {
            match exec(settings, &command, &args).await {
                Ok(()) => exit_codes::SUCCESS,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    categorize_error(&e)
                }
            }
        }),
    }
}

async fn exec(settings: &Settings, command: &str, args: &[String]) -> anyhow::Result<()> {
    let runner = settings.runner();
    runner.run_async(command, args).await?;
    tracing::info!(command, "Command succeeded");
    Ok(())
}

fn categorize_error(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<ExecutionError>() {
        Some(ExecutionError::Spawn { command, source }) => {
            tracing::debug!(command = command.as_str(), "Command could not be started: {}", source);
            exit_codes::COMMAND_NOT_STARTED
        }
        Some(exec_err) => {
            tracing::debug!(command = exec_err.command(), status = ?exec_err.status(), "Command failed");
            exit_codes::EXEC_FAILED
        }
        None => exit_codes::UNEXPECTED_FAILURE,
    }
}
