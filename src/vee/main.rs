//! vee CLI - Command-line interface for the environment manager.
//!
//! # Commands
//!
//! - `init` - Create the home skeleton
//! - `install <requirement>` - Run the pipeline for a requirement
//! - `uninstall <requirement>` - Remove an install
//! - `link <env> <requirement>` - Link an install into an environment
//! - `list` - List catalogued packages
//! - `doctor` - Self-check

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use log::{debug, info};
use std::process::ExitCode;
use vee_lib::{config, home::Home, VeeError};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = config::init(cli.config.clone()) {
        eprintln!("Config error: {}", err);
        return ExitCode::from(2);
    }

    init_logging(cli.verbose);
    info!("vee v{} starting", vee_lib::VERSION);

    let Some(command) = cli.command else {
        eprintln!("No command given; see `vee --help`.");
        return ExitCode::from(2);
    };

    let home = match &cli.home {
        Some(path) => Home::new(path.clone()),
        None => match config::get() {
            Ok(config) => Home::from_config(config),
            Err(err) => {
                eprintln!("Config error: {}", err);
                return ExitCode::from(2);
            }
        },
    };
    debug!("home root {}", home.root().display());

    let result: Result<(), VeeError> = match command {
        Commands::Init => home.init(),
        Commands::Install { force, requirement } => {
            commands::install(&home, &requirement.join(" "), force)
        }
        Commands::Uninstall { requirement } => {
            commands::uninstall(&home, &requirement.join(" "))
        }
        Commands::Link {
            force,
            environment,
            requirement,
        } => commands::link(&home, &environment, &requirement.join(" "), force),
        Commands::List => commands::list(&home),
        Commands::Doctor { ping } => commands::doctor(&home, ping),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::from(err.exit_code())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env = env_logger::Env::default().default_filter_or(level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}
