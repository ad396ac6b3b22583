//! Command-line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "vee",
    version,
    about = "Versioned execution environment manager"
)]
pub struct Cli {
    /// Config file override.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Home root override (also: the VEE environment variable).
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the home directory skeleton.
    Init,

    /// Install a package.
    Install {
        /// Reinstall over an existing install.
        #[arg(long, short)]
        force: bool,

        /// Requirement: URL followed by modifier flags.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        requirement: Vec<String>,
    },

    /// Remove an installed package.
    Uninstall {
        /// Requirement identifying the install.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        requirement: Vec<String>,
    },

    /// Link an installed package into an environment.
    Link {
        /// Link even when a prior link exists.
        #[arg(long, short)]
        force: bool,

        /// Environment name.
        environment: String,

        /// Requirement identifying the install.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        requirement: Vec<String>,
    },

    /// List catalogued packages.
    List,

    /// Perform a self-check.
    Doctor {
        /// Print "pong".
        #[arg(long)]
        ping: bool,
    },
}
