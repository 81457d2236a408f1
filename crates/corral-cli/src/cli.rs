//! CLI argument definitions for Corral.
//!
//! Uses `clap` derive macros to define the full command surface. Each command
//! corresponds to a handler in the [`super::commands`] module.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "corral",
    version,
    about = "A conda-style dependency resolver",
    long_about = "Corral resolves conda package specs against channel repodata and prints \
                  the transaction that would bring an environment to the requested state. \
                  Every command is a dry run."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Where package records come from.
#[derive(Args, Debug, Clone, Default)]
pub struct ChannelArgs {
    /// Channel to search, highest priority first; replaces the configured channels
    #[arg(short = 'c', long = "channel")]
    pub channels: Vec<String>,
    /// Use only cached repodata
    #[arg(long)]
    pub offline: bool,
}

/// Flags shared by the commands that solve an environment.
#[derive(Args, Debug, Clone)]
pub struct SolveFlags {
    /// Environment state file
    #[arg(long, default_value = "corral-env.json")]
    pub state: PathBuf,
    /// Change only the named packages, leave their dependencies alone
    #[arg(long, conflicts_with = "only_deps")]
    pub no_deps: bool,
    /// Install the dependencies of the named packages but not the packages
    #[arg(long)]
    pub only_deps: bool,
    /// Relink the named packages even when unchanged
    #[arg(long)]
    pub force_reinstall: bool,
    /// Drop installed packages nothing requested needs
    #[arg(long)]
    pub prune: bool,
    /// Keep installed packages at their exact builds where possible
    #[arg(long)]
    pub freeze_installed: bool,
    /// Solver time budget in milliseconds
    #[arg(long, allow_negative_numbers = true)]
    pub timeout_ms: Option<i64>,
    /// Print the plan and resulting state as JSON
    #[arg(long)]
    pub json: bool,
    #[command(flatten)]
    pub channels: ChannelArgs,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add packages to an environment
    Install {
        /// Package specs, e.g. `numpy` or `python 3.11.*`
        #[arg(required = true)]
        specs: Vec<String>,
        #[command(flatten)]
        flags: SolveFlags,
    },

    /// Update packages to the newest versions the constraints allow
    Update {
        /// Packages to update
        specs: Vec<String>,
        /// Update every installed package
        #[arg(long)]
        all: bool,
        #[command(flatten)]
        flags: SolveFlags,
    },

    /// Remove packages and whatever depends on them
    Remove {
        /// Package names; `*` globs match installed names
        #[arg(required = true)]
        names: Vec<String>,
        #[command(flatten)]
        flags: SolveFlags,
    },

    /// Search channels for packages matching a spec
    Search {
        /// Package spec; the name may contain `*`
        spec: String,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        channels: ChannelArgs,
    },

    /// Show the dependencies of a package
    Depends {
        spec: String,
        /// Solve the package and list its full dependency closure
        #[arg(long)]
        resolve: bool,
        /// Solver time budget in milliseconds
        #[arg(long, allow_negative_numbers = true)]
        timeout_ms: Option<i64>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        channels: ChannelArgs,
    },

    /// Show which packages depend on a package
    Whoneeds {
        name: String,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        channels: ChannelArgs,
    },

    /// Display the dependency tree of an environment
    Tree {
        /// Root the tree at this package
        package: Option<String>,
        /// Environment state file
        #[arg(long, default_value = "corral-env.json")]
        state: PathBuf,
        /// Maximum depth
        #[arg(short, long)]
        depth: Option<usize>,
        /// Show why a package is installed
        #[arg(long)]
        why: Option<String>,
        /// Show dependents instead of dependencies
        #[arg(short, long)]
        inverted: bool,
    },

    /// Verify that environments are consistent and solvable
    Check {
        /// Environment state files
        #[arg(required = true)]
        states: Vec<PathBuf>,
        /// Solver time budget in milliseconds
        #[arg(long, allow_negative_numbers = true)]
        timeout_ms: Option<i64>,
        /// Print reports as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        channels: ChannelArgs,
    },
}

/// Parse command-line arguments.
pub fn parse() -> Cli {
    Cli::parse()
}
