//! Command dispatch and handler modules.

mod check;
mod depends;
mod install;
mod remove;
mod search;
mod tree;
mod update;
mod whoneeds;

use std::path::{Path, PathBuf};

use corral_core::config::GlobalConfig;
use corral_core::environment::EnvironmentState;
use corral_ops::ops_solve::{self, SolveArgs};
use corral_ops::{ContextOptions, SolveContext};
use corral_solver::RequestFlags;
use corral_util::errors::CorralError;
use miette::Result;
use serde::Serialize;

use crate::cli::{ChannelArgs, Cli, Command, SolveFlags};

/// Route a parsed CLI invocation to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Install { specs, flags } => install::exec(specs, &flags).await,
        Command::Update { specs, all, flags } => update::exec(specs, all, &flags).await,
        Command::Remove { names, mut flags } => {
            flags.state = locate_state(&flags.state);
            remove::exec(names, &flags).await
        }
        Command::Search {
            spec,
            json,
            channels,
        } => search::exec(&spec, json, &channels).await,
        Command::Depends {
            spec,
            resolve,
            timeout_ms,
            json,
            channels,
        } => depends::exec(&spec, resolve, timeout_ms, json, &channels).await,
        Command::Whoneeds {
            name,
            json,
            channels,
        } => whoneeds::exec(&name, json, &channels).await,
        Command::Tree {
            package,
            state,
            depth,
            why,
            inverted,
        } => tree::exec(package, &locate_state(&state), depth, why, inverted),
        Command::Check {
            states,
            timeout_ms,
            json,
            channels,
        } => check::exec(&states, timeout_ms, json, &channels).await,
    }
}

/// Load the global config and the index of the selected channels.
async fn load_context(channels: &ChannelArgs) -> Result<SolveContext> {
    let config = GlobalConfig::load()?;
    let opts = ContextOptions {
        channels: channels.channels.clone(),
        offline: channels.offline,
    };
    SolveContext::load(config, &opts).await
}

fn solve_args(specs: Vec<String>, flags: &SolveFlags, update_all: bool) -> SolveArgs {
    SolveArgs {
        specs,
        flags: RequestFlags {
            no_deps: flags.no_deps,
            only_deps: flags.only_deps,
            force_reinstall: flags.force_reinstall,
            update_all,
            prune: flags.prune,
            freeze_installed: flags.freeze_installed,
        },
        timeout_ms: flags.timeout_ms,
    }
}

/// The solve operation a command runs.
#[derive(Debug, Clone, Copy)]
enum SolveKind {
    Install,
    Update,
    Remove,
}

/// Load the environment, run one of the solve operations and print the plan.
async fn run_solve(specs: Vec<String>, flags: &SolveFlags, update_all: bool, kind: SolveKind) -> Result<()> {
    let state = EnvironmentState::from_path(&locate_state(&flags.state))?;
    let ctx = load_context(&flags.channels).await?;
    let args = solve_args(specs, flags, update_all);
    let report = match kind {
        SolveKind::Install => ops_solve::install(&ctx, &state, &args).await?,
        SolveKind::Update => ops_solve::update(&ctx, &state, &args).await?,
        SolveKind::Remove => ops_solve::remove(&ctx, &state, &args).await?,
    };
    if flags.json {
        print_json(&report)
    } else {
        print!("{}", report.plan);
        Ok(())
    }
}

/// A bare state file name is looked up in the current directory and its
/// ancestors; anything else is used as given.
fn locate_state(path: &Path) -> PathBuf {
    if path.components().count() != 1 || path.is_file() {
        return path.to_path_buf();
    }
    let Some(name) = path.to_str() else {
        return path.to_path_buf();
    };
    std::env::current_dir()
        .ok()
        .and_then(|cwd| corral_util::fs::find_ancestor_with(&cwd, name))
        .map(|dir| dir.join(name))
        .unwrap_or_else(|| path.to_path_buf())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CorralError::Generic {
        message: format!("Failed to serialize output: {e}"),
    })?;
    println!("{text}");
    Ok(())
}
