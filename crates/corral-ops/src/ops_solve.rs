//! Operations: install, update and remove packages.
//!
//! Every operation is a dry run. It compiles the user's intent against the
//! environment, solves, and returns the transaction plan together with the
//! environment state the plan would produce. Nothing is linked on disk.

use std::collections::BTreeSet;

use corral_core::environment::EnvironmentState;
use corral_core::spec::MatchSpec;
use corral_solver::{compile, plan, CompileContext, Intent, RequestFlags, TransactionPlan};
use corral_util::errors::CorralError;
use corral_util::progress;
use serde::Serialize;

use crate::context::SolveContext;

/// Options shared by `corral install`, `update` and `remove`.
#[derive(Debug, Clone, Default)]
pub struct SolveArgs {
    pub specs: Vec<String>,
    pub flags: RequestFlags,
    /// Overrides the configured `timeout-ms`.
    pub timeout_ms: Option<i64>,
}

/// Outcome of a dry-run solve.
#[derive(Debug, Clone, Serialize)]
pub struct SolveReport {
    pub plan: TransactionPlan,
    pub next_state: EnvironmentState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Install,
    Update,
    Remove,
}

impl Action {
    fn verb(self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Update => "update",
            Action::Remove => "remove",
        }
    }
}

/// Add packages to the environment.
pub async fn install(ctx: &SolveContext, state: &EnvironmentState, args: &SolveArgs) -> miette::Result<SolveReport> {
    if args.specs.is_empty() {
        return Err(usage("no package specs given to install"));
    }
    let intents = args.specs.iter().cloned().map(Intent::Install).collect::<Vec<_>>();
    run(ctx, state, &intents, args, Action::Install).await
}

/// Move packages to the newest versions the constraints allow.
///
/// With `update_all` every installed package is eligible; otherwise only the
/// named ones are.
pub async fn update(ctx: &SolveContext, state: &EnvironmentState, args: &SolveArgs) -> miette::Result<SolveReport> {
    if args.specs.is_empty() && !args.flags.update_all {
        return Err(usage("name the packages to update, or pass --all"));
    }
    let intents = args.specs.iter().cloned().map(Intent::Update).collect::<Vec<_>>();
    run(ctx, state, &intents, args, Action::Update).await
}

/// Remove packages, and whatever depends on them, from the environment.
pub async fn remove(ctx: &SolveContext, state: &EnvironmentState, args: &SolveArgs) -> miette::Result<SolveReport> {
    if args.specs.is_empty() {
        return Err(usage("no package names given to remove"));
    }
    let intents = args.specs.iter().cloned().map(Intent::Remove).collect::<Vec<_>>();
    run(ctx, state, &intents, args, Action::Remove).await
}

async fn run(
    ctx: &SolveContext,
    state: &EnvironmentState,
    intents: &[Intent],
    args: &SolveArgs,
    action: Action,
) -> miette::Result<SolveReport> {
    if args.flags.no_deps && args.flags.only_deps {
        return Err(usage("--no-deps and --only-deps cannot be combined"));
    }

    let history = state.requested_specs()?;
    let pins = ctx.pinned_specs()?;
    let compile_ctx = CompileContext {
        history: &history,
        flags: args.flags,
        virtual_packages: Vec::new(),
    };
    let request = compile(intents, &state.packages, &pins, &compile_ctx)?;

    progress::status("Solving", &format!("environment for {}", action.verb()));
    let (request, solution) = ctx.solve(request, args.timeout_ms).await?;

    let reinstall: BTreeSet<String> = if args.flags.force_reinstall {
        request.explicit_names().into_iter().map(str::to_string).collect()
    } else {
        BTreeSet::new()
    };
    let plan = plan(&state.prefix, &state.packages, &solution, &reinstall);
    tracing::info!(
        action = action.verb(),
        operations = plan.operations.len(),
        "transaction planned"
    );

    let mut next_state = EnvironmentState {
        prefix: state.prefix.clone(),
        requested: state.requested.clone(),
        packages: solution.records().filter(|r| !r.is_virtual()).cloned().collect(),
    };
    match action {
        Action::Install | Action::Update => {
            if !args.flags.only_deps {
                next_state.record_requested(&request.specs);
            }
        }
        Action::Remove => {
            let gone: Vec<String> = history
                .iter()
                .map(|spec: &MatchSpec| spec.name.clone())
                .filter(|name| request.removals.contains(name) || !solution.contains(name))
                .collect();
            next_state.forget_requested(&gone);
        }
    }

    Ok(SolveReport { plan, next_state })
}

fn usage(message: &str) -> miette::Report {
    CorralError::Generic {
        message: message.to_string(),
    }
    .into()
}
