//! Operation: verify that environments are consistent.
//!
//! Each environment gets two checks. The local one walks the installed
//! records and confirms every dependency is installed and every constraint
//! holds. The solver one freezes the installed records and asks the solver
//! whether they form a valid solution; environments are solved in parallel
//! against the shared index.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use corral_core::config::GlobalConfig;
use corral_core::environment::EnvironmentState;
use corral_core::spec::MatchSpec;
use corral_solver::{compile, plan, CompileContext, RepositoryIndex, RequestFlags};
use corral_util::errors::CorralError;
use corral_util::progress;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::context::{self, SolveContext};

/// Findings for one environment.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub path: PathBuf,
    pub packages: usize,
    pub issues: Vec<String>,
}

impl CheckReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check every environment file. Reports come back in argument order.
pub async fn check(
    ctx: &SolveContext,
    paths: &[PathBuf],
    timeout_ms: Option<i64>,
) -> miette::Result<Vec<CheckReport>> {
    let pins = ctx.pinned_specs()?;
    let mut join_set = JoinSet::new();

    for (i, path) in paths.iter().enumerate() {
        if !path.is_file() {
            return Err(CorralError::Generic {
                message: format!("Environment file {} does not exist", path.display()),
            }
            .into());
        }
        let state = EnvironmentState::from_path(path)?;
        progress::status("Checking", &path.display().to_string());

        let index = Arc::clone(&ctx.index);
        let config = ctx.config.clone();
        let pins = pins.clone();
        let path = path.clone();
        join_set.spawn_blocking(move || {
            let mut issues = consistency_issues(&state, &index);
            issues.extend(solver_issues(&state, &index, &config, &pins, timeout_ms));
            (
                i,
                CheckReport {
                    path,
                    packages: state.packages.len(),
                    issues,
                },
            )
        });
    }

    let mut reports = Vec::new();
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(entry) => reports.push(entry),
            Err(e) => return Err(miette::miette!("Background task failed: {}", e)),
        }
    }
    reports.sort_by_key(|(i, _)| *i);
    Ok(reports.into_iter().map(|(_, report)| report).collect())
}

/// Dependencies and constraints of the installed records that do not hold.
///
/// Virtual package dependencies are looked up in the index.
pub fn consistency_issues(state: &EnvironmentState, index: &RepositoryIndex) -> Vec<String> {
    let installed = state.installed();
    let mut issues = Vec::new();

    for record in &state.packages {
        for dep in &record.depends {
            match installed.get(dep.name.as_str()) {
                Some(found) if dep.matches(found) => {}
                Some(found) => issues.push(format!("{record} requires {dep}, but {found} is installed")),
                None if dep.name.starts_with("__") => {
                    if !index.records_for(&dep.name).any(|v| dep.matches(v)) {
                        issues.push(format!("{record} requires {dep}, which this system does not provide"));
                    }
                }
                None => issues.push(format!("{record} requires {dep}, which is not installed")),
            }
        }
        for constraint in &record.constrains {
            if let Some(found) = installed.get(constraint.name.as_str()) {
                if !constraint.matches(found) {
                    issues.push(format!("{record} constrains {constraint}, but {found} is installed"));
                }
            }
        }
    }
    issues
}

fn solver_issues(
    state: &EnvironmentState,
    index: &RepositoryIndex,
    config: &GlobalConfig,
    pins: &[MatchSpec],
    timeout_ms: Option<i64>,
) -> Vec<String> {
    let history = match state.requested_specs() {
        Ok(history) => history,
        Err(e) => return vec![e.to_string()],
    };
    let compile_ctx = CompileContext {
        history: &history,
        flags: RequestFlags {
            freeze_installed: true,
            ..RequestFlags::default()
        },
        virtual_packages: Vec::new(),
    };
    let request = match compile(&[], &state.packages, pins, &compile_ctx) {
        Ok(request) => request,
        Err(e) => return vec![e.to_string()],
    };
    let options = context::solve_options(config, timeout_ms);
    match corral_solver::solve(index, &request, &options) {
        Ok(solution) => {
            let pending = plan(&state.prefix, &state.packages, &solution, &BTreeSet::new());
            pending
                .operations
                .iter()
                .map(|op| format!("a consistent environment would change {}", op.record()))
                .collect()
        }
        Err(e) => vec![CorralError::from(e).to_string()],
    }
}
