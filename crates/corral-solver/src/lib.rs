//! Dependency resolution engine: repository index, request compilation,
//! backtracking solver with conflict explanation, transaction planning.

pub mod error;
pub mod explain;
pub mod graph;
pub mod index;
pub mod memo;
pub mod policy;
pub mod request;
pub mod retry;
pub mod solver;
pub mod transaction;

pub use error::SolveError;
pub use explain::{is_satisfiable, ConflictCore};
pub use index::RepositoryIndex;
pub use request::{compile, CompileContext, Constraint, ConstraintKind, Intent, RequestFlags, SolverRequest};
pub use solver::{Deadline, Solution, SolveOptions};
pub use transaction::{plan, Operation, TransactionPlan};

/// Solve a request against an index.
///
/// Runs the freeze-installed retry loop when the request asks for it and
/// applies the `no-deps`/`only-deps` flags to the result. The time budget in
/// `options` covers the whole call; a budget of zero or less fails with
/// [`SolveError::Timeout`] before any search.
pub fn solve(
    index: &RepositoryIndex,
    request: &SolverRequest,
    options: &SolveOptions,
) -> Result<Solution, SolveError> {
    let deadline = Deadline::new(options.budget_ms);
    deadline.check()?;
    index.verify()?;
    let solution = retry::solve_with_retry(index, request, options, &deadline)?;
    tracing::debug!(packages = solution.len(), elapsed_ms = deadline.elapsed_ms(), "solved");
    Ok(solver::apply_deps_modifier(solution, request))
}
