//! Retry loop for `freeze-installed` requests.

use crate::error::SolveError;
use crate::index::RepositoryIndex;
use crate::request::SolverRequest;
use crate::solver::{solve_once, Deadline, Solution, SolveOptions};

/// Solve, relaxing frozen records that take part in a conflict.
///
/// Each failed attempt unfreezes the frozen names its conflict core
/// mentions. A core without frozen members ends the loop immediately. Once
/// `max_attempts` attempts have failed, a last attempt runs with nothing
/// frozen. All attempts share one deadline.
pub fn solve_with_retry(
    index: &RepositoryIndex,
    request: &SolverRequest,
    options: &SolveOptions,
    deadline: &Deadline,
) -> Result<Solution, SolveError> {
    if !request.flags.freeze_installed || request.frozen.is_empty() {
        return solve_once(index, request, options, deadline);
    }

    let mut current = request.clone();
    for attempt in 1..=options.max_attempts.max(1) {
        tracing::debug!(attempt, frozen = current.frozen.len(), "solver attempt");
        match solve_once(index, &current, options, deadline) {
            Ok(solution) => return Ok(solution),
            Err(SolveError::Unsatisfiable(core)) => {
                let names = core.frozen_names();
                if names.is_empty() {
                    return Err(SolveError::Unsatisfiable(core));
                }
                tracing::debug!(?names, "unfreezing conflicting records");
                current.unfreeze(&names);
            }
            Err(err) => return Err(err),
        }
    }

    tracing::debug!("retry attempts exhausted; unfreezing everything");
    current.frozen.clear();
    solve_once(index, &current, options, deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{compile, CompileContext, Intent, RequestFlags};
    use corral_core::channel::ChannelPriority;
    use corral_core::record::PackageRecord;
    use corral_core::spec::MatchSpec;
    use corral_core::version::Version;

    fn rec(name: &str, version: &str, depends: &[&str]) -> PackageRecord {
        PackageRecord::new(name, Version::parse(version).unwrap(), "0")
            .with_channel("c", 1)
            .with_depends(depends.iter().map(|d| MatchSpec::parse(d).unwrap()).collect())
    }

    fn frozen_request(intent: &str, installed: &[PackageRecord]) -> SolverRequest {
        let ctx = CompileContext {
            flags: RequestFlags {
                freeze_installed: true,
                ..RequestFlags::default()
            },
            ..CompileContext::default()
        };
        compile(&[Intent::Install(intent.to_string())], installed, &[], &ctx).unwrap()
    }

    #[test]
    fn frozen_record_is_released_on_conflict() {
        let installed = vec![rec("lib", "1.0", &[])];
        let index = RepositoryIndex::new(
            vec![rec("lib", "1.0", &[]), rec("lib", "2.0", &[]), rec("app", "1.0", &["lib >=2"])],
            ChannelPriority::Strict,
        );
        let req = frozen_request("app", &installed);
        assert_eq!(req.frozen.len(), 1);
        let solution = solve_with_retry(&index, &req, &SolveOptions::default(), &Deadline::unlimited()).unwrap();
        assert_eq!(solution.get("lib").unwrap().version.as_str(), "2.0");
    }

    #[test]
    fn frozen_record_stays_when_possible() {
        let installed = vec![rec("lib", "1.0", &[])];
        let index = RepositoryIndex::new(
            vec![rec("lib", "1.0", &[]), rec("lib", "2.0", &[]), rec("app", "1.0", &["lib"])],
            ChannelPriority::Strict,
        );
        let req = frozen_request("app", &installed);
        let solution = solve_with_retry(&index, &req, &SolveOptions::default(), &Deadline::unlimited()).unwrap();
        assert_eq!(solution.get("lib").unwrap().version.as_str(), "1.0");
    }

    #[test]
    fn conflict_without_frozen_members_is_reported() {
        let installed = vec![rec("lib", "1.0", &[])];
        let index = RepositoryIndex::new(
            vec![rec("lib", "1.0", &[]), rec("app", "1.0", &["lib >=2"])],
            ChannelPriority::Strict,
        );
        let req = frozen_request("app", &installed);
        let err = solve_with_retry(&index, &req, &SolveOptions::default(), &Deadline::unlimited()).unwrap_err();
        assert!(matches!(err, SolveError::Unsatisfiable(_)));
    }
}
