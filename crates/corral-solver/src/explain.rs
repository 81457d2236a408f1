//! Conflict explanation: reduce a failed search to a minimal set of
//! constraints that cannot hold together.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use corral_core::config::SolveStrategy;

use crate::error::SolveError;
use crate::index::RepositoryIndex;
use crate::policy::{CandidateOrdering, DefaultOrdering};
use crate::request::{Constraint, ConstraintKind, SolverRequest};
use crate::solver::{search, Deadline, FailureTrace, SearchOutcome};

const MAX_LISTED_VERSIONS: usize = 8;

/// A minimal unsatisfiable subset of a request's constraints.
///
/// `background` holds the explicit request specs and removals that the
/// reduction took as given. Together with `background`, dropping any single
/// member of `constraints` makes the request satisfiable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictCore {
    pub constraints: Vec<Constraint>,
    pub background: Vec<Constraint>,
    /// Available versions of every package named by the core, newest first.
    pub candidates: BTreeMap<String, Vec<String>>,
}

impl ConflictCore {
    fn new(
        index: &RepositoryIndex,
        request: &SolverRequest,
        constraints: Vec<Constraint>,
        background: Vec<Constraint>,
    ) -> Self {
        let mut candidates = BTreeMap::new();
        for constraint in &constraints {
            let name = &constraint.spec.name;
            if candidates.contains_key(name) {
                continue;
            }
            let mut versions: Vec<String> = Vec::new();
            let installed = request.installed_record(name).into_iter();
            for record in index.records_for(name).chain(installed) {
                let version = record.version.to_string();
                if !versions.contains(&version) {
                    versions.push(version);
                }
            }
            candidates.insert(name.clone(), versions);
        }
        Self {
            constraints,
            background,
            candidates,
        }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn contains(&self, constraint: &Constraint) -> bool {
        self.constraints.contains(constraint)
    }

    /// Names whose frozen record takes part in the conflict.
    pub fn frozen_names(&self) -> BTreeSet<String> {
        self.constraints
            .iter()
            .filter(|c| c.kind == ConstraintKind::Frozen)
            .map(|c| c.spec.name.clone())
            .collect()
    }

    /// Multi-line, tree-style description of the conflict.
    pub fn explanation(&self) -> String {
        let mut out = String::from("the following constraints cannot be satisfied together:\n");
        push_branch(&mut out, self.constraints.iter().map(ToString::to_string));
        if !self.background.is_empty() {
            out.push_str("given the request:\n");
            push_branch(&mut out, self.background.iter().map(ToString::to_string));
        }
        if !self.candidates.is_empty() {
            out.push_str("available versions:\n");
            push_branch(
                &mut out,
                self.candidates.iter().map(|(name, versions)| {
                    if versions.is_empty() {
                        return format!("{name}: none");
                    }
                    let mut listed = versions
                        .iter()
                        .take(MAX_LISTED_VERSIONS)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ");
                    if versions.len() > MAX_LISTED_VERSIONS {
                        listed.push_str(&format!(" and {} more", versions.len() - MAX_LISTED_VERSIONS));
                    }
                    format!("{name}: {listed}")
                }),
            );
        }
        out.truncate(out.trim_end().len());
        out
    }
}

impl fmt::Display for ConflictCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.explanation())
    }
}

fn push_branch(out: &mut String, lines: impl ExactSizeIterator<Item = String>) {
    let count = lines.len();
    for (i, line) in lines.enumerate() {
        let connector = if i + 1 == count { "└── " } else { "├── " };
        out.push_str(&format!("{connector}{line}\n"));
    }
}

/// Derive a minimal conflict core from a failed search.
///
/// Explicit specs and removals form the background. When the background
/// alone is unsatisfiable the reduction runs over it; otherwise it runs over
/// the other constraints of the trace, background always enabled.
/// Constraints are dropped greedily in trace order whenever the rest stays
/// unsatisfiable, so the result only depends on the trace.
pub fn explain(
    index: &RepositoryIndex,
    request: &SolverRequest,
    ordering: &dyn CandidateOrdering,
    trace: &FailureTrace,
    deadline: &Deadline,
) -> Result<ConflictCore, SolveError> {
    let check = |enabled: &[Constraint]| satisfiable(index, request, ordering, deadline, enabled);

    let background: Vec<Constraint> = request
        .root_constraints()
        .into_iter()
        .filter(|c| c.kind.is_background())
        .collect();

    if !check(&background)? {
        tracing::debug!("request is unsatisfiable on its own; reducing explicit specs");
        let members = reduce(background, &[], &check)?;
        return Ok(ConflictCore::new(index, request, members, Vec::new()));
    }

    let traced: Vec<Constraint> = trace
        .constraints()
        .filter(|c| !c.kind.is_background())
        .cloned()
        .collect();
    let active: Vec<Constraint> = trace
        .entries
        .iter()
        .filter(|e| !e.constraint.kind.is_background() && (e.narrowed || e.conflict))
        .map(|e| e.constraint.clone())
        .collect();

    let start = if active.len() < traced.len() && !check(&joined(&background, &active))? {
        active
    } else {
        traced
    };
    tracing::debug!(candidates = start.len(), "reducing conflict core");
    let members = reduce(start, &background, &check)?;
    Ok(ConflictCore::new(index, request, members, background))
}

/// Whether the request is satisfiable when only `enabled` constraints take
/// effect.
pub fn is_satisfiable(
    index: &RepositoryIndex,
    request: &SolverRequest,
    enabled: &[Constraint],
) -> Result<bool, SolveError> {
    let ordering = DefaultOrdering::new(SolveStrategy::Highest, index.channel_priority());
    satisfiable(index, request, &ordering, &Deadline::unlimited(), enabled)
}

fn satisfiable(
    index: &RepositoryIndex,
    request: &SolverRequest,
    ordering: &dyn CandidateOrdering,
    deadline: &Deadline,
    enabled: &[Constraint],
) -> Result<bool, SolveError> {
    let set: HashSet<Constraint> = enabled.iter().cloned().collect();
    match search(index, request, ordering, deadline, Some(&set)) {
        Ok(SearchOutcome::Solved(_)) => Ok(true),
        Ok(SearchOutcome::Conflict(_)) | Err(SolveError::PackagesNotFound(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

fn reduce(
    mut members: Vec<Constraint>,
    background: &[Constraint],
    check: &dyn Fn(&[Constraint]) -> Result<bool, SolveError>,
) -> Result<Vec<Constraint>, SolveError> {
    let mut i = 0;
    while i < members.len() {
        let mut without = members.clone();
        without.remove(i);
        if check(&joined(background, &without))? {
            i += 1;
        } else {
            members = without;
        }
    }
    Ok(members)
}

fn joined(a: &[Constraint], b: &[Constraint]) -> Vec<Constraint> {
    a.iter().chain(b).cloned().collect()
}
