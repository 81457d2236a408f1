//! Backtracking solver core.
//!
//! Each reachable package name has a domain of candidate records in
//! preference order. Requirements force a name into the solution,
//! restrictions narrow its domain. The search interleaves unit propagation
//! (a required name with a single candidate is assigned immediately) with
//! branching on the required name that has the fewest candidates left.
//! Backtracking runs off an explicit stack of frames that remember a trail
//! position, so every branch point checks the deadline the same way and
//! subtrees already proven to fail are skipped.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::time::Instant;

use corral_core::record::PackageRecord;
use serde::Serialize;

use crate::error::SolveError;
use crate::explain;
use crate::index::RepositoryIndex;
use crate::memo::FailedStates;
use crate::policy::{is_installed, CandidateOrdering, DefaultOrdering, OrderingContext};
use crate::request::{Constraint, ConstraintKind, SolverRequest};

type NameId = usize;
type CandId = usize;
type ConstraintId = usize;

/// Caller-imposed time limit for a solve.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    budget_ms: i64,
}

impl Deadline {
    /// A budget of zero or less is already expired.
    pub fn new(budget_ms: i64) -> Self {
        Self {
            start: Instant::now(),
            budget_ms,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(i64::MAX)
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn is_expired(&self) -> bool {
        self.budget_ms <= 0 || self.elapsed_ms() >= self.budget_ms as u64
    }

    pub fn check(&self) -> Result<(), SolveError> {
        if self.is_expired() {
            return Err(SolveError::Timeout {
                budget_ms: self.budget_ms,
                elapsed_ms: self.elapsed_ms(),
            });
        }
        Ok(())
    }
}

/// Knobs of a solve that are not part of the request.
pub struct SolveOptions {
    /// Time budget in milliseconds shared by every attempt.
    pub budget_ms: i64,
    /// Attempts of the freeze-installed retry loop.
    pub max_attempts: u32,
    pub ordering: Box<dyn CandidateOrdering>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            budget_ms: 60_000,
            max_attempts: 3,
            ordering: Box::new(DefaultOrdering::default()),
        }
    }
}

impl SolveOptions {
    pub fn new(budget_ms: i64) -> Self {
        Self {
            budget_ms,
            ..Self::default()
        }
    }

    pub fn with_ordering(mut self, ordering: impl CandidateOrdering + 'static) -> Self {
        self.ordering = Box::new(ordering);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Exactly one chosen record per package name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Solution {
    records: BTreeMap<String, PackageRecord>,
}

impl Solution {
    pub fn from_records(records: impl IntoIterator<Item = PackageRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Records sorted by name.
    pub fn records(&self) -> impl Iterator<Item = &PackageRecord> {
        self.records.values()
    }

    pub fn into_records(self) -> Vec<PackageRecord> {
        self.records.into_values().collect()
    }
}

/// Counters reported at the end of a search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SolveStats {
    pub decisions: u64,
    pub propagations: u64,
    pub backtracks: u64,
    pub memo_hits: u64,
}

/// A constraint the search activated, in activation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedConstraint {
    pub constraint: Constraint,
    /// The constraint removed at least one candidate.
    pub narrowed: bool,
    /// Applying the constraint left a required name without candidates.
    pub conflict: bool,
}

/// Every constraint activated during a failed search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureTrace {
    pub entries: Vec<TracedConstraint>,
}

impl FailureTrace {
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.entries.iter().map(|e| &e.constraint)
    }
}

/// Result of a single search.
#[derive(Debug)]
pub enum SearchOutcome<'a> {
    Solved(BTreeMap<String, &'a PackageRecord>),
    Conflict(FailureTrace),
}

/// Candidates and constraints of one solve.
struct Pool<'a> {
    names: Vec<String>,
    candidates: Vec<&'a PackageRecord>,
    /// Initial domain per name, most preferred first.
    domains: Vec<Vec<CandId>>,
    constraints: Vec<Constraint>,
    /// Name each constraint applies to, if that name is in the pool.
    target: Vec<Option<NameId>>,
    enabled: Vec<bool>,
    roots: Vec<ConstraintId>,
    activates: Vec<Vec<ConstraintId>>,
}

impl<'a> Pool<'a> {
    fn build(
        index: &'a RepositoryIndex,
        request: &'a SolverRequest,
        ordering: &dyn CandidateOrdering,
        enabled: Option<&HashSet<Constraint>>,
    ) -> Self {
        let root_constraints = request.root_constraints();

        let mut reachable: BTreeMap<&'a str, Vec<&'a PackageRecord>> = BTreeMap::new();
        let mut queue: VecDeque<&'a str> = VecDeque::new();
        let roots = request
            .specs
            .iter()
            .chain(&request.keep)
            .filter(|s| !s.is_name_glob());
        for spec in roots {
            queue.push_back(spec.name.as_str());
        }
        while let Some(name) = queue.pop_front() {
            if reachable.contains_key(name) {
                continue;
            }
            let candidates = gather_candidates(index, request, name, ordering);
            for &record in &candidates {
                for dep in &record.depends {
                    if !reachable.contains_key(dep.name.as_str()) && !dep.is_name_glob() {
                        queue.push_back(dep.name.as_str());
                    }
                }
            }
            reachable.insert(name, candidates);
        }

        let mut names = Vec::with_capacity(reachable.len());
        let mut name_ids = HashMap::with_capacity(reachable.len());
        let mut candidates = Vec::new();
        let mut domains = Vec::with_capacity(reachable.len());
        for (name, records) in reachable {
            name_ids.insert(name, names.len());
            names.push(name.to_string());
            let mut domain = Vec::with_capacity(records.len());
            for record in records {
                domain.push(candidates.len());
                candidates.push(record);
            }
            domains.push(domain);
        }

        let mut pool = Self {
            names,
            candidates,
            domains,
            constraints: Vec::new(),
            target: Vec::new(),
            enabled: Vec::new(),
            roots: Vec::new(),
            activates: Vec::new(),
        };
        let mut interned: HashMap<Constraint, ConstraintId> = HashMap::new();
        let mut intern = |pool: &mut Pool<'a>, constraint: Constraint| -> ConstraintId {
            if let Some(&id) = interned.get(&constraint) {
                return id;
            }
            let id = pool.constraints.len();
            pool.target.push(name_ids.get(constraint.spec.name.as_str()).copied());
            pool.enabled.push(enabled.is_none_or(|set| set.contains(&constraint)));
            interned.insert(constraint.clone(), id);
            pool.constraints.push(constraint);
            id
        };

        for constraint in root_constraints {
            let id = intern(&mut pool, constraint);
            if !pool.roots.contains(&id) {
                pool.roots.push(id);
            }
        }
        for cand in 0..pool.candidates.len() {
            let record = pool.candidates[cand];
            let mut ids = Vec::with_capacity(record.depends.len() + record.constrains.len());
            for dep in &record.depends {
                ids.push(intern(&mut pool, Constraint::depends(record, dep.clone())));
            }
            for con in &record.constrains {
                ids.push(intern(&mut pool, Constraint::constrains(record, con.clone())));
            }
            pool.activates.push(ids);
        }
        pool
    }

    fn name_of(&self, name: &str) -> Option<NameId> {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }
}

/// Index records of a name, plus the installed record and virtual packages
/// the index does not serve, sorted by preference.
fn gather_candidates<'a>(
    index: &'a RepositoryIndex,
    request: &'a SolverRequest,
    name: &str,
    ordering: &dyn CandidateOrdering,
) -> Vec<&'a PackageRecord> {
    let installed = request.installed_record(name);
    let mut out: Vec<&'a PackageRecord> = index.records_for(name).collect();
    for virt in request.virtual_packages.iter().filter(|v| v.name == name) {
        if !out.iter().any(|r| r.same_build(virt)) {
            out.push(virt);
        }
    }
    if let Some(record) = installed {
        if !out.iter().any(|r| is_installed(Some(record), r)) {
            out.push(record);
        }
    }
    let ctx = OrderingContext {
        installed,
        prefer_installed: request.prefers_installed(name),
    };
    out.sort_by(|a, b| ordering.compare(a, b, &ctx));
    out
}

#[derive(Debug, Clone, Default)]
struct NameState {
    domain: Vec<CandId>,
    assigned: Option<CandId>,
    required: u32,
}

#[derive(Debug)]
enum TrailEntry {
    Domain { name: NameId, previous: Vec<CandId> },
    Assign(NameId),
    Require(NameId),
}

struct Frame {
    name: NameId,
    options: Vec<CandId>,
    next: usize,
    trail_mark: usize,
    signature: Vec<CandId>,
}

struct Search<'p, 'a> {
    pool: &'p Pool<'a>,
    states: Vec<NameState>,
    trail: Vec<TrailEntry>,
    trace: Vec<TracedConstraint>,
    traced: HashMap<ConstraintId, usize>,
    stats: SolveStats,
}

impl<'p, 'a> Search<'p, 'a> {
    fn new(pool: &'p Pool<'a>) -> Self {
        let states = pool
            .domains
            .iter()
            .map(|domain| NameState {
                domain: domain.clone(),
                ..NameState::default()
            })
            .collect();
        Self {
            pool,
            states,
            trail: Vec::new(),
            trace: Vec::new(),
            traced: HashMap::new(),
            stats: SolveStats::default(),
        }
    }

    fn trace_slot(&mut self, id: ConstraintId) -> usize {
        if let Some(&slot) = self.traced.get(&id) {
            return slot;
        }
        let slot = self.trace.len();
        self.trace.push(TracedConstraint {
            constraint: self.pool.constraints[id].clone(),
            narrowed: false,
            conflict: false,
        });
        self.traced.insert(id, slot);
        slot
    }

    /// Apply one constraint. Returns `false` on conflict.
    fn apply(&mut self, id: ConstraintId) -> bool {
        let pool = self.pool;
        if !pool.enabled[id] {
            return true;
        }
        let slot = self.trace_slot(id);
        let Some(name) = pool.target[id] else {
            return true;
        };
        let constraint = &pool.constraints[id];

        let state = &self.states[name];
        let kept: Vec<CandId> = if constraint.kind == ConstraintKind::Remove {
            Vec::new()
        } else {
            state
                .domain
                .iter()
                .copied()
                .filter(|&c| constraint.spec.matches(pool.candidates[c]))
                .collect()
        };
        if kept.len() < state.domain.len() {
            let previous = std::mem::replace(&mut self.states[name].domain, kept);
            self.trail.push(TrailEntry::Domain { name, previous });
            self.trace[slot].narrowed = true;
        }
        if constraint.kind.is_requirement() {
            self.states[name].required += 1;
            self.trail.push(TrailEntry::Require(name));
        }

        let state = &self.states[name];
        if state.required > 0 && state.domain.is_empty() {
            self.trace[slot].conflict = true;
            return false;
        }
        true
    }

    /// Choose a candidate and activate its constraints.
    fn assign(&mut self, name: NameId, cand: CandId) -> bool {
        let pool = self.pool;
        self.states[name].assigned = Some(cand);
        self.trail.push(TrailEntry::Assign(name));
        if self.states[name].domain != [cand] {
            let previous = std::mem::replace(&mut self.states[name].domain, vec![cand]);
            self.trail.push(TrailEntry::Domain { name, previous });
        }
        for &id in &pool.activates[cand] {
            if !self.apply(id) {
                return false;
            }
        }
        true
    }

    fn undo(&mut self, mark: usize) {
        while self.trail.len() > mark {
            match self.trail.pop() {
                Some(TrailEntry::Domain { name, previous }) => self.states[name].domain = previous,
                Some(TrailEntry::Assign(name)) => self.states[name].assigned = None,
                Some(TrailEntry::Require(name)) => self.states[name].required -= 1,
                None => break,
            }
        }
    }

    /// Assign every required name that has a single candidate left.
    fn propagate(&mut self) -> bool {
        loop {
            let unit = self.states.iter().position(|s| {
                s.required > 0 && s.assigned.is_none() && s.domain.len() == 1
            });
            let Some(name) = unit else {
                return true;
            };
            self.stats.propagations += 1;
            let cand = self.states[name].domain[0];
            if !self.assign(name, cand) {
                return false;
            }
        }
    }

    /// The unassigned required name with the smallest domain, lowest id first.
    fn pick_branch(&self) -> Option<NameId> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.required > 0 && s.assigned.is_none())
            .min_by_key(|(id, s)| (s.domain.len(), *id))
            .map(|(id, _)| id)
    }

    fn signature(&self) -> Vec<CandId> {
        self.states.iter().filter_map(|s| s.assigned).collect()
    }

    /// Run to completion. `Ok(true)` means every required name is assigned.
    fn run(&mut self, deadline: &Deadline) -> Result<bool, SolveError> {
        let pool = self.pool;
        for &id in &pool.roots {
            if !self.apply(id) {
                return Ok(false);
            }
        }

        let mut stack: Vec<Frame> = Vec::new();
        let mut memo = FailedStates::new();
        let mut consistent = self.propagate();
        loop {
            if consistent {
                match self.pick_branch() {
                    None => return Ok(true),
                    Some(name) => {
                        let signature = self.signature();
                        if memo.contains(&signature) {
                            self.stats.memo_hits += 1;
                        } else {
                            stack.push(Frame {
                                name,
                                options: self.states[name].domain.clone(),
                                next: 0,
                                trail_mark: self.trail.len(),
                                signature,
                            });
                        }
                    }
                }
            }
            consistent = self.decide(&mut stack, &mut memo, deadline)?;
            if !consistent {
                return Ok(false);
            }
        }
    }

    /// Try the next option of the top frame, popping exhausted frames.
    /// Returns `false` once the stack is empty.
    fn decide(
        &mut self,
        stack: &mut Vec<Frame>,
        memo: &mut FailedStates,
        deadline: &Deadline,
    ) -> Result<bool, SolveError> {
        loop {
            deadline.check()?;
            let Some(frame) = stack.last_mut() else {
                return Ok(false);
            };
            self.undo(frame.trail_mark);
            if frame.next < frame.options.len() {
                let (name, cand) = (frame.name, frame.options[frame.next]);
                frame.next += 1;
                self.stats.decisions += 1;
                if self.assign(name, cand) && self.propagate() {
                    return Ok(true);
                }
            } else if let Some(frame) = stack.pop() {
                memo.insert(frame.signature);
                self.stats.backtracks += 1;
            }
        }
    }
}

/// Run the search once.
///
/// `enabled` restricts which constraints take effect; `None` enables all.
pub fn search<'a>(
    index: &'a RepositoryIndex,
    request: &'a SolverRequest,
    ordering: &dyn CandidateOrdering,
    deadline: &Deadline,
    enabled: Option<&HashSet<Constraint>>,
) -> Result<SearchOutcome<'a>, SolveError> {
    deadline.check()?;
    let pool = Pool::build(index, request, ordering, enabled);

    let missing: Vec<String> = request
        .specs
        .iter()
        .filter(|spec| {
            enabled.is_none_or(|set| {
                set.contains(&Constraint::root(ConstraintKind::Requested, (*spec).clone()))
            })
        })
        .filter(|spec| {
            pool.name_of(&spec.name).is_none_or(|name| {
                !pool.domains[name]
                    .iter()
                    .any(|&c| spec.matches(pool.candidates[c]))
            })
        })
        .map(ToString::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(SolveError::PackagesNotFound(missing));
    }

    let mut search = Search::new(&pool);
    let solved = search.run(deadline)?;
    let stats = search.stats;
    tracing::debug!(
        names = pool.names.len(),
        candidates = pool.candidates.len(),
        decisions = stats.decisions,
        propagations = stats.propagations,
        backtracks = stats.backtracks,
        memo_hits = stats.memo_hits,
        solved,
        "search finished"
    );

    if !solved {
        return Ok(SearchOutcome::Conflict(FailureTrace {
            entries: search.trace,
        }));
    }
    let chosen = search
        .states
        .iter()
        .enumerate()
        .filter_map(|(name, s)| s.assigned.map(|c| (pool.names[name].clone(), pool.candidates[c])))
        .collect();
    Ok(SearchOutcome::Solved(chosen))
}

/// Search once and explain a failure.
pub fn solve_once(
    index: &RepositoryIndex,
    request: &SolverRequest,
    options: &SolveOptions,
    deadline: &Deadline,
) -> Result<Solution, SolveError> {
    match search(index, request, options.ordering.as_ref(), deadline, None)? {
        SearchOutcome::Solved(chosen) => Ok(Solution::from_records(chosen.into_values().cloned())),
        SearchOutcome::Conflict(trace) => {
            let core = explain::explain(index, request, options.ordering.as_ref(), &trace, deadline)?;
            Err(SolveError::Unsatisfiable(core))
        }
    }
}

/// Apply the `no-deps`/`only-deps` flags to a solution.
///
/// With `no-deps` only the explicit names change; every other name keeps
/// its installed record. With `only-deps` explicit names that were not
/// installed are left out.
pub fn apply_deps_modifier(solution: Solution, request: &SolverRequest) -> Solution {
    let explicit: BTreeSet<&str> = request.explicit_names();
    if request.flags.no_deps {
        let mut records: Vec<PackageRecord> = solution
            .records()
            .filter(|r| explicit.contains(r.name.as_str()))
            .cloned()
            .collect();
        records.extend(
            request
                .installed
                .iter()
                .filter(|r| !explicit.contains(r.name.as_str()) && !request.removals.contains(&r.name))
                .cloned(),
        );
        return Solution::from_records(records);
    }
    if request.flags.only_deps {
        let records = solution.into_records().into_iter().filter_map(|r| {
            if !explicit.contains(r.name.as_str()) {
                return Some(r);
            }
            request.installed_record(&r.name).cloned()
        });
        return Solution::from_records(records.collect::<Vec<_>>());
    }
    solution
}
