//! Request compiler: user intents plus environment state into a normalized
//! set of constraints.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use corral_core::record::{PackageRecord, RecordIdentity};
use corral_core::spec::MatchSpec;
use corral_util::errors::CorralError;

/// What the user asked for, as raw spec strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Install(String),
    Update(String),
    Remove(String),
}

/// Global switches that change how a request is built or post-processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestFlags {
    /// Only change the explicitly requested packages.
    pub no_deps: bool,
    /// Install the dependencies of the requested packages but not the
    /// packages themselves.
    pub only_deps: bool,
    /// Relink requested packages even when they are unchanged.
    pub force_reinstall: bool,
    /// Treat every installed package as an update target.
    pub update_all: bool,
    /// Drop installed packages that nothing in the history needs.
    pub prune: bool,
    /// Lock installed packages to their exact records when possible.
    pub freeze_installed: bool,
}

/// Origin of a constraint. Decides whether it requires a package to be
/// present or only restricts which record may be chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstraintKind {
    /// An explicit spec from the user.
    Requested,
    /// An installed package that must stay installed.
    Keep,
    /// A configured pin.
    Pin,
    /// An installed record locked by `freeze-installed`.
    Frozen,
    /// A package being removed. Allows no record.
    Remove,
    /// A dependency of a chosen record.
    Depends,
    /// A `constrains` entry of a chosen record.
    Constrains,
}

impl ConstraintKind {
    /// Requirements force their name into the solution; the other kinds only
    /// narrow the candidates of a name that is present.
    pub fn is_requirement(self) -> bool {
        matches!(self, Self::Requested | Self::Keep | Self::Depends)
    }

    /// Explicit user input that a conflict explanation takes as given.
    pub fn is_background(self) -> bool {
        matches!(self, Self::Requested | Self::Remove)
    }
}

/// One constraint of a solve.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    pub kind: ConstraintKind,
    pub spec: MatchSpec,
    /// The record that declares a `Depends`/`Constrains` constraint.
    pub source: Option<RecordIdentity>,
}

impl Constraint {
    pub fn root(kind: ConstraintKind, spec: MatchSpec) -> Self {
        Self {
            kind,
            spec,
            source: None,
        }
    }

    pub fn depends(source: &PackageRecord, spec: MatchSpec) -> Self {
        Self {
            kind: ConstraintKind::Depends,
            spec,
            source: Some(source.identity()),
        }
    }

    pub fn constrains(source: &PackageRecord, spec: MatchSpec) -> Self {
        Self {
            kind: ConstraintKind::Constrains,
            spec,
            source: Some(source.identity()),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self
            .source
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        match self.kind {
            ConstraintKind::Requested => write!(f, "requested {}", self.spec),
            ConstraintKind::Keep => write!(f, "installed {} must stay installed", self.spec),
            ConstraintKind::Pin => write!(f, "pinned {}", self.spec),
            ConstraintKind::Frozen => write!(f, "frozen {}", self.spec),
            ConstraintKind::Remove => write!(f, "{} is being removed", self.spec.name),
            ConstraintKind::Depends => write!(f, "{source} depends on {}", self.spec),
            ConstraintKind::Constrains => write!(f, "{source} constrains {}", self.spec),
        }
    }
}

/// The normalized input of a solve.
#[derive(Debug, Clone, Default)]
pub struct SolverRequest {
    /// Explicit specs, at most one per name unless they could not be merged.
    pub specs: Vec<MatchSpec>,
    /// Currently installed records.
    pub installed: Vec<PackageRecord>,
    /// Installed packages that stay unless removed.
    pub keep: Vec<MatchSpec>,
    pub pins: Vec<MatchSpec>,
    pub frozen: Vec<MatchSpec>,
    /// Names that must not be in the solution.
    pub removals: BTreeSet<String>,
    /// Names for which the installed record gets no preference.
    pub update_names: BTreeSet<String>,
    pub virtual_packages: Vec<PackageRecord>,
    pub flags: RequestFlags,
}

impl SolverRequest {
    /// A request for the given explicit specs and nothing else.
    pub fn new(specs: Vec<MatchSpec>) -> Self {
        Self {
            specs,
            ..Self::default()
        }
    }

    pub fn with_installed(mut self, installed: Vec<PackageRecord>) -> Self {
        self.installed = installed;
        self
    }

    pub fn with_flags(mut self, flags: RequestFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn installed_record(&self, name: &str) -> Option<&PackageRecord> {
        self.installed.iter().find(|r| r.name == name)
    }

    /// Names of the explicit specs.
    pub fn explicit_names(&self) -> BTreeSet<&str> {
        self.specs.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn prefers_installed(&self, name: &str) -> bool {
        !self.update_names.contains(name)
    }

    /// Root constraints in the order they are applied.
    pub fn root_constraints(&self) -> Vec<Constraint> {
        let mut out = Vec::new();
        out.extend(self.specs.iter().cloned().map(|s| Constraint::root(ConstraintKind::Requested, s)));
        out.extend(self.keep.iter().cloned().map(|s| Constraint::root(ConstraintKind::Keep, s)));
        out.extend(self.pins.iter().cloned().map(|s| Constraint::root(ConstraintKind::Pin, s)));
        out.extend(self.frozen.iter().cloned().map(|s| Constraint::root(ConstraintKind::Frozen, s)));
        out.extend(
            self.removals
                .iter()
                .map(|name| Constraint::root(ConstraintKind::Remove, MatchSpec::named(name))),
        );
        out
    }

    /// Drop the frozen constraints of the given names.
    pub fn unfreeze(&mut self, names: &BTreeSet<String>) {
        self.frozen.retain(|spec| !names.contains(&spec.name));
    }
}

/// Inputs of [`compile`] that come from the environment and configuration.
#[derive(Debug, Clone, Default)]
pub struct CompileContext<'a> {
    /// Specs the user requested in earlier transactions.
    pub history: &'a [MatchSpec],
    pub flags: RequestFlags,
    pub virtual_packages: Vec<PackageRecord>,
}

/// Compile intents into a [`SolverRequest`].
///
/// A bare name means "any version, prefer what is installed". Removal names
/// may be globs matched against installed names; a removal also releases the
/// installed packages that depend on the removed one.
pub fn compile(
    intents: &[Intent],
    installed: &[PackageRecord],
    pins: &[MatchSpec],
    ctx: &CompileContext<'_>,
) -> Result<SolverRequest, CorralError> {
    let mut explicit: Vec<MatchSpec> = Vec::new();
    let mut update_names = BTreeSet::new();
    let mut forbidden = BTreeSet::new();

    for intent in intents {
        match intent {
            Intent::Install(text) => push_merged(&mut explicit, MatchSpec::parse(text)?),
            Intent::Update(text) => {
                let spec = MatchSpec::parse(text)?;
                update_names.insert(spec.name.clone());
                push_merged(&mut explicit, spec);
            }
            Intent::Remove(text) => {
                let spec = MatchSpec::parse(text)?;
                if spec.is_name_glob() {
                    forbidden.extend(
                        installed
                            .iter()
                            .filter(|r| spec.matches(r))
                            .map(|r| r.name.clone()),
                    );
                } else {
                    forbidden.insert(spec.name.clone());
                }
            }
        }
    }

    if ctx.flags.update_all {
        update_names.extend(installed.iter().map(|r| r.name.clone()));
    }

    let released = with_dependents(&forbidden, installed);
    let explicit_names: BTreeSet<String> = explicit.iter().map(|s| s.name.clone()).collect();
    let history_names: BTreeSet<&str> = ctx.history.iter().map(|s| s.name.as_str()).collect();

    let mut keep = Vec::new();
    for spec in ctx.history {
        if explicit_names.contains(&spec.name) || released.contains(&spec.name) {
            continue;
        }
        keep.push(spec.clone());
    }
    if !ctx.flags.prune {
        for record in installed {
            if record.is_virtual()
                || explicit_names.contains(&record.name)
                || released.contains(&record.name)
                || history_names.contains(record.name.as_str())
            {
                continue;
            }
            keep.push(MatchSpec::named(&record.name));
        }
    }

    let mut frozen = Vec::new();
    if ctx.flags.freeze_installed {
        for record in installed {
            if record.is_virtual()
                || explicit_names.contains(&record.name)
                || released.contains(&record.name)
                || update_names.contains(&record.name)
            {
                continue;
            }
            frozen.push(MatchSpec::for_record(record));
        }
    }

    tracing::debug!(
        explicit = explicit.len(),
        keep = keep.len(),
        frozen = frozen.len(),
        removals = forbidden.len(),
        "compiled solver request"
    );

    Ok(SolverRequest {
        specs: explicit,
        installed: installed.to_vec(),
        keep,
        pins: pins.to_vec(),
        frozen,
        removals: forbidden,
        update_names,
        virtual_packages: ctx.virtual_packages.clone(),
        flags: ctx.flags,
    })
}

/// Merge a spec into the list, intersecting with an existing spec of the
/// same name when the two are compatible.
fn push_merged(specs: &mut Vec<MatchSpec>, spec: MatchSpec) {
    for existing in specs.iter_mut().filter(|s| s.name == spec.name) {
        if let Some(merged) = existing.merge(&spec) {
            *existing = merged;
            return;
        }
    }
    specs.push(spec);
}

/// The removed names plus every installed package that transitively
/// depends on one of them.
fn with_dependents(removed: &BTreeSet<String>, installed: &[PackageRecord]) -> BTreeSet<String> {
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for record in installed {
        for dep in record.dependency_names() {
            dependents.entry(dep).or_default().push(&record.name);
        }
    }

    let mut out = removed.clone();
    let mut queue: VecDeque<&str> = removed.iter().map(String::as_str).collect();
    while let Some(name) = queue.pop_front() {
        for &dependent in dependents.get(name).into_iter().flatten() {
            if out.insert(dependent.to_string()) {
                queue.push_back(dependent);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::version::Version;

    fn rec(name: &str, version: &str, depends: &[&str]) -> PackageRecord {
        PackageRecord::new(name, Version::parse(version).unwrap(), "0")
            .with_channel("c", 1)
            .with_depends(depends.iter().map(|d| MatchSpec::parse(d).unwrap()).collect())
    }

    fn names(specs: &[MatchSpec]) -> Vec<&str> {
        specs.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn installed_packages_are_kept() {
        let installed = vec![rec("a", "1.0", &[]), rec("b", "1.0", &[])];
        let req = compile(
            &[Intent::Install("c".into())],
            &installed,
            &[],
            &CompileContext::default(),
        )
        .unwrap();
        assert_eq!(names(&req.specs), vec!["c"]);
        assert_eq!(names(&req.keep), vec!["a", "b"]);
        assert!(req.removals.is_empty());
    }

    #[test]
    fn explicit_specs_merge_per_name() {
        let req = compile(
            &[Intent::Install("a >=1".into()), Intent::Install("a <2".into())],
            &[],
            &[],
            &CompileContext::default(),
        )
        .unwrap();
        assert_eq!(req.specs.len(), 1);
        assert_eq!(req.specs[0].to_string(), "a >=1,<2");
    }

    #[test]
    fn removal_releases_dependents() {
        let installed = vec![
            rec("lib", "1.0", &[]),
            rec("app", "1.0", &["lib"]),
            rec("tool", "1.0", &["app"]),
            rec("other", "1.0", &[]),
        ];
        let history = vec![MatchSpec::parse("tool").unwrap()];
        let ctx = CompileContext {
            history: &history,
            ..CompileContext::default()
        };
        let req = compile(&[Intent::Remove("lib".into())], &installed, &[], &ctx).unwrap();
        assert_eq!(names(&req.keep), vec!["other"]);
        assert_eq!(req.removals.iter().collect::<Vec<_>>(), vec!["lib"]);
    }

    #[test]
    fn removal_globs_match_installed_names() {
        let installed = vec![rec("py-a", "1.0", &[]), rec("py-b", "1.0", &[]), rec("c", "1.0", &[])];
        let req = compile(
            &[Intent::Remove("py-*".into())],
            &installed,
            &[],
            &CompileContext::default(),
        )
        .unwrap();
        assert_eq!(req.removals.iter().collect::<Vec<_>>(), vec!["py-a", "py-b"]);
        assert_eq!(names(&req.keep), vec!["c"]);
    }

    #[test]
    fn removing_missing_package_is_not_an_error() {
        let req = compile(&[Intent::Remove("ghost".into())], &[], &[], &CompileContext::default()).unwrap();
        assert!(req.removals.contains("ghost"));
    }

    #[test]
    fn prune_keeps_only_history() {
        let installed = vec![rec("a", "1.0", &[]), rec("b", "1.0", &[])];
        let history = vec![MatchSpec::parse("a >=1").unwrap()];
        let ctx = CompileContext {
            history: &history,
            flags: RequestFlags {
                prune: true,
                ..RequestFlags::default()
            },
            ..CompileContext::default()
        };
        let req = compile(&[], &installed, &[], &ctx).unwrap();
        assert_eq!(req.keep, history);
    }

    #[test]
    fn update_disables_installed_preference() {
        let installed = vec![rec("a", "1.0", &[]), rec("b", "1.0", &[])];
        let req = compile(&[Intent::Update("a".into())], &installed, &[], &CompileContext::default()).unwrap();
        assert!(!req.prefers_installed("a"));
        assert!(req.prefers_installed("b"));

        let ctx = CompileContext {
            flags: RequestFlags {
                update_all: true,
                ..RequestFlags::default()
            },
            ..CompileContext::default()
        };
        let all = compile(&[], &installed, &[], &ctx).unwrap();
        assert!(!all.prefers_installed("b"));
    }

    #[test]
    fn freeze_installed_locks_records() {
        let installed = vec![rec("a", "1.0", &[]), rec("b", "1.0", &[])];
        let ctx = CompileContext {
            flags: RequestFlags {
                freeze_installed: true,
                ..RequestFlags::default()
            },
            ..CompileContext::default()
        };
        let req = compile(&[Intent::Install("a".into())], &installed, &[], &ctx).unwrap();
        assert_eq!(req.frozen, vec![MatchSpec::for_record(&installed[1])]);
    }

    #[test]
    fn malformed_spec_is_rejected() {
        let err = compile(&[Intent::Install("a >=>1".into())], &[], &[], &CompileContext::default());
        assert!(matches!(err, Err(CorralError::InvalidSpec { .. })));
    }

    #[test]
    fn root_constraint_display() {
        let c = Constraint::root(ConstraintKind::Remove, MatchSpec::named("x"));
        assert_eq!(c.to_string(), "x is being removed");
        let dep = Constraint::depends(&rec("app", "1.0", &[]), MatchSpec::parse("lib <2").unwrap());
        assert_eq!(dep.to_string(), "c::app-1.0-0 depends on lib <2");
    }
}
