//! Transaction planning: the ordered operations that turn the installed set
//! into a solution.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use corral_core::record::{PackageRecord, PathEntry};
use serde::Serialize;

use crate::graph::SolutionGraph;
use crate::solver::Solution;

/// One step of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Remove the given paths of a record. `cleanup` marks the removal of
    /// stale files left behind by an unsafe in-place replacement.
    Unlink {
        record: PackageRecord,
        paths: Vec<PathBuf>,
        cleanup: bool,
    },
    /// Link a record, overwriting `replaces` in place when set.
    Link {
        record: PackageRecord,
        #[serde(skip_serializing_if = "Option::is_none")]
        replaces: Option<PackageRecord>,
        paths: Vec<PathBuf>,
    },
}

impl Operation {
    pub fn record(&self) -> &PackageRecord {
        match self {
            Operation::Unlink { record, .. } | Operation::Link { record, .. } => record,
        }
    }
}

/// Ordered operations for one environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransactionPlan {
    pub prefix: PathBuf,
    pub operations: Vec<Operation>,
}

/// How a linked package relates to what was installed before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Removed,
    Updated,
    Downgraded,
    Changed,
    Reinstalled,
    Installed,
}

impl ChangeKind {
    fn heading(self) -> &'static str {
        match self {
            ChangeKind::Removed => "The following packages will be REMOVED:",
            ChangeKind::Updated => "The following packages will be UPDATED:",
            ChangeKind::Downgraded => "The following packages will be DOWNGRADED:",
            ChangeKind::Changed => "The following packages will be SUPERSEDED by a different build:",
            ChangeKind::Reinstalled => "The following packages will be REINSTALLED:",
            ChangeKind::Installed => "The following NEW packages will be INSTALLED:",
        }
    }
}

/// Plan the operations from `current` to `solution`.
///
/// Packages leaving the environment are unlinked first, dependents before
/// their dependencies. New and replaced packages are then linked with
/// dependencies first. A replacement overwrites in place unless the old
/// record ships paths the new one does not or a shared path changes its
/// link target; those paths are unlinked right after the link, except paths
/// another package in the solution ships. Names in
/// `reinstall` are relinked even when unchanged. Virtual packages are never
/// linked or unlinked.
pub fn plan(
    prefix: &Path,
    current: &[PackageRecord],
    solution: &Solution,
    reinstall: &BTreeSet<String>,
) -> TransactionPlan {
    let before: BTreeMap<&str, &PackageRecord> = current
        .iter()
        .filter(|r| !r.is_virtual())
        .map(|r| (r.name.as_str(), r))
        .collect();
    let after: BTreeMap<&str, &PackageRecord> = solution
        .records()
        .filter(|r| !r.is_virtual())
        .map(|r| (r.name.as_str(), r))
        .collect();

    let mut operations = Vec::new();

    let current_graph = SolutionGraph::new(before.values().copied(), &[]);
    for record in current_graph.dependency_order().into_iter().rev() {
        if !after.contains_key(record.name.as_str()) {
            operations.push(Operation::Unlink {
                record: record.clone(),
                paths: target_paths(prefix, &record.files),
                cleanup: false,
            });
        }
    }

    // Paths shipped by the solution, keyed to the package that ships them.
    let claimed: BTreeMap<&str, &str> = after
        .values()
        .flat_map(|r| r.files.iter().map(move |f| (f.path.as_str(), r.name.as_str())))
        .collect();

    let solution_graph = SolutionGraph::new(after.values().copied(), &[]);
    for record in solution_graph.dependency_order() {
        let previous = before.get(record.name.as_str()).copied();
        let unchanged = previous.is_some_and(|old| is_same_record(old, record));
        if unchanged && !reinstall.contains(&record.name) {
            continue;
        }
        operations.push(Operation::Link {
            record: record.clone(),
            replaces: previous.cloned(),
            paths: target_paths(prefix, &record.files),
        });
        if let Some(old) = previous {
            let stale: Vec<PathEntry> = unsafe_paths(old, record)
                .into_iter()
                .filter(|entry| claimed.get(entry.path.as_str()).is_none_or(|owner| *owner == record.name))
                .collect();
            if !stale.is_empty() {
                tracing::debug!(package = %record.name, paths = stale.len(), "in-place replacement needs cleanup");
                operations.push(Operation::Unlink {
                    record: old.clone(),
                    paths: target_paths(prefix, &stale),
                    cleanup: true,
                });
            }
        }
    }

    TransactionPlan {
        prefix: prefix.to_path_buf(),
        operations,
    }
}

fn is_same_record(old: &PackageRecord, new: &PackageRecord) -> bool {
    old.same_build(new) && (old.channel.is_empty() || new.channel.is_empty() || old.channel == new.channel)
}

/// Paths of `old` that overwriting with `new` would leave wrong: files the
/// new record no longer ships and shared paths whose link target changes.
fn unsafe_paths(old: &PackageRecord, new: &PackageRecord) -> Vec<PathEntry> {
    let incoming: BTreeMap<&str, &PathEntry> = new.files.iter().map(|p| (p.path.as_str(), p)).collect();
    old.files
        .iter()
        .filter(|entry| match incoming.get(entry.path.as_str()) {
            None => true,
            Some(replacement) => replacement.link_target != entry.link_target,
        })
        .cloned()
        .collect()
}

fn target_paths(prefix: &Path, entries: &[PathEntry]) -> Vec<PathBuf> {
    entries.iter().map(|e| prefix.join(&e.path)).collect()
}

impl TransactionPlan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Linked records in operation order.
    pub fn links(&self) -> impl Iterator<Item = &PackageRecord> {
        self.operations.iter().filter_map(|op| match op {
            Operation::Link { record, .. } => Some(record),
            Operation::Unlink { .. } => None,
        })
    }

    /// Records removed from the environment, cleanups excluded.
    pub fn removals(&self) -> impl Iterator<Item = &PackageRecord> {
        self.operations.iter().filter_map(|op| match op {
            Operation::Unlink {
                record,
                cleanup: false,
                ..
            } => Some(record),
            _ => None,
        })
    }

    /// Every package change grouped by kind, each group sorted by name.
    pub fn changes(&self) -> BTreeMap<ChangeKind, Vec<String>> {
        let mut out: BTreeMap<ChangeKind, Vec<String>> = BTreeMap::new();
        for op in &self.operations {
            let (kind, line) = match op {
                Operation::Unlink { cleanup: true, .. } => continue,
                Operation::Unlink { record, .. } => {
                    (ChangeKind::Removed, format!("{:<24} {}-{}", record.name, record.version, record.build))
                }
                Operation::Link {
                    record,
                    replaces: None,
                    ..
                } => (
                    ChangeKind::Installed,
                    format!("{:<24} {}", record.name, channel_label(record)),
                ),
                Operation::Link {
                    record,
                    replaces: Some(old),
                    ..
                } => {
                    let kind = if record.version > old.version {
                        ChangeKind::Updated
                    } else if record.version < old.version {
                        ChangeKind::Downgraded
                    } else if is_same_record(old, record) {
                        ChangeKind::Reinstalled
                    } else {
                        ChangeKind::Changed
                    };
                    (
                        kind,
                        format!("{:<24} {} --> {}", record.name, channel_label(old), channel_label(record)),
                    )
                }
            };
            out.entry(kind).or_default().push(line);
        }
        for lines in out.values_mut() {
            lines.sort();
        }
        out
    }
}

fn channel_label(record: &PackageRecord) -> String {
    if record.channel.is_empty() {
        format!("{}-{}", record.version, record.build)
    } else {
        format!("{}/{}-{}", record.channel, record.version, record.build)
    }
}

impl fmt::Display for TransactionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "## Package Plan ##")?;
        writeln!(f)?;
        writeln!(f, "  environment location: {}", self.prefix.display())?;
        if self.is_empty() {
            writeln!(f)?;
            return writeln!(f, "All requested packages already installed.");
        }
        for (kind, lines) in self.changes() {
            writeln!(f)?;
            writeln!(f, "{}", kind.heading())?;
            writeln!(f)?;
            for line in lines {
                writeln!(f, "  {}", line.trim_end())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::version::Version;

    fn rec(name: &str, version: &str) -> PackageRecord {
        PackageRecord::new(name, Version::parse(version).unwrap(), "0").with_channel("c", 1)
    }

    #[test]
    fn unchanged_environment_is_empty() {
        let current = vec![rec("a", "1.0")];
        let plan = plan(Path::new("/env"), &current, &Solution::from_records(current.clone()), &BTreeSet::new());
        assert!(plan.is_empty());
        assert!(plan.to_string().contains("All requested packages already installed."));
    }

    #[test]
    fn force_reinstall_relinks() {
        let current = vec![rec("a", "1.0")];
        let reinstall = BTreeSet::from(["a".to_string()]);
        let plan = plan(Path::new("/env"), &current, &Solution::from_records(current.clone()), &reinstall);
        assert_eq!(plan.operations.len(), 1);
        assert!(plan.changes().contains_key(&ChangeKind::Reinstalled));
    }

    #[test]
    fn safe_overwrite_has_no_cleanup() {
        let old = rec("a", "1.0").with_files(vec![PathEntry::file("bin/a")]);
        let new = rec("a", "2.0").with_files(vec![PathEntry::file("bin/a"), PathEntry::file("share/a")]);
        let plan = plan(Path::new("/env"), &[old], &Solution::from_records(vec![new]), &BTreeSet::new());
        assert_eq!(plan.operations.len(), 1);
        let Operation::Link { replaces, paths, .. } = &plan.operations[0] else {
            panic!("expected a link");
        };
        assert!(replaces.is_some());
        assert_eq!(paths, &vec![PathBuf::from("/env/bin/a"), PathBuf::from("/env/share/a")]);
    }

    #[test]
    fn stale_files_are_cleaned_after_link() {
        let old = rec("a", "1.0").with_files(vec![PathEntry::file("bin/a"), PathEntry::file("lib/old.so")]);
        let new = rec("a", "2.0").with_files(vec![PathEntry::file("bin/a")]);
        let plan = plan(Path::new("/env"), &[old], &Solution::from_records(vec![new]), &BTreeSet::new());
        assert_eq!(plan.operations.len(), 2);
        assert!(matches!(plan.operations[0], Operation::Link { .. }));
        match &plan.operations[1] {
            Operation::Unlink { paths, cleanup, .. } => {
                assert!(cleanup);
                assert_eq!(paths, &vec![PathBuf::from("/env/lib/old.so")]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(plan.removals().count(), 0);
    }

    #[test]
    fn changed_link_target_is_unsafe() {
        let old = rec("a", "1.0").with_files(vec![PathEntry::symlink("lib/a.so", "a.so.1")]);
        let new = rec("a", "1.1").with_files(vec![PathEntry::symlink("lib/a.so", "a.so.2")]);
        let plan = plan(Path::new("/env"), &[old], &Solution::from_records(vec![new]), &BTreeSet::new());
        assert!(matches!(plan.operations[1], Operation::Unlink { cleanup: true, .. }));
    }

    #[test]
    fn summary_sections() {
        let current = vec![rec("gone", "1.0"), rec("up", "1.0"), rec("down", "2.0")];
        let target = vec![rec("up", "2.0"), rec("down", "1.0"), rec("new", "0.1")];
        let plan = plan(Path::new("/env"), &current, &Solution::from_records(target), &BTreeSet::new());
        let text = plan.to_string();
        assert!(text.contains("environment location: /env"));
        assert!(text.contains("REMOVED"));
        assert!(text.contains("UPDATED"));
        assert!(text.contains("DOWNGRADED"));
        assert!(text.contains("NEW packages will be INSTALLED"));
        assert!(text.contains("c/1.0-0 --> c/2.0-0"));
    }

    #[test]
    fn json_tags_operations() {
        let plan = plan(
            Path::new("/env"),
            &[],
            &Solution::from_records(vec![rec("a", "1.0")]),
            &BTreeSet::new(),
        );
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["operations"][0]["op"], "link");
        assert_eq!(json["operations"][0]["record"]["name"], "a");
    }
}
