//! Read-only repository index: records grouped into per-name buckets.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use corral_core::channel::ChannelPriority;
use corral_core::record::{PackageRecord, VIRTUAL_CHANNEL};
use corral_core::spec::MatchSpec;

use crate::error::SolveError;

/// Position of a record inside the index.
pub type RecordId = usize;

/// Priority given to the virtual package channel so it always wins.
pub const VIRTUAL_PRIORITY: i32 = i32::MAX;

/// All available records, queryable by name.
///
/// Each bucket is sorted by version (newest first), then build number,
/// channel priority, timestamp and finally build string and channel name so
/// the order is total. The index never changes after construction and can
/// be shared across threads.
#[derive(Debug, Clone)]
pub struct RepositoryIndex {
    records: Vec<PackageRecord>,
    buckets: BTreeMap<String, Vec<RecordId>>,
    channel_priority: ChannelPriority,
}

/// Bucket order: newest version and highest build number first.
pub fn bucket_order(a: &PackageRecord, b: &PackageRecord) -> Ordering {
    b.version
        .cmp(&a.version)
        .then_with(|| b.build_number.cmp(&a.build_number))
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| a.build.cmp(&b.build))
        .then_with(|| a.channel.cmp(&b.channel))
}

impl RepositoryIndex {
    /// Build an index from records of any number of channels.
    ///
    /// Duplicate identities keep the first record seen. Under strict channel
    /// priority a name is served only by the highest-priority channel that
    /// provides it.
    pub fn new(
        records: impl IntoIterator<Item = PackageRecord>,
        channel_priority: ChannelPriority,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut kept: Vec<PackageRecord> = Vec::new();
        for record in records {
            if !seen.insert(record.identity()) {
                tracing::warn!(record = %record, "duplicate record identity; keeping the first one");
                continue;
            }
            kept.push(record);
        }

        let mut by_name: BTreeMap<String, Vec<RecordId>> = BTreeMap::new();
        for (id, record) in kept.iter().enumerate() {
            by_name.entry(record.name.clone()).or_default().push(id);
        }

        if channel_priority == ChannelPriority::Strict {
            for ids in by_name.values_mut() {
                let top = ids.iter().map(|&id| kept[id].priority).max();
                if let Some(top) = top {
                    let before = ids.len();
                    ids.retain(|&id| kept[id].priority == top);
                    if ids.len() < before {
                        tracing::debug!(
                            name = %kept[ids[0]].name,
                            shadowed = before - ids.len(),
                            "strict channel priority shadowed lower-priority records"
                        );
                    }
                }
            }
        }

        for ids in by_name.values_mut() {
            ids.sort_by(|&a, &b| bucket_order(&kept[a], &kept[b]));
        }

        Self {
            records: kept,
            buckets: by_name,
            channel_priority,
        }
    }

    /// Build an index that also serves the given virtual packages from the
    /// `@virtual` channel with the highest priority.
    pub fn with_virtual_packages(
        records: impl IntoIterator<Item = PackageRecord>,
        virtual_packages: Vec<PackageRecord>,
        channel_priority: ChannelPriority,
    ) -> Self {
        let virtuals = virtual_packages.into_iter().map(|mut r| {
            r.channel = VIRTUAL_CHANNEL.to_string();
            r.priority = VIRTUAL_PRIORITY;
            r
        });
        Self::new(virtuals.chain(records), channel_priority)
    }

    pub fn channel_priority(&self) -> ChannelPriority {
        self.channel_priority
    }

    pub fn record(&self, id: RecordId) -> &PackageRecord {
        &self.records[id]
    }

    /// Sorted candidate ids for a package name.
    pub fn bucket(&self, name: &str) -> &[RecordId] {
        self.buckets.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Records for a package name in bucket order.
    pub fn records_for(&self, name: &str) -> impl Iterator<Item = &PackageRecord> {
        self.bucket(name).iter().map(|&id| &self.records[id])
    }

    pub fn contains_name(&self, name: &str) -> bool {
        !self.bucket(name).is_empty()
    }

    /// All package names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    /// Number of records served by the buckets.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record matching `spec`; name globs scan all buckets.
    pub fn search(&self, spec: &MatchSpec) -> Vec<&PackageRecord> {
        if spec.is_name_glob() {
            return self
                .buckets
                .iter()
                .filter(|(name, _)| spec.matches_name(name))
                .flat_map(|(_, ids)| ids.iter().map(|&id| &self.records[id]))
                .filter(|r| spec.matches(r))
                .collect();
        }
        self.records_for(&spec.name).filter(|r| spec.matches(r)).collect()
    }

    /// Records whose dependencies name `name`, sorted by name then bucket order.
    pub fn whoneeds(&self, name: &str) -> Vec<&PackageRecord> {
        self.buckets
            .values()
            .flat_map(|ids| ids.iter().map(|&id| &self.records[id]))
            .filter(|r| r.depends.iter().any(|d| d.name == name))
            .collect()
    }

    /// Check the index invariants. A violation is an internal error.
    pub fn verify(&self) -> Result<(), SolveError> {
        for (name, ids) in &self.buckets {
            let mut seen = HashSet::new();
            for &id in ids {
                let record = self.records.get(id).ok_or_else(|| {
                    SolveError::IndexCorrupt(format!("bucket '{name}' references missing record {id}"))
                })?;
                if &record.name != name {
                    return Err(SolveError::IndexCorrupt(format!(
                        "record {record} filed under bucket '{name}'"
                    )));
                }
                if !seen.insert(record.identity()) {
                    return Err(SolveError::IndexCorrupt(format!(
                        "duplicate identity {record} in bucket '{name}'"
                    )));
                }
            }
            for window in ids.windows(2) {
                let (a, b) = (&self.records[window[0]], &self.records[window[1]]);
                if bucket_order(a, b) == Ordering::Greater {
                    return Err(SolveError::IndexCorrupt(format!(
                        "bucket '{name}' is not sorted: {a} before {b}"
                    )));
                }
            }
            if self.channel_priority == ChannelPriority::Strict {
                let priorities: HashSet<i32> = ids.iter().map(|&id| self.records[id].priority).collect();
                if priorities.len() > 1 {
                    return Err(SolveError::IndexCorrupt(format!(
                        "bucket '{name}' mixes channel priorities under strict priority"
                    )));
                }
            }
        }
        Ok(())
    }
}
