//! Candidate preference: which of several satisfying records to try first.

use std::cmp::Ordering;

use corral_core::channel::ChannelPriority;
use corral_core::config::SolveStrategy;
use corral_core::record::PackageRecord;

/// What the comparator knows about the name being ordered.
#[derive(Debug, Clone, Copy)]
pub struct OrderingContext<'a> {
    /// The currently installed record of this name, if any.
    pub installed: Option<&'a PackageRecord>,
    /// False when the name is being explicitly updated.
    pub prefer_installed: bool,
}

/// Tie-break order for equally constraint-satisfying candidates.
///
/// `Ordering::Less` means `a` is tried before `b`.
pub trait CandidateOrdering: Send + Sync {
    fn compare(&self, a: &PackageRecord, b: &PackageRecord, ctx: &OrderingContext<'_>) -> Ordering;
}

/// Whether `candidate` is the installed record (channel ignored when unknown).
pub fn is_installed(installed: Option<&PackageRecord>, candidate: &PackageRecord) -> bool {
    installed.is_some_and(|inst| {
        inst.same_build(candidate)
            && (inst.channel.is_empty()
                || candidate.channel.is_empty()
                || inst.channel == candidate.channel)
    })
}

/// Installed record, channel priority, version, build number, timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOrdering {
    pub strategy: SolveStrategy,
    pub channel_priority: ChannelPriority,
}

impl DefaultOrdering {
    pub fn new(strategy: SolveStrategy, channel_priority: ChannelPriority) -> Self {
        Self {
            strategy,
            channel_priority,
        }
    }
}

impl CandidateOrdering for DefaultOrdering {
    fn compare(&self, a: &PackageRecord, b: &PackageRecord, ctx: &OrderingContext<'_>) -> Ordering {
        let installed = if ctx.prefer_installed {
            let (ia, ib) = (is_installed(ctx.installed, a), is_installed(ctx.installed, b));
            ib.cmp(&ia)
        } else {
            Ordering::Equal
        };
        let channel = match self.channel_priority {
            ChannelPriority::Disabled => Ordering::Equal,
            _ => b.priority.cmp(&a.priority),
        };
        let version = match self.strategy {
            SolveStrategy::Highest => b.version.cmp(&a.version),
            SolveStrategy::Lowest => a.version.cmp(&b.version),
        };
        installed
            .then(channel)
            .then(version)
            .then_with(|| b.build_number.cmp(&a.build_number))
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| a.build.cmp(&b.build))
            .then_with(|| a.channel.cmp(&b.channel))
    }
}
