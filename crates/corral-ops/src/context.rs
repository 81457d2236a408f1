//! Shared setup for every operation that needs an index: resolve channels,
//! load their repodata and build the repository index.

use std::sync::Arc;

use corral_channel::loader::{load_channels, LoadOptions};
use corral_core::channel::Channel;
use corral_core::config::GlobalConfig;
use corral_core::record::PackageRecord;
use corral_core::spec::MatchSpec;
use corral_solver::policy::DefaultOrdering;
use corral_solver::{RepositoryIndex, Solution, SolveOptions, SolverRequest};
use corral_util::errors::CorralError;
use corral_util::progress;

/// Command-line overrides applied on top of [`GlobalConfig`].
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Channel references replacing the configured ones when non-empty.
    pub channels: Vec<String>,
    pub offline: bool,
}

/// Configuration plus a loaded, read-only repository index.
pub struct SolveContext {
    pub config: GlobalConfig,
    pub channels: Vec<Channel>,
    pub index: Arc<RepositoryIndex>,
}

impl SolveContext {
    pub fn new(config: GlobalConfig, channels: Vec<Channel>, index: RepositoryIndex) -> Self {
        Self {
            config,
            channels,
            index: Arc::new(index),
        }
    }

    /// Resolve the channels, fetch their repodata and build the index.
    pub async fn load(config: GlobalConfig, opts: &ContextOptions) -> miette::Result<Self> {
        let references = if opts.channels.is_empty() {
            config.channels.clone()
        } else {
            opts.channels.clone()
        };
        if references.is_empty() {
            return Err(CorralError::Config {
                message: "no channels configured; pass -c/--channel or set `channels`".to_string(),
            }
            .into());
        }
        let channels = Channel::resolve_all(&references, &config.channel_alias);

        let mut load_opts = LoadOptions::from_config(&config, &channels);
        load_opts.offline = opts.offline;

        let sp = progress::spinner("Loading channels...");
        let loaded = load_channels(&channels, &load_opts).await;
        sp.finish_and_clear();

        let mut records = Vec::new();
        let mut skipped = 0;
        for data in loaded? {
            tracing::debug!(channel = %data.channel.name, records = data.records.len(), "channel loaded");
            skipped += data.skipped;
            records.extend(data.records);
        }
        if skipped > 0 {
            progress::status_warn("Skipped", &format!("{skipped} malformed record(s)"));
        }

        let virtual_packages = virtual_packages(&config)?;
        let index =
            RepositoryIndex::with_virtual_packages(records, virtual_packages, config.channel_priority);
        progress::status_info(
            "Loaded",
            &format!("{} records from {} channel(s)", index.len(), channels.len()),
        );

        Ok(Self::new(config, channels, index))
    }

    /// The configured `pinned-packages`, parsed.
    pub fn pinned_specs(&self) -> Result<Vec<MatchSpec>, CorralError> {
        self.config
            .pinned_packages
            .iter()
            .map(|s| MatchSpec::parse(s))
            .collect()
    }

    /// Solve `request` on the blocking pool against the shared index. The
    /// request is handed back alongside the solution.
    pub async fn solve(
        &self,
        request: SolverRequest,
        timeout_ms: Option<i64>,
    ) -> miette::Result<(SolverRequest, Solution)> {
        let index = Arc::clone(&self.index);
        let config = self.config.clone();
        let (request, solved) = tokio::task::spawn_blocking(move || {
            let solved = corral_solver::solve(&index, &request, &solve_options(&config, timeout_ms));
            (request, solved)
        })
        .await
        .map_err(|e| miette::miette!("Background task failed: {}", e))?;
        let solution = solved.map_err(CorralError::from)?;
        Ok((request, solution))
    }
}

/// Solver options from the configuration, with an optional budget override.
pub(crate) fn solve_options(config: &GlobalConfig, timeout_ms: Option<i64>) -> SolveOptions {
    SolveOptions::new(timeout_ms.unwrap_or(config.timeout_ms))
        .with_ordering(DefaultOrdering::new(config.strategy, config.channel_priority))
        .with_max_attempts(config.max_attempts)
}

fn virtual_packages(config: &GlobalConfig) -> Result<Vec<PackageRecord>, CorralError> {
    config
        .effective_virtual_packages()
        .iter()
        .map(|decl| PackageRecord::virtual_package(decl))
        .collect()
}
