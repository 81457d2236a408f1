//! Concurrent loading of every (channel, subdir) pair into package records.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use corral_core::channel::Channel;
use corral_core::config::GlobalConfig;
use corral_core::record::PackageRecord;
use corral_util::errors::CorralError;
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::auth::ChannelAuth;
use crate::cache::RepodataCache;
use crate::download;
use crate::repodata::{self, ParsedRepoData};

/// Knobs for [`load_channels`], usually derived from [`GlobalConfig`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub subdirs: Vec<String>,
    pub use_only_tar_bz2: bool,
    pub concurrency: usize,
    pub cache_dir: PathBuf,
    pub max_age: Duration,
    /// Never touch the network; use cached repodata whatever its age.
    pub offline: bool,
    /// Credentials keyed by channel name.
    pub auth: BTreeMap<String, ChannelAuth>,
}

impl LoadOptions {
    pub fn from_config(config: &GlobalConfig, channels: &[Channel]) -> Self {
        let auth = channels
            .iter()
            .filter_map(|ch| {
                config
                    .credentials_for(&ch.name, &ch.base_url)
                    .map(|entry| (ch.name.clone(), ChannelAuth::from_entry(entry)))
            })
            .collect();
        Self {
            subdirs: config.effective_subdirs(),
            use_only_tar_bz2: config.use_only_tar_bz2,
            concurrency: config.fetch_concurrency.max(1),
            cache_dir: config.cache_dir(),
            max_age: Duration::from_secs(config.cache.max_age_secs),
            offline: false,
            auth,
        }
    }
}

/// All records of one channel, subdirs concatenated in the configured order.
#[derive(Debug, Clone)]
pub struct ChannelData {
    pub channel: Channel,
    pub records: Vec<PackageRecord>,
    pub skipped: usize,
}

/// Fetch and parse repodata for every channel and subdir concurrently.
///
/// Results come back in channel order regardless of completion order. The
/// first failure aborts the load.
pub async fn load_channels(
    channels: &[Channel],
    options: &LoadOptions,
) -> miette::Result<Vec<ChannelData>> {
    let client = download::build_client()?;
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let cache = RepodataCache::new(&options.cache_dir);

    let mut join_set = JoinSet::new();
    for (ci, channel) in channels.iter().enumerate() {
        for (si, subdir) in options.subdirs.iter().enumerate() {
            let client = client.clone();
            let sem = semaphore.clone();
            let channel = channel.clone();
            let subdir = subdir.clone();
            let cache = cache.clone();
            let options = options.clone();
            join_set.spawn(async move {
                let _permit = sem.acquire().await;
                let result = load_subdir(&client, &cache, &channel, &subdir, &options).await;
                ((ci, si), result)
            });
        }
    }

    let mut parsed: BTreeMap<(usize, usize), ParsedRepoData> = BTreeMap::new();
    while let Some(joined) = join_set.join_next().await {
        let (key, result) = joined.map_err(|e| CorralError::Generic {
            message: format!("Repodata task failed: {e}"),
        })?;
        parsed.insert(key, result?);
    }

    let mut out: Vec<ChannelData> = channels
        .iter()
        .map(|channel| ChannelData {
            channel: channel.clone(),
            records: Vec::new(),
            skipped: 0,
        })
        .collect();
    for ((ci, _), data) in parsed {
        out[ci].records.extend(data.records);
        out[ci].skipped += data.skipped;
    }
    for data in &out {
        tracing::debug!(
            channel = %data.channel.name,
            records = data.records.len(),
            skipped = data.skipped,
            "loaded channel"
        );
    }
    Ok(out)
}

async fn load_subdir(
    client: &Client,
    cache: &RepodataCache,
    channel: &Channel,
    subdir: &str,
    options: &LoadOptions,
) -> miette::Result<ParsedRepoData> {
    let bytes = if let Some(dir) = channel.local_path() {
        read_local(&dir, channel, subdir).await?
    } else {
        fetch_remote(client, cache, channel, subdir, options).await?
    };
    match bytes {
        Some(bytes) => Ok(repodata::parse_repodata(
            &bytes,
            channel,
            subdir,
            options.use_only_tar_bz2,
        )?),
        None => Ok(ParsedRepoData::default()),
    }
}

async fn read_local(
    dir: &std::path::Path,
    channel: &Channel,
    subdir: &str,
) -> miette::Result<Option<Vec<u8>>> {
    if !dir.is_dir() {
        return Err(CorralError::Channel {
            message: format!("Channel directory {} does not exist", dir.display()),
        }
        .into());
    }
    let path = dir.join(subdir).join("repodata.json");
    if !path.is_file() {
        tracing::debug!(channel = %channel.name, subdir, "no repodata.json; treating subdir as empty");
        return Ok(None);
    }
    let bytes = tokio::fs::read(&path).await.map_err(CorralError::Io)?;
    Ok(Some(bytes))
}

async fn fetch_remote(
    client: &Client,
    cache: &RepodataCache,
    channel: &Channel,
    subdir: &str,
    options: &LoadOptions,
) -> miette::Result<Option<Vec<u8>>> {
    let url = channel.repodata_url(subdir);

    if options.offline {
        let cached = cache.get_any(&url);
        if cached.is_none() {
            tracing::warn!(url = %url, "offline and no cached repodata; treating subdir as empty");
        }
        return Ok(cached);
    }
    if let Some(bytes) = cache.get_fresh(&url, options.max_age) {
        tracing::debug!(url = %url, "using cached repodata");
        return Ok(Some(bytes));
    }

    let auth = options.auth.get(&channel.name).cloned().unwrap_or_default();
    match download::download_bytes(client, &auth, &url).await {
        Ok(Some(bytes)) => {
            cache.put(&url, &bytes)?;
            Ok(Some(bytes))
        }
        Ok(None) => {
            tracing::debug!(url = %url, "repodata not found; treating subdir as empty");
            Ok(None)
        }
        Err(err) => match cache.get_any(&url) {
            Some(stale) => {
                tracing::warn!(url = %url, error = %err, "download failed; using stale cached repodata");
                Ok(Some(stale))
            }
            None => Err(err),
        },
    }
}
