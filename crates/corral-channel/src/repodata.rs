//! Parsing of conda `repodata.json` documents into package records.

use std::collections::{BTreeMap, HashSet};

use corral_core::channel::Channel;
use corral_core::record::PackageRecord;
use corral_util::errors::CorralError;
use serde::Deserialize;

/// Raw `repodata.json` layout. Entries stay as JSON values so that a single
/// malformed record can be skipped without rejecting the whole document.
#[derive(Debug, Default, Deserialize)]
pub struct RepoData {
    #[serde(default)]
    pub info: Option<RepoDataInfo>,
    #[serde(default)]
    pub packages: BTreeMap<String, serde_json::Value>,
    #[serde(default, rename = "packages.conda")]
    pub conda_packages: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub removed: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RepoDataInfo {
    #[serde(default)]
    pub subdir: Option<String>,
}

/// Records extracted from one subdir of one channel.
#[derive(Debug, Default)]
pub struct ParsedRepoData {
    pub records: Vec<PackageRecord>,
    /// Entries dropped because they could not be parsed.
    pub skipped: usize,
}

/// Filename without its archive extension.
pub fn archive_stem(file_name: &str) -> &str {
    file_name
        .strip_suffix(".conda")
        .or_else(|| file_name.strip_suffix(".tar.bz2"))
        .unwrap_or(file_name)
}

/// Parse repodata bytes for `channel`/`subdir`.
///
/// `.conda` entries shadow `.tar.bz2` entries with the same stem unless
/// `use_only_tar_bz2` is set, in which case `.conda` entries are ignored.
/// Entries listed under `removed` are dropped.
pub fn parse_repodata(
    bytes: &[u8],
    channel: &Channel,
    subdir: &str,
    use_only_tar_bz2: bool,
) -> Result<ParsedRepoData, CorralError> {
    let repodata: RepoData = serde_json::from_slice(bytes).map_err(|e| CorralError::Channel {
        message: format!("Malformed repodata for {}/{subdir}: {e}", channel.name),
    })?;

    let subdir = repodata
        .info
        .as_ref()
        .and_then(|i| i.subdir.clone())
        .unwrap_or_else(|| subdir.to_string());
    let removed: HashSet<&str> = repodata.removed.iter().map(String::as_str).collect();

    let mut entries: Vec<(&String, &serde_json::Value)> = Vec::new();
    let mut conda_stems: HashSet<&str> = HashSet::new();
    if !use_only_tar_bz2 {
        for (file_name, value) in &repodata.conda_packages {
            conda_stems.insert(archive_stem(file_name));
            entries.push((file_name, value));
        }
    }
    for (file_name, value) in &repodata.packages {
        if !conda_stems.contains(archive_stem(file_name)) {
            entries.push((file_name, value));
        }
    }
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut parsed = ParsedRepoData::default();
    for (file_name, value) in entries {
        if removed.contains(file_name.as_str()) {
            continue;
        }
        match serde_json::from_value::<PackageRecord>(value.clone()) {
            Ok(mut record) => {
                record.channel = channel.name.clone();
                record.priority = channel.priority;
                record.subdir.get_or_insert_with(|| subdir.clone());
                record.url = Some(format!("{}/{file_name}", channel.subdir_url(&subdir)));
                record.file_name = Some(file_name.clone());
                parsed.records.push(record);
            }
            Err(e) => {
                tracing::warn!(
                    channel = %channel.name,
                    subdir = %subdir,
                    file = %file_name,
                    error = %e,
                    "skipping malformed repodata record"
                );
                parsed.skipped += 1;
            }
        }
    }

    tracing::debug!(
        channel = %channel.name,
        subdir = %subdir,
        records = parsed.records.len(),
        skipped = parsed.skipped,
        "parsed repodata"
    );
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems() {
        assert_eq!(archive_stem("zlib-1.3-h0_0.conda"), "zlib-1.3-h0_0");
        assert_eq!(archive_stem("zlib-1.3-h0_0.tar.bz2"), "zlib-1.3-h0_0");
        assert_eq!(archive_stem("odd"), "odd");
    }
}
