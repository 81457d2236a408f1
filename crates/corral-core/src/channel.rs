use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// How records from different channels are combined in the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelPriority {
    /// A name is served only by the highest-priority channel that has it.
    #[default]
    Strict,
    /// All channels contribute; priority still breaks ties.
    Flexible,
    /// All channels contribute and priority is ignored.
    Disabled,
}

impl ChannelPriority {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "flexible" => Some(Self::Flexible),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// A package source. Earlier configured channels get higher priority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    /// Base URL without a subdir, no trailing slash.
    pub base_url: String,
    pub priority: i32,
}

impl Channel {
    /// Resolve a channel reference from the command line or config.
    ///
    /// - `http(s)://` and `file://` URLs are used as-is
    /// - absolute or `./` relative paths become `file://` URLs
    /// - bare names are appended to `channel_alias`
    pub fn resolve(reference: &str, channel_alias: &str, priority: i32) -> Self {
        let reference = reference.trim().trim_end_matches('/');
        let base_url = if reference.contains("://") {
            reference.to_string()
        } else if looks_like_path(reference) {
            let path = corral_util::fs::expand_tilde(reference);
            let absolute = if path.is_absolute() {
                path
            } else {
                std::env::current_dir()
                    .map(|cwd| cwd.join(&path))
                    .unwrap_or(path)
            };
            format!("file://{}", absolute.display())
        } else {
            format!("{}/{reference}", channel_alias.trim_end_matches('/'))
        };
        let name = channel_name(&base_url, reference);
        Self {
            name,
            base_url,
            priority,
        }
    }

    /// Resolve an ordered list of channel references, first = highest priority.
    pub fn resolve_all(references: &[String], channel_alias: &str) -> Vec<Self> {
        let count = references.len() as i32;
        references
            .iter()
            .enumerate()
            .map(|(i, r)| Self::resolve(r, channel_alias, count - i as i32))
            .collect()
    }

    pub fn subdir_url(&self, subdir: &str) -> String {
        format!("{}/{subdir}", self.base_url)
    }

    pub fn repodata_url(&self, subdir: &str) -> String {
        format!("{}/{subdir}/repodata.json", self.base_url)
    }

    pub fn is_local(&self) -> bool {
        self.base_url.starts_with("file://")
    }

    /// Filesystem directory of a `file://` channel.
    pub fn local_path(&self) -> Option<PathBuf> {
        self.base_url.strip_prefix("file://").map(PathBuf::from)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn looks_like_path(reference: &str) -> bool {
    reference.starts_with('/')
        || reference.starts_with("./")
        || reference.starts_with("../")
        || reference.starts_with('~')
        || Path::new(reference).is_dir()
}

/// Channels are named by the last path segment for local directories and
/// by the path after the host for URLs (`conda-forge`, `org/label/dev`).
fn channel_name(base_url: &str, reference: &str) -> String {
    if let Some(path) = base_url.strip_prefix("file://") {
        return Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| reference.to_string());
    }
    match base_url.split_once("://") {
        Some((_, rest)) => match rest.split_once('/') {
            Some((_, path)) if !path.is_empty() => path.to_string(),
            _ => rest.to_string(),
        },
        None => reference.to_string(),
    }
}
