use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use corral_util::errors::CorralError;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelPriority;

/// Global user configuration loaded from `$CORRAL_HOME/config.toml`
/// (`~/.corral/config.toml` by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Channel references, highest priority first.
    #[serde(default)]
    pub channels: Vec<String>,

    /// Subdirs to load from every channel. Empty means native + `noarch`.
    #[serde(default)]
    pub subdirs: Vec<String>,

    #[serde(default = "default_channel_alias", rename = "channel-alias")]
    pub channel_alias: String,

    #[serde(default, rename = "channel-priority")]
    pub channel_priority: ChannelPriority,

    #[serde(default)]
    pub strategy: SolveStrategy,

    /// Solver time budget in milliseconds. Zero or negative expires immediately.
    #[serde(default = "default_timeout_ms", rename = "timeout-ms")]
    pub timeout_ms: i64,

    /// Attempts of the freeze-installed retry loop.
    #[serde(default = "default_max_attempts", rename = "max-attempts")]
    pub max_attempts: u32,

    #[serde(default, rename = "use-only-tar-bz2")]
    pub use_only_tar_bz2: bool,

    /// Specs applied to every solve, e.g. `python 3.11.*`.
    #[serde(default, rename = "pinned-packages")]
    pub pinned_packages: Vec<String>,

    /// Virtual packages such as `__glibc=2.35`. Empty means detect.
    #[serde(default, rename = "virtual-packages")]
    pub virtual_packages: Vec<String>,

    #[serde(default = "default_fetch_concurrency", rename = "fetch-concurrency")]
    pub fetch_concurrency: usize,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub credentials: BTreeMap<String, CredentialEntry>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            subdirs: Vec::new(),
            channel_alias: default_channel_alias(),
            channel_priority: ChannelPriority::default(),
            strategy: SolveStrategy::default(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            use_only_tar_bz2: false,
            pinned_packages: Vec::new(),
            virtual_packages: Vec::new(),
            fetch_concurrency: default_fetch_concurrency(),
            cache: CacheConfig::default(),
            credentials: BTreeMap::new(),
        }
    }
}

/// Version preference when several candidates satisfy the constraints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolveStrategy {
    #[default]
    Highest,
    Lowest,
}

/// Credentials for a channel, keyed by channel name or base URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialEntry {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Repodata cache configuration from `[cache]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    /// Cached repodata younger than this is used without refetching.
    #[serde(default = "default_max_age_secs", rename = "max-age-secs")]
    pub max_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

fn default_channel_alias() -> String {
    "https://conda.anaconda.org".to_string()
}

fn default_timeout_ms() -> i64 {
    60_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_fetch_concurrency() -> usize {
    8
}

fn default_cache_dir() -> String {
    "~/.corral/cache".to_string()
}

fn default_max_age_secs() -> u64 {
    3600
}

impl GlobalConfig {
    /// Load the global configuration, or return defaults if the file doesn't exist.
    pub fn load() -> miette::Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> miette::Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| CorralError::Config {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> miette::Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| CorralError::Config {
            message: format!("Failed to parse global config: {e}"),
        })?;
        if config.fetch_concurrency == 0 {
            return Err(CorralError::Config {
                message: "fetch-concurrency must be at least 1".to_string(),
            }
            .into());
        }
        Ok(config)
    }

    /// Returns the default path to the global config file.
    pub fn default_path() -> PathBuf {
        corral_home().join("config.toml")
    }

    /// Subdirs to load: configured ones, or the native platform plus `noarch`.
    pub fn effective_subdirs(&self) -> Vec<String> {
        if !self.subdirs.is_empty() {
            return self.subdirs.clone();
        }
        let native = native_subdir();
        if native == "noarch" {
            vec![native.to_string()]
        } else {
            vec![native.to_string(), "noarch".to_string()]
        }
    }

    /// Virtual packages: configured ones, or those detected for this platform.
    pub fn effective_virtual_packages(&self) -> Vec<String> {
        if !self.virtual_packages.is_empty() {
            return self.virtual_packages.clone();
        }
        detected_virtual_packages()
    }

    pub fn cache_dir(&self) -> PathBuf {
        corral_util::fs::expand_tilde(&self.cache.dir)
    }

    /// Credentials for a channel, looked up by name, then by base URL.
    pub fn credentials_for(&self, name: &str, base_url: &str) -> Option<&CredentialEntry> {
        self.credentials
            .get(name)
            .or_else(|| self.credentials.get(base_url))
    }
}

/// Returns the Corral data directory: `$CORRAL_HOME`, else `~/.corral`.
pub fn corral_home() -> PathBuf {
    match std::env::var("CORRAL_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => corral_util::fs::home_dir().join(".corral"),
    }
}

/// The conda subdir of the running platform.
pub fn native_subdir() -> &'static str {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("linux", "x86_64") => "linux-64",
        ("linux", "aarch64") => "linux-aarch64",
        ("linux", "powerpc64") => "linux-ppc64le",
        ("macos", "x86_64") => "osx-64",
        ("macos", "aarch64") => "osx-arm64",
        ("windows", "x86_64") => "win-64",
        ("windows", "aarch64") => "win-arm64",
        _ => "noarch",
    }
}

fn detected_virtual_packages() -> Vec<String> {
    let mut out = Vec::new();
    if cfg!(unix) {
        out.push("__unix=0=0".to_string());
    }
    if cfg!(windows) {
        out.push("__win=0=0".to_string());
    }
    match std::env::consts::OS {
        "linux" => out.push("__linux=0=0".to_string()),
        "macos" => out.push("__osx=0=0".to_string()),
        _ => {}
    }
    out.push(format!("__archspec=1={}", std::env::consts::ARCH));
    out
}
