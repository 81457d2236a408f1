use std::fmt;

use corral_util::errors::CorralError;
use serde::{Deserialize, Serialize};

use crate::spec::MatchSpec;
use crate::version::Version;

/// Channel name used for virtual packages such as `__unix` or `__glibc`.
pub const VIRTUAL_CHANNEL: &str = "@virtual";

/// An immutable package descriptor as published in a channel's repodata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: Version,
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
    #[serde(default)]
    pub depends: Vec<MatchSpec>,
    #[serde(default)]
    pub constrains: Vec<MatchSpec>,
    #[serde(default)]
    pub channel: String,
    /// Higher wins. Assigned from the channel's position when loading.
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
    #[serde(default, rename = "fn", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Paths (relative to the prefix) this package installs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PathEntry>,
}

/// A file installed by a package. `link_target` is set for symlinks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawPathEntry")]
pub struct PathEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
}

/// Accepts both `"bin/tool"` and `{"path": "bin/tool", "link_target": ".."}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPathEntry {
    Plain(String),
    Detailed {
        path: String,
        #[serde(default)]
        link_target: Option<String>,
    },
}

impl From<RawPathEntry> for PathEntry {
    fn from(raw: RawPathEntry) -> Self {
        match raw {
            RawPathEntry::Plain(path) => PathEntry {
                path,
                link_target: None,
            },
            RawPathEntry::Detailed { path, link_target } => PathEntry { path, link_target },
        }
    }
}

impl PathEntry {
    pub fn file(path: &str) -> Self {
        Self {
            path: path.to_string(),
            link_target: None,
        }
    }

    pub fn symlink(path: &str, target: &str) -> Self {
        Self {
            path: path.to_string(),
            link_target: Some(target.to_string()),
        }
    }
}

/// The identity of a record: `(name, version, build, channel)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordIdentity {
    pub name: String,
    pub version: Version,
    pub build: String,
    pub channel: String,
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.channel.is_empty() {
            write!(f, "{}::", self.channel)?;
        }
        write!(f, "{}-{}-{}", self.name, self.version, self.build)
    }
}

impl PackageRecord {
    /// A bare record with no dependencies, mainly for tests and virtual packages.
    pub fn new(name: &str, version: Version, build: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            version,
            build: build.to_string(),
            build_number: 0,
            depends: Vec::new(),
            constrains: Vec::new(),
            channel: String::new(),
            priority: 0,
            subdir: None,
            file_name: None,
            url: None,
            md5: None,
            sha256: None,
            size: None,
            timestamp: None,
            license: None,
            files: Vec::new(),
        }
    }

    /// Parse a virtual package declaration such as `__glibc=2.35=0`.
    ///
    /// Version defaults to `0` and build to `0` when omitted.
    pub fn virtual_package(decl: &str) -> Result<Self, CorralError> {
        let mut parts = decl.trim().splitn(3, '=');
        let name = parts.next().unwrap_or_default();
        if !name.starts_with("__") {
            return Err(CorralError::InvalidSpec {
                spec: decl.to_string(),
                reason: "virtual package names start with '__'".to_string(),
            });
        }
        let version = Version::parse(parts.next().filter(|v| !v.is_empty()).unwrap_or("0"))?;
        let build = parts.next().filter(|b| !b.is_empty()).unwrap_or("0");
        let mut record = Self::new(name, version, build);
        record.channel = VIRTUAL_CHANNEL.to_string();
        Ok(record)
    }

    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity {
            name: self.name.clone(),
            version: self.version.clone(),
            build: self.build.clone(),
            channel: self.channel.clone(),
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.name.starts_with("__")
    }

    /// Whether two records describe the same build, ignoring channel.
    pub fn same_build(&self, other: &PackageRecord) -> bool {
        self.name == other.name && self.version == other.version && self.build == other.build
    }

    /// Names of the packages this record depends on, deduplicated, in order.
    pub fn dependency_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for dep in &self.depends {
            if !names.contains(&dep.name.as_str()) {
                names.push(&dep.name);
            }
        }
        names
    }

    pub fn with_depends(mut self, depends: Vec<MatchSpec>) -> Self {
        self.depends = depends;
        self
    }

    pub fn with_constrains(mut self, constrains: Vec<MatchSpec>) -> Self {
        self.constrains = constrains;
        self
    }

    pub fn with_channel(mut self, channel: &str, priority: i32) -> Self {
        self.channel = channel.to_string();
        self.priority = priority;
        self
    }

    pub fn with_build_number(mut self, build_number: u64) -> Self {
        self.build_number = build_number;
        self
    }

    pub fn with_files(mut self, files: Vec<PathEntry>) -> Self {
        self.files = files;
        self
    }
}

impl fmt::Display for PackageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity())
    }
}
