use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use corral_util::errors::CorralError;
use serde::{Deserialize, Serialize};

use crate::record::PackageRecord;
use crate::spec::MatchSpec;

/// Snapshot of an environment: where it lives, what the user asked for over
/// time and which records are installed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentState {
    #[serde(default)]
    pub prefix: PathBuf,
    /// Specs the user has explicitly requested, oldest first.
    #[serde(default)]
    pub requested: Vec<String>,
    #[serde(default)]
    pub packages: Vec<PackageRecord>,
}

impl EnvironmentState {
    /// Load and parse an environment state file. A missing file yields an
    /// empty environment rooted next to it.
    pub fn from_path(path: &Path) -> miette::Result<Self> {
        if !path.exists() {
            return Ok(Self {
                prefix: path.parent().map(Path::to_path_buf).unwrap_or_default(),
                ..Self::default()
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| CorralError::Generic {
            message: format!("Failed to read environment state {}: {e}", path.display()),
        })?;
        let state = Self::parse(&content)?;
        state.validate()?;
        Ok(state)
    }

    pub fn parse(content: &str) -> miette::Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            CorralError::Generic {
                message: format!("Failed to parse environment state: {e}"),
            }
            .into()
        })
    }

    /// Serialize the state to pretty-printed JSON.
    pub fn to_string_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Installed records keyed by name.
    pub fn installed(&self) -> BTreeMap<&str, &PackageRecord> {
        self.packages.iter().map(|r| (r.name.as_str(), r)).collect()
    }

    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.iter().find(|r| r.name == name)
    }

    /// The request history parsed into specs.
    pub fn requested_specs(&self) -> Result<Vec<MatchSpec>, CorralError> {
        self.requested.iter().map(|s| MatchSpec::parse(s)).collect()
    }

    /// An environment holds at most one record per name.
    pub fn validate(&self) -> Result<(), CorralError> {
        let mut seen = BTreeMap::new();
        for record in &self.packages {
            if let Some(previous) = seen.insert(record.name.as_str(), record) {
                return Err(CorralError::Generic {
                    message: format!(
                        "Environment lists '{}' twice ({} and {})",
                        record.name, previous, record
                    ),
                });
            }
        }
        Ok(())
    }

    /// Append specs to the request history, replacing older entries for the
    /// same names.
    pub fn record_requested(&mut self, specs: &[MatchSpec]) {
        for spec in specs {
            self.requested.retain(|existing| {
                MatchSpec::parse(existing).map_or(true, |s| s.name != spec.name)
            });
            self.requested.push(spec.to_string());
        }
    }

    /// Drop the request history entries for the given names.
    pub fn forget_requested(&mut self, names: &[String]) {
        self.requested.retain(|existing| {
            MatchSpec::parse(existing).map_or(true, |s| !names.contains(&s.name))
        });
    }
}
