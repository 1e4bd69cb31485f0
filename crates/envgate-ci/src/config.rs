//! Configuration document loading.
//!
//! Profiles and gate specs are read once at process start from a YAML or JSON
//! document and are immutable for the rest of the run.

use crate::error::{ConfigError, GateError};
use crate::profile::{EnvironmentProfile, ProfileResolver, TriggerRule};
use crate::spec::{CheckerEntry, CheckerKind, GateSpec, DEFAULT_CHECK_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Supported document version.
pub const CONFIG_VERSION: u32 = 1;

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_true() -> bool {
    true
}

/// Workspace-wide defaults applied to every profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Defaults {
    /// Per-checker timeout when a checker sets none.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub pipeline_timeout_secs: Option<u64>,

    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// A checker as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckerConfig {
    pub name: String,

    /// Defaults to the checker name when it names a known kind.
    #[serde(default)]
    pub kind: Option<CheckerKind>,

    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default = "default_true")]
    pub required: bool,

    #[serde(default = "default_true")]
    pub blocking: bool,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub metric_pattern: Option<String>,
}

impl CheckerConfig {
    fn into_entry(self, defaults: &Defaults) -> Result<CheckerEntry, ConfigError> {
        let kind = match self.kind {
            Some(kind) => kind,
            None => self.name.parse::<CheckerKind>().map_err(|_| {
                ConfigError::Invalid(format!(
                    "checker '{}' needs an explicit 'kind'",
                    self.name
                ))
            })?,
        };
        Ok(CheckerEntry {
            name: self.name,
            kind,
            command: self.command,
            required: self.required,
            blocking: self.blocking,
            timeout_secs: self
                .timeout_secs
                .or(defaults.timeout_secs)
                .unwrap_or(DEFAULT_CHECK_TIMEOUT_SECS),
            metric_pattern: self.metric_pattern,
        })
    }
}

/// One environment profile as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileConfig {
    pub name: String,

    pub trigger: TriggerRule,

    #[serde(default)]
    pub checkers: Vec<CheckerConfig>,

    /// Minimum metric per checker name, e.g. `coverage: 70`.
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,

    #[serde(default)]
    pub parallel_groups: Vec<Vec<String>>,

    #[serde(default)]
    pub pipeline_timeout_secs: Option<u64>,

    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

impl ProfileConfig {
    fn into_profile(self, defaults: &Defaults) -> Result<EnvironmentProfile, ConfigError> {
        let checkers = self
            .checkers
            .into_iter()
            .map(|c| c.into_entry(defaults))
            .collect::<Result<Vec<_>, _>>()?;

        let spec = GateSpec {
            environment_name: self.name.clone(),
            checkers,
            thresholds: self.thresholds,
            parallel_groups: self.parallel_groups,
            pipeline_timeout_secs: self.pipeline_timeout_secs.or(defaults.pipeline_timeout_secs),
            max_concurrency: self.max_concurrency.or(defaults.max_concurrency),
        };

        EnvironmentProfile::new(self.name, &self.trigger, spec)
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub defaults: Defaults,

    pub profiles: Vec<ProfileConfig>,
}

impl GateConfig {
    /// Load from a file. `.json` files and documents starting with `{` are
    /// parsed as JSON, anything else as YAML.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded gate config");

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
            || content.trim_start().starts_with('{');

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.check_version()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.check_version()?;
        Ok(config)
    }

    fn check_version(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion {
                found: self.version,
                expected: CONFIG_VERSION,
            });
        }
        Ok(())
    }

    /// Build validated profiles.
    pub fn into_profiles(self) -> Result<Vec<EnvironmentProfile>, ConfigError> {
        if self.profiles.is_empty() {
            return Err(ConfigError::Invalid("no profiles defined".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for profile in &self.profiles {
            if !seen.insert(profile.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate profile '{}'",
                    profile.name
                )));
            }
        }

        let defaults = self.defaults;
        self.profiles
            .into_iter()
            .map(|p| p.into_profile(&defaults))
            .collect()
    }

    /// Build profiles and the resolver, including the ambiguity check.
    pub fn into_resolver(self) -> Result<ProfileResolver, GateError> {
        let profiles = self.into_profiles()?;
        Ok(ProfileResolver::new(profiles)?)
    }
}

/// Load a config file and build its resolver.
pub fn load_resolver(path: &Path) -> Result<ProfileResolver, GateError> {
    GateConfig::from_path(path)?.into_resolver()
}
