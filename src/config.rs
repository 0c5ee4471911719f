//! TOML configuration for the upgrade schedule, policy, and runtime.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    policy::ValidationPolicy,
    runtime::handle::RuntimeConfig,
    types::{Height, PoolType},
    upgrade::{UpgradeId, UpgradeSchedule},
};

/// Fatal errors raised while building components from configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An upgrade activates below an earlier upgrade.
    #[error("{upgrade} activation height {height} is below {earlier} activation height {earlier_height}")]
    NonMonotonic {
        /// Offending upgrade.
        upgrade: UpgradeId,
        /// Its configured height.
        height: Height,
        /// Earlier upgrade it conflicts with.
        earlier: UpgradeId,
        /// Earlier upgrade's height.
        earlier_height: Height,
    },
    /// A later upgrade is configured while an earlier one is not.
    #[error("{upgrade} has no activation height but {required_by} does")]
    MissingHeight {
        /// Upgrade lacking a height.
        upgrade: UpgradeId,
        /// Later upgrade that requires it.
        required_by: UpgradeId,
    },
    /// The same upgrade was listed twice.
    #[error("{0} configured more than once")]
    DuplicateUpgrade(UpgradeId),
    /// Upgrade name not recognised.
    #[error("unknown network upgrade {0:?}")]
    UnknownUpgrade(String),
    /// A worker pool needs at least one worker.
    #[error("runtime.workers must be at least 1")]
    NoWorkers,
    /// Config file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Config text is not valid TOML for [`Config`].
    #[error("failed to parse {origin}: {source}")]
    Parse {
        /// File path or `<inline>`.
        origin: String,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Activation heights keyed by upgrade name.
    pub upgrades: BTreeMap<String, Height>,
    /// Deprecation policy.
    pub policy: PolicyConfig,
    /// Worker pool and persistence tuning.
    pub runtime: RuntimeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upgrades: UpgradeSchedule::mainnet()
                .iter()
                .map(|(u, h)| (u.as_str().to_string(), h))
                .collect(),
            policy: PolicyConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

/// Which upgrade cuts over and which pool it deprecates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Upgrade after which deprecated-pool addresses and deposits stop.
    pub cutover: UpgradeId,
    /// Pool being phased out.
    pub deprecated_pool: PoolType,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cutover: UpgradeId::Canopy,
            deprecated_pool: PoolType::Sprout,
        }
    }
}

impl Config {
    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            origin: path.display().to_string(),
            source,
        })
    }

    /// Parses TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            origin: "<inline>".to_string(),
            source,
        })
    }

    /// Builds the validated upgrade schedule.
    pub fn schedule(&self) -> Result<UpgradeSchedule, ConfigError> {
        let pairs = self
            .upgrades
            .iter()
            .map(|(name, height)| Ok((name.parse::<UpgradeId>()?, *height)))
            .collect::<Result<Vec<_>, ConfigError>>()?;
        UpgradeSchedule::new(pairs)
    }

    /// Builds the validation policy over [`Config::schedule`].
    pub fn policy(&self) -> Result<ValidationPolicy, ConfigError> {
        let schedule = Arc::new(self.schedule()?);
        Ok(ValidationPolicy::new(schedule, self.policy.cutover)
            .with_deprecated_pool(self.policy.deprecated_pool))
    }

    /// Returns runtime settings after checking them.
    pub fn runtime(&self) -> Result<RuntimeConfig, ConfigError> {
        if self.runtime.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(self.runtime.clone())
    }
}
