//! TOML configuration.
//!
//! Loaded once at startup; every section has working defaults so an empty
//! file (or none at all) yields a usable local-only setup.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub records: RecordsConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Where the SQLite databases live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Remote identity service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    #[serde(default = "default_identity_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

/// Remote record store endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordsConfig {
    #[serde(default = "default_records_url")]
    pub base_url: String,
    #[serde(default = "default_records_path")]
    pub path: String,
    /// Hard ceiling on the snapshot fetch, in seconds.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

/// Session sweeper cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_identity_url() -> String {
    "https://identitytoolkit.googleapis.com/v1".to_string()
}

fn default_records_url() -> String {
    "https://roadwatch-default-rtdb.firebaseio.com".to_string()
}

fn default_records_path() -> String {
    "signalements".to_string()
}

fn default_deadline_secs() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            base_url: default_identity_url(),
            api_key: String::new(),
        }
    }
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            base_url: default_records_url(),
            path: default_records_path(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file; a missing file yields defaults.
    /// `ROADWATCH_API_KEY` overrides the identity key so the secret can
    /// stay out of the file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(key) = std::env::var("ROADWATCH_API_KEY") {
            config.identity.api_key = key;
        }
        Ok(config)
    }

    pub fn accounts_db(&self) -> PathBuf {
        self.store.data_dir.join("accounts.db")
    }

    pub fn sessions_db(&self) -> PathBuf {
        self.store.data_dir.join("sessions.db")
    }

    pub fn reports_db(&self) -> PathBuf {
        self.store.data_dir.join("reports.db")
    }

    pub fn policy_db(&self) -> PathBuf {
        self.store.data_dir.join("policy.db")
    }
}
