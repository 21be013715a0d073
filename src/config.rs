use crate::core::error::Result;
use crate::core::nft::DEFAULT_NFT_COMMAND;
use crate::utils::get_config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// System-wide policy database
pub const DEFAULT_DB_PATH: &str = "/etc/netfence/firewall.db";

/// System-wide change lock
pub const DEFAULT_LOCK_PATH: &str = "/var/lock/netfence.lock";

pub const ENV_DB: &str = "NETFENCE_DB";
pub const ENV_LOCK: &str = "NETFENCE_LOCK";
pub const ENV_NFT_COMMAND: &str = "NETFENCE_NFT_COMMAND";

/// Upper bound for the per-transaction budget (one hour)
const MAX_TX_TIMEOUT_SECS: u64 = 3600;

/// Runtime configuration: where the policy lives and how commands behave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_lock_path")]
    pub lock_path: PathBuf,
    /// Budget of each database transaction in seconds (default: 5s, max: 3600s)
    #[serde(default = "default_tx_timeout")]
    pub tx_timeout_secs: u64,
    /// How long to wait for the change lock; unset waits indefinitely
    #[serde(default)]
    pub lock_timeout_secs: Option<u64>,
    /// Command line used to run nft, e.g. `sudo nft`
    #[serde(default = "default_nft_command")]
    pub nft_command: String,
    /// Require rule interfaces to exist on this host
    #[serde(default = "default_true")]
    pub check_interfaces: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            lock_path: default_lock_path(),
            tx_timeout_secs: default_tx_timeout(),
            lock_timeout_secs: None,
            nft_command: default_nft_command(),
            check_interfaces: true,
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(DEFAULT_DB_PATH)
}

fn default_lock_path() -> PathBuf {
    PathBuf::from(DEFAULT_LOCK_PATH)
}

fn default_tx_timeout() -> u64 {
    5
}

fn default_nft_command() -> String {
    DEFAULT_NFT_COMMAND.to_string()
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Per-transaction budget, clamped to one hour.
    pub fn tx_timeout(&self) -> Duration {
        Duration::from_secs(self.tx_timeout_secs.min(MAX_TX_TIMEOUT_SECS))
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_secs.map(Duration::from_secs)
    }

    /// Applies `NETFENCE_*` overrides found through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(db) = set(ENV_DB) {
            self.db_path = PathBuf::from(db);
        }
        if let Some(lock) = set(ENV_LOCK) {
            self.lock_path = PathBuf::from(lock);
        }
        if let Some(command) = set(ENV_NFT_COMMAND) {
            self.nft_command = command;
        }
    }
}

/// Path of the per-user config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

/// Reads a config file. Missing fields take their defaults.
///
/// # Errors
///
/// Returns `Err` if the file cannot be read or is not valid JSON.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let json = std::fs::read_to_string(path)?;
    let config = serde_json::from_str(&json)?;
    debug!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Resolves the effective configuration.
///
/// An explicit file must load. Otherwise the per-user file is used when it
/// exists and parses, and the built-in defaults when it does not. Environment
/// overrides are applied last.
///
/// # Errors
///
/// Returns `Err` only for a failing `explicit` file.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let mut config = match explicit {
        Some(path) => load_config_from(path)?,
        None => load_user_config(),
    };
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

fn load_user_config() -> AppConfig {
    let Some(path) = user_config_path().filter(|p| p.exists()) else {
        return AppConfig::default();
    };
    match load_config_from(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("Ignoring unreadable config {}: {e}", path.display());
            AppConfig::default()
        }
    }
}
