//! Daemon configuration.
//!
//! Defaults serve a local deployment. A TOML file (via `--config` or the
//! `RIGMOND_CONFIG` env var) overrides them, and the listen addresses can
//! additionally be overridden from the environment, which wins over the
//! file.
//!
//! ```toml
//! listen_addr = "0.0.0.0:9001"
//! relay_addr = "0.0.0.0:9002"
//! sweep_interval_secs = 300
//! stale_after_secs = 300
//!
//! [profiles."NVIDIA RTX 3070"]
//! efficiency_threshold = 0.5
//! max_power = 240.0
//! core_clock = 1350.0
//! memory_clock = 2400.0
//! ```

use std::collections::HashMap;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use rigmon_core::{GpuProfile, ProfileTable};

/// Env var naming a config file to load.
pub const ENV_CONFIG: &str = "RIGMOND_CONFIG";

/// Env var overriding the telemetry listen address.
pub const ENV_LISTEN_ADDR: &str = "RIGMOND_ADDR";

/// Env var overriding the relay listen address.
pub const ENV_RELAY_ADDR: &str = "RIGMOND_RELAY_ADDR";

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RigmondConfig {
    /// Telemetry listener address.
    pub listen_addr: SocketAddr,

    /// Relay bridge listener address.
    pub relay_addr: SocketAddr,

    /// Liveness sweep cadence in seconds.
    pub sweep_interval_secs: u64,

    /// Silence window before a rig is marked offline, in seconds.
    pub stale_after_secs: u64,

    /// GPU tuning profiles merged over the built-in table.
    pub profiles: HashMap<String, GpuProfile>,
}

impl Default for RigmondConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9001)),
            relay_addr: SocketAddr::from(([127, 0, 0, 1], 9002)),
            sweep_interval_secs: 300,
            stale_after_secs: 300,
            profiles: HashMap::new(),
        }
    }
}

impl RigmondConfig {
    /// Loads configuration.
    ///
    /// Resolution order: explicit path, then `RIGMOND_CONFIG`, then
    /// defaults. Environment address overrides apply last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match env::var(ENV_CONFIG) {
                Ok(path) => Self::from_file(Path::new(&path))?,
                Err(_) => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    /// Parses a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Applies environment address overrides.
    fn apply_env(&mut self) {
        for (var, addr) in [
            (ENV_LISTEN_ADDR, &mut self.listen_addr),
            (ENV_RELAY_ADDR, &mut self.relay_addr),
        ] {
            if let Ok(value) = env::var(var) {
                match value.parse() {
                    Ok(parsed) => *addr = parsed,
                    Err(_) => warn!(var, value = %value, "Ignoring unparseable address override"),
                }
            }
        }
    }

    /// Liveness sweep cadence.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Silence window for the liveness sweep.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// Builds the analyzer profile table: built-in entries with config
    /// entries merged on top.
    pub fn profile_table(&self) -> ProfileTable {
        let mut table = ProfileTable::builtin();
        for (model, profile) in &self.profiles {
            table.insert(model.clone(), *profile);
        }
        table
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("failed to parse config {path}: {error}")]
    Parse { path: PathBuf, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RigmondConfig::default();
        assert_eq!(config.listen_addr.port(), 9001);
        assert_eq!(config.relay_addr.port(), 9002);
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.stale_after(), Duration::from_secs(300));
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
listen_addr = "0.0.0.0:19001"
stale_after_secs = 120

[profiles."NVIDIA RTX 3070"]
efficiency_threshold = 0.5
max_power = 240.0
"#
        )
        .unwrap();

        let config = RigmondConfig::from_file(file.path()).unwrap();
        assert_eq!(config.listen_addr.port(), 19001);
        assert_eq!(config.stale_after_secs, 120);
        // Unset fields keep their defaults.
        assert_eq!(config.relay_addr.port(), 9002);

        // Partial profiles fill in from the conservative defaults.
        let table = config.profile_table();
        let profile = table.get("NVIDIA RTX 3070");
        assert_eq!(profile.max_power, 240.0);
        assert_eq!(profile.core_clock, GpuProfile::CONSERVATIVE.core_clock);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "listne_addr = \"0.0.0.0:19001\"").unwrap();

        assert!(matches!(
            RigmondConfig::from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file_errors() {
        assert!(matches!(
            RigmondConfig::from_file(Path::new("/nonexistent/rigmond.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_profile_table_overrides_builtin() {
        let mut config = RigmondConfig::default();
        config.profiles.insert(
            "NVIDIA RTX 3080".to_string(),
            GpuProfile {
                efficiency_threshold: 0.9,
                max_power: 100.0,
                core_clock: 1000.0,
                memory_clock: 2000.0,
            },
        );

        let table = config.profile_table();
        assert_eq!(table.get("NVIDIA RTX 3080").max_power, 100.0);
        // Untouched builtin entries survive the merge.
        assert_ne!(table.get("NVIDIA RTX 3090"), GpuProfile::CONSERVATIVE);
    }

    #[test]
    fn test_env_address_override() {
        let mut config = RigmondConfig::default();
        env::set_var(ENV_LISTEN_ADDR, "127.0.0.1:19011");
        env::set_var(ENV_RELAY_ADDR, "not an address");

        config.apply_env();

        env::remove_var(ENV_LISTEN_ADDR);
        env::remove_var(ENV_RELAY_ADDR);

        assert_eq!(config.listen_addr.port(), 19011);
        // Garbage override is ignored, default kept.
        assert_eq!(config.relay_addr.port(), 9002);
    }
}
