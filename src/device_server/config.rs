//! Per-device configuration (spec §4.2 step 1).
//!
//! Spec §1 names "the per-device configuration reader/writer" as an
//! out-of-scope external collaborator; that means its on-disk format isn't
//! part of the core contract, not that the device server can skip reading
//! or rewriting it (spec §4.2 steps 1 and 10 both require it). One TOML
//! file per device, keyed by `serial`, with sections mirroring the dotted
//! option names from spec §4.2's table.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

const DEFAULT_APP_HOST: &str = "127.0.0.1";
const DEFAULT_APP_PORT: u16 = 8000;
const DEFAULT_OSC_PREFIX: &str = "/monome";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeviceConfig {
    pub server: ServerSection,
    pub app: AppSection,
    pub dev: DevSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerSection {
    /// UDP port to bind the OSC server. `None` or `0` means ephemeral.
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub host: String,
    pub port: u16,
    pub osc_prefix: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_APP_HOST.to_string(),
            port: DEFAULT_APP_PORT,
            osc_prefix: DEFAULT_OSC_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DevSection {
    /// Rotation in degrees: one of 0, 90, 180, 270.
    pub rotation: u16,
}

impl DeviceConfig {
    #[must_use]
    pub fn path_for(config_dir: &Path, serial: &str) -> PathBuf {
        config_dir.join(format!("{serial}.toml"))
    }

    /// Loads the configuration for `serial` from `config_dir`. A missing
    /// file is not an error — defaults apply, per spec §4.2. A present but
    /// unparseable file is logged and defaults are used as well, since
    /// falling back to working defaults is preferable to refusing to serve
    /// the device.
    pub fn load(config_dir: &Path, serial: &str) -> Self {
        let path = Self::path_for(config_dir, serial);
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    warn!(serial, "couldn't parse config, using defaults: {e}");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!(serial, "couldn't read config, using defaults: {e}");
                Self::default()
            }
        }
    }

    /// Writes this configuration back to `config_dir`, creating the
    /// directory if necessary. Called by the device server on shutdown
    /// (spec §4.2 step 10).
    pub fn save(&self, config_dir: &Path, serial: &str) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir)?;
        let path = Self::path_for(config_dir, serial);
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize configuration")]
    Serialize(#[source] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = DeviceConfig::default();
        assert_eq!(config.server.port, None);
        assert_eq!(config.app.host, "127.0.0.1");
        assert_eq!(config.app.port, 8000);
        assert_eq!(config.app.osc_prefix, "/monome");
        assert_eq!(config.dev.rotation, 0);
    }

    #[test]
    fn load_returns_defaults_for_missing_file() {
        let dir = std::env::temp_dir().join("serialoscd-test-missing-config");
        let config = DeviceConfig::load(&dir, "m1000001");
        assert_eq!(config.app.osc_prefix, "/monome");
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = std::env::temp_dir().join(format!(
            "serialoscd-test-config-{}",
            std::process::id()
        ));
        let mut config = DeviceConfig::default();
        config.app.port = 9001;
        config.dev.rotation = 90;

        config.save(&dir, "m1000002").unwrap();
        let loaded = DeviceConfig::load(&dir, "m1000002");
        assert_eq!(loaded.app.port, 9001);
        assert_eq!(loaded.dev.rotation, 90);

        std::fs::remove_dir_all(&dir).ok();
    }
}
