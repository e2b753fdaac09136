//! Service configuration, persisted as TOML.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `SCHEMAD_*` environment variables, then command-line flags (applied by the
//! binaries).

use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::explain::ExplainLimitPolicy;
use crate::kb::KbSettings;

/// Errors from loading or validating configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(schemad::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}")]
    #[diagnostic(
        code(schemad::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(schemad::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid value for {field}: {message}")]
    #[diagnostic(code(schemad::config::invalid))]
    Invalid { field: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

pub const ENV_HOST: &str = "SCHEMAD_HOST";
pub const ENV_PORT: &str = "SCHEMAD_PORT";
pub const ENV_UPDATE_INTERVAL: &str = "SCHEMAD_UPDATE_INTERVAL";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Period of the state refresh job, in seconds.
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    /// How long a shutdown waits for in-flight requests.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
    /// Directory of `*.json` ontology documents.
    #[serde(default = "default_ontology_dir")]
    pub ontology_dir: PathBuf,
    #[serde(default)]
    pub explain_limit: ExplainLimitPolicy,
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    18080
}
fn default_update_interval_secs() -> u64 {
    60
}
fn default_drain_timeout_secs() -> u64 {
    30
}
fn default_ontology_dir() -> PathBuf {
    PathBuf::from("ontologies")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            update_interval_secs: default_update_interval_secs(),
            drain_timeout_secs: default_drain_timeout_secs(),
            ontology_dir: default_ontology_dir(),
            explain_limit: ExplainLimitPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Apply `SCHEMAD_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(host) = lookup(ENV_HOST) {
            self.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.port = port.parse().map_err(|_| ConfigError::Invalid {
                field: ENV_PORT.into(),
                message: format!("\"{port}\" is not a port number"),
            })?;
        }
        if let Some(secs) = lookup(ENV_UPDATE_INTERVAL) {
            self.update_interval_secs = secs.parse().map_err(|_| ConfigError::Invalid {
                field: ENV_UPDATE_INTERVAL.into(),
                message: format!("\"{secs}\" is not a number of seconds"),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "host".into(),
                message: "must not be empty".into(),
            });
        }
        if self.update_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "update_interval_secs".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// `host:port` as given to the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn kb_settings(&self) -> KbSettings {
        KbSettings {
            explain_limit: self.explain_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_fields_take_defaults() {
        let config: ServerConfig = toml::from_str("port = 9000").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.update_interval_secs, 60);
        assert_eq!(config.explain_limit, ExplainLimitPolicy::Forward);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("schemad.toml");
        let config = ServerConfig {
            explain_limit: ExplainLimitPolicy::Unbounded,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ServerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn env_overrides_file_values() {
        let vars: HashMap<&str, &str> = [(ENV_PORT, "9100"), (ENV_UPDATE_INTERVAL, "5")].into();
        let mut config = ServerConfig::default();
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.update_interval(), Duration::from_secs(5));
        assert_eq!(config.host, "localhost");
    }

    #[test]
    fn bad_env_port_is_invalid() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_vars(|k| (k == ENV_PORT).then(|| "eighty".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn zero_interval_fails_validation() {
        let config = ServerConfig {
            update_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(ServerConfig::default().validate().is_ok());
    }
}
