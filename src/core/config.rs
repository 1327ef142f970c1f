//! Resolved runtime configuration, plus the "defaults overridden by a
//! JSON file" loading shape of `fsocks/__init__.py::Config`.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::core::error::{Error, ErrorKind, Result, ResultWrappedExt};

const DEFAULT_CLIENT_HOST: &str = "127.0.0.1";
const DEFAULT_CLIENT_PORT: u16 = 1080;
const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
const DEFAULT_SERVER_PORT: u16 = 1081;
const DEFAULT_PASSWORD: &str = "123456";
const DEFAULT_TIMEOUT_SECONDS: u64 = 6;

/// The configuration the core actually runs with: every field resolved,
/// no optionality left. Built from [`RawConfig`] plus CLI overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_host: String,
    pub client_port: u16,
    pub server_host: String,
    pub server_port: u16,
    pub password: String,
    pub timeout_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            client_host: DEFAULT_CLIENT_HOST.to_owned(),
            client_port: DEFAULT_CLIENT_PORT,
            server_host: DEFAULT_SERVER_HOST.to_owned(),
            server_port: DEFAULT_SERVER_PORT,
            password: DEFAULT_PASSWORD.to_owned(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl Config {
    pub fn client_addr(&self) -> String {
        format!("{}:{}", self.client_host, self.client_port)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Loads a config file and merges it over the built-in defaults.
    /// Every field is optional in the file; an absent field keeps its
    /// default, mirroring `Config.load_args`' `{**self.raw, **_cfg}`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).wrapped(ErrorKind::Config)?;
        let raw: RawConfig = serde_json::from_str(&text)
            .map_err(|e| Error::wrapped(ErrorKind::Config, e))?;
        Ok(raw.resolve())
    }
}

/// Mirror of [`Config`] with every field optional, deserialized directly
/// from the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub client_host: Option<String>,
    pub client_port: Option<u16>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub password: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl RawConfig {
    pub fn resolve(self) -> Config {
        let defaults = Config::default();
        Config {
            client_host: self.client_host.unwrap_or(defaults.client_host),
            client_port: self.client_port.unwrap_or(defaults.client_port),
            server_host: self.server_host.unwrap_or(defaults.server_host),
            server_port: self.server_port.unwrap_or(defaults.server_port),
            password: self.password.unwrap_or(defaults.password),
            timeout_seconds: self.timeout_seconds.unwrap_or(defaults.timeout_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_original_project() {
        let cfg = Config::default();
        assert_eq!(cfg.client_addr(), "127.0.0.1:1080");
        assert_eq!(cfg.server_addr(), "127.0.0.1:1081");
    }

    #[test]
    fn raw_config_overrides_only_the_fields_it_sets() {
        let raw: RawConfig = serde_json::from_str(r#"{"server_port": 9001}"#).unwrap();
        let cfg = raw.resolve();
        assert_eq!(cfg.server_port, 9001);
        assert_eq!(cfg.client_port, DEFAULT_CLIENT_PORT);
    }
}
