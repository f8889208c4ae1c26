//! wishboard/crates/configs/src/lib.rs
//!
//! Layered runtime configuration: built-in defaults, then an optional
//! `config/wishboard.toml`, then `WISHBOARD_*` environment variables using
//! `__` between nested keys (e.g. `WISHBOARD_SERVER__PORT=9000`).

use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const ENV_PREFIX: &str = "WISHBOARD";
pub const CONFIG_FILE: &str = "config/wishboard";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("configuration could not be read: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub board: BoardSettings,
    pub broadcast: BroadcastSettings,
    pub storage: StorageSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin; `*` allows any.
    pub cors_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoardSettings {
    pub ttl_days: u32,
    pub purge_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastSettings {
    /// Frames a viewer may fall behind before its channel is dropped.
    pub channel_capacity: usize,
    pub keep_alive_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    pub url: Option<SecretString>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Settings {
    /// Loads `.env`, the optional config file and the process environment.
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        Self::build(
            Some(File::with_name(CONFIG_FILE).required(false)),
            Environment::with_prefix(ENV_PREFIX),
        )
    }

    /// Layers `file` and `env` over the defaults. Split out of [`Settings::load`]
    /// so callers can supply their own sources.
    pub fn build(
        file: Option<File<config::FileSourceFile, config::FileFormat>>,
        env: Environment,
    ) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.cors_origin", "*")?
            .set_default("board.ttl_days", 7)?
            .set_default("board.purge_interval_secs", 3600)?
            .set_default("broadcast.channel_capacity", 64)?
            .set_default("broadcast.keep_alive_secs", 15)?
            .set_default("storage.backend", "memory")?
            .set_default("storage.lock_timeout_ms", 2000)?
            .set_default("log.level", "info")?
            .set_default("log.format", "json")?;
        if let Some(file) = file {
            builder = builder.add_source(file);
        }
        let settings: Settings = builder
            .add_source(
                env.prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.broadcast.channel_capacity == 0 {
            return Err(SettingsError::Invalid(
                "broadcast.channel_capacity must be at least 1".into(),
            ));
        }
        if self.board.ttl_days == 0 {
            return Err(SettingsError::Invalid("board.ttl_days must be at least 1".into()));
        }
        if self.storage.backend == StorageBackend::Postgres && self.database.url.is_none() {
            return Err(SettingsError::Invalid(
                "database.url is required when storage.backend = \"postgres\"".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, SettingsError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| SettingsError::Invalid(format!("server address: {e}")))
    }
}

impl BoardSettings {
    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs.max(1))
    }
}

impl BroadcastSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}

impl StorageSettings {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix(ENV_PREFIX).source(Some(map))
    }

    #[test]
    fn defaults_apply_without_sources() {
        let s = Settings::build(None, env(&[])).unwrap();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.board.ttl_days, 7);
        assert_eq!(s.board.purge_interval(), Duration::from_secs(3600));
        assert_eq!(s.broadcast.channel_capacity, 64);
        assert_eq!(s.broadcast.keep_alive(), Duration::from_secs(15));
        assert_eq!(s.storage.backend, StorageBackend::Memory);
        assert_eq!(s.storage.lock_timeout(), Duration::from_millis(2000));
        assert_eq!(s.log.format, LogFormat::Json);
        assert!(s.database.url.is_none());
        assert_eq!(s.bind_addr().unwrap().port(), 8080);
    }

    #[test]
    fn environment_overrides_nested_keys() {
        let s = Settings::build(
            None,
            env(&[
                ("WISHBOARD_SERVER__PORT", "9000"),
                ("WISHBOARD_BOARD__TTL_DAYS", "2"),
                ("WISHBOARD_LOG__FORMAT", "pretty"),
                ("WISHBOARD_STORAGE__BACKEND", "postgres"),
                ("WISHBOARD_DATABASE__URL", "postgres://localhost/wishboard"),
            ]),
        )
        .unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.board.ttl_days, 2);
        assert_eq!(s.log.format, LogFormat::Pretty);
        assert_eq!(s.storage.backend, StorageBackend::Postgres);
        let url = s.database.url.as_ref().map(|u| u.expose_secret().to_string());
        assert_eq!(url.as_deref(), Some("postgres://localhost/wishboard"));
    }

    #[test]
    fn postgres_without_url_is_rejected() {
        let err = Settings::build(None, env(&[("WISHBOARD_STORAGE__BACKEND", "postgres")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn zero_channel_capacity_is_rejected() {
        let err = Settings::build(None, env(&[("WISHBOARD_BROADCAST__CHANNEL_CAPACITY", "0")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }
}
