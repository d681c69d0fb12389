//! # Configuration
//!
//! Layered settings: built-in defaults, then `config/adfleet.toml` if it
//! exists, then `ADFLEET__`-prefixed environment variables
//! (`ADFLEET__BOX_SYNC__API_KEY` sets `box_sync.api_key`). A `.env` file is
//! loaded first when present.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

const CONFIG_FILE: &str = "config/adfleet";
const ENV_PREFIX: &str = "ADFLEET";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotSettings {
    /// Slots on every monitor kept for its hosting partner
    pub reserved_partner_slots: u32,
    pub max_refusals: u32,
    pub default_block_quantity: u32,
    /// Compare-and-swap attempts per monitor when assigning
    pub assign_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoxSyncSettings {
    pub port: u16,
    pub api_key: SecretString,
    pub timeout_ms: u64,
    pub queue_capacity: usize,
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkSettings {
    pub base_url: String,
    pub signing_key: SecretString,
    pub ttl_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Postgres URL; the in-memory store is used when absent
    pub url: Option<SecretString>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub format: LogFormat,
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub slots: SlotSettings,
    pub box_sync: BoxSyncSettings,
    pub links: LinkSettings,
    pub database: DatabaseSettings,
    pub log: LogSettings,
}

impl Settings {
    /// Reads `.env`, the optional config file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        let config = defaults()?
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::finish(config)
    }

    /// Defaults overlaid with a TOML document. No environment lookup.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config = defaults()?.add_source(File::from_str(toml, FileFormat::Toml)).build()?;
        Self::finish(config)
    }

    fn finish(config: Config) -> Result<Self, ConfigError> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_owned()));
        if self.box_sync.workers == 0 {
            return invalid("box_sync.workers must be at least 1");
        }
        if self.box_sync.queue_capacity == 0 {
            return invalid("box_sync.queue_capacity must be at least 1");
        }
        if self.box_sync.timeout_ms == 0 {
            return invalid("box_sync.timeout_ms must be positive");
        }
        if self.slots.max_refusals == 0 {
            return invalid("slots.max_refusals must be at least 1");
        }
        if self.slots.default_block_quantity == 0 {
            return invalid("slots.default_block_quantity must be at least 1");
        }
        if self.links.ttl_secs <= 0 {
            return invalid("links.ttl_secs must be positive");
        }
        if self.box_sync.api_key.expose_secret().is_empty() {
            return invalid("box_sync.api_key is required");
        }
        if self.links.signing_key.expose_secret().is_empty() {
            return invalid("links.signing_key is required");
        }
        if cfg!(feature = "db-postgres") && self.database.url.is_none() {
            return invalid("database.url is required with the db-postgres feature");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(Config::builder()
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("slots.reserved_partner_slots", 7)?
        .set_default("slots.max_refusals", 3)?
        .set_default("slots.default_block_quantity", 1)?
        .set_default("slots.assign_attempts", 3)?
        .set_default("box_sync.port", 8081)?
        .set_default("box_sync.api_key", "")?
        .set_default("box_sync.timeout_ms", 4000)?
        .set_default("box_sync.queue_capacity", 256)?
        .set_default("box_sync.workers", 4)?
        .set_default("links.base_url", "http://localhost:9000/ads")?
        .set_default("links.signing_key", "")?
        .set_default("links.ttl_secs", 900)?
        .set_default("database.max_connections", 10)?
        .set_default("log.format", "pretty")?
        .set_default("log.filter", "info")?)
}
