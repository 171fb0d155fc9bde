//! Typed configuration from environment variables and worker settings files.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use std::path::Path;
use std::time::Duration;

use crate::db::DEFAULT_MAX_CONNECTIONS;
use crate::engine::WorkerConfig;
use crate::error::{Error, Result};
use crate::model::Channel;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub max_connections: u32,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(raw) => raw.parse().map_err(|e| {
                Error::Config(format!("DATABASE_MAX_CONNECTIONS={raw:?} is not a number: {e}"))
            })?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };
        if max_connections == 0 {
            return Err(Error::Config(
                "DATABASE_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            max_connections,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

// ---------------------------------------------------------------------------
// Discrete connection parameters
// ---------------------------------------------------------------------------

/// Connection parameters for callers that do not have a URL.
#[derive(Debug)]
pub struct DatabaseConfig {
    host: String,
    port: u16,
    database: String,
    username: String,
    password: SecretString,
}

impl DatabaseConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
    ) -> Result<Self> {
        Ok(Self {
            host: required("host", host.into())?,
            port,
            database: required("database", database.into())?,
            username: required("username", username.into())?,
            password,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.username)
            .password(self.password.expose_secret())
    }
}

fn required(name: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::Config(format!("{name} is empty")));
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Worker settings
// ---------------------------------------------------------------------------

/// Worker tuning read from a TOML file.
///
/// ```toml
/// queue = "emails"
/// channel = "emails_ready"
/// poll_interval_ms = 2000
/// task_timeout_ms = 30000
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSettings {
    pub queue: Option<String>,
    pub channel: Option<Channel>,
    pub poll_interval_ms: Option<u64>,
    pub task_timeout_ms: Option<u64>,
}

impl WorkerSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read worker settings {}: {e}", path.display()))
        })?;
        Self::parse(&content)
            .map_err(|e| Error::Config(format!("bad worker settings {}: {e}", path.display())))
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Overlay these settings onto `base`.
    pub fn apply(self, mut base: WorkerConfig) -> Result<WorkerConfig> {
        if let Some(queue) = self.queue {
            base.queue_name = Some(queue);
        }
        if let Some(channel) = self.channel {
            base.channel = Some(channel);
        }
        if let Some(ms) = self.poll_interval_ms {
            if ms == 0 {
                return Err(Error::Config("poll_interval_ms must be positive".to_string()));
            }
            base.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.task_timeout_ms {
            base.task_timeout = Some(Duration::from_millis(ms));
        }
        Ok(base)
    }
}
