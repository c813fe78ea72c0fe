// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names and default values used
//! throughout the gateway. Configuration is loaded from the environment
//! at startup by the embedding binary.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `NWC_SECRET_KEY` | Hex secp256k1 secret of the service identity | Required |
//! | `DATA_DIR` | Directory holding the embedded database | `./data` |
//! | `DATABASE_FILE` | Database file name inside `DATA_DIR` | `nwc.redb` |
//! | `CLIENT_PUBKEY` | Only accept requests authored by this key | Unset |
//! | `PAYMENT_TIMEOUT_SECS` | Deadline for payment settlement waits | `60` |
//! | `SUBSCRIBER_BUFFER` | Buffered events per bridge subscription | `64` |
//! | `SECRET_CACHE_SIZE` | Number of cached counterparty shared secrets | `256` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::time::Duration;

use crate::lnclient::EventBroadcaster;
use crate::telemetry::LogFormat;

/// Environment variable name for the service identity secret key (hex).
pub const SECRET_KEY_ENV: &str = "NWC_SECRET_KEY";

/// Environment variable name for the data directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Environment variable name for the database file name.
pub const DATABASE_FILE_ENV: &str = "DATABASE_FILE";

/// Environment variable name for the optional allowed client key.
pub const CLIENT_PUBKEY_ENV: &str = "CLIENT_PUBKEY";

/// Environment variable name for the payment wait deadline in seconds.
pub const PAYMENT_TIMEOUT_ENV: &str = "PAYMENT_TIMEOUT_SECS";

/// Environment variable name for the per-subscription buffer size.
pub const SUBSCRIBER_BUFFER_ENV: &str = "SUBSCRIBER_BUFFER";

/// Environment variable name for the shared-secret cache capacity.
pub const SECRET_CACHE_SIZE_ENV: &str = "SECRET_CACHE_SIZE";

/// Environment variable name for the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_DATABASE_FILE: &str = "nwc.redb";

/// How long a payment call waits for a settlement event.
pub const DEFAULT_PAYMENT_TIMEOUT: Duration = Duration::from_secs(60);

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;
pub const DEFAULT_SECRET_CACHE_SIZE: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Fully resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Hex-encoded identity secret. Never logged.
    pub secret_key: String,
    pub data_dir: PathBuf,
    pub database_file: String,
    pub client_pubkey: Option<String>,
    pub payment_timeout: Duration,
    pub subscriber_buffer: usize,
    pub secret_cache_size: usize,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret_key = lookup(SECRET_KEY_ENV)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(SECRET_KEY_ENV))?;

        let data_dir = lookup(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let database_file =
            lookup(DATABASE_FILE_ENV).unwrap_or_else(|| DEFAULT_DATABASE_FILE.to_string());

        let client_pubkey = lookup(CLIENT_PUBKEY_ENV)
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty());

        let payment_timeout = match lookup(PAYMENT_TIMEOUT_ENV) {
            Some(raw) => Duration::from_secs(parse_number(PAYMENT_TIMEOUT_ENV, &raw)?),
            None => DEFAULT_PAYMENT_TIMEOUT,
        };

        let subscriber_buffer = match lookup(SUBSCRIBER_BUFFER_ENV) {
            Some(raw) => parse_number::<usize>(SUBSCRIBER_BUFFER_ENV, &raw)?.max(1),
            None => DEFAULT_SUBSCRIBER_BUFFER,
        };

        let secret_cache_size = match lookup(SECRET_CACHE_SIZE_ENV) {
            Some(raw) => parse_number::<usize>(SECRET_CACHE_SIZE_ENV, &raw)?.max(1),
            None => DEFAULT_SECRET_CACHE_SIZE,
        };

        let log_format = match lookup(LOG_FORMAT_ENV) {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                name: LOG_FORMAT_ENV,
                value: raw,
            })?,
            None => LogFormat::Pretty,
        };

        Ok(Self {
            secret_key,
            data_dir,
            database_file,
            client_pubkey,
            payment_timeout,
            subscriber_buffer,
            secret_cache_size,
            log_format,
        })
    }

    /// Full path of the embedded database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Event bridge sized by `subscriber_buffer`, carrying `payment_timeout`
    /// as the deadline backends wait on.
    pub fn event_broadcaster(&self) -> EventBroadcaster {
        EventBroadcaster::new(self.subscriber_buffer).with_payment_timeout(self.payment_timeout)
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}
