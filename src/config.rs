// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Requeue delay after a successful authentication or an Unauthorized phase
    pub resync_interval: Duration,
    /// Requeue delay after an Errored phase. Unauthorized waits for the resync interval.
    pub error_requeue: Duration,
    /// How long before token expiry a credential is re-authenticated
    pub expiry_refresh_margin: Duration,
    /// Number of readiness checks the admission gate performs
    pub admission_poll_attempts: u32,
    /// Spacing between readiness checks
    pub admission_poll_interval: Duration,
    pub webhook_bind_address: SocketAddr,
    pub webhook_tls: Option<TlsFiles>,
}

/// PEM encoded certificate chain and private key for the admission server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            resync_interval: Duration::from_secs(3600),
            error_requeue: Duration::from_secs(300),
            expiry_refresh_margin: Duration::from_secs(300),
            admission_poll_attempts: 10,
            admission_poll_interval: Duration::from_millis(1000),
            webhook_bind_address: SocketAddr::from(([0, 0, 0, 0], 9443)),
            webhook_tls: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source, falling back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Config::default();

        let resync_interval = parse_var(&lookup, "RESYNC_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.resync_interval);
        let error_requeue = parse_var(&lookup, "ERROR_REQUEUE_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.error_requeue);
        let expiry_refresh_margin = parse_var(&lookup, "EXPIRY_REFRESH_MARGIN_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.expiry_refresh_margin);
        let admission_poll_attempts = parse_var(&lookup, "ADMISSION_POLL_ATTEMPTS")?
            .unwrap_or(defaults.admission_poll_attempts);
        let admission_poll_interval = parse_var(&lookup, "ADMISSION_POLL_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.admission_poll_interval);
        let webhook_bind_address = parse_var(&lookup, "WEBHOOK_BIND_ADDRESS")?
            .unwrap_or(defaults.webhook_bind_address);

        let webhook_tls = match (
            lookup("WEBHOOK_TLS_CERT_FILE"),
            lookup("WEBHOOK_TLS_KEY_FILE"),
        ) {
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.into(),
                key: key.into(),
            }),
            (None, None) => None,
            _ => anyhow::bail!(
                "WEBHOOK_TLS_CERT_FILE and WEBHOOK_TLS_KEY_FILE must be set together"
            ),
        };

        Ok(Config {
            resync_interval,
            error_requeue,
            expiry_refresh_margin,
            admission_poll_attempts,
            admission_poll_interval,
            webhook_bind_address,
            webhook_tls,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{} has an invalid value: {:?}", key, raw))
        })
        .transpose()
}
