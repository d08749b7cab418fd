use event_bus::StreamConfig;
use outbox::{ProcessorConfig, RetryPolicy};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Broker transport selected by `BUS_TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    Nats,
    InMemory,
}

impl FromStr for BusType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nats" => Ok(BusType::Nats),
            "inmemory" => Ok(BusType::InMemory),
            other => Err(format!("must be 'nats' or 'inmemory', got '{}'", other)),
        }
    }
}

/// Relay configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub bus_type: BusType,
    pub nats_url: String,
    pub nats_max_reconnects: usize,
    pub stream: StreamConfig,

    // Processor
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub lease: Duration,
    pub retry: RetryPolicy,

    // Retention
    pub retention: Duration,
    pub cleanup_interval: Duration,

    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse from an arbitrary key lookup, applying defaults for unset keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let db_max_connections: u32 = parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?;
        at_least_one("DB_MAX_CONNECTIONS", db_max_connections)?;
        let db_acquire_timeout =
            Duration::from_secs(parse_or(&lookup, "DB_ACQUIRE_TIMEOUT_SECS", 3)?);

        let bus_type = parse_or(&lookup, "BUS_TYPE", BusType::Nats)?;
        let nats_url = lookup("NATS_URL").unwrap_or_else(|| "nats://localhost:4222".to_string());
        let nats_max_reconnects = parse_or(&lookup, "NATS_MAX_RECONNECTS", 60)?;

        let defaults = StreamConfig::default();
        let stream = StreamConfig {
            name: lookup("EVENT_STREAM_NAME").unwrap_or(defaults.name),
            subject_prefix: lookup("EVENT_SUBJECT_PREFIX").unwrap_or(defaults.subject_prefix),
            max_age: Duration::from_secs(parse_or(&lookup, "EVENT_STREAM_MAX_AGE_SECS", 604_800)?),
            duplicate_window: Duration::from_secs(parse_or(&lookup, "EVENT_DEDUP_WINDOW_SECS", 300)?),
        };

        let batch_size: i64 = parse_or(&lookup, "OUTBOX_BATCH_SIZE", 100)?;
        at_least_one("OUTBOX_BATCH_SIZE", batch_size)?;

        let poll_interval_ms: u64 = parse_or(&lookup, "OUTBOX_POLL_INTERVAL_MS", 5000)?;
        at_least_one("OUTBOX_POLL_INTERVAL_MS", poll_interval_ms)?;

        let cleanup_interval_secs: u64 = parse_or(&lookup, "OUTBOX_CLEANUP_INTERVAL_SECS", 3600)?;
        at_least_one("OUTBOX_CLEANUP_INTERVAL_SECS", cleanup_interval_secs)?;

        let retention_hours: u64 = parse_or(&lookup, "OUTBOX_RETENTION_HOURS", 168)?;
        let retention_secs = retention_hours
            .checked_mul(3600)
            .ok_or_else(|| ConfigError::Invalid {
                name: "OUTBOX_RETENTION_HOURS",
                value: retention_hours.to_string(),
                reason: "out of range".to_string(),
            })?;

        let retry = RetryPolicy {
            base: Duration::from_millis(parse_or(&lookup, "OUTBOX_RETRY_BASE_MS", 1000)?),
            max: Duration::from_secs(parse_or(&lookup, "OUTBOX_RETRY_MAX_SECS", 300)?),
        };

        Ok(Config {
            database_url,
            db_max_connections,
            db_acquire_timeout,
            bus_type,
            nats_url,
            nats_max_reconnects,
            stream,
            poll_interval: Duration::from_millis(poll_interval_ms),
            batch_size,
            lease: Duration::from_secs(parse_or(&lookup, "OUTBOX_LEASE_SECS", 60)?),
            retry,
            retention: Duration::from_secs(retention_secs),
            cleanup_interval: Duration::from_secs(cleanup_interval_secs),
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "PORT", 8095)?,
        })
    }

    /// Processor settings; the lease owner is unique per process
    pub fn processor(&self) -> ProcessorConfig {
        ProcessorConfig {
            interval: self.poll_interval,
            batch_size: self.batch_size,
            lease: self.lease,
            ..Default::default()
        }
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}

fn at_least_one<T>(name: &'static str, value: T) -> Result<(), ConfigError>
where
    T: PartialOrd + From<u8> + std::fmt::Display,
{
    if value < T::from(1) {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}
