//! Configuration loading from environment variables.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use omnistock_events::DecodePolicy;

use crate::consumer::{ConsumerConfig, DEFAULT_BATCH_SIZE, DEFAULT_CONSUMER_NAME, DEFAULT_RETRY_BACKOFF};
use crate::processor::low_stock::DEFAULT_LOW_STOCK_THRESHOLD;
use crate::processor::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_QUEUE_CAPACITY, ProcessorConfig};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_STREAM: &str = "inventory_events";
pub const DEFAULT_DRAIN_SECS: u64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: String,
    pub stream_key: String,
    pub consumer_name: String,
    pub slack_webhook_url: Option<String>,
    pub low_stock_threshold: i64,
    pub queue_capacity: usize,
    pub max_in_flight: usize,
    pub batch_size: usize,
    pub drain_timeout: Duration,
    pub strict_decode: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let text = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_string());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let queue_capacity: usize = parse(&get, "EVENT_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        let max_in_flight: usize = parse(&get, "EVENT_WORKERS", DEFAULT_MAX_IN_FLIGHT)?;
        let batch_size: usize = parse(&get, "CONSUMER_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        for (var, value) in [
            ("EVENT_QUEUE_CAPACITY", queue_capacity),
            ("EVENT_WORKERS", max_in_flight),
            ("CONSUMER_BATCH_SIZE", batch_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    var,
                    value: "0".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(Self {
            database_url,
            redis_url: text("REDIS_URL", DEFAULT_REDIS_URL),
            stream_key: text("INVENTORY_STREAM", DEFAULT_STREAM),
            consumer_name: text("CONSUMER_NAME", DEFAULT_CONSUMER_NAME),
            slack_webhook_url: get("SLACK_WEBHOOK_URL"),
            low_stock_threshold: parse(&get, "LOW_STOCK_THRESHOLD", DEFAULT_LOW_STOCK_THRESHOLD)?,
            queue_capacity,
            max_in_flight,
            batch_size,
            drain_timeout: Duration::from_secs(parse(&get, "SHUTDOWN_DRAIN_SECS", DEFAULT_DRAIN_SECS)?),
            strict_decode: parse(&get, "STRICT_EVENT_DECODE", false)?,
        })
    }

    pub fn processor(&self) -> ProcessorConfig {
        ProcessorConfig {
            queue_capacity: self.queue_capacity,
            max_in_flight: self.max_in_flight,
        }
    }

    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig {
            name: self.consumer_name.clone(),
            batch_size: self.batch_size,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            decode_policy: if self.strict_decode {
                DecodePolicy::Strict
            } else {
                DecodePolicy::Lenient
            },
        }
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
