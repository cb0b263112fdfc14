//! Runtime configuration.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// The prefix of all environment variables read by `Config::new`.
pub const ENV_PREFIX: &str = "IRONSTREAM_";

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The logging filter, using `tracing_subscriber::EnvFilter` directives.
    #[serde(default = "Config::default_log_filter")]
    pub log_filter: String,

    /// The maximum number of fetch calls which may be in flight at once.
    #[serde(default = "Config::default_concurrency_limit")]
    pub concurrency_limit: u32,
    /// The number of messages requested per fetch call.
    #[serde(default = "Config::default_fetch_count")]
    pub fetch_count: u32,
    /// The cadence of the polling timer in milliseconds.
    #[serde(default = "Config::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// The number of message IDs accumulated before issuing one bulk acknowledgment.
    #[serde(default = "Config::default_batch_size")]
    pub batch_size: usize,

    /// The name of the queue used by the demo binary.
    #[serde(default = "Config::default_demo_queue")]
    pub demo_queue: String,
    /// The number of messages the demo binary seeds its in-memory queue with.
    #[serde(default = "Config::default_demo_messages")]
    pub demo_messages: usize,
}

impl Config {
    /// Create a new config instance from the runtime environment.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Config = envy::prefixed(ENV_PREFIX).from_env().context("error building config from env")?;
        config.validate()?;
        Ok(config)
    }

    /// Ensure all values are within their accepted ranges.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            bail!("concurrency limit must be greater than 0");
        }
        if self.fetch_count == 0 {
            bail!("fetch count must be greater than 0");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll interval must be greater than 0");
        }
        if self.batch_size == 0 {
            bail!("batch size must be greater than 0");
        }
        Ok(())
    }

    /// The queue config derived from this runtime config.
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            concurrency_limit: self.concurrency_limit,
            fetch_count: self.fetch_count,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// The sink config derived from this runtime config.
    pub fn sink_config(&self) -> SinkConfig {
        SinkConfig { batch_size: self.batch_size }
    }

    fn default_log_filter() -> String {
        "info".into()
    }

    fn default_concurrency_limit() -> u32 {
        QueueConfig::default().concurrency_limit
    }

    fn default_fetch_count() -> u32 {
        QueueConfig::default().fetch_count
    }

    fn default_poll_interval_ms() -> u64 {
        QueueConfig::default().poll_interval.as_millis() as u64
    }

    fn default_batch_size() -> usize {
        SinkConfig::default().batch_size
    }

    fn default_demo_queue() -> String {
        "demo".into()
    }

    fn default_demo_messages() -> usize {
        100
    }
}

/// Queue configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    /// The maximum number of fetch calls which may be in flight at once.
    pub concurrency_limit: u32,
    /// The number of messages requested per fetch call.
    pub fetch_count: u32,
    /// The cadence of the polling timer.
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            fetch_count: 10,
            poll_interval: Duration::from_millis(5),
        }
    }
}

/// Sink configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    /// The number of message IDs accumulated before issuing one bulk acknowledgment.
    ///
    /// A value of `1` deletes each message as soon as it is acknowledged.
    pub batch_size: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self { batch_size: 1 }
    }
}
