//! Client configuration.

use crate::error::{ChatError, Result};
use std::time::Duration;

/// Environment variable overriding [`ChatConfig::retention`] (seconds).
pub const ENV_RETENTION_SECS: &str = "LOGCHAT_RETENTION_SECS";
/// Environment variable overriding [`ChatConfig::history_batch`].
pub const ENV_HISTORY_BATCH: &str = "LOGCHAT_HISTORY_BATCH";
/// Environment variable overriding [`ChatConfig::fetch_timeout`] (milliseconds).
pub const ENV_FETCH_TIMEOUT_MS: &str = "LOGCHAT_FETCH_TIMEOUT_MS";
/// Environment variable overriding [`ChatConfig::poll_interval`] (milliseconds).
pub const ENV_POLL_INTERVAL_MS: &str = "LOGCHAT_POLL_INTERVAL_MS";
/// Environment variable overriding [`ChatConfig::suppress_echo`].
pub const ENV_SUPPRESS_ECHO: &str = "LOGCHAT_SUPPRESS_ECHO";

/// Chat client configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatConfig {
    /// Max age of channel entries. Used as the stream's max age when this
    /// client creates the channel, and as the client-side replay filter.
    pub retention: Duration,

    /// Max entries pulled during history replay.
    pub history_batch: usize,

    /// How long history replay waits when nothing is available.
    pub fetch_timeout: Duration,

    /// How often waiting readers look for new entries.
    pub poll_interval: Duration,

    /// Unacknowledged history deliveries are redelivered after this.
    pub ack_wait: Duration,

    /// Max live entries buffered for a slow display.
    pub live_buffer: usize,

    /// Printed in front of replayed entries.
    pub history_prefix: String,

    /// Hide this user's own messages on the live path.
    pub suppress_echo: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(60 * 60),
            history_batch: 10,
            fetch_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
            ack_wait: Duration::from_secs(30),
            live_buffer: 1000,
            history_prefix: "[history] ".to_string(),
            suppress_echo: false,
        }
    }
}

impl ChatConfig {
    /// Defaults overlaid with `LOGCHAT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_RETENTION_SECS)? {
            config.retention = Duration::from_secs(secs);
        }
        if let Some(batch) = parse_var::<usize, _>(&lookup, ENV_HISTORY_BATCH)? {
            config.history_batch = batch;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_FETCH_TIMEOUT_MS)? {
            config.fetch_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup(ENV_SUPPRESS_ECHO) {
            config.suppress_echo = parse_flag(ENV_SUPPRESS_ECHO, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention.is_zero() {
            return Err(ChatError::InvalidConfig("retention must be positive".into()));
        }
        if self.history_batch == 0 {
            return Err(ChatError::InvalidConfig(
                "history batch must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ChatError::InvalidConfig(
                "poll interval must be positive".into(),
            ));
        }
        if self.live_buffer == 0 {
            return Err(ChatError::InvalidConfig(
                "live buffer must hold at least one entry".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ChatError::InvalidConfig(format!("{key}={raw:?} is not a valid number"))),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ChatError::InvalidConfig(format!(
            "{key}={raw:?} is not a boolean"
        ))),
    }
}
