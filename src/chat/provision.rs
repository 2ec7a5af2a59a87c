//! Idempotent channel provisioning.

use crate::error::{ChatError, Result};
use crate::log::LogClient;
use crate::types::{validate_name, StreamConfig, StreamInfo};
use std::time::Duration;

/// Outcome of [`ensure_channel`].
#[derive(Clone, Debug)]
pub enum Provisioned {
    /// The channel was already there; its config was left as is.
    Exists(StreamInfo),
    /// This call created the channel.
    Created(StreamInfo),
}

impl Provisioned {
    pub fn info(&self) -> &StreamInfo {
        match self {
            Provisioned::Exists(info) | Provisioned::Created(info) => info,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Provisioned::Created(_))
    }
}

/// Make sure the stream for `channel` exists.
///
/// Only "stream not found" leads to creation; any other lookup error is
/// returned. An existing channel keeps the retention it was created with.
pub fn ensure_channel(log: &LogClient, channel: &str, retention: Duration) -> Result<Provisioned> {
    validate_name(channel)?;
    if retention.is_zero() {
        return Err(ChatError::InvalidConfig("retention must be positive".into()));
    }

    match log.stream_info(channel) {
        Ok(info) => return Ok(Provisioned::Exists(info)),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    match log.add_stream(StreamConfig::for_channel(channel, retention)) {
        Ok(info) => {
            tracing::info!(channel, ?retention, "created channel");
            Ok(Provisioned::Created(info))
        }
        // Another client created it between the lookup and the add
        Err(ChatError::StreamExists(_)) => Ok(Provisioned::Exists(log.stream_info(channel)?)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_call_observes_exists() {
        let dir = TempDir::new().unwrap();
        let log = LogClient::connect(dir.path().to_str().unwrap()).unwrap();

        let first = ensure_channel(&log, "room1", Duration::from_secs(3600)).unwrap();
        assert!(first.was_created());

        let second = ensure_channel(&log, "room1", Duration::from_secs(60)).unwrap();
        assert!(!second.was_created());
        // First creator's retention wins
        assert_eq!(second.info().config.max_age, Duration::from_secs(3600));

        let streams: Vec<_> = std::fs::read_dir(dir.path().join("streams"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        assert_eq!(streams.len(), 1);
    }

    #[test]
    fn test_dotted_channel_name() {
        let dir = TempDir::new().unwrap();
        let log = LogClient::connect(dir.path().to_str().unwrap()).unwrap();

        let provisioned = ensure_channel(&log, "team.general", Duration::from_secs(60)).unwrap();
        assert!(provisioned.was_created());
        assert!(dir.path().join("streams").join("team.general").is_dir());
        assert!(matches!(
            ensure_channel(&log, "..", Duration::from_secs(60)),
            Err(ChatError::InvalidName(_))
        ));
    }

    #[test]
    fn test_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let log = LogClient::connect(dir.path().to_str().unwrap()).unwrap();

        assert!(matches!(
            ensure_channel(&log, "", Duration::from_secs(1)),
            Err(ChatError::InvalidName(_))
        ));
        assert!(matches!(
            ensure_channel(&log, "room1", Duration::ZERO),
            Err(ChatError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_concurrent_first_joins_create_once() {
        let dir = TempDir::new().unwrap();
        let address = dir.path().to_str().unwrap().to_string();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let address = address.clone();
                std::thread::spawn(move || {
                    let log = LogClient::connect(&address).unwrap();
                    ensure_channel(&log, "room1", Duration::from_secs(3600))
                        .unwrap()
                        .was_created()
                })
            })
            .collect();

        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&created| created)
            .count();
        assert_eq!(created, 1);
    }
}
