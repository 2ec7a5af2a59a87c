//! Live delivery of entries appended after join.

use super::message::ChatMessage;
use super::output::Transcript;
use crate::error::Result;
use crate::log::{LiveOptions, LogClient, Subscription};
use crate::types::{DeliverPolicy, Sequence};

/// Whether a user's own messages come back through the live path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum EchoPolicy {
    /// Show every entry, including this user's own.
    #[default]
    Show,
    /// Skip entries authored by this user.
    Suppress,
}

/// Registers live subscriptions for a channel.
pub struct LiveListener<'a> {
    log: &'a LogClient,
    channel: &'a str,
    buffer_size: usize,
}

impl<'a> LiveListener<'a> {
    pub fn new(log: &'a LogClient, channel: &'a str, buffer_size: usize) -> Self {
        Self {
            log,
            channel,
            buffer_size,
        }
    }

    /// Deliver only entries appended after this call.
    pub fn subscribe_live<F>(&self, on_entry: F) -> Result<Subscription>
    where
        F: FnMut(ChatMessage) + Send + 'static,
    {
        self.subscribe_with(DeliverPolicy::New, on_entry)
    }

    /// Deliver entries with a sequence strictly greater than `after`.
    pub fn subscribe_live_after<F>(&self, after: Sequence, on_entry: F) -> Result<Subscription>
    where
        F: FnMut(ChatMessage) + Send + 'static,
    {
        self.subscribe_with(DeliverPolicy::After(after), on_entry)
    }

    fn subscribe_with<F>(&self, deliver_policy: DeliverPolicy, mut on_entry: F) -> Result<Subscription>
    where
        F: FnMut(ChatMessage) + Send + 'static,
    {
        let options = LiveOptions {
            deliver_policy,
            buffer_size: self.buffer_size,
        };
        self.log.subscribe(self.channel, options, move |entry| {
            on_entry(ChatMessage::from_entry(&entry));
        })
    }
}

/// Callback printing each live entry, optionally hiding `user`'s own.
pub fn print_live(transcript: Transcript, user: String, echo: EchoPolicy) -> impl FnMut(ChatMessage) + Send + 'static {
    move |message: ChatMessage| {
        if echo == EchoPolicy::Suppress && message.author == user {
            return;
        }
        transcript.live(&message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::compose;
    use crate::chat::output::MemorySink;
    use crate::chat::provision::ensure_channel;
    use chrono::Utc;
    use crossbeam_channel::unbounded;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> LogClient {
        let log = LogClient::connect_with_poll_interval(
            dir.path().to_str().unwrap(),
            Duration::from_millis(5),
        )
        .unwrap();
        ensure_channel(&log, "room1", Duration::from_secs(3600)).unwrap();
        log
    }

    fn wait_for_lines(sink: &MemorySink, count: usize) -> Vec<String> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.lines().len() < count && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        sink.lines()
    }

    #[test]
    fn test_only_new_entries_delivered() {
        let dir = TempDir::new().unwrap();
        let log = setup(&dir);
        log.publish(compose("room1", "alice", "before", Utc::now())).unwrap();

        let (tx, rx) = unbounded();
        let listener = LiveListener::new(&log, "room1", 100);
        let _sub = listener
            .subscribe_live(move |message| {
                let _ = tx.send(message);
            })
            .unwrap();

        log.publish(compose("room1", "bob", "after", Utc::now())).unwrap();

        let message = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(message.display_line(), "bob: after");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_echo_shown_by_default() {
        let dir = TempDir::new().unwrap();
        let log = setup(&dir);
        let sink = MemorySink::new();

        let listener = LiveListener::new(&log, "room1", 100);
        let _sub = listener
            .subscribe_live(print_live(
                Transcript::new(sink.clone()),
                "alice".to_string(),
                EchoPolicy::Show,
            ))
            .unwrap();

        log.publish(compose("room1", "alice", "me", Utc::now())).unwrap();
        log.publish(compose("room1", "bob", "you", Utc::now())).unwrap();

        assert_eq!(wait_for_lines(&sink, 2), vec!["alice: me", "bob: you"]);
    }

    #[test]
    fn test_echo_suppressed() {
        let dir = TempDir::new().unwrap();
        let log = setup(&dir);
        let sink = MemorySink::new();

        let listener = LiveListener::new(&log, "room1", 100);
        let _sub = listener
            .subscribe_live(print_live(
                Transcript::new(sink.clone()),
                "alice".to_string(),
                EchoPolicy::Suppress,
            ))
            .unwrap();

        log.publish(compose("room1", "alice", "me", Utc::now())).unwrap();
        log.publish(compose("room1", "bob", "you", Utc::now())).unwrap();

        assert_eq!(wait_for_lines(&sink, 1), vec!["bob: you"]);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(sink.lines(), vec!["bob: you"]);
    }

    #[test]
    fn test_subscribe_after_sequence() {
        let dir = TempDir::new().unwrap();
        let log = setup(&dir);
        for text in ["one", "two", "three"] {
            log.publish(compose("room1", "alice", text, Utc::now())).unwrap();
        }

        let (tx, rx) = unbounded();
        let listener = LiveListener::new(&log, "room1", 100);
        let _sub = listener
            .subscribe_live_after(Sequence(1), move |message| {
                let _ = tx.send(message.body);
            })
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "two");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "three");
    }
}
