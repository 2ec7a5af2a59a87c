//! Ephemeral push subscriptions.
//!
//! A subscription runs two threads:
//! - a tailer that polls the stream's entry file and forwards matching
//!   entries into a bounded channel, and
//! - a dispatcher that drains the channel and calls the handler.
//!
//! A slow handler never blocks the tailer: when the buffer is full the entry
//! is dropped and a warning is logged. Live delivery is best effort.

use super::client::StreamHandle;
use crate::error::{ChatError, Result};
use crate::types::{DeliverPolicy, Entry, Sequence, Timestamp};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Counter for generating subscription IDs.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for a push subscription.
#[derive(Clone, Debug)]
pub struct LiveOptions {
    /// Where delivery starts. `New` means strictly after the current head.
    pub deliver_policy: DeliverPolicy,

    /// Max buffered entries before new ones are dropped.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            deliver_policy: DeliverPolicy::New,
            buffer_size: 1000,
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to a running push subscription. Dropping it stops delivery.
pub struct Subscription {
    id: SubscriptionId,
    subject: String,
    stop: Option<Sender<()>>,
    tailer: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn spawn<F>(
        stream: Arc<StreamHandle>,
        subject: String,
        start_offset: u64,
        after: Sequence,
        buffer_size: usize,
        poll_interval: Duration,
        mut handler: F,
    ) -> Result<Self>
    where
        F: FnMut(Entry) + Send + 'static,
    {
        let id = SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::SeqCst));
        let (entry_tx, entry_rx) = bounded::<Entry>(buffer_size.max(1));
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let tail = Tailer {
            id,
            stream,
            subject: subject.clone(),
            offset: start_offset,
            after,
            poll_interval,
        };
        let tailer = std::thread::Builder::new()
            .name(format!("live-tail-{}", id.0))
            .spawn(move || tail.run(entry_tx, stop_rx))?;

        let dispatcher = std::thread::Builder::new()
            .name(format!("live-dispatch-{}", id.0))
            .spawn(move || {
                for entry in entry_rx.iter() {
                    handler(entry);
                }
            })?;

        tracing::debug!(subscription = id.0, %subject, %after, "live subscription started");

        Ok(Self {
            id,
            subject,
            stop: Some(stop_tx),
            tailer: Some(tailer),
            dispatcher: Some(dispatcher),
        })
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// True while the tailer is still running.
    pub fn is_active(&self) -> bool {
        self.tailer.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop delivery and wait for both threads to finish. Entries already
    /// buffered are still handed to the handler first.
    ///
    /// Must not be called from inside the handler.
    pub fn unsubscribe(mut self) -> Result<()> {
        self.stop.take();
        for thread in [self.tailer.take(), self.dispatcher.take()]
            .into_iter()
            .flatten()
        {
            thread.join().map_err(|_| ChatError::SubscriptionClosed)?;
        }
        Ok(())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // Closing the stop channel ends the tailer, which ends the dispatcher
        self.stop.take();
    }
}

struct Tailer {
    id: SubscriptionId,
    stream: Arc<StreamHandle>,
    subject: String,
    /// Next frame to read.
    offset: u64,
    /// Entries at or below this sequence are never delivered.
    after: Sequence,
    poll_interval: Duration,
}

impl Tailer {
    fn run(mut self, entries: Sender<Entry>, stop: Receiver<()>) {
        loop {
            match self.poll(&entries) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::warn!(subscription = self.id.0, error = %e, "live subscription stopped");
                    break;
                }
            }

            match stop.recv_timeout(self.poll_interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!(subscription = self.id.0, "live subscription ended");
    }

    /// Forward everything appended since the last poll. Returns false once
    /// the dispatcher is gone.
    fn poll(&mut self, entries: &Sender<Entry>) -> Result<bool> {
        let now = Timestamp::now();
        let mut connected = true;
        let mut last_seen = self.after;

        let end = self.stream.entries.scan(self.offset, |located| {
            let entry = located.entry;
            if entry.sequence <= last_seen {
                return ControlFlow::Continue(());
            }
            last_seen = entry.sequence;

            if entry.message.subject != self.subject || self.stream.is_expired(&entry, now) {
                return ControlFlow::Continue(());
            }

            match entries.try_send(entry) {
                Ok(()) => ControlFlow::Continue(()),
                Err(TrySendError::Full(dropped)) => {
                    tracing::warn!(
                        subscription = self.id.0,
                        sequence = %dropped.sequence,
                        "live buffer full, dropping entry"
                    );
                    ControlFlow::Continue(())
                }
                Err(TrySendError::Disconnected(_)) => {
                    connected = false;
                    ControlFlow::Break(())
                }
            }
        })?;

        self.offset = end;
        self.after = last_seen;
        Ok(connected)
    }
}

#[cfg(test)]
mod tests {
    use crate::log::{LiveOptions, LogClient};
    use crate::types::{DeliverPolicy, Message, Sequence, StreamConfig};
    use crossbeam_channel::unbounded;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> LogClient {
        let client = LogClient::connect_with_poll_interval(
            dir.path().to_str().unwrap(),
            Duration::from_millis(5),
        )
        .unwrap();
        client
            .add_stream(StreamConfig::for_channel("room1", Duration::from_secs(3600)))
            .unwrap();
        client
    }

    #[test]
    fn test_new_policy_skips_existing() {
        let dir = TempDir::new().unwrap();
        let client = setup(&dir);
        client.publish(Message::new("room1", b"before".to_vec())).unwrap();

        let (tx, rx) = unbounded();
        let sub = client
            .subscribe("room1", LiveOptions::default(), move |entry| {
                let _ = tx.send(entry);
            })
            .unwrap();
        assert!(sub.is_active());

        client.publish(Message::new("room1", b"after".to_vec())).unwrap();

        let entry = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(entry.payload(), b"after");
        assert_eq!(entry.sequence, Sequence(2));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        sub.unsubscribe().unwrap();
    }

    #[test]
    fn test_delivery_in_sequence_order() {
        let dir = TempDir::new().unwrap();
        let client = setup(&dir);

        let (tx, rx) = unbounded();
        let _sub = client
            .subscribe("room1", LiveOptions::default(), move |entry| {
                let _ = tx.send(entry.sequence);
            })
            .unwrap();

        for i in 0..20 {
            client
                .publish(Message::new("room1", format!("m{}", i).into_bytes()))
                .unwrap();
        }

        let received: Vec<_> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        let expected: Vec<_> = (1..=20).map(Sequence).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_after_policy_starts_past_sequence() {
        let dir = TempDir::new().unwrap();
        let client = setup(&dir);
        for text in ["one", "two", "three"] {
            client.publish(Message::new("room1", text.as_bytes().to_vec())).unwrap();
        }

        let (tx, rx) = unbounded();
        let options = LiveOptions {
            deliver_policy: DeliverPolicy::After(Sequence(2)),
            ..Default::default()
        };
        let _sub = client
            .subscribe("room1", options, move |entry| {
                let _ = tx.send(entry);
            })
            .unwrap();

        let entry = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(entry.payload(), b"three");
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_drop_stops_delivery() {
        let dir = TempDir::new().unwrap();
        let client = setup(&dir);

        let (tx, rx) = unbounded();
        let sub = client
            .subscribe("room1", LiveOptions::default(), move |entry| {
                let _ = tx.send(entry);
            })
            .unwrap();
        drop(sub);

        // Dispatcher exits once the tailer is gone, closing the channel
        std::thread::sleep(Duration::from_millis(50));
        client.publish(Message::new("room1", b"unseen".to_vec())).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_slow_handler_drops_overflow() {
        let dir = TempDir::new().unwrap();
        let client = setup(&dir);

        let (gate_tx, gate_rx) = unbounded::<()>();
        let (tx, rx) = unbounded();
        let options = LiveOptions {
            buffer_size: 2,
            ..Default::default()
        };
        let _sub = client
            .subscribe("room1", options, move |entry| {
                let _ = gate_rx.recv();
                let _ = tx.send(entry.sequence);
            })
            .unwrap();

        for i in 0..10 {
            client
                .publish(Message::new("room1", format!("m{}", i).into_bytes()))
                .unwrap();
        }
        std::thread::sleep(Duration::from_millis(100));
        drop(gate_tx);

        let mut received = Vec::new();
        while let Ok(seq) = rx.recv_timeout(Duration::from_millis(200)) {
            received.push(seq);
        }
        assert!(!received.is_empty());
        assert!(received.len() < 10);
        assert!(received.windows(2).all(|w| w[0] < w[1]));
    }
}
