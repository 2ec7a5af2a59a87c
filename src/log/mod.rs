//! File-backed durable log.
//!
//! A log root directory holds any number of streams. Each stream keeps:
//! - `stream.json`: the stream config, fixed at creation
//! - `entries.log`: append-only entry frames
//! - `consumers/`: one cursor file per durable consumer
//! - `LOCK`: advisory lock taken for every mutation
//!
//! Several processes may share a root. Appends, consumer updates and stream
//! creation are serialized through fs2 file locks; readers tail the entry
//! file without locking.
//!
//! Delivery is at-least-once: a pulled entry that is not acknowledged within
//! the consumer's ack wait is handed out again. Entries older than the
//! stream's max age (by append time) are skipped by every reader.
//!
//! # Example
//!
//! ```ignore
//! let client = LogClient::connect("file:///var/lib/chat")?;
//! client.add_stream(StreamConfig::for_channel("room1", Duration::from_secs(3600)))?;
//! client.publish(Message::new("room1", b"hi".to_vec()).with_header("user", "alice"))?;
//!
//! client.add_consumer("room1", ConsumerConfig::durable("bob_consumer", Duration::from_secs(30)))?;
//! let batch = client.fetch("room1", "bob_consumer", 10, Duration::from_secs(10))?;
//! for pulled in &batch.entries {
//!     pulled.ack()?;
//! }
//! ```

mod client;
mod cursor;
mod entries;
mod subscription;

pub use client::{LogClient, PublishAck, PullBatch, PulledEntry, DEFAULT_POLL_INTERVAL};
pub use cursor::{ConsumerState, CursorStore, PendingAck};
pub use entries::{EntryLog, Head, LocatedEntry};
pub use subscription::{LiveOptions, Subscription, SubscriptionId};
