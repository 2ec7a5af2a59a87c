//! # logchat
//!
//! A terminal chat client whose channels are streams in a durable,
//! file-backed log.
//!
//! ## Core Concepts
//!
//! - **Channels**: One stream per channel, created on first join with a max age
//! - **History**: A durable per-user reader replays what the user has not seen
//! - **Live**: Entries appended after the replay are printed as they arrive
//! - **Publishing**: Each input line becomes one entry, stamped with author and time
//!
//! ## Example
//!
//! ```ignore
//! use logchat::{ChatConfig, Session, SessionParams, Transcript};
//!
//! let mut session = Session::new(
//!     SessionParams {
//!         address: "file:///var/lib/chat".into(),
//!         channel: "room1".into(),
//!         user: "alice".into(),
//!         config: ChatConfig::from_env()?,
//!     },
//!     Transcript::stdout(),
//! );
//! session.start(std::io::BufReader::new(std::io::stdin()))?.wait_forever();
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod log;
pub mod types;

// Re-exports
pub use chat::{
    ensure_channel, ChatMessage, EchoPolicy, HistoryReplayer, LiveListener, Provisioned,
    Publisher, ReaderIdentity, Replay, RunningSession, Session, SessionParams, SessionState,
    Transcript,
};
pub use config::ChatConfig;
pub use error::{ChatError, Result};
pub use log::{LiveOptions, LogClient, PublishAck, PullBatch, PulledEntry, Subscription};
pub use types::*;
