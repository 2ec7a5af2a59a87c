//! Chat client on top of the durable log.
//!
//! A session joins one channel as one user:
//! 1. make sure the channel's stream exists ([`ensure_channel`])
//! 2. replay recent history through the user's durable reader ([`HistoryReplayer`])
//! 3. print entries appended from then on ([`LiveListener`])
//! 4. publish each input line ([`Publisher`])
//!
//! [`Session`] drives those steps in order.

mod history;
mod live;
mod message;
mod output;
mod provision;
mod publisher;
mod session;

pub use history::{HistoryReplayer, ReaderIdentity, Replay};
pub use live::{print_live, EchoPolicy, LiveListener};
pub use message::{compose, format_timestamp, parse_timestamp, ChatMessage, RetentionWindow};
pub use output::{MemorySink, Transcript};
pub use provision::{ensure_channel, Provisioned};
pub use publisher::{PublishStats, Publisher};
pub use session::{RunningSession, Session, SessionParams, SessionState};
