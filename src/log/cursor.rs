//! Durable consumer cursors.
//!
//! A cursor file holds one MessagePack-encoded [`ConsumerState`] framed as
//! `magic "CUR\0" | version u8 | len u32 | state | crc32(state) u32`. Files
//! are replaced atomically (write to a temp file, then rename) so a crash
//! never leaves a half-written cursor behind.

use crate::error::{ChatError, Result};
use crate::types::{AckPolicy, ConsumerConfig, Sequence, Timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for cursor files.
const CURSOR_MAGIC: &[u8; 4] = b"CUR\0";

/// Current cursor format version.
const CURSOR_VERSION: u8 = 1;

/// Cursor bodies larger than this are treated as corruption.
const MAX_CURSOR_SIZE: usize = 16 * 1024 * 1024;

/// A delivery still waiting for its acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAck {
    /// Offset of the entry frame, for redelivery.
    pub offset: u64,
    /// When the entry was last handed out.
    pub delivered_at: Timestamp,
    /// How many times it has been handed out.
    pub deliveries: u32,
}

/// Persistent state of a durable consumer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsumerState {
    pub config: ConsumerConfig,
    pub created: Timestamp,
    /// Highest sequence handed out (or skipped as expired).
    pub delivered: Sequence,
    /// Offset just past the frame of `delivered`, or an earlier frame
    /// boundary when the start position was given as a sequence.
    pub delivered_offset: u64,
    /// Outstanding deliveries by sequence.
    pub pending: BTreeMap<u64, PendingAck>,
}

impl ConsumerState {
    pub fn new(config: ConsumerConfig, delivered: Sequence, delivered_offset: u64) -> Self {
        Self {
            config,
            created: Timestamp::now(),
            delivered,
            delivered_offset,
            pending: BTreeMap::new(),
        }
    }

    /// Every entry at or below the ack floor is acknowledged or skipped.
    pub fn ack_floor(&self) -> Sequence {
        match self.pending.keys().next() {
            Some(&lowest) => Sequence(lowest - 1),
            None => self.delivered,
        }
    }

    /// Record that `sequence` was handed out.
    pub fn mark_delivered(&mut self, sequence: Sequence, offset: u64, now: Timestamp) {
        if self.config.ack_policy == AckPolicy::None {
            return;
        }
        let pending = self.pending.entry(sequence.0).or_insert(PendingAck {
            offset,
            delivered_at: now,
            deliveries: 0,
        });
        pending.delivered_at = now;
        pending.deliveries += 1;
    }

    /// Acknowledge `sequence`. Acknowledging something already acknowledged
    /// is a no-op; returns false only for sequences never delivered.
    pub fn ack(&mut self, sequence: Sequence) -> bool {
        if self.pending.remove(&sequence.0).is_some() {
            return true;
        }
        sequence <= self.delivered
    }

    /// Pending deliveries whose ack wait has elapsed, lowest sequence first.
    pub fn due_for_redelivery(&self, now: Timestamp) -> Vec<(Sequence, PendingAck)> {
        self.pending
            .iter()
            .filter(|(_, p)| p.delivered_at.age_at(now) >= self.config.ack_wait)
            .map(|(&seq, &p)| (Sequence(seq), p))
            .collect()
    }
}

/// Directory of cursor files for one stream.
pub struct CursorStore {
    dir: PathBuf,
}

impl CursorStore {
    /// Open the cursor directory, creating it if missing.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// File name for a durable name. Hashed so any user name is a safe path.
    fn path_for(&self, durable_name: &str) -> PathBuf {
        let digest = Sha256::digest(durable_name.as_bytes());
        self.dir.join(format!("{}.cur", hex::encode(digest)))
    }

    /// Load a cursor. `Ok(None)` if the consumer was never created.
    pub fn load(&self, durable_name: &str) -> Result<Option<ConsumerState>> {
        let path = self.path_for(durable_name);
        if !path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != CURSOR_MAGIC {
            return Err(ChatError::InvalidFormat("Invalid cursor magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != CURSOR_VERSION {
            return Err(ChatError::InvalidFormat(format!(
                "Unsupported cursor version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_CURSOR_SIZE {
            return Err(ChatError::Corruption(format!(
                "cursor for {durable_name:?} claims a {len} byte body"
            )));
        }

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            return Err(ChatError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let state: ConsumerState = rmp_serde::from_slice(&encoded)?;
        if state.config.durable_name != durable_name {
            return Err(ChatError::Corruption(format!(
                "cursor for {durable_name:?} belongs to {:?}",
                state.config.durable_name
            )));
        }
        Ok(Some(state))
    }

    /// Persist a cursor, replacing any previous version atomically.
    pub fn save(&self, state: &ConsumerState) -> Result<()> {
        let path = self.path_for(&state.config.durable_name);
        let tmp_path = path.with_extension("cur.tmp");

        let encoded = rmp_serde::to_vec(state)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(CURSOR_MAGIC)?;
        file.write_all(&[CURSOR_VERSION])?;
        file.write_all(&(encoded.len() as u32).to_le_bytes())?;
        file.write_all(&encoded)?;
        file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}
