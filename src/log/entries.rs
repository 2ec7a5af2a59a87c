//! Append-only entry file for a single stream.
//!
//! Each entry is one self-delimiting frame:
//!
//! ```text
//! magic "ENT\0" | version u8 | flags u8 | sequence u64 | appended_at i64 |
//! body_len u32 | body (MessagePack Message) | crc32(body) u32
//! ```
//!
//! Writers append whole frames with a single write while holding the stream
//! lock. Readers never take the lock: a frame that is cut short at the end of
//! the file is treated as "not written yet" and read again on the next scan.
//! A complete frame whose body fails its checksum is skipped with a warning;
//! its sequence stays used.

use crate::error::{ChatError, Result};
use crate::types::{Entry, Message, Sequence, Timestamp};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

/// Magic bytes for entry frames.
const ENTRY_MAGIC: &[u8; 4] = b"ENT\0";

/// Current entry format version.
const ENTRY_VERSION: u8 = 1;

/// Fixed frame header: magic + version + flags + sequence + appended_at + body_len.
const FRAME_HEADER_SIZE: usize = 4 + 1 + 1 + 8 + 8 + 4;

/// Bodies larger than this are treated as corruption.
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// End of the readable part of the log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Head {
    /// Offset just past the last complete frame.
    pub offset: u64,
    /// Sequence of the last complete frame (`Seq(0)` when empty).
    pub last_sequence: Sequence,
}

/// A frame located in the file.
#[derive(Clone, Debug)]
pub struct LocatedEntry {
    pub offset: u64,
    pub next_offset: u64,
    pub entry: Entry,
}

/// Append-only entry log.
pub struct EntryLog {
    /// Path to the entry file.
    path: PathBuf,

    /// Last head observed by this process. Other processes may have appended
    /// since, so writers refresh it under the stream lock.
    head: Mutex<Head>,
}

impl EntryLog {
    /// Open or create an entry log.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        Ok(Self {
            path,
            head: Mutex::new(Head::default()),
        })
    }

    /// Bring the cached head up to date with the file.
    ///
    /// Must be called with the stream lock held: a torn frame left behind by
    /// a crashed writer is truncated away so later appends stay readable.
    pub fn refresh_head(&self) -> Result<Head> {
        let mut head = self.head.lock();

        let mut latest = *head;
        let end = self.scan_frames(head.offset, |frame| {
            latest.last_sequence = frame.sequence();
            ControlFlow::Continue(())
        })?;
        latest.offset = end;

        let file_len = std::fs::metadata(&self.path)?.len();
        if file_len > end {
            tracing::warn!(
                path = %self.path.display(),
                torn_bytes = file_len - end,
                "truncating torn frame at end of entry log"
            );
            let file = OpenOptions::new().write(true).open(&self.path)?;
            file.set_len(end)?;
            file.sync_all()?;
        }

        *head = latest;
        Ok(latest)
    }

    /// Append a message, assigning the next sequence.
    ///
    /// Must be called with the stream lock held.
    pub fn append(&self, message: Message) -> Result<Entry> {
        let head = self.refresh_head()?;

        let entry = Entry {
            sequence: head.last_sequence.next(),
            appended_at: Timestamp::now(),
            message,
        };

        let frame = encode_frame(&entry)?;

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&frame)?;
        file.sync_data()?;

        *self.head.lock() = Head {
            offset: head.offset + frame.len() as u64,
            last_sequence: entry.sequence,
        };

        Ok(entry)
    }

    /// Read the frame starting at `offset`.
    pub fn read_at(&self, offset: u64) -> Result<Option<LocatedEntry>> {
        let mut found = None;
        self.scan(offset, |located| {
            found = Some(located);
            ControlFlow::Break(())
        })?;
        Ok(found)
    }

    /// Visit complete frames from `offset` until the visitor breaks or the
    /// readable end of the file is reached. Frames failing their checksum
    /// are skipped.
    ///
    /// Returns the offset just past the last frame handed to the visitor (or
    /// past the last complete frame when the visitor never breaks).
    pub fn scan<F>(&self, offset: u64, mut visit: F) -> Result<u64>
    where
        F: FnMut(LocatedEntry) -> ControlFlow<()>,
    {
        self.scan_frames(offset, |frame| match frame {
            Frame::Entry(located) => visit(located),
            Frame::Corrupt {
                offset,
                sequence,
                expected,
                got,
                ..
            } => {
                tracing::warn!(
                    path = %self.path.display(),
                    offset,
                    %sequence,
                    expected,
                    got,
                    "skipping entry with bad checksum"
                );
                ControlFlow::Continue(())
            }
        })
    }

    fn scan_frames<F>(&self, offset: u64, mut visit: F) -> Result<u64>
    where
        F: FnMut(Frame) -> ControlFlow<()>,
    {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut reader = BufReader::new(file);

        let mut position = offset;
        loop {
            let Some(frame) = read_frame(&mut reader, position)? else {
                return Ok(position);
            };
            position = frame.next_offset();
            if visit(frame).is_break() {
                return Ok(position);
            }
        }
    }
}

/// A complete frame as found on disk.
enum Frame {
    Entry(LocatedEntry),
    /// Intact header, body failing its checksum.
    Corrupt {
        offset: u64,
        next_offset: u64,
        sequence: Sequence,
        expected: u32,
        got: u32,
    },
}

impl Frame {
    fn sequence(&self) -> Sequence {
        match self {
            Frame::Entry(located) => located.entry.sequence,
            Frame::Corrupt { sequence, .. } => *sequence,
        }
    }

    fn next_offset(&self) -> u64 {
        match self {
            Frame::Entry(located) => located.next_offset,
            Frame::Corrupt { next_offset, .. } => *next_offset,
        }
    }
}

/// Serialize an entry into a complete frame.
pub fn encode_frame(entry: &Entry) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec(&entry.message)?;
    if body.len() > MAX_BODY_SIZE {
        return Err(ChatError::InvalidConfig(format!(
            "entry body of {} bytes exceeds the {} byte limit",
            body.len(),
            MAX_BODY_SIZE
        )));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + body.len() + 4);
    frame.extend_from_slice(ENTRY_MAGIC);
    frame.push(ENTRY_VERSION);
    // Flags (reserved)
    frame.push(0u8);
    frame.extend_from_slice(&entry.sequence.0.to_le_bytes());
    frame.extend_from_slice(&entry.appended_at.0.to_le_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    Ok(frame)
}

/// Read one frame. `Ok(None)` means clean end of file or an incomplete
/// trailing frame.
fn read_frame<R: Read>(reader: &mut R, position: u64) -> Result<Option<Frame>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    if !read_full(reader, &mut header)? {
        return Ok(None);
    }

    if &header[0..4] != ENTRY_MAGIC {
        return Err(ChatError::Corruption(format!(
            "invalid entry magic at offset {position}"
        )));
    }
    if header[4] != ENTRY_VERSION {
        return Err(ChatError::InvalidFormat(format!(
            "Unsupported entry version: {}",
            header[4]
        )));
    }

    let sequence = Sequence(u64::from_le_bytes(header[6..14].try_into().unwrap_or_default()));
    let appended_at = Timestamp(i64::from_le_bytes(
        header[14..22].try_into().unwrap_or_default(),
    ));
    let body_len = u32::from_le_bytes(header[22..26].try_into().unwrap_or_default()) as usize;
    if body_len > MAX_BODY_SIZE {
        return Err(ChatError::Corruption(format!(
            "entry at offset {position} claims a {body_len} byte body"
        )));
    }

    let mut body = vec![0u8; body_len];
    if !read_full(reader, &mut body)? {
        return Ok(None);
    }

    let mut checksum_bytes = [0u8; 4];
    if !read_full(reader, &mut checksum_bytes)? {
        return Ok(None);
    }
    let next_offset = position + (FRAME_HEADER_SIZE + body_len + 4) as u64;

    let stored_checksum = u32::from_le_bytes(checksum_bytes);
    let computed_checksum = crc32fast::hash(&body);
    if stored_checksum != computed_checksum {
        return Ok(Some(Frame::Corrupt {
            offset: position,
            next_offset,
            sequence,
            expected: stored_checksum,
            got: computed_checksum,
        }));
    }

    let message: Message = rmp_serde::from_slice(&body)?;

    Ok(Some(Frame::Entry(LocatedEntry {
        offset: position,
        next_offset,
        entry: Entry {
            sequence,
            appended_at,
            message,
        },
    })))
}

/// Fill `buf` completely. Returns false if the input ends first.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
