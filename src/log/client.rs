//! Client handle for a file-backed durable log.

use super::cursor::{ConsumerState, CursorStore};
use super::entries::{EntryLog, Head, LocatedEntry};
use super::subscription::{LiveOptions, Subscription};
use crate::error::{ChatError, Result};
use crate::types::{
    ConsumerConfig, ConsumerInfo, DeliverPolicy, Entry, Message, Sequence, StreamConfig,
    StreamInfo, Timestamp, validate_name,
};
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Prefix accepted in front of a log root path.
const FILE_SCHEME: &str = "file://";

/// Default interval between polls while waiting for new entries.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exclusive advisory lock, released on drop.
pub(crate) struct LockGuard(File);

impl LockGuard {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self(file))
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

/// Files belonging to one stream.
pub(crate) struct StreamHandle {
    pub(crate) info: StreamInfo,
    pub(crate) entries: EntryLog,
    cursors: CursorStore,
    lock_path: PathBuf,
}

impl StreamHandle {
    fn open(dir: &Path, info: StreamInfo) -> Result<Self> {
        Ok(Self {
            entries: EntryLog::open(dir.join("entries.log"))?,
            cursors: CursorStore::open(dir.join("consumers"))?,
            lock_path: dir.join("LOCK"),
            info,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.info.config.name
    }

    pub(crate) fn lock(&self) -> Result<LockGuard> {
        LockGuard::acquire(&self.lock_path)
    }

    /// Entries older than the stream's max age are never delivered.
    pub(crate) fn is_expired(&self, entry: &Entry, now: Timestamp) -> bool {
        entry.appended_at.age_at(now) > self.info.config.max_age
    }
}

/// Result of a publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: Sequence,
}

/// An entry handed out by a pull fetch. Must be acknowledged explicitly.
#[derive(Clone)]
pub struct PulledEntry {
    pub entry: Entry,
    client: LogClient,
    stream: String,
    durable_name: String,
}

impl PulledEntry {
    /// Acknowledge this delivery so the consumer never sees it again.
    pub fn ack(&self) -> Result<()> {
        self.client
            .ack(&self.stream, &self.durable_name, self.entry.sequence)
    }
}

impl std::fmt::Debug for PulledEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulledEntry")
            .field("entry", &self.entry)
            .field("stream", &self.stream)
            .field("durable_name", &self.durable_name)
            .finish()
    }
}

/// Outcome of a bounded pull.
#[derive(Debug)]
pub struct PullBatch {
    pub entries: Vec<PulledEntry>,
    /// Last sequence in the stream when the pull completed.
    pub head: Sequence,
    /// True when the deadline passed with nothing to deliver.
    pub timed_out: bool,
}

struct ClientInner {
    address: String,
    root: PathBuf,
    poll_interval: Duration,
    streams: RwLock<HashMap<String, Arc<StreamHandle>>>,
}

/// Connection to a durable log rooted in a directory.
///
/// Cheap to clone and safe to share between threads. Several processes may
/// use the same root concurrently.
#[derive(Clone)]
pub struct LogClient {
    inner: Arc<ClientInner>,
}

impl LogClient {
    /// Connect to the log at `address` (`file:///path` or a plain path).
    ///
    /// The root directory must already exist; nothing is created here.
    pub fn connect(address: &str) -> Result<Self> {
        Self::connect_with_poll_interval(address, DEFAULT_POLL_INTERVAL)
    }

    /// Connect with a custom interval for fetch waits and live tailing.
    pub fn connect_with_poll_interval(address: &str, poll_interval: Duration) -> Result<Self> {
        let root = parse_address(address)?;

        let metadata = fs::metadata(&root).map_err(|e| ChatError::Unreachable {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        if !metadata.is_dir() {
            return Err(ChatError::Unreachable {
                address: address.to_string(),
                reason: "not a directory".into(),
            });
        }

        tracing::debug!(root = %root.display(), "connected to log");

        Ok(Self {
            inner: Arc::new(ClientInner {
                address: address.to_string(),
                root,
                poll_interval: if poll_interval.is_zero() {
                    DEFAULT_POLL_INTERVAL
                } else {
                    poll_interval
                },
                streams: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    // --- Streams ---

    /// Look up a stream. Fails with [`ChatError::StreamNotFound`] if absent.
    pub fn stream_info(&self, name: &str) -> Result<StreamInfo> {
        Ok(self.stream(name)?.info.clone())
    }

    /// Create a stream. Fails with [`ChatError::StreamExists`] if a stream
    /// with that name is already present; its config is left untouched.
    pub fn add_stream(&self, config: StreamConfig) -> Result<StreamInfo> {
        validate_name(&config.name)?;
        if config.subjects.is_empty() {
            return Err(ChatError::InvalidConfig(format!(
                "stream {} has no subjects",
                config.name
            )));
        }
        for subject in &config.subjects {
            validate_name(subject)?;
        }
        if config.max_age.is_zero() {
            return Err(ChatError::InvalidConfig("max age must be positive".into()));
        }

        let streams_dir = self.streams_dir();
        fs::create_dir_all(&streams_dir)?;
        let _lock = LockGuard::acquire(&streams_dir.join("LOCK"))?;

        let dir = streams_dir.join(&config.name);
        if dir.join("stream.json").exists() {
            return Err(ChatError::StreamExists(config.name));
        }

        for existing in self.list_stream_names()? {
            let handle = self.stream(&existing)?;
            if let Some(subject) = config
                .subjects
                .iter()
                .find(|s| handle.info.config.accepts(s))
            {
                return Err(ChatError::InvalidConfig(format!(
                    "subject {subject} already belongs to stream {existing}"
                )));
            }
        }

        fs::create_dir_all(&dir)?;
        let info = StreamInfo {
            config,
            created: Timestamp::now(),
        };
        let handle = Arc::new(StreamHandle::open(&dir, info.clone())?);

        // stream.json goes last: its presence marks the stream as existing
        let tmp_path = dir.join("stream.json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(&info)?)?;
        fs::rename(&tmp_path, dir.join("stream.json"))?;

        tracing::debug!(stream = %info.config.name, max_age = ?info.config.max_age, "created stream");
        self.inner
            .streams
            .write()
            .insert(info.config.name.clone(), handle);

        Ok(info)
    }

    fn streams_dir(&self) -> PathBuf {
        self.inner.root.join("streams")
    }

    fn list_stream_names(&self) -> Result<Vec<String>> {
        let streams_dir = self.streams_dir();
        if !streams_dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for dir_entry in fs::read_dir(&streams_dir)? {
            let dir_entry = dir_entry?;
            if dir_entry.path().join("stream.json").exists() {
                if let Some(name) = dir_entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    pub(crate) fn stream(&self, name: &str) -> Result<Arc<StreamHandle>> {
        if let Some(handle) = self.inner.streams.read().get(name) {
            return Ok(Arc::clone(handle));
        }

        validate_name(name).map_err(|_| ChatError::StreamNotFound(name.to_string()))?;
        let dir = self.streams_dir().join(name);
        let info_path = dir.join("stream.json");
        if !info_path.exists() {
            return Err(ChatError::StreamNotFound(name.to_string()));
        }
        let info: StreamInfo = serde_json::from_slice(&fs::read(&info_path)?)
            .map_err(|e| ChatError::Deserialization(e.to_string()))?;
        let handle = Arc::new(StreamHandle::open(&dir, info)?);

        let mut streams = self.inner.streams.write();
        Ok(Arc::clone(
            streams.entry(name.to_string()).or_insert(handle),
        ))
    }

    fn stream_for_subject(&self, subject: &str) -> Result<Arc<StreamHandle>> {
        {
            let streams = self.inner.streams.read();
            if let Some(handle) = streams.values().find(|h| h.info.config.accepts(subject)) {
                return Ok(Arc::clone(handle));
            }
        }

        for name in self.list_stream_names()? {
            let handle = self.stream(&name)?;
            if handle.info.config.accepts(subject) {
                return Ok(handle);
            }
        }

        Err(ChatError::NoStreamForSubject(subject.to_string()))
    }

    // --- Publishing ---

    /// Append a message to the stream that owns its subject.
    pub fn publish(&self, message: Message) -> Result<PublishAck> {
        let handle = self.stream_for_subject(&message.subject)?;

        let entry = {
            let _lock = handle.lock()?;
            handle.entries.append(message)?
        };

        tracing::trace!(stream = handle.name(), sequence = %entry.sequence, "published");
        Ok(PublishAck {
            stream: handle.name().to_string(),
            sequence: entry.sequence,
        })
    }

    // --- Durable consumers ---

    /// Create a durable consumer, or return the existing one if its config
    /// matches. A different config under the same name is an error.
    pub fn add_consumer(&self, stream: &str, config: ConsumerConfig) -> Result<ConsumerInfo> {
        if config.durable_name.is_empty() {
            return Err(ChatError::InvalidName(
                "durable name must not be empty".into(),
            ));
        }

        let handle = self.stream(stream)?;
        let _lock = handle.lock()?;

        if let Some(state) = handle.cursors.load(&config.durable_name)? {
            if state.config != config {
                return Err(ChatError::ConsumerConflict(config.durable_name));
            }
            tracing::debug!(stream, durable = %config.durable_name, "reusing consumer");
            return Ok(consumer_info(stream, &state));
        }

        let state = match config.deliver_policy {
            DeliverPolicy::All => ConsumerState::new(config, Sequence(0), 0),
            DeliverPolicy::New => {
                let head = handle.entries.refresh_head()?;
                ConsumerState::new(config, head.last_sequence, head.offset)
            }
            DeliverPolicy::After(sequence) => ConsumerState::new(config, sequence, 0),
        };
        handle.cursors.save(&state)?;

        tracing::debug!(stream, durable = %state.config.durable_name, "created consumer");
        Ok(consumer_info(stream, &state))
    }

    pub fn consumer_info(&self, stream: &str, durable_name: &str) -> Result<ConsumerInfo> {
        let handle = self.stream(stream)?;
        let _lock = handle.lock()?;
        let state = handle
            .cursors
            .load(durable_name)?
            .ok_or_else(|| ChatError::ConsumerNotFound(durable_name.to_string()))?;
        Ok(consumer_info(stream, &state))
    }

    /// Pull up to `batch` entries for a durable consumer.
    ///
    /// Returns as soon as anything is available; otherwise polls until
    /// `timeout` passes and returns an empty, timed-out batch.
    pub fn fetch(
        &self,
        stream: &str,
        durable_name: &str,
        batch: usize,
        timeout: Duration,
    ) -> Result<PullBatch> {
        let handle = self.stream(stream)?;
        let deadline = Instant::now() + timeout;

        loop {
            let (entries, head) = self.pull_once(&handle, durable_name, batch)?;

            if !entries.is_empty() || batch == 0 || Instant::now() >= deadline {
                let timed_out = entries.is_empty() && batch > 0;
                let entries = entries
                    .into_iter()
                    .map(|entry| PulledEntry {
                        entry,
                        client: self.clone(),
                        stream: stream.to_string(),
                        durable_name: durable_name.to_string(),
                    })
                    .collect();
                return Ok(PullBatch {
                    entries,
                    head,
                    timed_out,
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(self.inner.poll_interval.min(remaining));
        }
    }

    fn pull_once(
        &self,
        handle: &StreamHandle,
        durable_name: &str,
        batch: usize,
    ) -> Result<(Vec<Entry>, Sequence)> {
        let _lock = handle.lock()?;
        let mut state = handle
            .cursors
            .load(durable_name)?
            .ok_or_else(|| ChatError::ConsumerNotFound(durable_name.to_string()))?;

        let now = Timestamp::now();
        let mut out = Vec::new();

        for (sequence, pending) in state.due_for_redelivery(now) {
            if out.len() >= batch {
                break;
            }
            match handle.entries.read_at(pending.offset)? {
                Some(located) if located.entry.sequence == sequence => {
                    if handle.is_expired(&located.entry, now) {
                        state.pending.remove(&sequence.0);
                        continue;
                    }
                    tracing::debug!(durable = durable_name, %sequence, "redelivering");
                    state.mark_delivered(sequence, pending.offset, now);
                    out.push(located.entry);
                }
                _ => {
                    tracing::warn!(durable = durable_name, %sequence, "pending entry vanished");
                    state.pending.remove(&sequence.0);
                }
            }
        }

        if out.len() < batch {
            let wanted = batch - out.len();
            let delivered = state.delivered;
            let mut located_entries: Vec<LocatedEntry> = Vec::new();
            let mut deliverable = 0;

            let end = handle.entries.scan(state.delivered_offset, |located| {
                if located.entry.sequence > delivered && !handle.is_expired(&located.entry, now) {
                    deliverable += 1;
                }
                located_entries.push(located);
                if deliverable >= wanted {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })?;

            // Past every frame looked at, damaged ones included
            state.delivered_offset = end;
            for located in located_entries {
                if located.entry.sequence <= state.delivered {
                    continue;
                }
                state.delivered = located.entry.sequence;
                if handle.is_expired(&located.entry, now) {
                    continue;
                }
                state.mark_delivered(located.entry.sequence, located.offset, now);
                out.push(located.entry);
            }
        }

        let Head { last_sequence, .. } = handle.entries.refresh_head()?;
        handle.cursors.save(&state)?;

        Ok((out, last_sequence))
    }

    /// Acknowledge a delivery for a durable consumer.
    pub fn ack(&self, stream: &str, durable_name: &str, sequence: Sequence) -> Result<()> {
        let handle = self.stream(stream)?;
        let _lock = handle.lock()?;
        let mut state = handle
            .cursors
            .load(durable_name)?
            .ok_or_else(|| ChatError::ConsumerNotFound(durable_name.to_string()))?;

        if !state.ack(sequence) {
            return Err(ChatError::NotPending(sequence, durable_name.to_string()));
        }
        handle.cursors.save(&state)
    }

    // --- Push subscriptions ---

    /// Register an ephemeral push subscription on `subject`.
    ///
    /// `handler` runs on the subscription's own dispatch thread, once per
    /// entry, in sequence order. No acknowledgement is involved.
    pub fn subscribe<F>(&self, subject: &str, options: LiveOptions, handler: F) -> Result<Subscription>
    where
        F: FnMut(Entry) + Send + 'static,
    {
        let handle = self.stream_for_subject(subject)?;

        let (start_offset, after) = match options.deliver_policy {
            DeliverPolicy::All => (0, Sequence(0)),
            DeliverPolicy::New => {
                let _lock = handle.lock()?;
                let head = handle.entries.refresh_head()?;
                (head.offset, head.last_sequence)
            }
            DeliverPolicy::After(sequence) => (0, sequence),
        };

        Subscription::spawn(
            handle,
            subject.to_string(),
            start_offset,
            after,
            options.buffer_size,
            self.inner.poll_interval,
            handler,
        )
    }
}

fn consumer_info(stream: &str, state: &ConsumerState) -> ConsumerInfo {
    ConsumerInfo {
        stream: stream.to_string(),
        config: state.config.clone(),
        ack_floor: state.ack_floor(),
        delivered: state.delivered,
        num_pending_acks: state.pending.len(),
    }
}

/// Turn a log address into its root directory.
fn parse_address(address: &str) -> Result<PathBuf> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(ChatError::UnsupportedAddress(address.to_string()));
    }
    if let Some(path) = trimmed.strip_prefix(FILE_SCHEME) {
        if path.is_empty() {
            return Err(ChatError::UnsupportedAddress(address.to_string()));
        }
        return Ok(PathBuf::from(path));
    }
    if trimmed.contains("://") {
        return Err(ChatError::UnsupportedAddress(address.to_string()));
    }
    Ok(PathBuf::from(trimmed))
}
