//! Line-oriented transcript output.

use super::message::ChatMessage;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Shared sink for chat lines. Each line is written and flushed whole, so
/// lines from the history, live and status paths never interleave mid-line.
#[derive(Clone)]
pub struct Transcript {
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Transcript {
    pub fn new<W: Write + Send + 'static>(sink: W) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }

    /// Transcript on standard output.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Write one line. Output errors are logged, never propagated: a broken
    /// terminal must not take down delivery.
    pub fn line(&self, text: &str) {
        let mut sink = self.sink.lock();
        if let Err(e) = writeln!(sink, "{text}").and_then(|_| sink.flush()) {
            tracing::warn!(error = %e, "failed to write transcript line");
        }
    }

    pub fn history(&self, prefix: &str, message: &ChatMessage) {
        self.line(&format!("{prefix}{}", message.display_line()));
    }

    pub fn live(&self, message: &ChatMessage) {
        self.line(&message.display_line());
    }
}

/// In-memory writer for capturing a transcript.
#[derive(Clone, Default)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sequence;

    fn message(author: &str, body: &str) -> ChatMessage {
        ChatMessage {
            sequence: Sequence(1),
            author: author.to_string(),
            body: body.to_string(),
            created_at: None,
        }
    }

    #[test]
    fn test_history_and_live_lines() {
        let sink = MemorySink::new();
        let transcript = Transcript::new(sink.clone());

        transcript.history("[history] ", &message("alice", "hi"));
        transcript.live(&message("bob", "hello"));
        transcript.line("status");

        assert_eq!(
            sink.lines(),
            vec!["[history] alice: hi", "bob: hello", "status"]
        );
    }
}
