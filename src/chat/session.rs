//! Session driver: connect, provision, replay, go live, publish, park.

use super::history::{HistoryReplayer, ReaderIdentity, Replay};
use super::live::{print_live, EchoPolicy, LiveListener};
use super::output::Transcript;
use super::provision::{ensure_channel, Provisioned};
use super::publisher::{PublishStats, Publisher};
use crate::config::ChatConfig;
use crate::error::{ChatError, Result};
use crate::log::{LogClient, Subscription};
use std::fmt;
use std::io::BufRead;
use std::thread::JoinHandle;

/// Startup phases, entered strictly in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connecting,
    Provisioned,
    HistoryReplayed,
    LiveSubscribed,
    Publishing,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Provisioned => "provisioned",
            SessionState::HistoryReplayed => "history-replayed",
            SessionState::LiveSubscribed => "live-subscribed",
            SessionState::Publishing => "publishing",
            SessionState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Who joins what, and where.
#[derive(Clone, Debug)]
pub struct SessionParams {
    pub address: String,
    pub channel: String,
    pub user: String,
    pub config: ChatConfig,
}

/// One chat session per process.
pub struct Session {
    params: SessionParams,
    transcript: Transcript,
    state: SessionState,
}

impl Session {
    pub fn new(params: SessionParams, transcript: Transcript) -> Self {
        Self {
            params,
            transcript,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(next > self.state, "session state {} -> {}", self.state, next);
        tracing::debug!(from = %self.state, to = %next, "session state");
        self.state = next;
    }

    /// Run every startup phase and start publishing lines from `input`.
    ///
    /// Any error here is fatal and leaves the session `Terminated`.
    pub fn start<R>(&mut self, input: R) -> Result<RunningSession>
    where
        R: BufRead + Send + 'static,
    {
        if self.state != SessionState::Connecting {
            return Err(ChatError::InvalidConfig(format!(
                "session already {}",
                self.state
            )));
        }

        match self.run_phases(input) {
            Ok(running) => Ok(running),
            Err(e) => {
                self.advance(SessionState::Terminated);
                Err(e)
            }
        }
    }

    fn run_phases<R>(&mut self, input: R) -> Result<RunningSession>
    where
        R: BufRead + Send + 'static,
    {
        let SessionParams {
            address,
            channel,
            user,
            config,
        } = self.params.clone();
        config.validate()?;
        let reader = ReaderIdentity::for_user(&user)?;

        let log = LogClient::connect_with_poll_interval(&address, config.poll_interval)?;

        let provisioned = ensure_channel(&log, &channel, config.retention)?;
        if provisioned.was_created() {
            self.transcript.line("Stream created successfully.");
        } else {
            self.transcript.line("Stream already exists. Using it.");
        }
        self.advance(SessionState::Provisioned);

        self.transcript
            .line(&format!("Connected to log at {}", log.address()));
        self.transcript
            .line(&format!("Joining channel '{channel}' as '{user}'"));

        let replay = HistoryReplayer::new(&log, &channel, config.retention, config.ack_wait)
            .replay_history(&reader, config.history_batch, config.fetch_timeout)?;
        replay.print(&self.transcript, &config.history_prefix);
        self.advance(SessionState::HistoryReplayed);

        // Live picks up right after the head the history pull saw: nothing
        // is shown twice and nothing appended in between is missed.
        let echo = if config.suppress_echo {
            EchoPolicy::Suppress
        } else {
            EchoPolicy::Show
        };
        let live = LiveListener::new(&log, &channel, config.live_buffer).subscribe_live_after(
            replay.head,
            print_live(self.transcript.clone(), user.clone(), echo),
        )?;
        tracing::debug!(
            subscription = live.id().0,
            subject = live.subject(),
            after = %replay.head,
            "live delivery registered"
        );
        self.advance(SessionState::LiveSubscribed);

        let publisher = Publisher::new(log, channel, user);
        let publish_loop = std::thread::Builder::new()
            .name("publisher".into())
            .spawn(move || publisher.run(input))?;
        self.advance(SessionState::Publishing);

        Ok(RunningSession {
            provisioned,
            replay,
            live,
            publish_loop,
        })
    }
}

/// A session past startup: live delivery and publishing run in the background.
pub struct RunningSession {
    provisioned: Provisioned,
    replay: Replay,
    live: Subscription,
    publish_loop: JoinHandle<PublishStats>,
}

impl RunningSession {
    pub fn provisioned(&self) -> &Provisioned {
        &self.provisioned
    }

    pub fn replay(&self) -> &Replay {
        &self.replay
    }

    /// Park the calling thread for the rest of the process lifetime.
    pub fn wait_forever(self) -> ! {
        let never = crossbeam_channel::never::<()>();
        loop {
            let _ = never.recv();
        }
    }

    /// Stop live delivery and collect publish counters. Blocks until the
    /// input reaches EOF.
    pub fn shutdown(self) -> Result<PublishStats> {
        self.live.unsubscribe()?;
        self.publish_loop
            .join()
            .map_err(|_| ChatError::SubscriptionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::output::MemorySink;
    use std::io::Cursor;
    use std::time::Duration;
    use tempfile::TempDir;

    fn params(dir: &TempDir, user: &str) -> SessionParams {
        SessionParams {
            address: dir.path().to_str().unwrap().to_string(),
            channel: "room1".to_string(),
            user: user.to_string(),
            config: ChatConfig {
                fetch_timeout: Duration::from_millis(20),
                poll_interval: Duration::from_millis(5),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_startup_walks_every_state() {
        let dir = TempDir::new().unwrap();
        let sink = MemorySink::new();
        let mut session = Session::new(params(&dir, "alice"), Transcript::new(sink.clone()));
        assert_eq!(session.state(), SessionState::Connecting);

        let running = session.start(Cursor::new("")).unwrap();
        assert_eq!(session.state(), SessionState::Publishing);
        assert!(running.provisioned().was_created());
        assert!(running.replay().timed_out);

        let lines = sink.lines();
        assert_eq!(lines[0], "Stream created successfully.");
        assert!(lines[1].starts_with("Connected to log at "));
        assert_eq!(lines[2], "Joining channel 'room1' as 'alice'");

        running.shutdown().unwrap();

        // A session starts once
        assert!(session.start(Cursor::new("")).is_err());
    }

    #[test]
    fn test_unreachable_log_terminates() {
        let dir = TempDir::new().unwrap();
        let mut p = params(&dir, "alice");
        p.address = dir.path().join("missing").to_str().unwrap().to_string();

        let mut session = Session::new(p, Transcript::new(MemorySink::new()));
        let result = session.start(Cursor::new(""));
        assert!(matches!(result, Err(ChatError::Unreachable { .. })));
        assert_eq!(session.state(), SessionState::Terminated);
        assert!(!dir.path().join("missing").exists());
    }

    #[test]
    fn test_empty_user_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut session = Session::new(params(&dir, ""), Transcript::new(MemorySink::new()));
        assert!(matches!(
            session.start(Cursor::new("")),
            Err(ChatError::InvalidName(_))
        ));
        assert_eq!(session.state(), SessionState::Terminated);
    }
}
