//! Log tailer for the append-only `mpv-log` channel.
//!
//! The display appends human-readable lines; the remote keeps a byte cursor
//! and only ever sees what was appended after it.  There is no framing: all
//! bytes since the cursor are one message.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::channel::{remove_if_present, ChannelSet};
use crate::error::{ChannelError, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause after a hit so a message written in two parts arrives as one.
const SETTLE: Duration = Duration::from_millis(10);

/// Polls still granted after the first response, for a follow-up message.
const TRAILING_POLLS: u64 = 4;

pub const NOT_RESPONDING: &str = "Media player is not responding\n";

#[derive(Debug, Clone)]
pub struct LogTailer {
    path: PathBuf,
    cursor: u64,
    poll_interval: Duration,
}

impl LogTailer {
    pub fn new(channels: &ChannelSet) -> Self {
        Self {
            path: channels.log_path(),
            cursor: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Append `message` to the channel and echo it on stdout.
    pub fn write(&self, message: &str) -> Result<()> {
        self.append(message)?;
        print!("{}", message);
        let _ = std::io::stdout().flush();
        Ok(())
    }

    /// Append without the stdout echo.
    pub fn append(&self, message: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ChannelError::io(&self.path, e))?;
        file.write_all(message.as_bytes())
            .map_err(|e| ChannelError::io(&self.path, e))
    }

    /// Everything appended since the last read, or `None` when nothing was.
    pub fn read(&mut self) -> Result<Option<String>> {
        let mut file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChannelError::io(&self.path, e)),
        };

        let mut buf = Vec::new();
        file.seek(SeekFrom::Start(self.cursor))
            .and_then(|_| file.read_to_end(&mut buf))
            .map_err(|e| ChannelError::io(&self.path, e))?;
        self.cursor += buf.len() as u64;

        if buf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
        }
    }

    /// Skip everything written so far.
    pub fn seek_to_end(&mut self) -> Result<()> {
        self.cursor = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(ChannelError::io(&self.path, e)),
        };
        debug!("log: cursor at {}", self.cursor);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        remove_if_present(&self.path)?;
        self.cursor = 0;
        Ok(())
    }

    /// Poll the channel for up to `timeout`, copying each message to `out`.
    ///
    /// After the first message only a few more polls are made, enough to
    /// catch a message that immediately follows.  Returns whether anything
    /// arrived; if not, the not-responding notice is written instead.
    pub fn wait_for_response_into<W: Write>(
        &mut self,
        timeout: Duration,
        out: &mut W,
    ) -> Result<bool> {
        let mut budget = poll_budget(timeout, self.poll_interval);
        let mut responded = false;
        let mut tick = 0;

        while tick < budget {
            std::thread::sleep(self.poll_interval);
            if let Some(message) = self.read()? {
                std::thread::sleep(SETTLE);
                let _ = out.write_all(message.as_bytes());
                let _ = out.flush();
                responded = true;
                budget = tick + TRAILING_POLLS;
            }
            tick += 1;
        }

        if !responded {
            let _ = out.write_all(NOT_RESPONDING.as_bytes());
            let _ = out.flush();
        }
        Ok(responded)
    }
}

/// Whole polls that fit in `timeout`.  A timeout a hair short of a multiple
/// of `poll` (0.3 s from an `f64` config value) still counts that last poll.
fn poll_budget(timeout: Duration, poll: Duration) -> u64 {
    let poll = poll.as_secs_f64().max(1e-6);
    (timeout.as_secs_f64() / poll + 1e-6).floor() as u64
}
