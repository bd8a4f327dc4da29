//! Remote side of the request/response handshake.
//!
//! ```text
//!   pull status ── running? ──no──▶ NotRunning (nothing written)
//!        │ yes
//!   log cursor → end of file
//!   write command line
//!   tail log for up to `timeout` ──▶ Responded | NotResponding
//! ```
//!
//! The cursor is moved before the write, so every byte read afterwards was
//! produced after this command was issued.

use std::io::Write;
use std::time::Duration;

use tracing::{debug, info};

use crate::channel::ChannelSet;
use crate::command::Command;
use crate::config::TimeoutConfig;
use crate::error::Result;
use crate::log::LogTailer;
use crate::status::{MediaType, PlayerStatus, StatusRegister};

pub const NOT_RUNNING: &str =
    "The media player is not running\nPlease run `mpv-play --start` on the host PC\n";
pub const NOTHING_TO_KILL: &str = "No active process to kill\n";
pub const KILL_BY_HAND: &str = "Please open the task manager and kill the process\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The display wrote at least one log message after the command.
    Responded,
    /// The status channel says no display process is running.
    NotRunning,
    /// Nothing arrived on the log channel before the timeout.
    NotResponding,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Responded => 0,
            Outcome::NotRunning | Outcome::NotResponding => 1,
        }
    }
}

/// Per-invocation context of a remote process.
pub struct Remote {
    channels: ChannelSet,
    status: StatusRegister,
    log: LogTailer,
    timeouts: TimeoutConfig,
}

impl Remote {
    pub fn new(channels: ChannelSet, timeouts: TimeoutConfig) -> Self {
        let status = StatusRegister::new(&channels);
        let log = LogTailer::new(&channels).with_poll_interval(timeouts.poll_interval());
        Self {
            channels,
            status,
            log,
            timeouts,
        }
    }

    pub fn status(&self) -> &PlayerStatus {
        self.status.status()
    }

    /// Pull the status channel and return the fresh view.
    pub fn refresh_status(&mut self) -> Result<&PlayerStatus> {
        self.status.pull()?;
        Ok(self.status.status())
    }

    /// How long to wait for a response to `command`.
    ///
    /// Opening media waits far longer than control commands, and network
    /// media longer than local files.
    pub fn response_timeout(&self, command: &Command) -> Duration {
        let secs = match command {
            Command::Open { url, .. } => match MediaType::of_url(url) {
                MediaType::Local => self.timeouts.open_local_secs,
                MediaType::Http => self.timeouts.open_http_secs,
            },
            Command::Kill => self.timeouts.kill_secs,
            _ => self.timeouts.response_secs,
        };
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Send `command` with its policy timeout, reporting on stdout.
    pub fn send(&mut self, command: &Command) -> Result<Outcome> {
        let timeout = self.response_timeout(command);
        self.send_and_wait(&command.to_string(), timeout)
    }

    pub fn send_and_wait(&mut self, line: &str, timeout: Duration) -> Result<Outcome> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        self.send_and_wait_into(line, timeout, &mut out)
    }

    pub fn send_and_wait_into<W: Write>(
        &mut self,
        line: &str,
        timeout: Duration,
        out: &mut W,
    ) -> Result<Outcome> {
        if !self.refresh_status()?.running {
            info!("remote: display not running, {:?} not sent", line);
            let _ = out.write_all(NOT_RUNNING.as_bytes());
            return Ok(Outcome::NotRunning);
        }

        self.log.seek_to_end()?;
        self.channels.write_command(line)?;
        debug!("remote: sent {:?}, waiting up to {:?}", line, timeout);

        if self.log.wait_for_response_into(timeout, out)? {
            Ok(Outcome::Responded)
        } else {
            Ok(Outcome::NotResponding)
        }
    }

    /// Ask the display process to exit.
    ///
    /// When it does not answer, the status channel is reset so the stale
    /// `running` flag no longer blocks a fresh start.
    pub fn kill_into<W: Write>(&mut self, out: &mut W) -> Result<Outcome> {
        if !self.refresh_status()?.running {
            let _ = out.write_all(NOTHING_TO_KILL.as_bytes());
            return Ok(Outcome::NotRunning);
        }

        let timeout = self.response_timeout(&Command::Kill);
        let outcome = self.send_and_wait_into(&Command::Kill.to_string(), timeout, out)?;
        if outcome == Outcome::NotResponding {
            let _ = out.write_all(KILL_BY_HAND.as_bytes());
            self.status.status_mut().reset();
            self.status.push()?;
        }
        Ok(outcome)
    }

    pub fn kill(&mut self) -> Result<Outcome> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        self.kill_into(&mut out)
    }
}
