//! Display-side command dispatcher.
//!
//! One poll loop owns everything: each [`tick`](Dispatcher::tick) waits for a
//! backend event (or just sleeps when no media is open), then takes at most
//! one command off the command channel and applies it.
//!
//! ```text
//!   Idle ── command file found ──▶ CommandPending ── decoded ──▶ Applying
//!    ▲              (file deleted)        │ none                    │
//!    └────────────────────────────────────┴─────────────────────────┘
//! ```

use remote_proto::channel::ChannelSet;
use remote_proto::command::{Command, PauseRequest};
use remote_proto::config::TimeoutConfig;
use remote_proto::environment::expand_media_dirs;
use remote_proto::log::LogTailer;
use remote_proto::status::{MediaType, StatusRegister};
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    CommandPending,
    Applying,
}

/// The media currently handed to the backend.
#[derive(Debug)]
struct Session {
    url: String,
    auto_pause: bool,
    /// Ticks spent waiting for the backend to report the file loaded.
    waited_ticks: u64,
    load_limit_ticks: u64,
}

pub struct Dispatcher<B> {
    backend: B,
    channels: ChannelSet,
    status: StatusRegister,
    log: LogTailer,
    timeouts: TimeoutConfig,
    phase: Phase,
    session: Option<Session>,
    kill_requested: bool,
    stopped: bool,
}

impl<B: Backend> Dispatcher<B> {
    pub fn new(backend: B, channels: ChannelSet, timeouts: TimeoutConfig) -> Self {
        Self {
            backend,
            status: StatusRegister::new(&channels),
            log: LogTailer::new(&channels),
            channels,
            timeouts,
            phase: Phase::Idle,
            session: None,
            kill_requested: false,
            stopped: false,
        }
    }

    #[cfg(test)]
    pub fn status(&self) -> &remote_proto::status::PlayerStatus {
        self.status.status()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn in_session(&self) -> bool {
        self.session.is_some()
    }

    /// A `kill` command was applied; the caller should shut down.
    pub fn kill_requested(&self) -> bool {
        self.kill_requested
    }

    #[cfg(test)]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[cfg(test)]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Claim the channel set: fresh status with `running` set, and any
    /// command left over from an earlier process thrown away.
    pub fn start(&mut self) -> anyhow::Result<()> {
        let status = self.status.status_mut();
        status.reset();
        status.running = true;
        self.status.push()?;
        self.channels.discard_command()?;
        info!("dispatcher: claimed {}", self.channels.dir().display());
        Ok(())
    }

    /// One poll interval of work.
    pub async fn tick(&mut self) -> anyhow::Result<()> {
        let interval = self.timeouts.poll_interval();

        if self.session.is_some() {
            if let Some(event) = self.backend.next_event(interval).await {
                self.handle_event(event).await?;
            }
            self.check_load_timeout().await?;
        } else {
            tokio::time::sleep(interval).await;
        }

        self.poll_command().await?;

        if self.session.is_some() {
            self.status.push()?;
        }
        Ok(())
    }

    /// Take and apply the pending command, if there is one.
    pub async fn poll_command(&mut self) -> anyhow::Result<()> {
        let Some(line) = self.channels.take_command()? else {
            return Ok(());
        };
        self.phase = Phase::CommandPending;

        let command = Command::parse(&line);
        if command.is_noop() {
            debug!("dispatcher: ignoring {:?}", line);
            self.phase = Phase::Idle;
            return Ok(());
        }

        self.phase = Phase::Applying;
        info!("dispatcher: applying {}", command.verb());
        let result = self.apply(command).await;
        self.phase = Phase::Idle;
        result?;
        self.status.push()?;
        Ok(())
    }

    pub async fn apply(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Noop => {}
            Command::Open { url, auto_pause } => self.open(&url, auto_pause).await?,
            Command::Pause(request) => self.pause(request).await?,
            Command::Move { seconds } => {
                if self.is_loaded() {
                    let target = self.status.status().time + seconds;
                    self.seek_to(target).await?;
                }
            }
            Command::Seek { seconds } => {
                if self.is_loaded() {
                    self.seek_to(seconds).await?;
                }
            }
            Command::Stop => self.end_session().await?,
            Command::Kill => {
                self.kill_requested = true;
                self.end_session().await?;
            }
        }
        Ok(())
    }

    pub async fn handle_event(&mut self, event: BackendEvent) -> anyhow::Result<()> {
        match event {
            BackendEvent::FileLoaded { name, duration } => {
                let status = self.status.status_mut();
                status.name = name;
                status.duration = duration;
                status.loaded = true;
                let message = format!("Playing media `{}`\n", status.name);
                self.log.write(&message)?;

                if self.session.as_ref().is_some_and(|s| s.auto_pause) {
                    if let Err(e) = self.backend.set_pause(true).await {
                        warn!("dispatcher: auto-pause failed: {:#}", e);
                    }
                }
            }
            BackendEvent::Paused => {
                if !self.status.status().paused {
                    self.status.status_mut().paused = true;
                    self.log.write("Paused the media\n")?;
                }
            }
            BackendEvent::Unpaused => {
                if self.status.status().paused {
                    self.status.status_mut().paused = false;
                    self.log.write("Resumed the media\n")?;
                }
            }
            BackendEvent::Seeked { position } => {
                let delta = position - self.status.status().time;
                let seconds = (delta.abs() + 0.5) as i64;
                let message = if delta < 0.0 {
                    format!("Rewinded the media by {} seconds\n", seconds)
                } else {
                    format!("Skipped the media by {} seconds\n", seconds)
                };
                self.status.status_mut().time = position;
                self.log.write(&message)?;
            }
            BackendEvent::TimePos(time) => {
                if self.status.status().loaded {
                    self.status.status_mut().time = time;
                }
            }
            BackendEvent::EndFile { reason } => {
                debug!("dispatcher: end of file ({})", reason);
                self.end_session().await?;
            }
            BackendEvent::Shutdown => {
                debug!("dispatcher: backend shut down");
                self.end_session().await?;
            }
        }
        Ok(())
    }

    /// Tear everything down and release the channel set.
    ///
    /// Idempotent.  Safe to call from any point of the loop, including after
    /// a tick was cancelled half way.
    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.session = None;
        self.backend.teardown().await;

        self.status.status_mut().reset();
        self.status.push()?;
        self.log.write("Stopped MPV remote player\n")?;
        info!("dispatcher: stopped");
        Ok(())
    }

    // ── command effects ───────────────────────────────────────────────────────

    async fn open(&mut self, url: &str, auto_pause: bool) -> anyhow::Result<()> {
        if self.session.is_some() {
            info!("dispatcher: replacing the current media");
            self.end_session().await?;
        }

        let url = expand_media_dirs(url);
        self.status.status_mut().set_url(url.as_str());

        if let Err(e) = self.backend.open(&url).await {
            warn!("dispatcher: open {} failed: {:#}", url, e);
            self.backend.teardown().await;
            self.log_error(1, &format!("Error loading media `{}`\n", url))?;
            return Ok(());
        }

        self.status.status_mut().clear_error();
        self.status.push()?;

        let load_secs = match self.status.status().media_type() {
            MediaType::Local => self.timeouts.load_local_secs,
            MediaType::Http => self.timeouts.load_http_secs,
        };
        self.session = Some(Session {
            url,
            auto_pause,
            waited_ticks: 0,
            load_limit_ticks: self.ticks_for(load_secs),
        });
        Ok(())
    }

    async fn pause(&mut self, request: PauseRequest) -> anyhow::Result<()> {
        if !self.is_loaded() {
            return Ok(());
        }

        let target = match request {
            PauseRequest::Set(paused) => paused,
            PauseRequest::Toggle => match self.backend.get_pause().await {
                Ok(paused) => !paused,
                Err(e) => {
                    warn!("dispatcher: get pause failed: {:#}", e);
                    !self.status.status().paused
                }
            },
        };

        if let Err(e) = self.backend.set_pause(target).await {
            warn!("dispatcher: set pause failed: {:#}", e);
            self.log.write(&format!("MPV error: {:#}\n", e))?;
            return Ok(());
        }

        // Trust the engine over the request.
        let paused = self.backend.get_pause().await.unwrap_or(target);
        let was_paused = self.status.status().paused;
        self.status.status_mut().paused = paused;

        let message = match (was_paused, paused) {
            (false, true) => "Paused the media\n",
            (true, false) => "Resumed the media\n",
            (true, true) => "The media is already paused\n",
            (false, false) => "The media is already playing\n",
        };
        self.log.write(message)?;
        Ok(())
    }

    async fn seek_to(&mut self, position: f64) -> anyhow::Result<()> {
        let position = position.max(0.0);
        if let Err(e) = self.backend.seek(position).await {
            warn!("dispatcher: seek to {} failed: {:#}", position, e);
            self.log.write(&format!("MPV error: {:#}\n", e))?;
        }
        Ok(())
    }

    // ── session bookkeeping ───────────────────────────────────────────────────

    async fn check_load_timeout(&mut self) -> anyhow::Result<()> {
        if self.status.status().loaded {
            return Ok(());
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };

        if session.waited_ticks < session.load_limit_ticks {
            session.waited_ticks += 1;
            return Ok(());
        }

        let message = format!("Error loading media `{}`\n", session.url);
        warn!("dispatcher: load timed out for {}", session.url);
        self.log_error(1, &message)?;
        self.end_session().await
    }

    async fn end_session(&mut self) -> anyhow::Result<()> {
        if self.session.take().is_none() {
            return Ok(());
        }
        self.backend.teardown().await;

        let status = self.status.status_mut();
        status.loaded = false;
        status.paused = false;
        self.status.push()?;
        self.log.write("Finished playing the media\n")?;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.session.is_some() && self.status.status().loaded
    }

    fn ticks_for(&self, secs: f64) -> u64 {
        let interval = self.timeouts.poll_interval().as_secs_f64();
        (secs.max(0.0) / interval).ceil() as u64
    }

    /// Record a session-fatal failure in the status and tell the remote.
    fn log_error(&mut self, code: i32, message: &str) -> anyhow::Result<()> {
        self.status.status_mut().set_error(code, message);
        self.status.push()?;
        self.log.write(message)?;
        Ok(())
    }
}
