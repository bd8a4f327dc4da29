//! The playback engine as the dispatcher sees it.

use std::time::Duration;

/// Something the engine reports without being asked.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    FileLoaded { name: String, duration: f64 },
    Paused,
    Unpaused,
    /// A seek finished; `position` is the new playback time.
    Seeked { position: f64 },
    TimePos(f64),
    EndFile { reason: String },
    /// The engine went away.
    Shutdown,
}

/// One media session at a time: `open` starts it, `teardown` ends it.
#[allow(async_fn_in_trait)]
pub trait Backend {
    async fn open(&mut self, url: &str) -> anyhow::Result<()>;

    async fn set_pause(&mut self, paused: bool) -> anyhow::Result<()>;

    async fn get_pause(&mut self) -> anyhow::Result<bool>;

    /// Jump to an absolute position in seconds.
    async fn seek(&mut self, position: f64) -> anyhow::Result<()>;

    /// Wait up to `timeout` for the next event.  `None` when nothing happened.
    async fn next_event(&mut self, timeout: Duration) -> Option<BackendEvent>;

    /// Stop playback and release the engine.  Safe to call with no session.
    async fn teardown(&mut self);
}
