//! Status register: the in-memory mirror of `mpv-status.json`.
//!
//! The display process is the only regular writer.  Any process may pull.
//! The file shape is fixed:
//!
//! ```json
//! {
//!   "name": "", "url": "", "time": 0.0, "duration": 0.0,
//!   "paused": false, "loaded": false, "running": false,
//!   "error": { "code": 0, "message": "" }
//! }
//! ```

use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::channel::{persist_atomically, remove_if_present, ChannelSet};
use crate::error::{ChannelError, Result};

const HTTP_PREFIX: &[u8] = b"https://";

/// Where the current media comes from.  Always derived from the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    #[default]
    Local,
    Http,
}

impl MediaType {
    /// Case-sensitive check of the first eight bytes against `https://`.
    pub fn of_url(url: &str) -> Self {
        if url.as_bytes().starts_with(HTTP_PREFIX) {
            MediaType::Http
        } else {
            MediaType::Local
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusErrorInfo {
    pub code: i32,
    pub message: String,
}

/// Canonical player state.  Fields are public except `url`, which must go
/// through [`PlayerStatus::set_url`] so the media type stays in step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlayerStatus {
    pub name: String,
    url: String,
    media_type: MediaType,
    pub time: f64,
    pub duration: f64,
    pub paused: bool,
    pub loaded: bool,
    /// A display process currently owns this channel set.
    pub running: bool,
    pub error: StatusErrorInfo,
}

impl PlayerStatus {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
        self.media_type = MediaType::of_url(&self.url);
    }

    pub fn set_error(&mut self, code: i32, message: impl Into<String>) {
        self.error = StatusErrorInfo {
            code,
            message: message.into(),
        };
    }

    pub fn clear_error(&mut self) {
        self.error = StatusErrorInfo::default();
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Human-readable summary, one field per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "MPV Remote Player status:\n\
             \x20   name: {}\n\
             \x20   url: {}\n\
             \x20   time: {}\n\
             \x20   duration: {}\n\
             \x20   paused: {}\n\
             \x20   loaded: {}\n\
             \x20   running: {}\n",
            self.name,
            self.url,
            hms(self.time),
            hms(self.duration),
            self.paused as u8,
            self.loaded as u8,
            self.running as u8,
        );
        if self.error.code != 0 {
            let message = self
                .error
                .message
                .strip_suffix('\n')
                .unwrap_or(&self.error.message);
            let _ = write!(
                out,
                "    error:\n        code: {}\n        message: {}\n",
                self.error.code, message
            );
        }
        out
    }

    /// The status channel document for this state.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(StatusSnapshot::from(self))?)
    }

    /// Fold a parsed status document into `self`, key by key, in file order.
    ///
    /// Stops at the first missing key and returns `false`.  Fields visited
    /// before that point keep their new values and the rest keep their old
    /// ones.  Files from older writers rely on this, so it stays.
    fn apply_document(&mut self, doc: &Value) -> bool {
        let Some(name) = doc.get("name") else {
            return false;
        };
        self.name = json_string(name);

        let Some(url) = doc.get("url") else {
            return false;
        };
        self.set_url(json_string(url));

        let Some(time) = doc.get("time") else {
            return false;
        };
        self.time = json_f64(time);

        let Some(duration) = doc.get("duration") else {
            return false;
        };
        self.duration = json_f64(duration);

        let Some(paused) = doc.get("paused") else {
            return false;
        };
        self.paused = json_bool(paused);

        let Some(loaded) = doc.get("loaded") else {
            return false;
        };
        self.loaded = json_bool(loaded);

        let Some(running) = doc.get("running") else {
            return false;
        };
        self.running = json_bool(running);

        let Some(error) = doc.get("error") else {
            return false;
        };
        let Some(code) = error.get("code") else {
            return false;
        };
        self.error.code = json_i32(code);
        let Some(message) = error.get("message") else {
            return false;
        };
        self.error.message = json_string(message);

        true
    }
}

fn hms(seconds: f64) -> String {
    let total = seconds as i64;
    format!("{}:{}:{}", total / 3600, (total / 60) % 60, total % 60)
}

fn json_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(b) => *b as u8 as f64,
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn json_i32(value: &Value) -> i32 {
    json_f64(value) as i32
}

fn json_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        _ => false,
    }
}

#[derive(Serialize)]
struct ErrorSnapshot<'a> {
    code: i32,
    message: &'a str,
}

/// Wire shape of the status file.  Field order is the file order.
#[derive(Serialize)]
struct StatusSnapshot<'a> {
    name: &'a str,
    url: &'a str,
    time: f64,
    duration: f64,
    paused: bool,
    loaded: bool,
    running: bool,
    error: ErrorSnapshot<'a>,
}

impl<'a> From<&'a PlayerStatus> for StatusSnapshot<'a> {
    fn from(status: &'a PlayerStatus) -> Self {
        Self {
            name: &status.name,
            url: &status.url,
            time: status.time,
            duration: status.duration,
            paused: status.paused,
            loaded: status.loaded,
            running: status.running,
            error: ErrorSnapshot {
                code: status.error.code,
                message: &status.error.message,
            },
        }
    }
}

/// Result of one [`StatusRegister::pull`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// No status file; the register was reset to defaults.
    Missing,
    /// Every key was present.
    Complete,
    /// A key was missing or the file was not JSON.  The file was removed and
    /// the register holds whatever was read before the gap.
    Partial,
}

/// A [`PlayerStatus`] bound to the status channel of one [`ChannelSet`].
#[derive(Debug, Clone)]
pub struct StatusRegister {
    path: PathBuf,
    status: PlayerStatus,
}

impl StatusRegister {
    pub fn new(channels: &ChannelSet) -> Self {
        Self {
            path: channels.status_path(),
            status: PlayerStatus::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> &PlayerStatus {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut PlayerStatus {
        &mut self.status
    }

    /// Refresh from the status channel.
    pub fn pull(&mut self) -> Result<PullOutcome> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.status.reset();
                return Ok(PullOutcome::Missing);
            }
            Err(e) => return Err(ChannelError::io(&self.path, e)),
        };

        let doc: Value = serde_json::from_str(&content).unwrap_or_else(|e| {
            debug!("status: unparsable {}: {}", self.path.display(), e);
            Value::Null
        });

        if self.status.apply_document(&doc) {
            Ok(PullOutcome::Complete)
        } else {
            warn!(
                "status: {} is incomplete, discarding it",
                self.path.display()
            );
            remove_if_present(&self.path)?;
            Ok(PullOutcome::Partial)
        }
    }

    /// Replace the status channel with the current snapshot.
    ///
    /// Written to a sibling temp file and renamed into place, so a concurrent
    /// [`pull`](Self::pull) sees either the old or the new file.
    pub fn push(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&StatusSnapshot::from(&self.status))?;
        persist_atomically(&self.path, json.as_bytes())
    }

}
