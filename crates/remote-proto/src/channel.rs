//! The shared channel store.
//!
//! Three plain files in one well-known directory:
//!
//! | file              | writer            | reader          | discipline           |
//! |-------------------|-------------------|-----------------|----------------------|
//! | `mpv-command`     | remote, HTTP      | display         | one line, deleted on read |
//! | `mpv-status.json` | display (remote on kill recovery) | anyone | whole-file replace |
//! | `mpv-log`         | display           | remote          | append-only          |
//!
//! Nothing is locked.  Two writers racing on the command file simply overwrite
//! each other; whichever line is there when the display next polls wins.

use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ChannelError, Result};

pub const COMMAND_FILE: &str = "mpv-command";
pub const STATUS_FILE: &str = "mpv-status.json";
pub const LOG_FILE: &str = "mpv-log";

/// Location of one set of channels.  Cheap to clone; every process context
/// (display, remote, HTTP bridge) holds its own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSet {
    dir: PathBuf,
}

impl ChannelSet {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn command_path(&self) -> PathBuf {
        self.dir.join(COMMAND_FILE)
    }

    pub fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    /// Replace whatever command is pending with `line`.
    ///
    /// The line goes to a sibling temp file that is renamed over the command
    /// file, so [`take_command`](Self::take_command) never sees it half written.
    pub fn write_command(&self, line: &str) -> Result<()> {
        let path = self.command_path();
        debug!("channel: write command {:?}", line);
        persist_atomically(&path, line.as_bytes())
    }

    /// Take the pending command line, if any.
    ///
    /// Reads the first line and deletes the file straight away, so a command
    /// is delivered at most once.  Trailing `\r\n` is stripped.
    pub fn take_command(&self) -> Result<Option<String>> {
        let path = self.command_path();
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChannelError::io(path, e)),
        };

        let mut line = String::new();
        let read = BufReader::new(file).read_line(&mut line);
        remove_if_present(&path)?;
        read.map_err(|e| ChannelError::io(&path, e))?;

        let line = line.trim_end_matches(['\r', '\n']).to_string();
        debug!("channel: took command {:?}", line);
        Ok(Some(line))
    }

    pub fn command_pending(&self) -> bool {
        self.command_path().exists()
    }

    /// Throw away any pending command without decoding it.
    pub fn discard_command(&self) -> Result<()> {
        remove_if_present(&self.command_path())
    }
}

/// Write `contents` to `path` via a temp file in the same directory.
pub(crate) fn persist_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| ChannelError::io(&dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| ChannelError::io(&dir, e))?;
    tmp.write_all(contents)
        .map_err(|e| ChannelError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| ChannelError::Persist {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// `remove_file` that treats an already-missing file as success.
pub(crate) fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ChannelError::io(path, e)),
    }
}
