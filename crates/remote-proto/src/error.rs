use std::path::PathBuf;

/// Failures while touching a channel file.
///
/// A channel that does not exist is never reported through this type; every
/// reader treats absence as "nothing there yet".
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding status snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("replacing {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

impl ChannelError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
