//! Shared pieces of the mpv remote: the three file channels that the remote
//! and display processes rendezvous on, and the codecs that sit on top of them.
//!
//! ```text
//!   mpv-remote ── write ──▶ mpv-command ── take ──▶ mpv-play
//!   mpv-remote ◀── tail ─── mpv-log      ◀─ append ─ mpv-play
//!   mpv-remote ◀── pull ─── mpv-status.json ◀ push ─ mpv-play
//! ```

pub mod channel;
pub mod command;
pub mod config;
pub mod environment;
pub mod error;
pub mod log;
pub mod platform;
pub mod remote;
pub mod status;

pub use error::{ChannelError, Result};
