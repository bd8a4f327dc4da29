#![allow(dead_code)]

use remote_proto::channel::ChannelSet;
use remote_proto::command::Command;
use remote_proto::config::TimeoutConfig;
use remote_proto::log::LogTailer;
use remote_proto::status::StatusRegister;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const POLL: Duration = Duration::from_millis(20);
pub const REPLY_GAP: Duration = Duration::from_millis(30);

pub fn channels() -> (TempDir, ChannelSet) {
    let dir = TempDir::new().unwrap();
    let channels = ChannelSet::new(dir.path());
    (dir, channels)
}

pub fn timeouts() -> TimeoutConfig {
    TimeoutConfig {
        response_secs: 1.0,
        kill_secs: 1.0,
        poll_interval_ms: 20,
        ..TimeoutConfig::default()
    }
}

pub fn publish(channels: &ChannelSet, running: bool, loaded: bool) {
    let mut reg = StatusRegister::new(channels);
    reg.status_mut().running = running;
    reg.status_mut().loaded = loaded;
    reg.push().unwrap();
}

/// A display stand-in: waits for one command, then appends `replies` to the
/// log channel with a short gap between them.  `on_command` may rewrite the
/// status before the replies go out.
pub fn spawn_display<F>(channels: ChannelSet, replies: Vec<&'static str>, on_command: F) -> JoinHandle<Option<Command>>
where
    F: FnOnce(&mut StatusRegister) + Send + 'static,
{
    std::thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(3);
        let log = LogTailer::new(&channels);
        let mut status = StatusRegister::new(&channels);

        while Instant::now() < deadline {
            std::thread::sleep(POLL);
            let Some(line) = channels.take_command().unwrap() else {
                continue;
            };
            status.pull().unwrap();
            on_command(&mut status);
            status.push().unwrap();
            for (i, reply) in replies.iter().enumerate() {
                if i > 0 {
                    std::thread::sleep(REPLY_GAP);
                }
                log.append(reply).unwrap();
            }
            return Some(Command::parse(&line));
        }
        None
    })
}
