use std::io::Write;
use std::path::Path;

use clap::{ArgGroup, Parser};
use remote_proto::channel::ChannelSet;
use remote_proto::command::{Command, PauseRequest};
use remote_proto::config::Config;
use remote_proto::environment::expand_media_dirs;
use remote_proto::remote::{Remote, NOT_RUNNING};
use remote_proto::status::MediaType;
use tracing::debug;

const NOT_PLAYING: &str = "A media is not being played\n";
const ALREADY_PLAYING: &str = "A media is already being played\n";

#[derive(Parser, Debug)]
#[command(
    name = "mpv-remote",
    version,
    about = "Send playback commands to the mpv display process",
    arg_required_else_help = true,
    group(
        ArgGroup::new("action")
            .required(true)
            .args(["url", "pause", "move_by", "seek", "stop", "kill", "status"])
    )
)]
struct Cli {
    #[arg(
        value_name = "URL",
        help = "Local file or https:// URL to open; ${Videos} and ${Music} are expanded"
    )]
    url: Option<String>,

    #[arg(long, requires = "url", help = "Open the media paused")]
    start_paused: bool,

    #[arg(
        short = 'p',
        long,
        value_name = "0|1",
        num_args = 0..=1,
        value_parser = ["0", "1"],
        help = "Toggle pause, or force it with 1 (pause) or 0 (resume)"
    )]
    pause: Option<Option<String>>,

    #[arg(
        short = 'm',
        long = "move",
        value_name = "SECONDS",
        allow_hyphen_values = true,
        help = "Skip forward, or back with a negative value"
    )]
    move_by: Option<f64>,

    #[arg(
        long,
        value_name = "SECONDS",
        allow_hyphen_values = true,
        help = "Jump to an absolute position"
    )]
    seek: Option<f64>,

    #[arg(short = 's', long, help = "Stop the current media")]
    stop: bool,

    #[arg(short = 'k', long, help = "Kill the display process")]
    kill: bool,

    #[arg(long, help = "Print the media player status")]
    status: bool,
}

#[derive(Debug, PartialEq)]
enum Action {
    Status,
    Kill,
    Open { url: String, auto_pause: bool },
    /// Needs media to be loaded.
    Control(Command),
}

impl Cli {
    fn action(self) -> Option<Action> {
        if self.status {
            return Some(Action::Status);
        }
        if self.kill {
            return Some(Action::Kill);
        }
        if let Some(url) = self.url {
            return Some(Action::Open {
                url,
                auto_pause: self.start_paused,
            });
        }
        if let Some(arg) = self.pause {
            let request = match arg.as_deref() {
                Some("1") => PauseRequest::Set(true),
                Some("0") => PauseRequest::Set(false),
                _ => PauseRequest::Toggle,
            };
            return Some(Action::Control(Command::Pause(request)));
        }
        if let Some(seconds) = self.move_by {
            return Some(Action::Control(Command::Move { seconds }));
        }
        if let Some(seconds) = self.seek {
            return Some(Action::Control(Command::Seek { seconds }));
        }
        if self.stop {
            return Some(Action::Control(Command::Stop));
        }
        None
    }
}

/// Run one action and return the process exit code.
fn execute<W: Write>(action: Action, remote: &mut Remote, out: &mut W) -> anyhow::Result<i32> {
    match action {
        Action::Status => {
            let status = remote.refresh_status()?;
            out.write_all(status.render().as_bytes())?;
            Ok(0)
        }
        Action::Kill => Ok(remote.kill_into(out)?.exit_code()),
        Action::Open { url, auto_pause } => {
            let Some(loaded) = media_loaded(remote, out)? else {
                return Ok(1);
            };
            let url = expand_media_dirs(&url);
            let url = match MediaType::of_url(&url) {
                MediaType::Http => url,
                MediaType::Local => {
                    let path = Path::new(&url);
                    if !path.exists() {
                        writeln!(out, "Media `{}` does not exist", url)?;
                        return Ok(1);
                    }
                    std::fs::canonicalize(path)?.to_string_lossy().into_owned()
                }
            };
            if loaded {
                out.write_all(ALREADY_PLAYING.as_bytes())?;
                return Ok(1);
            }
            let command = Command::Open {
                url: url.clone(),
                auto_pause,
            };
            if !command.survives_encoding() {
                writeln!(out, "Media `{}` has a name the player cannot receive", url)?;
                return Ok(1);
            }
            send(remote, command, out)
        }
        Action::Control(command) => {
            let Some(loaded) = media_loaded(remote, out)? else {
                return Ok(1);
            };
            if !loaded {
                out.write_all(NOT_PLAYING.as_bytes())?;
                return Ok(1);
            }
            if !command.survives_encoding() {
                writeln!(out, "Invalid {} argument", command.verb())?;
                return Ok(1);
            }
            send(remote, command, out)
        }
    }
}

/// Whether media is loaded, or `None` (reported) when no display runs.
fn media_loaded<W: Write>(remote: &mut Remote, out: &mut W) -> anyhow::Result<Option<bool>> {
    let status = remote.refresh_status()?;
    if !status.running {
        out.write_all(NOT_RUNNING.as_bytes())?;
        return Ok(None);
    }
    Ok(Some(status.loaded))
}

fn send<W: Write>(remote: &mut Remote, command: Command, out: &mut W) -> anyhow::Result<i32> {
    let timeout = remote.response_timeout(&command);
    debug!("sending {} with {:?} timeout", command, timeout);
    let outcome = remote.send_and_wait_into(&command.to_string(), timeout, out)?;
    Ok(outcome.exit_code())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let Some(action) = Cli::parse().action() else {
        return Ok(());
    };

    let config = Config::load()?;
    let mut remote = Remote::new(ChannelSet::new(config.channel_dir()), config.timeouts);

    let stdout = std::io::stdout();
    let code = execute(action, &mut remote, &mut stdout.lock())?;
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_proto::config::TimeoutConfig;
    use remote_proto::status::StatusRegister;
    use tempfile::TempDir;

    fn remote_with(running: bool, loaded: bool) -> (TempDir, ChannelSet, Remote) {
        let dir = TempDir::new().unwrap();
        let channels = ChannelSet::new(dir.path());
        let mut reg = StatusRegister::new(&channels);
        reg.status_mut().running = running;
        reg.status_mut().loaded = loaded;
        reg.push().unwrap();

        let timeouts = TimeoutConfig {
            response_secs: 0.05,
            open_local_secs: 0.05,
            open_http_secs: 0.05,
            poll_interval_ms: 10,
            ..TimeoutConfig::default()
        };
        let remote = Remote::new(channels.clone(), timeouts);
        (dir, channels, remote)
    }

    fn parse(args: &[&str]) -> Action {
        Cli::try_parse_from(std::iter::once("mpv-remote").chain(args.iter().copied()))
            .unwrap()
            .action()
            .unwrap()
    }

    #[test]
    fn test_cli_actions() {
        assert_eq!(parse(&["--status"]), Action::Status);
        assert_eq!(parse(&["-k"]), Action::Kill);
        assert_eq!(
            parse(&["-p"]),
            Action::Control(Command::Pause(PauseRequest::Toggle))
        );
        assert_eq!(
            parse(&["--pause", "1"]),
            Action::Control(Command::Pause(PauseRequest::Set(true)))
        );
        assert_eq!(
            parse(&["-m", "-10"]),
            Action::Control(Command::Move { seconds: -10.0 })
        );
        assert_eq!(
            parse(&["--seek", "90.5"]),
            Action::Control(Command::Seek { seconds: 90.5 })
        );
        assert_eq!(
            parse(&["movie.mp4", "--start-paused"]),
            Action::Open {
                url: "movie.mp4".to_string(),
                auto_pause: true
            }
        );
    }

    #[test]
    fn test_cli_rejects_two_actions() {
        assert!(Cli::try_parse_from(["mpv-remote", "-s", "-k"]).is_err());
        assert!(Cli::try_parse_from(["mpv-remote", "--pause", "2"]).is_err());
    }

    #[test]
    fn test_not_running_sends_nothing() {
        let (_dir, channels, mut remote) = remote_with(false, false);
        let mut out = Vec::new();
        let code = execute(Action::Control(Command::Stop), &mut remote, &mut out).unwrap();
        assert_eq!(code, 1);
        assert_eq!(String::from_utf8(out).unwrap(), NOT_RUNNING);
        assert!(!channels.command_pending());
    }

    #[test]
    fn test_controls_need_loaded_media() {
        let (_dir, channels, mut remote) = remote_with(true, false);
        let mut out = Vec::new();
        let code = execute(
            Action::Control(Command::Pause(PauseRequest::Toggle)),
            &mut remote,
            &mut out,
        )
        .unwrap();
        assert_eq!(code, 1);
        assert_eq!(String::from_utf8(out).unwrap(), NOT_PLAYING);
        assert!(!channels.command_pending());
    }

    #[test]
    fn test_missing_local_media() {
        let (dir, channels, mut remote) = remote_with(true, false);
        let url = dir.path().join("nope.mp4").to_string_lossy().into_owned();
        let mut out = Vec::new();
        let code = execute(
            Action::Open {
                url: url.clone(),
                auto_pause: false,
            },
            &mut remote,
            &mut out,
        )
        .unwrap();
        assert_eq!(code, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("Media `{}` does not exist\n", url)
        );
        assert!(!channels.command_pending());
    }

    #[test]
    fn test_open_refused_while_playing() {
        let (_dir, channels, mut remote) = remote_with(true, true);
        let mut out = Vec::new();
        let code = execute(
            Action::Open {
                url: "https://example.com/live.m3u8".to_string(),
                auto_pause: false,
            },
            &mut remote,
            &mut out,
        )
        .unwrap();
        assert_eq!(code, 1);
        assert_eq!(String::from_utf8(out).unwrap(), ALREADY_PLAYING);
        assert!(!channels.command_pending());
    }

    #[test]
    fn test_open_sends_absolute_path() {
        let (dir, channels, mut remote) = remote_with(true, false);
        let media = dir.path().join("Linkin Park - Numb.mp4");
        std::fs::write(&media, b"").unwrap();

        let mut out = Vec::new();
        let code = execute(
            Action::Open {
                url: media.to_string_lossy().into_owned(),
                auto_pause: true,
            },
            &mut remote,
            &mut out,
        )
        .unwrap();

        // Nobody answers in this test.
        assert_eq!(code, 1);
        let line = channels.take_command().unwrap().unwrap();
        let expected = std::fs::canonicalize(&media).unwrap();
        assert_eq!(
            Command::parse(&line),
            Command::Open {
                url: expected.to_string_lossy().into_owned(),
                auto_pause: true
            }
        );
    }

    #[test]
    fn test_status_prints_without_handshake() {
        let (_dir, channels, mut remote) = remote_with(true, false);
        let mut out = Vec::new();
        let code = execute(Action::Status, &mut remote, &mut out).unwrap();
        assert_eq!(code, 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("MPV Remote Player status:\n"));
        assert!(text.contains("    running: 1\n"));
        assert!(!channels.command_pending());
    }

    #[test]
    fn test_open_refuses_name_the_channel_cannot_carry() {
        let (dir, channels, mut remote) = remote_with(true, false);
        let media = dir.path().join("My \"Best\" Song.mp4");
        std::fs::write(&media, b"").unwrap();

        let mut out = Vec::new();
        let code = execute(
            Action::Open {
                url: media.to_string_lossy().into_owned(),
                auto_pause: false,
            },
            &mut remote,
            &mut out,
        )
        .unwrap();

        assert_eq!(code, 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("has a name the player cannot receive\n"), "{}", text);
        assert!(!channels.command_pending());
    }

    #[test]
    fn test_non_finite_move_is_refused() {
        let (_dir, channels, mut remote) = remote_with(true, true);
        let mut out = Vec::new();
        let code = execute(
            Action::Control(Command::Move { seconds: f64::INFINITY }),
            &mut remote,
            &mut out,
        )
        .unwrap();
        assert_eq!(code, 1);
        assert_eq!(String::from_utf8(out).unwrap(), "Invalid move argument\n");
        assert!(!channels.command_pending());
    }
}
