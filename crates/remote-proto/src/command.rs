//! Command codec for the single-line command channel.
//!
//! Grammar (one line, space separated, URLs double-quoted):
//!
//! ```text
//! open "<url>" [--pause]
//! pause [0|1]
//! move <seconds>
//! seek <seconds>
//! stop
//! kill
//! ```
//!
//! Decoding never fails.  Anything unrecognised or underspecified becomes
//! [`Command::Noop`], which the dispatcher ignores without a trace in the
//! status or log channels.

use std::fmt;

/// Token slots the decoder asks for: verb plus at most two arguments.
pub const MAX_TOKENS: usize = 3;

/// What a `pause` line asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseRequest {
    Toggle,
    Set(bool),
}

/// A decoded command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// The "none" tag: unknown verb, missing argument or bad number.
    Noop,
    Open { url: String, auto_pause: bool },
    Pause(PauseRequest),
    /// Relative jump, negative rewinds.
    Move { seconds: f64 },
    /// Absolute position.
    Seek { seconds: f64 },
    Stop,
    Kill,
}

impl Command {
    /// Tokenize and decode one line from the command channel.
    pub fn parse(line: &str) -> Self {
        decode(&tokenize(line, MAX_TOKENS))
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Command::Noop)
    }

    /// Whether the rendered line decodes back to this command.
    ///
    /// False for URLs the quoting cannot carry: a space-split fragment ending
    /// in `"` inside the URL, or a leading space.
    pub fn survives_encoding(&self) -> bool {
        Command::parse(&self.to_string()) == *self
    }

    /// Short verb for diagnostics.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Noop => "none",
            Command::Open { .. } => "open",
            Command::Pause(_) => "pause",
            Command::Move { .. } => "move",
            Command::Seek { .. } => "seek",
            Command::Stop => "stop",
            Command::Kill => "kill",
        }
    }
}

/// Renders the channel line a [`Command`] decodes from.  `Noop` renders as
/// `none`, which decodes back to `Noop`.  The URL of `Open` is quoted as is,
/// so check [`Command::survives_encoding`] before sending an arbitrary one.
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Noop => f.write_str("none"),
            Command::Open { url, auto_pause } => {
                write!(f, "open \"{}\"", url)?;
                if *auto_pause {
                    f.write_str(" --pause")?;
                }
                Ok(())
            }
            Command::Pause(PauseRequest::Toggle) => f.write_str("pause"),
            Command::Pause(PauseRequest::Set(paused)) => {
                write!(f, "pause {}", if *paused { 1 } else { 0 })
            }
            Command::Move { seconds } => write!(f, "move {}", seconds),
            Command::Seek { seconds } => write!(f, "seek {}", seconds),
            Command::Stop => f.write_str("stop"),
            Command::Kill => f.write_str("kill"),
        }
    }
}

/// Split `line` on single spaces into at most `max` tokens.
///
/// A fragment starting with `"` opens a quoted span that runs until a fragment
/// ending with `"`; the span keeps its inner spacing and loses the
/// enclosing quotes.  Runs of spaces outside quotes never produce empty
/// tokens.  A span still open at end of line is dropped.
pub fn tokenize(line: &str, max: usize) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut quote_start: Option<usize> = None;
    let mut offset = 0;

    for fragment in line.split(' ') {
        let start = offset;
        offset += fragment.len() + 1;

        if tokens.len() >= max {
            break;
        }
        if fragment.is_empty() {
            continue;
        }

        let end = start + fragment.len();
        match quote_start {
            None if fragment.starts_with('"') => {
                if fragment.len() == 1 {
                    // A lone quote opens and closes in the same byte.
                    tokens.push("");
                } else if fragment.ends_with('"') {
                    tokens.push(&line[start + 1..end - 1]);
                } else {
                    quote_start = Some(start + 1);
                }
            }
            None => tokens.push(fragment),
            Some(span_start) => {
                if fragment.ends_with('"') {
                    tokens.push(&line[span_start..end - 1]);
                    quote_start = None;
                }
            }
        }
    }

    tokens
}

/// Turn tokens into a [`Command`], degrading to [`Command::Noop`].
pub fn decode(tokens: &[&str]) -> Command {
    let Some(&verb) = tokens.first() else {
        return Command::Noop;
    };
    let arg = |i: usize| tokens.get(i).copied();

    match verb {
        "open" => match arg(1) {
            Some(url) => Command::Open {
                url: url.to_string(),
                auto_pause: arg(2) == Some("--pause"),
            },
            None => Command::Noop,
        },
        "pause" => match arg(1) {
            Some("0") => Command::Pause(PauseRequest::Set(false)),
            Some("1") => Command::Pause(PauseRequest::Set(true)),
            _ => Command::Pause(PauseRequest::Toggle),
        },
        "move" => match arg(1).and_then(parse_seconds) {
            Some(seconds) => Command::Move { seconds },
            None => Command::Noop,
        },
        "seek" => match arg(1).and_then(parse_seconds) {
            Some(seconds) => Command::Seek { seconds },
            None => Command::Noop,
        },
        "stop" => Command::Stop,
        "kill" => Command::Kill,
        _ => Command::Noop,
    }
}

/// Locale-independent decimal parse.  Garbage and non-finite values are
/// rejected so they never reach the backend.
fn parse_seconds(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_plain() {
        let tokens = tokenize("I am legend", 5);
        assert_eq!(tokens, vec!["I", "am", "legend"]);
    }

    #[test]
    fn test_tokenize_quoted() {
        let tokens = tokenize("eat \"coconut\"", 5);
        assert_eq!(tokens, vec!["eat", "coconut"]);

        let tokens = tokenize("mpv \"Linkin Park - Numb.mp4\" --fs --hwdec=auto", 5);
        assert_eq!(
            tokens,
            vec!["mpv", "Linkin Park - Numb.mp4", "--fs", "--hwdec=auto"]
        );
    }

    #[test]
    fn test_tokenize_keeps_inner_spacing() {
        let tokens = tokenize("open \"a  b\"", 5);
        assert_eq!(tokens, vec!["open", "a  b"]);
    }

    #[test]
    fn test_tokenize_respects_max() {
        let tokens = tokenize("a b c d e", 3);
        assert_eq!(tokens, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tokenize_collapses_space_runs() {
        let tokens = tokenize("  move   12 ", 5);
        assert_eq!(tokens, vec!["move", "12"]);
    }

    #[test]
    fn test_tokenize_unterminated_quote_dropped() {
        let tokens = tokenize("open \"never closed", 5);
        assert_eq!(tokens, vec!["open"]);
    }

    #[test]
    fn test_tokenize_lone_quote() {
        let tokens = tokenize("open \" x", 5);
        assert_eq!(tokens, vec!["open", "", "x"]);
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("", 3).is_empty());
        assert!(tokenize("   ", 3).is_empty());
    }

    #[test]
    fn test_decode_open() {
        assert_eq!(
            Command::parse("open \"X.mp4\""),
            Command::Open {
                url: "X.mp4".to_string(),
                auto_pause: false
            }
        );
        assert_eq!(
            Command::parse("open \"The Matrix Revolutions (2003).mp4\" --pause"),
            Command::Open {
                url: "The Matrix Revolutions (2003).mp4".to_string(),
                auto_pause: true
            }
        );
    }

    #[test]
    fn test_decode_move() {
        match Command::parse("move 30.6") {
            Command::Move { seconds } => assert!((seconds - 30.6).abs() < 1e-4),
            other => panic!("expected move, got {:?}", other),
        }
        assert_eq!(
            Command::parse("seek -5"),
            Command::Seek { seconds: -5.0 }
        );
    }

    #[test]
    fn test_decode_pause_variants() {
        assert_eq!(Command::parse("pause"), Command::Pause(PauseRequest::Toggle));
        assert_eq!(
            Command::parse("pause 1"),
            Command::Pause(PauseRequest::Set(true))
        );
        assert_eq!(
            Command::parse("pause 0"),
            Command::Pause(PauseRequest::Set(false))
        );
        assert_eq!(
            Command::parse("pause maybe"),
            Command::Pause(PauseRequest::Toggle)
        );
    }

    #[test]
    fn test_decode_malformed_is_noop() {
        for line in [
            "",
            "   ",
            "remote-test 1033",
            "open",
            "open \"unterminated",
            "move",
            "move forward",
            "seek 1e999",
            "seek NaN",
            "OPEN \"x.mp4\"",
        ] {
            assert_eq!(Command::parse(line), Command::Noop, "line {:?}", line);
        }
    }

    #[test]
    fn test_display_decodes_back() {
        let commands = [
            Command::Open {
                url: "/home/me/Videos/Linkin Park - Numb.mp4".to_string(),
                auto_pause: true,
            },
            Command::Pause(PauseRequest::Toggle),
            Command::Pause(PauseRequest::Set(false)),
            Command::Move { seconds: -10.5 },
            Command::Seek { seconds: 3600.0 },
            Command::Stop,
            Command::Kill,
            Command::Noop,
        ];
        for cmd in commands {
            assert_eq!(Command::parse(&cmd.to_string()), cmd);
        }
    }

    #[test]
    fn test_urls_the_quoting_cannot_carry() {
        let quoted_word = Command::Open {
            url: "/home/me/Videos/My \"Best\" Song.mp4".to_string(),
            auto_pause: false,
        };
        assert!(!quoted_word.survives_encoding());

        let leading_space = Command::Open {
            url: " leading.mp4".to_string(),
            auto_pause: false,
        };
        assert!(!leading_space.survives_encoding());

        let plain = Command::Open {
            url: "/home/me/Videos/Watchmen (2009).mp4".to_string(),
            auto_pause: true,
        };
        assert!(plain.survives_encoding());
        assert!(!Command::Move { seconds: f64::NAN }.survives_encoding());
        assert!(Command::Stop.survives_encoding());
    }
}
