use std::path::PathBuf;

const VARIABLES: [(&str, MediaDir); 2] = [
    ("${Videos}", MediaDir::Videos),
    ("${Music}", MediaDir::Music),
];

#[derive(Clone, Copy)]
enum MediaDir {
    Videos,
    Music,
}

impl MediaDir {
    fn resolve(self) -> PathBuf {
        let (known, fallback) = match self {
            MediaDir::Videos => (dirs::video_dir(), "Videos"),
            MediaDir::Music => (dirs::audio_dir(), "Music"),
        };
        known.unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(fallback)
        })
    }
}

/// Expand `${Videos}` and `${Music}` to the user's media directories.
///
/// Any other `$` is copied through untouched.
pub fn expand_media_dirs(src: &str) -> String {
    expand_with(src, MediaDir::resolve)
}

fn expand_with(src: &str, resolve: impl Fn(MediaDir) -> PathBuf) -> String {
    let mut out = String::with_capacity(src.len());
    let mut rest = src;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        match VARIABLES.iter().find(|(name, _)| rest.starts_with(name)) {
            Some((name, dir)) => {
                out.push_str(&resolve(*dir).to_string_lossy());
                rest = &rest[name.len()..];
            }
            None => {
                out.push('$');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
