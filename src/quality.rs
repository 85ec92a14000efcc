/// Video quality handed to mpv as a yt-dlp format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
  #[default]
  Best,
  P1080,
  P720,
  P480,
  P360,
}

const ALL: [Quality; 5] = [Quality::Best, Quality::P1080, Quality::P720, Quality::P480, Quality::P360];

impl Quality {
  pub fn label(self) -> &'static str {
    match self {
      Quality::Best => "best",
      Quality::P1080 => "1080p",
      Quality::P720 => "720p",
      Quality::P480 => "480p",
      Quality::P360 => "360p",
    }
  }

  pub fn from_label(s: &str) -> Option<Self> {
    let s = s.trim();
    ALL.into_iter().find(|q| q.label().eq_ignore_ascii_case(s))
  }

  pub fn next(self) -> Self {
    let i = ALL.iter().position(|q| *q == self).unwrap_or(0);
    ALL[(i + 1) % ALL.len()]
  }

  /// `None` leaves the choice to the player (or the configured `ytdl_format`).
  pub fn ytdl_format(self) -> Option<&'static str> {
    match self {
      Quality::Best => None,
      Quality::P1080 => Some("bestvideo[height<=1080]+bestaudio/best[height<=1080]"),
      Quality::P720 => Some("bestvideo[height<=720]+bestaudio/best[height<=720]"),
      Quality::P480 => Some("bestvideo[height<=480]+bestaudio/best[height<=480]"),
      Quality::P360 => Some("bestvideo[height<=360]+bestaudio/best[height<=360]"),
    }
  }
}
