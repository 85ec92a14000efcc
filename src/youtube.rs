use futures::future::BoxFuture;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

use crate::search::{Query, SearchError, SearchProvider, SearchResult, VideoSummary};
use crate::web::WebProvider;

/// Which search backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProviderKind {
  /// `yt-dlp --flat-playlist` over `ytsearch`.
  Ytdlp,
  /// Scrape the YouTube results page and follow continuation tokens.
  Web,
}

impl ProviderKind {
  pub fn label(self) -> &'static str {
    match self {
      ProviderKind::Ytdlp => "ytdlp",
      ProviderKind::Web => "web",
    }
  }

  pub fn from_config(s: &str) -> Self {
    match s.to_lowercase().as_str() {
      "web" => ProviderKind::Web,
      _ => ProviderKind::Ytdlp,
    }
  }

  pub fn build(self, page_size: usize) -> Arc<dyn SearchProvider> {
    match self {
      ProviderKind::Ytdlp => Arc::new(YtDlpProvider::new(page_size)),
      ProviderKind::Web => Arc::new(WebProvider::new()),
    }
  }
}

/// The yt-dlp print template used for search listings.
const PRINT_FORMAT: &str = "%(id)s\t%(title)s\t%(duration)s\t%(channel)s";

pub fn thumbnail_url(video_id: &str) -> String {
  format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", video_id)
}

/// Parse a single tab-separated yt-dlp output line into a VideoSummary.
/// Expected format: `id\ttitle[\tduration\tchannel]`
fn parse_search_line(line: &str) -> Option<VideoSummary> {
  let parts: Vec<&str> = line.split('\t').collect();
  if parts.len() < 2 {
    return None;
  }
  let id = parts[0].trim().to_string();
  let title = parts[1].trim().to_string();
  if id.is_empty() || id == "NA" || title.is_empty() {
    return None;
  }
  let opt = |idx: usize| -> Option<&str> { parts.get(idx).map(|s| s.trim()).filter(|s| !s.is_empty() && *s != "NA") };
  let duration_seconds = opt(2).and_then(|s| s.parse::<f64>().ok()).filter(|d| *d >= 0.0).map_or(0, |d| d.round() as u64);
  let author = opt(3).map(|s| s.to_string());
  let thumbnail = thumbnail_url(&id);
  Some(VideoSummary { id, title, author, duration_seconds, thumbnail })
}

/// Parse one page of yt-dlp output. The listing asks for one entry past the
/// page, so a surplus entry means another page exists.
fn parse_page(stdout: &str, page_size: usize) -> Result<SearchResult, SearchError> {
  let lines: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
  let mut items: Vec<VideoSummary> = lines.iter().filter_map(|l| parse_search_line(l)).collect();
  if items.is_empty() && !lines.is_empty() {
    return Err(SearchError::Parse(format!("unrecognised yt-dlp output: {}", lines[0])));
  }
  if items.len() < lines.len() {
    debug!(skipped = lines.len() - items.len(), "ytdlp: skipped malformed entries");
  }
  let has_next_page = items.len() > page_size;
  items.truncate(page_size);
  Ok(SearchResult { items, has_next_page, continuation: None })
}

/// Map a failed yt-dlp run onto the search error taxonomy.
fn classify_failure(stderr: &str) -> SearchError {
  let lower = stderr.to_lowercase();
  if lower.contains("http error 429") || lower.contains("too many requests") || lower.contains("rate-limit") {
    return SearchError::RateLimited;
  }
  let message = stderr.lines().map(str::trim).rfind(|l| !l.is_empty()).unwrap_or("yt-dlp failed").to_string();
  if lower.contains("unable to extract") || lower.contains("jsondecodeerror") {
    return SearchError::Parse(message);
  }
  SearchError::Network(message)
}

pub struct YtDlpProvider {
  program: String,
  page_size: usize,
}

impl YtDlpProvider {
  pub fn new(page_size: usize) -> Self {
    Self { program: "yt-dlp".to_string(), page_size: page_size.max(1) }
  }

  /// 1-indexed playlist window for `page`, including one look-ahead entry.
  fn window(&self, page: u32) -> (usize, usize) {
    let start = (page.max(1) as usize - 1) * self.page_size + 1;
    (start, start + self.page_size)
  }

  async fn search(&self, query: &Query) -> Result<SearchResult, SearchError> {
    let (start, end) = self.window(query.page);
    let term = format!("ytsearch{}:{}", end, query.text);
    let playlist_items = format!("{}:{}", start, end);

    let output = Command::new(&self.program)
      .args(["--flat-playlist", "--print", PRINT_FORMAT, "--playlist-items", &playlist_items, "--no-warnings", "--", &term])
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .output()
      .await
      .map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
          SearchError::Network(
            "yt-dlp not found. Install it with: brew install yt-dlp (macOS) or pip install yt-dlp".to_string(),
          )
        } else {
          SearchError::Network(format!("failed to execute yt-dlp: {}", e))
        }
      })?;

    if !output.status.success() {
      return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
    }

    let stdout = String::from_utf8(output.stdout).map_err(|_| SearchError::Parse("yt-dlp output non-UTF8".into()))?;
    parse_page(&stdout, self.page_size)
  }
}

impl SearchProvider for YtDlpProvider {
  fn name(&self) -> &'static str {
    ProviderKind::Ytdlp.label()
  }

  fn fetch<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<SearchResult, SearchError>> {
    Box::pin(self.search(query))
  }
}
