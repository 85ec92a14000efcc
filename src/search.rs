//! Search coordination.
//!
//! A [`SearchCoordinator`] runs one provider fetch per submission on a
//! background tokio task and hands the outcome back over a single-consumer
//! channel. The interactive loop drains that channel on its own turn via
//! [`SearchCoordinator::try_deliver`]; nothing is mutated across tasks.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// --- Data model ---

/// A text query pinned to a 1-based page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
  pub text: String,
  pub page: u32,
}

impl Query {
  pub fn new(text: impl Into<String>, page: u32) -> Self {
    Self { text: text.into(), page: page.max(1) }
  }

  pub fn first_page(text: impl Into<String>) -> Self {
    Self::new(text, 1)
  }
}

/// One video in a result page. Identity is `id`.
#[derive(Debug, Clone)]
pub struct VideoSummary {
  pub id: String,
  pub title: String,
  pub author: Option<String>,
  pub duration_seconds: u64,
  /// Thumbnail URL. Never fetched by the core.
  pub thumbnail: String,
}

impl PartialEq for VideoSummary {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl Eq for VideoSummary {}

impl VideoSummary {
  /// The reference handed to the external player.
  pub fn playable_reference(&self) -> String {
    format!("https://www.youtube.com/watch?v={}", self.id)
  }

  /// `HH:MM:SS`, or `--:--` when the duration is unknown.
  pub fn formatted_duration(&self) -> String {
    if self.duration_seconds == 0 {
      return "--:--".to_string();
    }
    let hours = self.duration_seconds / 3600;
    let minutes = (self.duration_seconds % 3600) / 60;
    let seconds = self.duration_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
  }
}

/// Outcome of one successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
  pub items: Vec<VideoSummary>,
  pub has_next_page: bool,
  /// Provider-specific token for the following page, if it uses one.
  pub continuation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
  #[error("network error: {0}")]
  Network(String),
  #[error("could not parse search results: {0}")]
  Parse(String),
  #[error("rate limited by the provider, wait a moment before retrying")]
  RateLimited,
  #[error("search cancelled")]
  Cancelled,
}

impl SearchError {
  /// Cancellation is bookkeeping, never a notification.
  pub fn is_user_visible(&self) -> bool {
    !matches!(self, SearchError::Cancelled)
  }
}

/// Something that can turn a [`Query`] into a [`SearchResult`].
///
/// Implementations do their own transport and payload parsing and map
/// failures into [`SearchError`]. They must not retry on their own.
pub trait SearchProvider: Send + Sync + 'static {
  fn name(&self) -> &'static str;

  fn fetch<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<SearchResult, SearchError>>;
}

// --- Coordinator ---

/// A completed submission, ready for the interactive loop.
#[derive(Debug)]
pub struct Delivery {
  pub ticket: u64,
  pub query: Query,
  pub outcome: Result<SearchResult, SearchError>,
}

struct Envelope {
  delivery: Delivery,
  cancelled: Arc<AtomicBool>,
}

/// Pending submission. Dropping it does not cancel; call [`SearchHandle::cancel`].
#[derive(Debug)]
pub struct SearchHandle {
  ticket: u64,
  query: Query,
  cancelled: Arc<AtomicBool>,
}

impl SearchHandle {
  pub fn ticket(&self) -> u64 {
    self.ticket
  }

  pub fn query(&self) -> &Query {
    &self.query
  }

  /// Advisory: the fetch keeps running, but its outcome is never delivered.
  /// Returns immediately. A no-op for results that were already drained.
  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

pub struct SearchCoordinator {
  provider: Arc<dyn SearchProvider>,
  tx: mpsc::UnboundedSender<Envelope>,
  rx: mpsc::UnboundedReceiver<Envelope>,
  next_ticket: u64,
}

impl SearchCoordinator {
  pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { provider, tx, rx, next_ticket: 1 }
  }

  pub fn provider_name(&self) -> &'static str {
    self.provider.name()
  }

  /// Start fetching `query` on a background task.
  ///
  /// The coordinator does not police overlap; callers that need a single
  /// outstanding submission reject before calling this.
  pub fn submit(&mut self, query: Query) -> SearchHandle {
    let ticket = self.next_ticket;
    self.next_ticket += 1;

    let cancelled = Arc::new(AtomicBool::new(false));
    let provider = Arc::clone(&self.provider);
    let tx = self.tx.clone();
    let task_query = query.clone();
    let task_cancelled = Arc::clone(&cancelled);

    info!(ticket, text = %query.text, page = query.page, provider = provider.name(), "search: submitted");

    tokio::spawn(async move {
      // A panicking provider still has to deliver, or the submitter waits forever.
      let fetched = match AssertUnwindSafe(provider.fetch(&task_query)).catch_unwind().await {
        Ok(fetched) => fetched,
        Err(payload) => {
          let reason = panic_reason(payload.as_ref());
          error!(ticket, provider = provider.name(), reason = %reason, "search: provider panicked");
          Err(SearchError::Parse(format!("provider failed: {}", reason)))
        }
      };
      let outcome = if task_cancelled.load(Ordering::SeqCst) {
        debug!(ticket, "search: fetch finished after cancellation");
        Err(SearchError::Cancelled)
      } else {
        fetched
      };
      if let Err(ref e) = outcome
        && e.is_user_visible()
      {
        warn!(ticket, err = %e, "search: fetch failed");
      }
      let envelope = Envelope { delivery: Delivery { ticket, query: task_query, outcome }, cancelled: task_cancelled };
      // The receiver lives as long as the coordinator; a send error means it is gone.
      let _ = tx.send(envelope);
    });

    SearchHandle { ticket, query, cancelled }
  }

  /// Take the next deliverable outcome without blocking.
  ///
  /// Outcomes whose handle was cancelled, whether before or after the fetch
  /// completed, are dropped here and never reach the caller.
  pub fn try_deliver(&mut self) -> Option<Delivery> {
    while let Ok(envelope) = self.rx.try_recv() {
      if envelope.cancelled.load(Ordering::SeqCst) {
        debug!(ticket = envelope.delivery.ticket, "search: discarding cancelled delivery");
        continue;
      }
      return Some(envelope.delivery);
    }
    None
  }
}
