//! Page navigation over a [`SearchCoordinator`].
//!
//! `Idle → Fetching → Idle` per navigation call. While fetching, every
//! navigation request is rejected with [`PageError::Busy`] rather than queued,
//! so a stale page can never overwrite a newer one.

use tracing::{debug, info};

use crate::search::{Query, SearchCoordinator, SearchError, SearchHandle, SearchResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
  #[error("a search is already in progress")]
  Busy,
  #[error("no more results")]
  NoMoreResults,
  #[error("already on the first page")]
  NoPreviousPage,
  #[error("enter a search term")]
  EmptyQuery,
}

/// What a drained delivery did to the pagination state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
  Loaded { query: Query, count: usize },
  Failed { query: Query, error: SearchError },
}

pub struct Pagination {
  coordinator: SearchCoordinator,
  query: Option<Query>,
  /// Page that `last_result` belongs to.
  good_page: u32,
  last_result: Option<SearchResult>,
  pending: Option<SearchHandle>,
}

impl Pagination {
  pub fn new(coordinator: SearchCoordinator) -> Self {
    Self { coordinator, query: None, good_page: 1, last_result: None, pending: None }
  }

  pub fn provider_name(&self) -> &'static str {
    self.coordinator.provider_name()
  }

  pub fn query(&self) -> Option<&Query> {
    self.query.as_ref()
  }

  pub fn page(&self) -> u32 {
    self.query.as_ref().map_or(1, |q| q.page)
  }

  pub fn last_result(&self) -> Option<&SearchResult> {
    self.last_result.as_ref()
  }

  pub fn in_flight(&self) -> bool {
    self.pending.is_some()
  }

  pub fn has_next_page(&self) -> bool {
    self.last_result.as_ref().is_some_and(|r| r.has_next_page)
  }

  pub fn has_prev_page(&self) -> bool {
    self.page() > 1
  }

  /// Start a fresh search at page 1, discarding the current page.
  pub fn search(&mut self, text: &str) -> Result<(), PageError> {
    if self.in_flight() {
      return Err(PageError::Busy);
    }
    let text = text.trim();
    if text.is_empty() {
      return Err(PageError::EmptyQuery);
    }
    self.last_result = None;
    self.good_page = 1;
    self.submit(Query::first_page(text));
    Ok(())
  }

  pub fn next_page(&mut self) -> Result<(), PageError> {
    if self.in_flight() {
      return Err(PageError::Busy);
    }
    if !self.has_next_page() {
      return Err(PageError::NoMoreResults);
    }
    let Some(current) = self.query.as_ref() else { return Err(PageError::NoMoreResults) };
    let next = Query::new(current.text.clone(), current.page + 1);
    self.submit(next);
    Ok(())
  }

  pub fn prev_page(&mut self) -> Result<(), PageError> {
    if self.in_flight() {
      return Err(PageError::Busy);
    }
    let Some(current) = self.query.as_ref().filter(|q| q.page > 1) else { return Err(PageError::NoPreviousPage) };
    let prev = Query::new(current.text.clone(), current.page - 1);
    self.submit(prev);
    Ok(())
  }

  fn submit(&mut self, query: Query) {
    debug!(text = %query.text, page = query.page, "pagination: fetching");
    let handle = self.coordinator.submit(query.clone());
    self.query = Some(query);
    self.pending = Some(handle);
  }

  /// Abandon the in-flight fetch. Its outcome is never delivered and the page
  /// index returns to the last page that loaded.
  pub fn cancel(&mut self) {
    if let Some(handle) = self.pending.take() {
      info!(ticket = handle.ticket(), page = handle.query().page, "pagination: cancelling in-flight fetch");
      handle.cancel();
      self.revert_page();
    }
  }

  fn revert_page(&mut self) {
    if let Some(ref q) = self.query {
      self.query = Some(Query::new(q.text.clone(), self.good_page));
    }
  }

  /// Apply a finished fetch, if one is waiting. Call once per loop turn.
  pub fn poll(&mut self) -> Option<PageEvent> {
    let ticket = self.pending.as_ref()?.ticket();
    while let Some(delivery) = self.coordinator.try_deliver() {
      if delivery.ticket != ticket {
        debug!(ticket = delivery.ticket, expected = ticket, "pagination: ignoring stale delivery");
        continue;
      }
      self.pending = None;
      return Some(match delivery.outcome {
        Ok(result) => {
          let count = result.items.len();
          info!(text = %delivery.query.text, page = delivery.query.page, count, "pagination: page loaded");
          self.good_page = delivery.query.page;
          self.last_result = Some(result);
          PageEvent::Loaded { query: delivery.query, count }
        }
        Err(error) => {
          self.revert_page();
          PageEvent::Failed { query: delivery.query, error }
        }
      });
    }
    None
  }
}
