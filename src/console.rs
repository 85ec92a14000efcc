//! Observer sink: an append-only console of timestamped, tagged lines.
//!
//! Background tasks write through a cloneable [`ConsoleSink`]; the interactive
//! loop drains the channel into a bounded [`Console`] buffer once per turn.

use chrono::{DateTime, Local};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
  Info,
  Warn,
}

#[derive(Debug, Clone)]
pub struct ConsoleLine {
  pub timestamp: DateTime<Local>,
  pub source: String,
  pub level: Level,
  pub line: String,
}

#[derive(Debug, Clone)]
pub struct ConsoleSink {
  tx: mpsc::UnboundedSender<ConsoleLine>,
}

impl ConsoleSink {
  pub fn info(&self, source: &str, line: impl Into<String>) {
    self.push(source, Level::Info, line.into());
  }

  pub fn warn(&self, source: &str, line: impl Into<String>) {
    self.push(source, Level::Warn, line.into());
  }

  fn push(&self, source: &str, level: Level, line: String) {
    match level {
      Level::Info => debug!(target: "ytw::console", source, "{}", line),
      Level::Warn => warn!(target: "ytw::console", source, "{}", line),
    }
    // A closed console means the app is shutting down; nothing left to show.
    let _ = self.tx.send(ConsoleLine { timestamp: Local::now(), source: source.to_string(), level, line });
  }
}

pub struct Console {
  lines: VecDeque<ConsoleLine>,
  capacity: usize,
  tx: mpsc::UnboundedSender<ConsoleLine>,
  rx: mpsc::UnboundedReceiver<ConsoleLine>,
}

impl Console {
  pub fn new(capacity: usize) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { lines: VecDeque::with_capacity(capacity.min(1024)), capacity: capacity.max(1), tx, rx }
  }

  pub fn sink(&self) -> ConsoleSink {
    ConsoleSink { tx: self.tx.clone() }
  }

  /// Move pending lines into the buffer, evicting the oldest past capacity.
  /// Returns how many lines arrived.
  pub fn drain(&mut self) -> usize {
    let mut n = 0;
    while let Ok(line) = self.rx.try_recv() {
      if self.lines.len() == self.capacity {
        self.lines.pop_front();
      }
      self.lines.push_back(line);
      n += 1;
    }
    n
  }

  pub fn lines(&self) -> impl DoubleEndedIterator<Item = &ConsoleLine> + ExactSizeIterator {
    self.lines.iter()
  }

  pub fn len(&self) -> usize {
    self.lines.len()
  }

  pub fn is_empty(&self) -> bool {
    self.lines.is_empty()
  }

  pub fn clear(&mut self) {
    self.lines.clear();
  }
}
