use ratatui::crossterm::event::{self, KeyCode, KeyModifiers};

use crate::app::{App, AppMode};

// --- Helpers ---

/// Convert a char index to a byte offset within the string.
pub fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
  s.char_indices().nth(char_idx).map_or(s.len(), |(i, _)| i)
}

fn move_selection(app: &mut App, forward: bool) {
  let count = app.results().len();
  if count == 0 {
    return;
  }
  let i = match (app.list_state.selected(), forward) {
    (None, _) => 0,
    (Some(i), true) => (i + 1) % count,
    (Some(0), false) => count - 1,
    (Some(i), false) => i - 1,
  };
  app.list_state.select(Some(i));
}

// --- Event Handling ---

/// Player work is only queued here; the run loop performs it after drawing.
pub fn handle_key_event(app: &mut App, key: event::KeyEvent) {
  if key.modifiers.contains(KeyModifiers::CONTROL) {
    match key.code {
      KeyCode::Char('c') => {
        app.should_quit = true;
        return;
      }
      KeyCode::Char('t') => {
        app.next_theme();
        return;
      }
      KeyCode::Char('s') => {
        app.request_stop();
        return;
      }
      KeyCode::Char('f') => {
        app.cycle_quality();
        return;
      }
      KeyCode::Char('d') => {
        app.set_default_directory_from_input();
        return;
      }
      KeyCode::Char('x') => {
        app.cancel_search();
        return;
      }
      KeyCode::Char('l') => {
        app.console.clear();
        return;
      }
      _ => {}
    }
  }

  match app.mode {
    AppMode::Input => handle_input_key(app, key),
    AppMode::Results => handle_results_key(app, key),
  }
}

fn handle_input_key(app: &mut App, key: event::KeyEvent) {
  app.clear_error();
  match key.code {
    KeyCode::Enter => {
      app.trigger_search();
    }
    KeyCode::Char(c) => {
      app.stop_recalling();
      let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
      app.input.insert(byte_idx, c);
      app.cursor_position += 1;
    }
    KeyCode::Backspace => {
      app.stop_recalling();
      if app.cursor_position > 0 {
        app.cursor_position -= 1;
        let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
        app.input.remove(byte_idx);
      }
    }
    KeyCode::Delete => {
      app.stop_recalling();
      if app.cursor_position < app.input.chars().count() {
        let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
        app.input.remove(byte_idx);
      }
    }
    KeyCode::Left => {
      app.cursor_position = app.cursor_position.saturating_sub(1);
    }
    KeyCode::Right => {
      if app.cursor_position < app.input.chars().count() {
        app.cursor_position += 1;
      }
    }
    KeyCode::Home => {
      app.cursor_position = 0;
    }
    KeyCode::End => {
      app.cursor_position = app.input.chars().count();
    }
    KeyCode::Esc => {
      if !app.input.is_empty() {
        app.input.clear();
        app.cursor_position = 0;
        app.input_scroll = 0;
      } else if !app.results().is_empty() {
        app.mode = AppMode::Results;
      } else {
        app.should_quit = true;
      }
    }
    KeyCode::Up => {
      app.recall_older();
    }
    KeyCode::Down => {
      if !app.recall_newer() && !app.results().is_empty() {
        app.mode = AppMode::Results;
      }
    }
    KeyCode::Tab => {
      if !app.results().is_empty() {
        app.mode = AppMode::Results;
      }
    }
    _ => {}
  }
}

fn handle_results_key(app: &mut App, key: event::KeyEvent) {
  match key.code {
    KeyCode::Enter => {
      app.request_watch();
    }
    KeyCode::Down | KeyCode::Char('j') => move_selection(app, true),
    KeyCode::Up | KeyCode::Char('k') => move_selection(app, false),
    KeyCode::Right | KeyCode::Char('n') => app.next_page(),
    KeyCode::Left | KeyCode::Char('p') => app.prev_page(),
    KeyCode::Esc | KeyCode::Tab | KeyCode::Char('/') => {
      app.mode = AppMode::Input;
    }
    KeyCode::Char('q') => {
      app.should_quit = true;
    }
    _ => {}
  }
}
