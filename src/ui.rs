use ratatui::{
  Frame,
  layout::{Alignment, Constraint, Layout, Rect},
  style::{Modifier, Style, Stylize},
  text::{Line, Span},
  widgets::{Block, BorderType, List, ListItem, Padding, Paragraph},
};

use crate::app::{App, AppMode};
use crate::console::Level;
use crate::playback::SessionState;
use crate::theme::Theme;

// --- Helpers ---

/// Compute the display width of the first `n` chars (accounting for double-width CJK).
pub fn display_width(s: &str, n: usize) -> usize {
  use unicode_width::UnicodeWidthChar;
  s.chars().take(n).map(|c| c.width().unwrap_or(0)).sum()
}

/// Truncate a string to `max_width` characters, appending "…" if truncated.
fn truncate_str(s: &str, max_width: usize) -> String {
  if s.chars().count() <= max_width {
    s.to_string()
  } else {
    let truncated: String = s.chars().take(max_width.saturating_sub(1)).collect();
    format!("{}…", truncated)
  }
}

fn panel<'a>(title: impl Into<Line<'a>>, theme: &Theme) -> Block<'a> {
  Block::bordered()
    .title(title)
    .title_style(Style::default().fg(theme.accent).add_modifier(Modifier::BOLD))
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(theme.border))
}

// --- UI Rendering ---

pub fn ui(frame: &mut Frame, app: &mut App) {
  let theme = app.theme();

  frame.render_widget(Block::default().style(Style::default().bg(theme.bg)), frame.area());

  let [header_area, main_area, status_area, input_area, footer_area] = Layout::vertical([
    Constraint::Length(1),
    Constraint::Min(3),
    Constraint::Length(1),
    Constraint::Length(3),
    Constraint::Length(1),
  ])
  .areas(frame.area());

  render_header(frame, app, header_area);
  render_main(frame, app, main_area);
  render_status(frame, app, status_area);
  render_input(frame, app, input_area);
  render_footer(frame, app, footer_area);
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
  let theme = app.theme();
  let left = Line::from(vec![
    Span::styled(" ▶ ytw ", Style::default().fg(theme.accent).add_modifier(Modifier::BOLD)),
    Span::styled(format!("[{}]", app.pagination.provider_name()), Style::default().fg(theme.muted)),
    Span::styled(format!(" [{}]", app.quality.label()), Style::default().fg(theme.muted)),
  ]);
  frame.render_widget(left, area);

  let version = format!("v{} ", env!("CARGO_PKG_VERSION"));
  let right = Line::from(Span::styled(&version, Style::default().fg(theme.muted)));
  let right_w = (version.len() as u16).min(area.width);
  let right_area = Rect { x: area.x + area.width - right_w, width: right_w, ..area };
  frame.render_widget(right, right_area);
}

fn render_main(frame: &mut Frame, app: &mut App, area: Rect) {
  let [list_area, side_area] = Layout::horizontal([Constraint::Percentage(60), Constraint::Percentage(40)]).areas(area);
  let [details_area, console_area] = Layout::vertical([Constraint::Length(9), Constraint::Min(3)]).areas(side_area);

  if app.results().is_empty() {
    render_welcome(frame, app, list_area);
  } else {
    render_results(frame, app, list_area);
  }
  render_details(frame, app, details_area);
  render_console(frame, app, console_area);
}

fn render_welcome(frame: &mut Frame, app: &App, area: Rect) {
  let theme = app.theme();
  let hint = if app.pagination.in_flight() { "Searching…" } else { "Type a query below and press Enter." };
  let text = vec![
    Line::from(""),
    Line::from(Span::styled("▶  ytw", Style::default().fg(theme.accent).add_modifier(Modifier::BOLD))),
    Line::from(""),
    Line::from(Span::styled("Search YouTube. Watch in your player.", Style::default().fg(theme.fg))),
    Line::from(""),
    Line::from(Span::styled(hint, Style::default().fg(theme.muted))),
  ];
  let paragraph = Paragraph::new(text).alignment(Alignment::Center).block(panel(" Results ", theme));
  frame.render_widget(paragraph, area);
}

fn render_results(frame: &mut Frame, app: &mut App, area: Rect) {
  let theme = app.theme();

  // Inner width: area minus 2 borders minus 2 chars for highlight symbol ("▶ ")
  let inner_w = area.width.saturating_sub(4) as usize;
  let selected = app.list_state.selected();

  let items: Vec<ListItem> = app
    .results()
    .iter()
    .enumerate()
    .map(|(i, video)| {
      let is_selected = Some(i) == selected;
      let fg = if is_selected { theme.highlight_fg } else { theme.fg };
      let bg = if is_selected {
        theme.highlight_bg
      } else if i % 2 == 1 {
        theme.stripe_bg
      } else {
        theme.bg
      };

      let right = video.formatted_duration();
      let right_w = right.chars().count();
      let title = truncate_str(&video.title, inner_w.saturating_sub(right_w + 2));
      let gap = inner_w.saturating_sub(title.chars().count() + right_w);
      let line = Line::from(vec![
        Span::styled(title, Style::default().fg(fg)),
        Span::raw(" ".repeat(gap)),
        Span::styled(right, Style::default().fg(theme.muted)),
      ]);
      ListItem::new(line).bg(bg)
    })
    .collect();

  let mut title = match app.pagination.query() {
    Some(q) => format!(" Results · '{}' · page {} ", truncate_str(&q.text, 24), q.page),
    None => " Results ".to_string(),
  };
  if app.pagination.in_flight() {
    title.push_str("(loading…) ");
  } else if app.pagination.has_next_page() {
    title.push_str("→ ");
  }

  let list = List::new(items)
    .block(panel(title, theme))
    .highlight_symbol("▶ ")
    .highlight_style(Style::default().fg(theme.highlight_fg).bg(theme.highlight_bg).add_modifier(Modifier::BOLD));

  frame.render_stateful_widget(list, area, &mut app.list_state);
}

fn render_details(frame: &mut Frame, app: &App, area: Rect) {
  let theme = app.theme();
  let block = panel(" Details ", theme).padding(Padding::horizontal(1));
  let Some(video) = app.selected() else {
    frame.render_widget(block, area);
    return;
  };

  let inner_w = area.width.saturating_sub(4) as usize;
  let field = |label: &'static str, value: &str| {
    Line::from(vec![
      Span::styled(label, Style::default().fg(theme.muted)),
      Span::styled(truncate_str(value, inner_w.saturating_sub(label.len())), Style::default().fg(theme.fg)),
    ])
  };

  let lines = vec![
    Line::from(Span::styled(
      truncate_str(&video.title, inner_w),
      Style::default().fg(theme.fg).add_modifier(Modifier::BOLD),
    )),
    Line::from(""),
    field("Author    ", video.author.as_deref().unwrap_or("unknown")),
    field("Duration  ", &video.formatted_duration()),
    field("Id        ", &video.id),
    Line::from(Span::styled(
      truncate_str(&video.thumbnail, inner_w),
      Style::default().fg(theme.accent).add_modifier(Modifier::UNDERLINED),
    )),
  ];
  frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_console(frame: &mut Frame, app: &App, area: Rect) {
  let theme = app.theme();
  let label = if app.console.is_empty() { " Console ".to_string() } else { format!(" Console · {} ", app.console.len()) };
  let mut title = vec![Span::styled(label, Style::default().fg(theme.accent).add_modifier(Modifier::BOLD))];
  if let Some(session) = app.playback.session() {
    let color =
      if session.state.is_live() || session.state == SessionState::Exited(0) { theme.status } else { theme.warn };
    title.push(Span::styled(format!("[{}] ", session.state.label()), Style::default().fg(color)));
  }

  let inner_w = area.width.saturating_sub(2) as usize;
  let visible = area.height.saturating_sub(2) as usize;
  let lines: Vec<Line> = app
    .console
    .lines()
    .rev()
    .take(visible)
    .rev()
    .map(|l| {
      let color = match l.level {
        Level::Info => theme.fg,
        Level::Warn => theme.warn,
      };
      let prefix = format!("{} {}: ", l.timestamp.format("%H:%M:%S"), l.source);
      let body = truncate_str(&l.line, inner_w.saturating_sub(prefix.chars().count()));
      Line::from(vec![Span::styled(prefix, Style::default().fg(theme.muted)), Span::styled(body, Style::default().fg(color))])
    })
    .collect();

  let block = Block::bordered()
    .title(Line::from(title))
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(theme.border));
  if app.console.is_empty() {
    let placeholder = Paragraph::new(Span::styled("No output yet.", Style::default().fg(theme.muted)));
    frame.render_widget(placeholder.block(block), area);
  } else {
    frame.render_widget(Paragraph::new(lines).block(block), area);
  }
}

fn render_status(frame: &mut Frame, app: &App, area: Rect) {
  let theme = app.theme();
  let (text, style) = if let Some(msg) = &app.busy_message {
    (format!(" ⏳ {}", msg), Style::default().fg(theme.status))
  } else if let Some(msg) = &app.status_message {
    (format!(" ⏳ {}", msg), Style::default().fg(theme.status))
  } else if let Some(err) = &app.last_error {
    (format!(" ⚠  {}", err), Style::default().fg(theme.error))
  } else if let Some(info) = &app.info_message {
    (format!(" ♪ {}", info), Style::default().fg(theme.status))
  } else {
    (" Ready".to_string(), Style::default().fg(theme.muted))
  };
  frame.render_widget(Paragraph::new(text).style(style), area);
}

fn render_input(frame: &mut Frame, app: &mut App, area: Rect) {
  let theme = app.theme();
  let border_color = if app.mode == AppMode::Input { theme.accent } else { theme.border };
  let title = match app.config.default_directory() {
    Some(dir) => format!(" Search YouTube · {} ", dir.display()),
    None => " Search YouTube ".to_string(),
  };
  let input_block = Block::bordered()
    .title(title)
    .title_style(Style::default().fg(border_color))
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(border_color))
    .padding(Padding::horizontal(1));

  let inner_w = area.width.saturating_sub(4) as usize;
  if inner_w == 0 {
    frame.render_widget(input_block, area);
    return;
  }
  let cursor_col = display_width(&app.input, app.cursor_position);

  if cursor_col < app.input_scroll {
    app.input_scroll = cursor_col;
  } else if cursor_col >= app.input_scroll + inner_w {
    app.input_scroll = cursor_col.saturating_sub(inner_w) + 1;
  }

  let visible: String = app
    .input
    .chars()
    .scan(0usize, |col, c| {
      let w = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
      let start = *col;
      *col += w;
      Some((start, *col, c))
    })
    .skip_while(|(_, end, _)| *end <= app.input_scroll)
    .take_while(|(start, _, _)| *start < app.input_scroll + inner_w)
    .map(|(_, _, c)| c)
    .collect();

  let paragraph = Paragraph::new(visible).style(Style::default().fg(theme.fg)).block(input_block);
  frame.render_widget(paragraph, area);

  if app.mode == AppMode::Input {
    let cursor_x = area.x + 2 + cursor_col.saturating_sub(app.input_scroll) as u16;
    frame.set_cursor_position((cursor_x, area.y + 1));
  }
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
  let theme = app.theme();
  let has_results = !app.results().is_empty();
  let is_playing = app.playback.is_playing();
  let mut keys: Vec<(&str, &str)> = match app.mode {
    AppMode::Input => {
      let mut k = vec![("Enter", "Search"), ("↑", "History"), ("^d", "Set dir")];
      if has_results {
        k.push(("↓", "Results"));
      } else {
        k.push(("Esc", "Quit"));
      }
      k
    }
    AppMode::Results => {
      let mut k = vec![("Enter", "Watch"), ("j/k", "Navigate")];
      if app.pagination.has_prev_page() {
        k.push(("p", "Prev"));
      }
      if app.pagination.has_next_page() {
        k.push(("n", "Next"));
      }
      k.push(("Esc", "Back"));
      k
    }
  };
  if app.pagination.in_flight() {
    keys.push(("^x", "Cancel"));
  }
  if is_playing {
    keys.push(("^s", "Stop"));
  }
  keys.push(("^f", "Quality"));
  keys.push(("^t", "Theme"));

  let spans: Vec<Span> = keys
    .iter()
    .enumerate()
    .flat_map(|(i, (key, action))| {
      let mut s = vec![
        Span::styled(format!(" {} ", key), Style::default().fg(theme.key_fg).bg(theme.key_bg)),
        Span::styled(format!(" {} ", action), Style::default().fg(theme.muted)),
      ];
      if i < keys.len() - 1 {
        s.push(Span::raw("  "));
      }
      s
    })
    .collect();

  frame.render_widget(Line::from(spans), area);

  let theme_label = format!("{} ", theme.name);
  let right = Line::from(Span::styled(&theme_label, Style::default().fg(theme.muted)));
  let right_area =
    Rect { x: area.x + area.width.saturating_sub(theme_label.len() as u16), width: theme_label.len() as u16, ..area };
  frame.render_widget(right, right_area);
}
