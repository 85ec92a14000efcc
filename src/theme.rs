use ratatui::style::Color;

pub struct Theme {
  pub name: &'static str,
  pub bg: Color,
  pub fg: Color,
  pub muted: Color,
  pub accent: Color,
  pub border: Color,
  pub highlight_fg: Color,
  pub highlight_bg: Color,
  pub stripe_bg: Color,
  pub status: Color,
  pub error: Color,
  pub warn: Color,
  pub key_fg: Color,
  pub key_bg: Color,
}

pub static THEMES: &[Theme] = &[
  Theme {
    name: "midnight",
    bg: Color::Rgb(22, 24, 33),
    fg: Color::Rgb(205, 214, 244),
    muted: Color::Rgb(108, 112, 134),
    accent: Color::Rgb(243, 139, 168),
    border: Color::Rgb(69, 71, 90),
    highlight_fg: Color::Rgb(22, 24, 33),
    highlight_bg: Color::Rgb(243, 139, 168),
    stripe_bg: Color::Rgb(28, 30, 41),
    status: Color::Rgb(137, 180, 250),
    error: Color::Rgb(235, 111, 146),
    warn: Color::Rgb(249, 226, 175),
    key_fg: Color::Rgb(22, 24, 33),
    key_bg: Color::Rgb(108, 112, 134),
  },
  Theme {
    name: "paper",
    bg: Color::Rgb(250, 247, 240),
    fg: Color::Rgb(60, 56, 54),
    muted: Color::Rgb(146, 131, 116),
    accent: Color::Rgb(204, 36, 29),
    border: Color::Rgb(213, 196, 161),
    highlight_fg: Color::Rgb(250, 247, 240),
    highlight_bg: Color::Rgb(204, 36, 29),
    stripe_bg: Color::Rgb(242, 236, 222),
    status: Color::Rgb(7, 102, 120),
    error: Color::Rgb(157, 0, 6),
    warn: Color::Rgb(181, 118, 20),
    key_fg: Color::Rgb(250, 247, 240),
    key_bg: Color::Rgb(146, 131, 116),
  },
  Theme {
    name: "terminal",
    bg: Color::Reset,
    fg: Color::Reset,
    muted: Color::DarkGray,
    accent: Color::Cyan,
    border: Color::DarkGray,
    highlight_fg: Color::Black,
    highlight_bg: Color::Cyan,
    stripe_bg: Color::Reset,
    status: Color::Blue,
    error: Color::Red,
    warn: Color::Yellow,
    key_fg: Color::Black,
    key_bg: Color::DarkGray,
  },
];

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn theme_names_are_unique() {
    let mut names: Vec<_> = THEMES.iter().map(|t| t.name).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), THEMES.len());
  }
}
