mod app;
mod config;
mod console;
mod constants;
mod input;
mod pagination;
mod playback;
mod quality;
mod search;
mod theme;
mod ui;
mod web;
mod youtube;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use directories::ProjectDirs;
use ratatui::{
  DefaultTerminal,
  crossterm::event::{self, Event, KeyEventKind},
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use app::App;
use config::Config;
use constants::constants;
use youtube::ProviderKind;

// --- CLI ---

#[derive(Parser, Debug)]
#[command(author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
  /// Search backend (default: from config, else ytdlp)
  #[arg(long, value_enum)]
  provider: Option<ProviderKind>,

  /// Player binary to launch (default: from config, else mpv)
  #[arg(long)]
  player: Option<String>,

  /// Results per page
  #[arg(long, value_parser = clap::value_parser!(u16).range(1..=100))]
  page_size: Option<u16>,

  /// Write logs here instead of the data directory
  #[arg(long)]
  log_file: Option<PathBuf>,

  /// Print shell completions and exit
  #[arg(long, value_enum, value_name = "SHELL")]
  completions: Option<clap_complete::Shell>,
}

// --- Logging ---

fn default_log_path() -> Option<PathBuf> {
  ProjectDirs::from("", "", "ytw").map(|dirs| dirs.data_local_dir().join("ytw.log"))
}

/// The terminal belongs to the TUI, so logs only go to a file.
fn init_logging(path: Option<PathBuf>) -> Result<Option<WorkerGuard>> {
  let Some(path) = path.or_else(default_log_path) else { return Ok(None) };
  let dir = match path.parent() {
    Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
    _ => PathBuf::from("."),
  };
  let file_name = path.file_name().context("Log path has no file name")?;
  std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(&dir, file_name));
  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "ytw=info".into()))
    .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .context("Failed to initialise logging")?;
  Ok(Some(guard))
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  if let Some(shell) = args.completions {
    clap_complete::generate(shell, &mut Args::command(), "ytw", &mut std::io::stdout());
    return Ok(());
  }

  let _log_guard = init_logging(args.log_file.clone())?;
  info!(version = env!("CARGO_PKG_VERSION"), "ytw starting");

  let default_hook = std::panic::take_hook();
  // Provider panics on worker threads are caught and reported in the UI,
  // so only a panic on the main thread tears the terminal down.
  std::panic::set_hook(Box::new(move |info| {
    if std::thread::current().name() == Some("main") {
      ratatui::restore();
      default_hook(info);
    } else {
      tracing::error!(panic = %info, "ytw: worker panicked");
    }
  }));

  let mut terminal = ratatui::init();
  let result = run(&mut terminal, args).await;
  ratatui::restore();
  if let Err(ref e) = result {
    tracing::error!(err = %format!("{:#}", e), "ytw exited with error");
  }
  result
}

async fn run(terminal: &mut DefaultTerminal, args: Args) -> Result<()> {
  let config = Config::load();
  let provider = args
    .provider
    .or_else(|| config.provider.as_deref().map(ProviderKind::from_config))
    .unwrap_or(ProviderKind::Ytdlp);
  let page_size = args.page_size.map(usize::from).or(config.page_size).unwrap_or(constants().page_size);
  info!(provider = provider.label(), page_size, "ytw: configured");

  let mut app = App::new(config, provider.build(page_size), args.player);

  loop {
    app.check_pending();

    terminal.draw(|frame| ui::ui(frame, &mut app))?;

    // Drawn first so the busy message is on screen while the player starts or stops.
    app.run_pending_action().await;

    if event::poll(Duration::from_millis(100))? {
      match event::read()? {
        Event::Key(key) if key.kind == KeyEventKind::Press => {
          input::handle_key_event(&mut app, key);
        }
        _ => {}
      }
    }

    if app.should_quit {
      break;
    }
  }

  app.shutdown().await;
  info!("ytw: shut down");
  Ok(())
}
