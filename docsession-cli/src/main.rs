use std::fs;
use std::io::{self, BufReader, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, ValueEnum};
use crossterm::{cursor, event, terminal};
use directories::{ProjectDirs, UserDirs};
use docsession_core::{
    validator_for, Command, DocumentEngine, ExternalServices, MessageCatalog, Panels,
    PasswordPrompt, Services, SessionController, SessionSnapshot, ViewerOptions,
};
use docsession_engine::{default_engine, DirectoryDownloadManager, ScanningEngine};
use docsession_tty::{
    EventMapper, ErrorBox, LinePrompt, LinkState, LoadingBar, NonInteractive, StatusView,
    Terminal, TerminalTitle, UiEvent,
};
use serde_json::Value;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DecoderChoice {
    /// Pdfium when available, the byte scanner otherwise
    Auto,
    /// Byte scanner only; never loads Pdfium
    Scan,
}

#[derive(Debug, Parser)]
#[command(
    name = "docsession",
    version,
    about = "Open a PDF through a supervised loading session"
)]
struct Args {
    /// Path or URL of the document (defaults to `default_url` from the config)
    resource: Option<String>,

    /// Page to show once loaded (1-based)
    #[arg(short = 'p', long = "page")]
    page: Option<usize>,

    /// Save the document into this directory once loaded
    #[arg(short = 'd', long = "download")]
    download: Option<PathBuf>,

    /// Configuration file (defaults to config.toml in the platform config dir)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Hide the loading bar when data stops arriving
    #[arg(long)]
    disable_auto_fetch: bool,

    /// URL the viewer is served from; enables same-origin checks
    #[arg(long)]
    viewer_url: Option<String>,

    /// Password for encrypted documents
    #[arg(long)]
    password: Option<String>,

    #[arg(long, value_enum, default_value_t = DecoderChoice::Auto)]
    decoder: DecoderChoice,

    /// Keep the session open and read keys until `q`
    #[arg(short = 'i', long)]
    interactive: bool,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let _ = crossterm::execute!(io::stderr(), cursor::Show);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "docsession", "docsession")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let options = load_options(&args, &project_dirs)?;
    let resource = args
        .resource
        .clone()
        .or_else(|| options.default_url.clone())
        .ok_or_else(|| anyhow!("no document given and no default_url configured"))?;
    let location = resolve_location(&resource)?;

    let download_dir = match &args.download {
        Some(dir) => dir.clone(),
        None => default_download_dir(),
    };
    let downloads = Arc::new(DirectoryDownloadManager::new(download_dir)?);

    let terminal = Terminal::new(io::stderr());
    let view = Arc::new(StatusView::new(terminal.clone()));
    let (password, external) = prompts(terminal.clone());
    let services = Services {
        view: view.clone(),
        links: Arc::new(LinkState::default()),
        downloads: downloads.clone(),
        l10n: Arc::new(MessageCatalog::new(options.messages.clone())),
        errors: Arc::new(ErrorBox::new(terminal.clone())),
        external,
        password,
        progress: Arc::new(LoadingBar::new(terminal.clone())),
        title: Arc::new(TerminalTitle::new(terminal.clone())),
        panels: Panels::noop(),
    };

    let engine: Arc<dyn DocumentEngine> = match args.decoder {
        DecoderChoice::Auto => default_engine(),
        DecoderChoice::Scan => Arc::new(ScanningEngine::default()),
    };
    let validator = validator_for(&options)?;
    let controller = SessionController::new(engine, services, options, validator);

    controller
        .open_url(&location)
        .await
        .with_context(|| format!("failed to open {resource}"))?;
    let snapshot = controller.snapshot();
    terminal.clear_status();
    println!("{}", summary(&snapshot));

    if let Some(page) = args.page {
        controller.apply(Command::GotoPage { page }).await;
    }

    if args.download.is_some() {
        if controller.download().await.is_none() {
            controller.close().await;
            bail!("failed to save {resource}");
        }
        for path in downloads.saved() {
            println!("saved {}", path.display());
        }
    }

    if args.interactive {
        run_interactive(&controller).await?;
    }

    controller.close().await;
    Ok(())
}

async fn run_interactive(controller: &SessionController) -> Result<()> {
    if !io::stdin().is_terminal() {
        warn!("stdin is not a terminal; skipping interactive mode");
        return Ok(());
    }

    let _raw = RawModeGuard::new()?;
    let mut mapper = EventMapper::new();
    loop {
        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        match mapper.map_event(event::read()?) {
            UiEvent::Command(Command::Close) => {
                controller.close().await;
                break;
            }
            UiEvent::Command(command) => controller.apply(command).await,
            UiEvent::Quit => break,
            UiEvent::None => {}
        }
    }
    Ok(())
}

fn summary(snapshot: &SessionSnapshot) -> String {
    let title = if snapshot.title.is_empty() {
        "(untitled)"
    } else {
        snapshot.title.as_str()
    };
    let noun = if snapshot.pages_count == 1 { "page" } else { "pages" };
    format!("{title}: {} {noun}", snapshot.pages_count)
}

fn prompts(terminal: Terminal<io::Stderr>) -> (Arc<dyn PasswordPrompt>, Arc<dyn ExternalServices>) {
    if io::stdin().is_terminal() {
        let prompt = Arc::new(LinePrompt::new(BufReader::new(io::stdin()), terminal));
        (prompt.clone(), prompt)
    } else {
        (Arc::new(NonInteractive), Arc::new(NonInteractive))
    }
}

fn load_options(args: &Args, project_dirs: &ProjectDirs) -> Result<ViewerOptions> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| project_dirs.config_dir().join("config.toml"));
    let mut options = ViewerOptions::load(&path)?;

    if args.disable_auto_fetch {
        options.disable_auto_fetch = true;
    }
    if let Some(viewer_url) = &args.viewer_url {
        options.viewer_url = Some(viewer_url.clone());
    }
    if let Some(password) = &args.password {
        options
            .api
            .insert("password".to_owned(), Value::String(password.clone()));
    }
    Ok(options)
}

/// URLs pass through; anything else is a local path turned into a `file:` URL.
fn resolve_location(resource: &str) -> Result<String> {
    if let Ok(url) = Url::parse(resource) {
        // Single-letter schemes are Windows drive letters.
        if url.scheme().len() > 1 {
            return Ok(url.to_string());
        }
    }

    let path = Path::new(resource);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Url::from_file_path(&absolute)
        .map(|url| url.to_string())
        .map_err(|()| anyhow!("cannot express {:?} as a file URL", absolute))
}

fn default_download_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "docsession.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    info!(version = env!("CARGO_PKG_VERSION"), "docsession starting");
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_pass_through_and_paths_become_file_urls() {
        assert_eq!(
            resolve_location("https://x/a.pdf#page=2").unwrap(),
            "https://x/a.pdf#page=2"
        );
        let dir = std::env::temp_dir();
        let resolved = resolve_location(dir.join("a b.pdf").to_str().unwrap()).unwrap();
        assert!(resolved.starts_with("file://"));
        assert!(resolved.ends_with("/a%20b.pdf"));
    }

    #[test]
    fn summary_names_title_and_pages() {
        let mut snapshot = SessionSnapshot {
            phase: docsession_core::SessionPhase::Open,
            generation: Some(1),
            url: String::new(),
            base_url: String::new(),
            title: "Report".to_owned(),
            download_complete: true,
            content_disposition_filename: None,
            fell_back: false,
            pages_count: 1,
        };
        assert_eq!(summary(&snapshot), "Report: 1 page");
        snapshot.title.clear();
        snapshot.pages_count = 3;
        assert_eq!(summary(&snapshot), "(untitled): 3 pages");
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.toml");
        fs::write(&config, "disable_auto_fetch = false\nprogress_hide_timeout = 250\n").unwrap();
        let args = Args::parse_from([
            "docsession",
            "a.pdf",
            "--config",
            config.to_str().unwrap(),
            "--disable-auto-fetch",
            "--password",
            "pw",
        ]);
        let project_dirs = ProjectDirs::from("net", "docsession", "docsession").unwrap();

        let options = load_options(&args, &project_dirs).unwrap();
        assert!(options.disable_auto_fetch);
        assert_eq!(options.progress_hide_timeout, Duration::from_millis(250));
        assert_eq!(options.api["password"], Value::from("pw"));
    }
}
