use std::io::{self, BufRead, Write};
use std::sync::Arc;

use async_trait::async_trait;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyModifiers},
    queue,
    terminal::{Clear, ClearType, SetTitle},
};
use docsession_core::{
    Command, DocumentView, ErrorDetail, ErrorPresenter, ExternalServices, FallbackRequest,
    LinkService, LoadedDocument, PasswordPrompt, PasswordReason, Percent, ProgressIndicator,
    ScaleValue, TitleSink, DEFAULT_SCALE_VALUE,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

const BAR_WIDTH: usize = 20;

/// Shared handle to the output stream. Every presenter writes through one of these.
pub struct Terminal<W> {
    out: Arc<Mutex<W>>,
}

impl<W> Clone for Terminal<W> {
    fn clone(&self) -> Self {
        Self {
            out: Arc::clone(&self.out),
        }
    }
}

impl<W: Write> Terminal<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.out.lock())
    }

    /// Replaces the current line with `label`.
    pub fn status(&self, label: &str) {
        let result = self.with(|out| {
            queue!(out, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine))?;
            write_status_line(out, label)
        });
        if let Err(err) = result {
            warn!(?err, "failed to write status line");
        }
    }

    pub fn clear_status(&self) {
        self.status("");
    }

    /// Ends the status line and writes `lines` below it.
    pub fn print_lines(&self, lines: &[String]) {
        let result = self.with(|out| -> io::Result<()> {
            queue!(out, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine))?;
            for line in lines {
                writeln!(out, "{line}")?;
            }
            out.flush()
        });
        if let Err(err) = result {
            warn!(?err, "failed to write to terminal");
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

/// Status-line loading bar.
pub struct LoadingBar<W> {
    terminal: Terminal<W>,
    state: Mutex<BarState>,
}

#[derive(Debug, Clone, Copy)]
struct BarState {
    percent: Percent,
    visible: bool,
}

impl<W: Write> LoadingBar<W> {
    pub fn new(terminal: Terminal<W>) -> Self {
        Self {
            terminal,
            state: Mutex::new(BarState {
                percent: Percent::Indeterminate,
                visible: true,
            }),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.state.lock().visible
    }

    fn redraw(&self, state: BarState) {
        if state.visible {
            self.terminal.status(&render_bar(state.percent));
        }
    }
}

pub fn render_bar(percent: Percent) -> String {
    match percent {
        Percent::Indeterminate => "Loading…".to_owned(),
        Percent::Determinate(value) => {
            let filled = (value.min(100) as usize * BAR_WIDTH) / 100;
            format!(
                "Loading… {value:>3}% [{}{}]",
                "#".repeat(filled),
                " ".repeat(BAR_WIDTH - filled)
            )
        }
    }
}

impl<W: Write + Send> ProgressIndicator for LoadingBar<W> {
    fn set_percent(&self, percent: Percent) {
        let state = {
            let mut state = self.state.lock();
            state.percent = percent;
            *state
        };
        self.redraw(state);
    }

    fn show(&self) {
        let state = {
            let mut state = self.state.lock();
            state.visible = true;
            *state
        };
        self.redraw(state);
    }

    fn hide(&self) {
        let was_visible = std::mem::replace(&mut self.state.lock().visible, false);
        if was_visible {
            self.terminal.clear_status();
        }
    }
}

/// Prints errors below the status line.
pub struct ErrorBox<W> {
    terminal: Terminal<W>,
    visible: Mutex<Option<String>>,
}

impl<W: Write> ErrorBox<W> {
    pub fn new(terminal: Terminal<W>) -> Self {
        Self {
            terminal,
            visible: Mutex::new(None),
        }
    }

    /// Message currently on display, if any.
    pub fn current(&self) -> Option<String> {
        self.visible.lock().clone()
    }
}

impl<W: Write + Send> ErrorPresenter for ErrorBox<W> {
    fn show(&self, message: &str, detail: Option<&ErrorDetail>) {
        let mut lines = vec![format!("error: {message}")];
        if let Some(detail) = detail {
            lines.push(format!("  {}", detail.message));
        }
        self.terminal.print_lines(&lines);
        *self.visible.lock() = Some(message.to_owned());
    }

    fn hide(&self) {
        self.visible.lock().take();
    }
}

pub struct TerminalTitle<W> {
    terminal: Terminal<W>,
}

impl<W: Write> TerminalTitle<W> {
    pub fn new(terminal: Terminal<W>) -> Self {
        Self { terminal }
    }
}

impl<W: Write + Send> TitleSink for TerminalTitle<W> {
    fn set_title(&self, title: &str) {
        let result = self.terminal.with(|out| -> io::Result<()> {
            queue!(out, SetTitle(title))?;
            out.flush()
        });
        if let Err(err) = result {
            warn!(?err, "failed to set terminal title");
        }
    }
}

/// Page and zoom state shown in the status line.
pub struct StatusView<W> {
    terminal: Terminal<W>,
    state: Mutex<ViewState>,
}

struct ViewState {
    document: Option<Arc<dyn LoadedDocument>>,
    page: usize,
    scale: ScaleValue,
}

impl<W: Write> StatusView<W> {
    pub fn new(terminal: Terminal<W>) -> Self {
        Self {
            terminal,
            state: Mutex::new(ViewState {
                document: None,
                page: 1,
                scale: DEFAULT_SCALE_VALUE,
            }),
        }
    }

    pub fn describe(&self) -> Option<String> {
        let state = self.state.lock();
        let pages = state.document.as_ref()?.num_pages();
        let zoom = match state.scale {
            ScaleValue::Scale(scale) => format!("{:.0}%", scale * 100.0),
            ScaleValue::Auto => "auto".to_owned(),
            ScaleValue::PageFit => "page-fit".to_owned(),
            ScaleValue::PageWidth => "page-width".to_owned(),
        };
        Some(format!("page {}/{pages}  {zoom}", state.page))
    }

    fn redraw(&self) {
        if let Some(line) = self.describe() {
            self.terminal.status(&line);
        }
    }
}

impl<W: Write + Send> DocumentView for StatusView<W> {
    fn set_document(&self, document: Option<Arc<dyn LoadedDocument>>) {
        {
            let mut state = self.state.lock();
            state.document = document;
            state.page = 1;
        }
        self.redraw();
    }

    fn current_page_number(&self) -> usize {
        self.state.lock().page
    }

    fn set_current_page_number(&self, page: usize) {
        self.state.lock().page = page;
        self.redraw();
    }

    fn current_scale(&self) -> f64 {
        match self.state.lock().scale {
            ScaleValue::Scale(scale) => scale,
            _ => 1.0,
        }
    }

    fn set_current_scale_value(&self, value: ScaleValue) {
        self.state.lock().scale = value;
        self.redraw();
    }
}

/// Link resolution context for the current document.
#[derive(Default)]
pub struct LinkState {
    inner: Mutex<LinkInner>,
}

#[derive(Default)]
struct LinkInner {
    bound: bool,
    base_url: Option<String>,
    external_links_disabled: bool,
}

impl LinkState {
    pub fn base_url(&self) -> Option<String> {
        self.inner.lock().base_url.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.lock().bound
    }

    pub fn external_links_enabled(&self) -> bool {
        !self.inner.lock().external_links_disabled
    }
}

impl LinkService for LinkState {
    fn set_document(&self, document: Option<Arc<dyn LoadedDocument>>, base_url: Option<String>) {
        let mut inner = self.inner.lock();
        inner.bound = document.is_some();
        inner.base_url = base_url;
    }

    fn set_external_links_enabled(&self, enabled: bool) {
        self.inner.lock().external_links_disabled = !enabled;
    }
}

/// Asks questions on the terminal and reads answers line by line.
pub struct LinePrompt<R, W> {
    input: Arc<Mutex<R>>,
    terminal: Terminal<W>,
}

impl<R, W: Write> LinePrompt<R, W> {
    pub fn new(input: R, terminal: Terminal<W>) -> Self {
        Self {
            input: Arc::new(Mutex::new(input)),
            terminal,
        }
    }
}

impl<R, W> LinePrompt<R, W>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    async fn ask(&self, question: String) -> Option<String> {
        let input = Arc::clone(&self.input);
        let terminal = self.terminal.clone();
        let answer = tokio::task::spawn_blocking(move || -> io::Result<Option<String>> {
            terminal.with(|out| {
                write!(out, "{question}")?;
                out.flush()
            })?;
            let mut line = String::new();
            if input.lock().read_line(&mut line)? == 0 {
                return Ok(None);
            }
            Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
        })
        .await;

        match answer {
            Ok(Ok(answer)) => answer,
            Ok(Err(err)) => {
                warn!(?err, "failed to read answer");
                None
            }
            Err(err) => {
                warn!(?err, "prompt reader stopped");
                None
            }
        }
    }
}

#[async_trait]
impl<R, W> PasswordPrompt for LinePrompt<R, W>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    async fn request(&self, reason: PasswordReason) -> Option<String> {
        let question = match reason {
            PasswordReason::NeedPassword => "Enter the password to open this PDF file: ",
            PasswordReason::IncorrectPassword => "Invalid password. Please try again: ",
        };
        self.ask(question.to_owned())
            .await
            .filter(|password| !password.is_empty())
    }
}

#[async_trait]
impl<R, W> ExternalServices for LinePrompt<R, W>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    async fn fallback(&self, request: FallbackRequest) -> bool {
        let question = format!(
            "This PDF uses {} which cannot be displayed. Save a copy instead? [y/N] ",
            request.feature_id
        );
        let answer = self.ask(question).await.unwrap_or_default();
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

/// Answers every question with "no". Used when stdin is not a terminal.
pub struct NonInteractive;

#[async_trait]
impl PasswordPrompt for NonInteractive {
    async fn request(&self, reason: PasswordReason) -> Option<String> {
        warn!(?reason, "document is encrypted; pass --password to open it");
        None
    }
}

#[async_trait]
impl ExternalServices for NonInteractive {
    async fn fallback(&self, request: FallbackRequest) -> bool {
        warn!(feature = %request.feature_id, "document uses an unsupported feature");
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Command(Command),
    Quit,
    None,
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };

        let event = match (code, modifiers) {
            (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                if let Some(digit) = c.to_digit(10) {
                    self.push_digit(digit as usize);
                }
                return UiEvent::None;
            }
            (KeyCode::Char('j'), KeyModifiers::NONE)
            | (KeyCode::Char(' '), KeyModifiers::NONE)
            | (KeyCode::Down, _)
            | (KeyCode::PageDown, _) => UiEvent::Command(Command::NextPage {
                count: self.take_count(),
            }),
            (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, _) | (KeyCode::PageUp, _) => {
                UiEvent::Command(Command::PrevPage {
                    count: self.take_count(),
                })
            }
            (KeyCode::Char('g'), KeyModifiers::NONE) | (KeyCode::Home, _) => {
                let page = self.pending_count.take().unwrap_or(1);
                UiEvent::Command(Command::GotoPage { page })
            }
            (KeyCode::Char('G'), _) | (KeyCode::End, _) => {
                let page = self.pending_count.take().unwrap_or(usize::MAX);
                UiEvent::Command(Command::GotoPage { page })
            }
            (KeyCode::Char('+'), _) => UiEvent::Command(Command::ZoomIn {
                ticks: self.take_ticks(),
            }),
            (KeyCode::Char('-'), _) => UiEvent::Command(Command::ZoomOut {
                ticks: self.take_ticks(),
            }),
            (KeyCode::Char('='), _) => UiEvent::Command(Command::ZoomReset),
            (KeyCode::Char('s'), KeyModifiers::CONTROL) | (KeyCode::Char('s'), KeyModifiers::NONE) => {
                UiEvent::Command(Command::Download)
            }
            (KeyCode::Char('w'), KeyModifiers::CONTROL) => UiEvent::Command(Command::Close),
            (KeyCode::Char('q'), _) | (KeyCode::Esc, _) => UiEvent::Quit,
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => UiEvent::Quit,
            _ => UiEvent::None,
        };
        self.reset_count();
        debug!(?event, "mapped key");
        event
    }

    pub fn pending_input(&self) -> Option<String> {
        (!self.pending_digits.is_empty()).then(|| self.pending_digits.clone())
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        self.pending_count = Some(current.saturating_mul(10).saturating_add(digit));
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        self.pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1)
    }

    fn take_ticks(&mut self) -> u32 {
        u32::try_from(self.take_count()).unwrap_or(u32::MAX)
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }
}
