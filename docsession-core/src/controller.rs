use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::filename::{pdf_file_name_from_url, strip_fragment, title_from_url, DEFAULT_FILENAME};
use crate::{
    Command, DocumentEngine, DownloadInfo, ErrorDetail, FallbackLatch, FallbackRequest,
    Generation, LoadError, LoadOptions, LoadParameters, LoadedDocument, LoadingTask,
    OriginValidator, PasswordReason, ProgressSample, ProgressTracker, Resource, ScaleValue,
    Services, SessionError, ViewerOptions, DEFAULT_SCALE_VALUE,
};

pub const DEFAULT_SCALE_DELTA: f64 = 1.1;
pub const MIN_SCALE: f64 = 0.1;
pub const MAX_SCALE: f64 = 10.0;

const LOADING_ERROR_FALLBACK: &str = "An error occurred while loading the PDF.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Closed,
    Opening,
    Open,
    Closing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub generation: Option<Generation>,
    pub url: String,
    pub base_url: String,
    pub title: String,
    pub download_complete: bool,
    pub content_disposition_filename: Option<String>,
    pub fell_back: bool,
    pub pages_count: usize,
}

/// Ways of saving the document, tried in order until one succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStrategy {
    /// Save the bytes the engine already holds.
    DocumentBytes,
    /// Let the download manager fetch the URL itself.
    DirectUrl,
}

struct SessionState {
    phase: SessionPhase,
    /// The authoritative loading task. Set before the engine creates the task.
    generation: Option<Generation>,
    task: Option<Arc<dyn LoadingTask>>,
    document: Option<Arc<dyn LoadedDocument>>,
    url: String,
    base_url: String,
    title: String,
    download_complete: bool,
    content_disposition_filename: Option<String>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: SessionPhase::Closed,
            generation: None,
            task: None,
            document: None,
            url: String::new(),
            base_url: String::new(),
            title: String::new(),
            download_complete: false,
            content_disposition_filename: None,
        }
    }

    fn reset_session_fields(&mut self) {
        self.url.clear();
        self.base_url.clear();
        self.title.clear();
        self.download_complete = false;
        self.content_disposition_filename = None;
    }
}

struct Inner {
    engine: Arc<dyn DocumentEngine>,
    services: Services,
    options: ViewerOptions,
    validator: Arc<dyn OriginValidator>,
    state: Mutex<SessionState>,
    /// Serializes open/close transitions. Never held while a document is loading.
    transition: tokio::sync::Mutex<()>,
    next_generation: AtomicU64,
    progress: ProgressTracker,
    latch: FallbackLatch,
}

/// Notification sinks handed to the engine with each loading task.
///
/// Every call is checked against the controller's authoritative generation, so a
/// superseded task can keep reporting without affecting the current session.
#[derive(Clone)]
pub struct TaskEvents {
    generation: Generation,
    inner: Weak<Inner>,
}

impl TaskEvents {
    /// Sinks bound to no controller; every notification is dropped.
    pub fn detached(generation: Generation) -> Self {
        Self {
            generation,
            inner: Weak::new(),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn progress(&self, sample: ProgressSample) {
        match self.controller() {
            Some(controller) => {
                controller.inner.progress.on_sample(sample);
            }
            None => debug!(generation = self.generation, "dropping progress of stale task"),
        }
    }

    pub fn unsupported_feature(&self, feature_id: &str) {
        let Some(controller) = self.controller() else {
            return;
        };
        let feature_id = feature_id.to_owned();
        tokio::spawn(async move {
            controller.fallback(&feature_id).await;
        });
    }

    pub async fn password(&self, reason: PasswordReason) -> Option<String> {
        let controller = self.controller()?;
        let services = &controller.inner.services;
        services.links.set_external_links_enabled(false);
        services.password.request(reason).await
    }

    fn controller(&self) -> Option<SessionController> {
        let controller = SessionController {
            inner: self.inner.upgrade()?,
        };
        controller
            .is_authoritative(self.generation)
            .then_some(controller)
    }
}

/// Owns the single document session: open, load, close, download and fallback.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        engine: Arc<dyn DocumentEngine>,
        services: Services,
        options: ViewerOptions,
        validator: Arc<dyn OriginValidator>,
    ) -> Self {
        let progress = ProgressTracker::new(
            Arc::clone(&services.progress),
            options.progress_hide_timeout,
        );
        Self {
            inner: Arc::new(Inner {
                engine,
                services,
                options,
                validator,
                state: Mutex::new(SessionState::new()),
                transition: tokio::sync::Mutex::new(()),
                next_generation: AtomicU64::new(0),
                progress,
                latch: FallbackLatch::new(),
            }),
        }
    }

    pub fn options(&self) -> &ViewerOptions {
        &self.inner.options
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase
    }

    pub fn generation(&self) -> Option<Generation> {
        self.inner.state.lock().generation
    }

    pub fn is_authoritative(&self, generation: Generation) -> bool {
        self.inner.state.lock().generation == Some(generation)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock();
        SessionSnapshot {
            phase: state.phase,
            generation: state.generation,
            url: state.url.clone(),
            base_url: state.base_url.clone(),
            title: state.title.clone(),
            download_complete: state.download_complete,
            content_disposition_filename: state.content_disposition_filename.clone(),
            fell_back: self.inner.latch.fell_back(),
            pages_count: state.document.as_ref().map_or(0, |doc| doc.num_pages()),
        }
    }

    /// Opens `resource`, closing any current session first. Resolves once the
    /// document is bound, or immediately with `Ok` if this load was superseded.
    #[instrument(skip_all, fields(resource = %resource))]
    pub async fn open(&self, resource: Resource, extra: LoadOptions) -> Result<(), SessionError> {
        self.open_titled(resource, extra, None).await
    }

    /// Entry point for user-supplied locations: checks the origin, reads `file:`
    /// URLs in-process and opens everything else by URL.
    #[instrument(skip(self))]
    pub async fn open_url(&self, file: &str) -> Result<(), SessionError> {
        if let Err(err) = self.inner.validator.validate(file) {
            warn!(error = %err, "refusing to open file");
            let message = self
                .inner
                .services
                .l10n
                .get("loading_error", LOADING_ERROR_FALLBACK);
            self.error(
                &message,
                Some(ErrorDetail {
                    message: err.to_string(),
                }),
            );
            return Err(err.into());
        }

        if file.starts_with("file:") {
            let data = match read_file_url(file).await {
                Ok(data) => data,
                Err(err) => {
                    self.report_load_error(&err);
                    return Err(err.into());
                }
            };
            return self
                .open_titled(Resource::Data(data), LoadOptions::new(), Some(file.to_owned()))
                .await;
        }

        self.open(Resource::Url(file.to_owned()), LoadOptions::new())
            .await
    }

    async fn open_titled(
        &self,
        resource: Resource,
        extra: LoadOptions,
        title_url: Option<String>,
    ) -> Result<(), SessionError> {
        let (generation, task) = {
            let _transition = self.inner.transition.lock().await;
            // Runs even without a held task so an error left by a failed open is hidden.
            self.close_session().await;

            if let Some(url) = title_url.as_deref().or_else(|| resource.title_url()) {
                self.set_title_using_url(url);
            }
            let base_url = self.inner.state.lock().base_url.clone();
            let parameters = LoadParameters::build(resource, &self.inner.options, &base_url, extra);
            self.start_task(parameters)
        };

        let outcome = task.document().await;

        let transition = self.inner.transition.lock().await;
        if !self.is_authoritative(generation) {
            debug!(generation, "ignoring result of superseded loading task");
            return Ok(());
        }
        match outcome {
            Ok(document) => {
                self.load(document);
                Ok(())
            }
            Err(err) => {
                warn!(generation, error = %err, "loading task failed");
                self.teardown().await;
                drop(transition);
                self.report_load_error(&err);
                Err(err.into())
            }
        }
    }

    fn start_task(&self, parameters: LoadParameters) -> (Generation, Arc<dyn LoadingTask>) {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.latch.rearm();
        self.inner.progress.reset(parameters.disable_auto_fetch());
        {
            let mut state = self.inner.state.lock();
            state.generation = Some(generation);
            state.phase = SessionPhase::Opening;
        }

        debug!(generation, source = ?parameters.source, "creating loading task");
        let events = TaskEvents {
            generation,
            inner: Arc::downgrade(&self.inner),
        };
        let task = self.inner.engine.create_loading_task(parameters, events);
        self.inner.state.lock().task = Some(Arc::clone(&task));
        (generation, task)
    }

    /// Binds a decoded document into the current session.
    pub fn load(&self, document: Arc<dyn LoadedDocument>) {
        let (generation, base_url) = {
            let mut state = self.inner.state.lock();
            state.document = Some(Arc::clone(&document));
            state.phase = SessionPhase::Open;
            if let Some(filename) = document.content_disposition_filename() {
                state.content_disposition_filename = Some(filename);
            }
            (state.generation, state.base_url.clone())
        };
        if let Some(generation) = generation {
            self.watch_download(generation, Arc::clone(&document));
        }

        let pages = document.num_pages();
        if let Some(title) = document.title().filter(|title| !title.trim().is_empty()) {
            self.set_title(&title);
        }

        let services = &self.inner.services;
        services.panels.secondary_toolbar.set_pages_count(pages);
        let link_base_url = (self.inner.options.link_base_url && !base_url.is_empty())
            .then_some(base_url);
        services
            .links
            .set_document(Some(Arc::clone(&document)), link_base_url);
        services.view.set_document(Some(document));
        info!(?generation, pages, "document loaded");
    }

    fn watch_download(&self, generation: Generation, document: Arc<dyn LoadedDocument>) {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let info = document.download_info().await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            match info {
                Ok(info) => SessionController { inner }.download_finished(generation, info),
                Err(err) => debug!(generation, error = %err, "download info unavailable"),
            }
        });
    }

    fn download_finished(&self, generation: Generation, info: DownloadInfo) {
        {
            let mut state = self.inner.state.lock();
            if state.generation != Some(generation) {
                return;
            }
            state.download_complete = true;
        }
        debug!(generation, length = info.length, "document fully downloaded");
        self.inner.progress.mark_complete();
    }

    /// Closes the current session. Resolves once the loading task is destroyed.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        let _transition = self.inner.transition.lock().await;
        self.close_session().await;
    }

    async fn close_session(&self) {
        self.inner.services.errors.hide();
        self.teardown().await;
    }

    async fn teardown(&self) {
        let (task, had_document) = {
            let mut state = self.inner.state.lock();
            let Some(generation) = state.generation.take() else {
                return;
            };
            debug!(generation, "tearing down session");
            state.phase = SessionPhase::Closing;
            let task = state.task.take();
            let had_document = state.document.take().is_some();
            state.reset_session_fields();
            (task, had_document)
        };
        self.inner.progress.reset(false);

        let services = &self.inner.services;
        if had_document {
            services.view.set_document(None);
            services.links.set_document(None, None);
        }
        services.panels.reset_all();

        if let Some(task) = task {
            task.destroy().await;
        }
        self.inner.state.lock().phase = SessionPhase::Closed;
    }

    /// Saves the document through the download manager. Returns the strategy
    /// that worked, or `None` after reporting the last failure.
    #[instrument(skip(self))]
    pub async fn download(&self) -> Option<DownloadStrategy> {
        let (url, filename, document) = {
            let state = self.inner.state.lock();
            let filename = state
                .content_disposition_filename
                .clone()
                .unwrap_or_else(|| pdf_file_name_from_url(&state.url, DEFAULT_FILENAME));
            let document = state
                .document
                .clone()
                .filter(|_| state.download_complete);
            (state.base_url.clone(), filename, document)
        };

        let strategies: &[DownloadStrategy] = match document {
            Some(_) => &[DownloadStrategy::DocumentBytes, DownloadStrategy::DirectUrl],
            None => &[DownloadStrategy::DirectUrl],
        };

        let downloads = &self.inner.services.downloads;
        let mut last_error = None;
        for &strategy in strategies {
            let attempt = match (strategy, &document) {
                (DownloadStrategy::DocumentBytes, Some(document)) => match document.data().await {
                    Ok(data) => downloads.download(data, &url, &filename).await,
                    Err(err) => Err(err.context("failed to read document bytes")),
                },
                (DownloadStrategy::DocumentBytes, None) => continue,
                (DownloadStrategy::DirectUrl, _) => downloads.download_url(&url, &filename).await,
            };
            match attempt {
                Ok(()) => {
                    info!(?strategy, %filename, "download handed off");
                    return Some(strategy);
                }
                Err(err) => {
                    warn!(?strategy, error = %err, "download strategy failed");
                    last_error = Some(err);
                }
            }
        }

        if let Some(err) = last_error {
            self.error(&format!("PDF failed to download: {err:#}"), None);
        }
        None
    }

    /// Offers the user a fallback for an unsupported feature, at most once per
    /// session. Returns whether this call escalated.
    #[instrument(skip(self))]
    pub async fn fallback(&self, feature_id: &str) -> bool {
        if !self.inner.latch.trigger(feature_id) {
            return false;
        }
        let (generation, url) = {
            let state = self.inner.state.lock();
            (state.generation, state.base_url.clone())
        };
        info!("document uses an unsupported feature");
        let accepted = self
            .inner
            .services
            .external
            .fallback(FallbackRequest {
                feature_id: feature_id.to_owned(),
                url,
            })
            .await;
        if accepted {
            if self.generation() == generation {
                self.download().await;
            } else {
                debug!(feature_id, "session changed while the fallback prompt was open");
            }
        }
        true
    }

    /// Shows a user-visible error. All failures surface through here.
    pub fn error(&self, message: &str, detail: Option<ErrorDetail>) {
        error!(detail = ?detail.as_ref().map(|d| d.message.as_str()), "{message}");
        self.inner.services.errors.show(message, detail.as_ref());
    }

    fn report_load_error(&self, err: &LoadError) {
        let (key, fallback) = err.message_key();
        let message = self.inner.services.l10n.get(key, fallback);
        self.error(
            &message,
            Some(ErrorDetail {
                message: err.to_string(),
            }),
        );
    }

    pub fn set_title_using_url(&self, url: &str) {
        {
            let mut state = self.inner.state.lock();
            state.url = url.to_owned();
            state.base_url = strip_fragment(url).to_owned();
        }
        self.set_title(&title_from_url(url));
    }

    pub fn set_title(&self, title: &str) {
        self.inner.state.lock().title = title.to_owned();
        if self.inner.options.is_embedded {
            return;
        }
        self.inner.services.title.set_title(title);
    }

    pub fn pages_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .document
            .as_ref()
            .map_or(0, |doc| doc.num_pages())
    }

    pub fn page(&self) -> usize {
        self.inner.services.view.current_page_number()
    }

    pub fn set_page(&self, page: usize) {
        self.inner.services.view.set_current_page_number(page);
    }

    pub fn zoom_in(&self, ticks: u32) {
        self.step_scale(
            ticks,
            |scale| {
                let hundredths = hundredths(scale * DEFAULT_SCALE_DELTA);
                (((hundredths + 9) / 10) as f64 / 10.0).min(MAX_SCALE)
            },
            |scale| scale < MAX_SCALE,
        );
    }

    pub fn zoom_out(&self, ticks: u32) {
        self.step_scale(
            ticks,
            |scale| {
                let hundredths = hundredths(scale / DEFAULT_SCALE_DELTA);
                ((hundredths / 10) as f64 / 10.0).max(MIN_SCALE)
            },
            |scale| scale > MIN_SCALE,
        );
    }

    pub fn zoom_reset(&self) {
        let view = &self.inner.services.view;
        if view.is_in_presentation_mode() {
            return;
        }
        view.set_current_scale_value(DEFAULT_SCALE_VALUE);
    }

    fn step_scale(
        &self,
        ticks: u32,
        step: impl Fn(f64) -> f64,
        can_continue: impl Fn(f64) -> bool,
    ) {
        let view = &self.inner.services.view;
        if view.is_in_presentation_mode() {
            return;
        }
        let mut scale = view.current_scale();
        let mut remaining = ticks.max(1);
        loop {
            scale = step(scale);
            remaining -= 1;
            if remaining == 0 || !can_continue(scale) {
                break;
            }
        }
        view.set_current_scale_value(ScaleValue::Scale(scale));
    }

    pub async fn apply(&self, command: Command) {
        match command {
            Command::NextPage { count } => self.move_to(self.page().saturating_add(count)),
            Command::PrevPage { count } => self.move_to(self.page().saturating_sub(count)),
            Command::GotoPage { page } => self.move_to(page),
            Command::ZoomIn { ticks } => self.zoom_in(ticks),
            Command::ZoomOut { ticks } => self.zoom_out(ticks),
            Command::ZoomReset => self.zoom_reset(),
            Command::Download => {
                self.download().await;
            }
            Command::Close => self.close().await,
        }
    }

    fn move_to(&self, page: usize) {
        let pages = self.pages_count();
        if pages == 0 {
            return;
        }
        let page = page.clamp(1, pages);
        if page != self.page() {
            self.set_page(page);
        }
    }
}

/// Scale rounded to whole hundredths, so stepping to the next tenth is exact.
fn hundredths(value: f64) -> u64 {
    (value * 100.0).round().max(0.0) as u64
}

async fn read_file_url(file: &str) -> Result<Bytes, LoadError> {
    let path = Url::parse(file)
        .ok()
        .and_then(|url| url.to_file_path().ok())
        .ok_or_else(|| LoadError::Missing(file.to_owned()))?;
    let data = tokio::fs::read(&path)
        .await
        .map_err(|err| LoadError::Missing(format!("{}: {err}", path.display())))?;
    Ok(Bytes::from(data))
}
