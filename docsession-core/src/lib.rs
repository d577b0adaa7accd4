//! Session lifecycle for a single document: open, load, close, with progress
//! reporting and one-shot unsupported-feature fallback.
//!
//! The [`SessionController`] owns the current [`LoadingTask`] and guarantees that
//! only the most recently created task can affect the session. Everything that
//! draws, navigates or downloads sits behind the traits in [`services`].

mod config;
mod controller;
mod error;
mod fallback;
pub mod filename;
mod origin;
mod params;
mod progress;
pub mod services;
mod task;

pub use config::{ViewerOptions, DEFAULT_PROGRESS_HIDE_TIMEOUT};
pub use controller::{
    DownloadStrategy, SessionController, SessionPhase, SessionSnapshot, TaskEvents,
    DEFAULT_SCALE_DELTA, MAX_SCALE, MIN_SCALE,
};
pub use error::{LoadError, OriginError, SessionError};
pub use fallback::FallbackLatch;
pub use origin::{validator_for, AllowAllOrigins, HostedOriginPolicy, OriginValidator};
pub use params::{LoadOptions, LoadParameters, LoadSource, Resource};
pub use progress::ProgressTracker;
pub use services::{
    DocumentView, DownloadManager, ErrorDetail, ErrorPresenter, ExternalServices,
    FallbackRequest, LinkService, Localizer, MessageCatalog, NoopPanel, Panel, Panels,
    PasswordPrompt, ProgressIndicator, ScaleValue, SecondaryToolbar, Services, TitleSink,
    DEFAULT_SCALE_VALUE,
};
pub use task::{
    DocumentEngine, DownloadInfo, Generation, LoadedDocument, LoadingTask, PasswordReason,
    Percent, ProgressSample,
};

/// User-level actions on the open document.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    NextPage { count: usize },
    PrevPage { count: usize },
    GotoPage { page: usize },
    ZoomIn { ticks: u32 },
    ZoomOut { ticks: u32 },
    ZoomReset,
    Download,
    Close,
}
