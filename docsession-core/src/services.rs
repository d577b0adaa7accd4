//! Collaborators the controller drives. Each one is a narrow trait so that
//! frontends can supply their own view, panels and prompts.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::{LoadedDocument, PasswordReason, Percent};

pub const DEFAULT_SCALE_VALUE: ScaleValue = ScaleValue::Auto;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleValue {
    Auto,
    PageFit,
    PageWidth,
    Scale(f64),
}

pub trait DocumentView: Send + Sync {
    fn set_document(&self, document: Option<Arc<dyn LoadedDocument>>);
    fn current_page_number(&self) -> usize;
    fn set_current_page_number(&self, page: usize);
    fn current_scale(&self) -> f64;
    fn set_current_scale_value(&self, value: ScaleValue);
    fn is_in_presentation_mode(&self) -> bool {
        false
    }
}

pub trait LinkService: Send + Sync {
    fn set_document(&self, document: Option<Arc<dyn LoadedDocument>>, base_url: Option<String>);
    fn set_external_links_enabled(&self, enabled: bool);
}

#[async_trait]
pub trait DownloadManager: Send + Sync {
    async fn download(&self, data: Bytes, url: &str, filename: &str) -> Result<()>;
    async fn download_url(&self, url: &str, filename: &str) -> Result<()>;
}

pub trait Localizer: Send + Sync {
    fn get(&self, key: &str, fallback: &str) -> String;
}

/// Technical detail attached to a user-visible error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub message: String,
}

pub trait ErrorPresenter: Send + Sync {
    fn show(&self, message: &str, detail: Option<&ErrorDetail>);
    fn hide(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackRequest {
    pub feature_id: String,
    pub url: String,
}

#[async_trait]
pub trait ExternalServices: Send + Sync {
    /// Tells the user a feature is unsupported. Returns true if they asked to download instead.
    async fn fallback(&self, request: FallbackRequest) -> bool;
}

#[async_trait]
pub trait PasswordPrompt: Send + Sync {
    async fn request(&self, reason: PasswordReason) -> Option<String>;
}

pub trait ProgressIndicator: Send + Sync {
    fn set_percent(&self, percent: Percent);
    fn show(&self);
    fn hide(&self);
}

pub trait TitleSink: Send + Sync {
    fn set_title(&self, title: &str);
}

pub trait Panel: Send + Sync {
    fn reset(&self);
}

pub trait SecondaryToolbar: Panel {
    fn set_pages_count(&self, count: usize);
}

#[derive(Clone)]
pub struct Panels {
    pub sidebar: Arc<dyn Panel>,
    pub outline: Arc<dyn Panel>,
    pub attachments: Arc<dyn Panel>,
    pub history: Option<Arc<dyn Panel>>,
    pub find_bar: Option<Arc<dyn Panel>>,
    pub secondary_toolbar: Arc<dyn SecondaryToolbar>,
}

impl Panels {
    /// Panels that ignore every call.
    pub fn noop() -> Self {
        let panel = Arc::new(NoopPanel);
        Self {
            sidebar: panel.clone(),
            outline: panel.clone(),
            attachments: panel.clone(),
            history: None,
            find_bar: None,
            secondary_toolbar: panel,
        }
    }

    pub fn reset_all(&self) {
        self.sidebar.reset();
        self.outline.reset();
        self.attachments.reset();
        if let Some(history) = &self.history {
            history.reset();
        }
        if let Some(find_bar) = &self.find_bar {
            find_bar.reset();
        }
        self.secondary_toolbar.reset();
    }
}

/// Everything the controller talks to, injected at construction.
#[derive(Clone)]
pub struct Services {
    pub view: Arc<dyn DocumentView>,
    pub links: Arc<dyn LinkService>,
    pub downloads: Arc<dyn DownloadManager>,
    pub l10n: Arc<dyn Localizer>,
    pub errors: Arc<dyn ErrorPresenter>,
    pub external: Arc<dyn ExternalServices>,
    pub password: Arc<dyn PasswordPrompt>,
    pub progress: Arc<dyn ProgressIndicator>,
    pub title: Arc<dyn TitleSink>,
    pub panels: Panels,
}

/// Message lookup backed by a plain map. Missing keys fall back to the English text.
#[derive(Debug, Clone, Default)]
pub struct MessageCatalog {
    messages: HashMap<String, String>,
}

impl MessageCatalog {
    pub fn new(messages: HashMap<String, String>) -> Self {
        Self { messages }
    }
}

impl Localizer for MessageCatalog {
    fn get(&self, key: &str, fallback: &str) -> String {
        self.messages
            .get(key)
            .cloned()
            .unwrap_or_else(|| fallback.to_owned())
    }
}

/// A panel with nothing to reset.
pub struct NoopPanel;

impl Panel for NoopPanel {
    fn reset(&self) {}
}

impl SecondaryToolbar for NoopPanel {
    fn set_pages_count(&self, _count: usize) {}
}
