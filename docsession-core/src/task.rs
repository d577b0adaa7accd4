//! Contract between the session controller and a document engine.
//!
//! The engine creates one [`LoadingTask`] per `open`. The task is handed a
//! [`TaskEvents`] at construction and reports password requests, progress and
//! unsupported features through it until its document settles.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{LoadError, LoadParameters, TaskEvents};

/// Identity of a loading task. Assigned by the controller, strictly increasing.
pub type Generation = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub loaded: u64,
    pub total: Option<u64>,
}

impl ProgressSample {
    pub fn new(loaded: u64, total: Option<u64>) -> Self {
        Self { loaded, total }
    }

    pub fn percent(&self) -> Percent {
        match self.total {
            Some(total) if total > 0 => {
                let ratio = self.loaded as f64 / total as f64;
                Percent::Determinate(((ratio * 100.0).round() as u32).min(100))
            }
            _ => Percent::Indeterminate,
        }
    }
}

/// Progress as shown to the user. `Indeterminate` is used when the total size is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Percent {
    Indeterminate,
    Determinate(u32),
}

impl Percent {
    pub fn value(&self) -> Option<u32> {
        match self {
            Percent::Indeterminate => None,
            Percent::Determinate(value) => Some(*value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordReason {
    NeedPassword,
    IncorrectPassword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadInfo {
    pub length: u64,
}

/// A successfully decoded document.
#[async_trait]
pub trait LoadedDocument: Send + Sync {
    fn num_pages(&self) -> usize;

    fn title(&self) -> Option<String> {
        None
    }

    fn content_disposition_filename(&self) -> Option<String> {
        None
    }

    /// Resolves once the whole resource has been fetched.
    async fn download_info(&self) -> anyhow::Result<DownloadInfo>;

    /// Raw bytes of the document.
    async fn data(&self) -> anyhow::Result<Bytes>;
}

/// One in-flight fetch/decode attempt.
#[async_trait]
pub trait LoadingTask: Send + Sync {
    /// Settles once. The controller awaits this exactly once per task.
    async fn document(&self) -> Result<Arc<dyn LoadedDocument>, LoadError>;

    /// Requests cancellation. Safe to call and await more than once.
    async fn destroy(&self);
}

pub trait DocumentEngine: Send + Sync {
    fn create_loading_task(
        &self,
        parameters: LoadParameters,
        events: TaskEvents,
    ) -> Arc<dyn LoadingTask>;
}
