use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use docsession_core::{
    DocumentEngine, DownloadInfo, Generation, LoadError, LoadParameters, LoadedDocument,
    LoadingTask, PasswordReason, TaskEvents,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::decode::{DecodeError, Decoded, Decoder};
use crate::fetch::fetch;

type Outcome = Result<Arc<dyn LoadedDocument>, LoadError>;

/// Fetches the whole resource, then decodes it with `D`.
pub struct Engine<D> {
    decoder: Arc<D>,
}

impl<D: Decoder> Engine<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder: Arc::new(decoder),
        }
    }
}

impl<D: Decoder> DocumentEngine for Engine<D> {
    fn create_loading_task(
        &self,
        parameters: LoadParameters,
        events: TaskEvents,
    ) -> Arc<dyn LoadingTask> {
        Arc::new(EngineTask::spawn(
            Arc::clone(&self.decoder),
            parameters,
            events,
        ))
    }
}

struct EngineTask {
    generation: Generation,
    outcome: Mutex<Option<oneshot::Receiver<Outcome>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EngineTask {
    fn spawn<D: Decoder>(decoder: Arc<D>, parameters: LoadParameters, events: TaskEvents) -> Self {
        let generation = events.generation();
        let (tx, rx) = oneshot::channel();
        let worker = tokio::spawn(async move {
            let outcome = run(decoder, parameters, &events).await;
            let _ = tx.send(outcome);
        });
        Self {
            generation,
            outcome: Mutex::new(Some(rx)),
            worker: Mutex::new(Some(worker)),
        }
    }
}

#[async_trait]
impl LoadingTask for EngineTask {
    async fn document(&self) -> Outcome {
        let receiver = self.outcome.lock().take();
        match receiver {
            Some(receiver) => receiver.await.unwrap_or(Err(LoadError::Cancelled)),
            None => Err(LoadError::Cancelled),
        }
    }

    async fn destroy(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.abort();
            let _ = worker.await;
            debug!(generation = self.generation, "loading task destroyed");
        }
    }
}

#[instrument(skip_all, fields(generation = events.generation()))]
async fn run<D: Decoder>(
    decoder: Arc<D>,
    parameters: LoadParameters,
    events: &TaskEvents,
) -> Outcome {
    let fetched = fetch(&parameters, events).await?;
    if fetched.data.is_empty() {
        return Err(LoadError::InvalidPdf("the PDF file is empty".to_owned()));
    }

    let decoded = decode_with_password(decoder, &fetched.data, parameters.password(), events).await?;
    info!(pages = decoded.pages, length = fetched.data.len(), "document decoded");
    for feature in &decoded.unsupported_features {
        events.unsupported_feature(feature);
    }

    Ok(Arc::new(EngineDocument {
        data: fetched.data,
        pages: decoded.pages,
        title: decoded.title,
        content_disposition_filename: fetched.content_disposition_filename,
    }))
}

/// Retries until the decoder accepts a password or the prompt is dismissed.
async fn decode_with_password<D: Decoder>(
    decoder: Arc<D>,
    data: &Bytes,
    initial: Option<&str>,
    events: &TaskEvents,
) -> Result<Decoded, LoadError> {
    let mut password = initial.map(str::to_owned);
    loop {
        let attempt = {
            let decoder = Arc::clone(&decoder);
            let data = data.clone();
            let password = password.clone();
            tokio::task::spawn_blocking(move || decoder.decode(&data, password.as_deref()))
                .await
                .map_err(|err| LoadError::Other(anyhow!("decoder failed: {err}")))?
        };

        match attempt {
            Ok(decoded) => return Ok(decoded),
            Err(DecodeError::Invalid(reason)) => return Err(LoadError::InvalidPdf(reason)),
            Err(DecodeError::PasswordRequired) => {
                let reason = if password.is_some() {
                    PasswordReason::IncorrectPassword
                } else {
                    PasswordReason::NeedPassword
                };
                debug!(?reason, "document needs a password");
                match events.password(reason).await {
                    Some(answer) => password = Some(answer),
                    None => return Err(LoadError::PasswordRequired),
                }
            }
        }
    }
}

struct EngineDocument {
    data: Bytes,
    pages: usize,
    title: Option<String>,
    content_disposition_filename: Option<String>,
}

#[async_trait]
impl LoadedDocument for EngineDocument {
    fn num_pages(&self) -> usize {
        self.pages
    }

    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn content_disposition_filename(&self) -> Option<String> {
        self.content_disposition_filename.clone()
    }

    async fn download_info(&self) -> anyhow::Result<DownloadInfo> {
        Ok(DownloadInfo {
            length: self.data.len() as u64,
        })
    }

    async fn data(&self) -> anyhow::Result<Bytes> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use docsession_core::{LoadOptions, LoadSource};
    use url::Url;

    use crate::decode::tests::{ENCRYPTED, TWO_PAGES};
    use crate::ScanningEngine;

    fn data_parameters(data: &'static [u8]) -> LoadParameters {
        LoadParameters {
            source: LoadSource::Data(Bytes::from_static(data)),
            options: LoadOptions::new(),
        }
    }

    #[tokio::test]
    async fn decodes_in_memory_documents() {
        let engine = ScanningEngine::default();
        let task = engine.create_loading_task(data_parameters(TWO_PAGES), TaskEvents::detached(1));
        let document = task.document().await.unwrap();

        assert_eq!(document.num_pages(), 2);
        assert_eq!(document.title().as_deref(), Some("Quarterly (Q3) Report"));
        assert_eq!(document.download_info().await.unwrap().length, TWO_PAGES.len() as u64);
        assert_eq!(&document.data().await.unwrap()[..], TWO_PAGES);

        assert!(matches!(task.document().await, Err(LoadError::Cancelled)));
    }

    #[tokio::test]
    async fn reads_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, TWO_PAGES).unwrap();
        let parameters = LoadParameters {
            source: LoadSource::Url(Url::from_file_path(&path).unwrap().to_string()),
            options: LoadOptions::new(),
        };

        let task = ScanningEngine::default().create_loading_task(parameters, TaskEvents::detached(1));
        assert_eq!(task.document().await.unwrap().num_pages(), 2);
    }

    #[tokio::test]
    async fn empty_and_corrupt_data_are_invalid() {
        let engine = ScanningEngine::default();
        let empty = engine.create_loading_task(data_parameters(b""), TaskEvents::detached(1));
        assert!(matches!(empty.document().await, Err(LoadError::InvalidPdf(_))));

        let corrupt = engine.create_loading_task(data_parameters(b"GIF89a"), TaskEvents::detached(2));
        assert!(matches!(corrupt.document().await, Err(LoadError::InvalidPdf(_))));
    }

    #[tokio::test]
    async fn dismissed_password_prompt_fails_the_load() {
        let engine = ScanningEngine::default();
        let task = engine.create_loading_task(data_parameters(ENCRYPTED), TaskEvents::detached(1));
        assert!(matches!(task.document().await, Err(LoadError::PasswordRequired)));
    }

    #[tokio::test]
    async fn password_option_unlocks_encrypted_documents() {
        let mut parameters = data_parameters(ENCRYPTED);
        parameters
            .options
            .insert("password".to_owned(), serde_json::Value::from("pw"));
        let task = ScanningEngine::default().create_loading_task(parameters, TaskEvents::detached(1));
        assert_eq!(task.document().await.unwrap().num_pages(), 1);
    }

    #[tokio::test]
    async fn destroyed_task_settles_as_cancelled() {
        let engine = ScanningEngine::default();
        let task = engine.create_loading_task(data_parameters(TWO_PAGES), TaskEvents::detached(1));
        task.destroy().await;
        task.destroy().await;
        assert!(matches!(task.document().await, Err(LoadError::Cancelled)));
    }
}
