use std::io::{self, Read};
use std::path::Path;
use std::time::Duration;

use anyhow::anyhow;
use bytes::{Bytes, BytesMut};
use docsession_core::filename::filename_from_content_disposition;
use docsession_core::{LoadError, LoadParameters, LoadSource, ProgressSample, TaskEvents};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, instrument};
use url::Url;

const READ_CHUNK: usize = 64 * 1024;
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Raw document bytes plus what the transport said about them.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub data: Bytes,
    pub content_disposition_filename: Option<String>,
}

impl Fetched {
    fn bytes(data: Bytes) -> Self {
        Self {
            data,
            content_disposition_filename: None,
        }
    }
}

/// Retrieves the whole document described by `parameters`, reporting progress
/// through `events` as data arrives.
#[instrument(skip_all, fields(source = ?parameters.source))]
pub async fn fetch(parameters: &LoadParameters, events: &TaskEvents) -> Result<Fetched, LoadError> {
    let location = match &parameters.source {
        LoadSource::Data(data) => {
            let length = data.len() as u64;
            events.progress(ProgressSample::new(length, Some(length)));
            return Ok(Fetched::bytes(data.clone()));
        }
        LoadSource::Url(location) => location,
    };

    match Url::parse(location) {
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|()| LoadError::Missing(location.clone()))?;
            read_local(&path, events).await
        }
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            fetch_http(url, http_headers(parameters), events).await
        }
        Ok(url) => Err(LoadError::Other(anyhow!(
            "unsupported URL scheme {:?} for {location}",
            url.scheme()
        ))),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            read_local(Path::new(location), events).await
        }
        Err(err) => Err(LoadError::Other(anyhow!(
            "invalid document URL {location:?}: {err}"
        ))),
    }
}

async fn read_local(path: &Path, events: &TaskEvents) -> Result<Fetched, LoadError> {
    let data = tokio::fs::read(path).await.map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => LoadError::Missing(path.display().to_string()),
        _ => LoadError::Other(
            anyhow::Error::new(err).context(format!("failed to read {}", path.display())),
        ),
    })?;
    let length = data.len() as u64;
    debug!(path = %path.display(), length, "read local document");
    events.progress(ProgressSample::new(length, Some(length)));
    Ok(Fetched::bytes(Bytes::from(data)))
}

async fn fetch_http(
    url: Url,
    headers: Vec<(String, String)>,
    events: &TaskEvents,
) -> Result<Fetched, LoadError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = tokio::task::spawn_blocking(move || {
        get_blocking(&url, &headers, &mut |sample| tx.send(sample).is_ok())
    });
    while let Some(sample) = rx.recv().await {
        events.progress(sample);
    }
    worker
        .await
        .map_err(|err| LoadError::Other(anyhow!("fetch worker failed: {err}")))?
}

/// Blocking GET. `progress` returns false to abandon the transfer.
pub(crate) fn get_blocking(
    url: &Url,
    headers: &[(String, String)],
    progress: &mut dyn FnMut(ProgressSample) -> bool,
) -> Result<Fetched, LoadError> {
    let agent = ureq::AgentBuilder::new().timeout_read(HTTP_TIMEOUT).build();
    let mut request = agent.get(url.as_str());
    for (name, value) in headers {
        request = request.set(name, value);
    }

    let response = match request.call() {
        Ok(response) => response,
        Err(ureq::Error::Status(404, _)) => return Err(LoadError::Missing(url.to_string())),
        Err(ureq::Error::Status(status, _)) => {
            return Err(LoadError::UnexpectedResponse {
                status,
                url: url.to_string(),
            })
        }
        Err(err) => return Err(LoadError::Other(anyhow!("GET {url} failed: {err}"))),
    };

    let total = response
        .header("Content-Length")
        .and_then(|value| value.trim().parse::<u64>().ok());
    let content_disposition_filename = response
        .header("Content-Disposition")
        .and_then(filename_from_content_disposition);

    let mut reader = response.into_reader();
    let mut data = BytesMut::new();
    let mut chunk = vec![0; READ_CHUNK];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(LoadError::Other(anyhow!("reading {url} failed: {err}"))),
        };
        data.extend_from_slice(&chunk[..read]);
        if !progress(ProgressSample::new(data.len() as u64, total)) {
            return Err(LoadError::Cancelled);
        }
    }

    Ok(Fetched {
        data: data.freeze(),
        content_disposition_filename,
    })
}

/// Extra request headers from the `http_headers` load option.
fn http_headers(parameters: &LoadParameters) -> Vec<(String, String)> {
    let Some(Value::Object(headers)) = parameters.options.get("http_headers") else {
        return Vec::new();
    };
    headers
        .iter()
        .filter_map(|(name, value)| value.as_str().map(|value| (name.clone(), value.to_owned())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;
    use std::net::TcpListener;

    use docsession_core::LoadOptions;

    fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request);
                let _ = stream.write_all(response);
            }
        });
        format!("http://{addr}/download?id=7")
    }

    fn url_parameters(url: &str) -> LoadParameters {
        LoadParameters {
            source: LoadSource::Url(url.to_owned()),
            options: LoadOptions::new(),
        }
    }

    #[tokio::test]
    async fn http_body_and_content_disposition_are_returned() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\nContent-Disposition: attachment; filename=\"q3.pdf\"\r\nConnection: close\r\n\r\n%PDF-1.7",
        );
        let fetched = fetch(&url_parameters(&url), &TaskEvents::detached(1))
            .await
            .unwrap();
        assert_eq!(&fetched.data[..], b"%PDF-1.7");
        assert_eq!(fetched.content_disposition_filename.as_deref(), Some("q3.pdf"));
    }

    #[tokio::test]
    async fn not_found_is_a_missing_file() {
        let url = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let err = fetch(&url_parameters(&url), &TaskEvents::detached(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::Missing(_)), "{err:?}");
    }

    #[tokio::test]
    async fn server_errors_are_unexpected_responses() {
        let url = serve_once(
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let err = fetch(&url_parameters(&url), &TaskEvents::detached(1))
            .await
            .unwrap_err();
        assert!(
            matches!(err, LoadError::UnexpectedResponse { status: 503, .. }),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn local_paths_and_file_urls_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let by_path = fetch(
            &url_parameters(path.to_str().unwrap()),
            &TaskEvents::detached(1),
        )
        .await
        .unwrap();
        assert_eq!(&by_path.data[..], b"%PDF-1.4");

        let file_url = Url::from_file_path(&path).unwrap();
        let by_url = fetch(&url_parameters(file_url.as_str()), &TaskEvents::detached(1))
            .await
            .unwrap();
        assert_eq!(by_url.data, by_path.data);

        let err = fetch(
            &url_parameters(dir.path().join("gone.pdf").to_str().unwrap()),
            &TaskEvents::detached(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, LoadError::Missing(_)));
    }

    #[test]
    fn http_headers_option_is_read_as_string_pairs() {
        let mut parameters = url_parameters("https://x/a.pdf");
        parameters.options.insert(
            "http_headers".to_owned(),
            serde_json::json!({ "Authorization": "Bearer t", "X-Retries": 3 }),
        );
        assert_eq!(
            http_headers(&parameters),
            vec![("Authorization".to_owned(), "Bearer t".to_owned())]
        );
    }
}
