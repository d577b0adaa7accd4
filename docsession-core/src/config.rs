use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DurationMilliSeconds};

pub const DEFAULT_PROGRESS_HIDE_TIMEOUT: Duration = Duration::from_millis(5000);

fn default_hosted_viewer_origins() -> Vec<String> {
    vec![
        "null".to_owned(),
        "http://mozilla.github.io".to_owned(),
        "https://mozilla.github.io".to_owned(),
    ]
}

/// Viewer-wide options, read from `config.toml`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerOptions {
    /// Fetch only the ranges needed for display instead of the whole file.
    pub disable_auto_fetch: bool,
    pub disable_range: bool,
    pub disable_stream: bool,
    pub doc_base_url: Option<String>,
    pub default_url: Option<String>,
    /// Embedded viewers never touch the window title.
    pub is_embedded: bool,
    /// Hand the document's base URL to the link service.
    pub link_base_url: bool,
    /// Where the viewer itself is served from; enables origin checks when set.
    pub viewer_url: Option<String>,
    pub hosted_viewer_origins: Vec<String>,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub progress_hide_timeout: Duration,
    /// Extra engine options passed through verbatim.
    pub api: BTreeMap<String, Value>,
    /// Localized message overrides keyed by message id.
    pub messages: HashMap<String, String>,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            disable_auto_fetch: false,
            disable_range: false,
            disable_stream: false,
            doc_base_url: None,
            default_url: None,
            is_embedded: false,
            link_base_url: false,
            viewer_url: None,
            hosted_viewer_origins: default_hosted_viewer_origins(),
            progress_hide_timeout: DEFAULT_PROGRESS_HIDE_TIMEOUT,
            api: BTreeMap::new(),
            messages: HashMap::new(),
        }
    }
}

impl ViewerOptions {
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).context("failed to parse viewer options")
    }

    /// Loads options from `path`, or defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml(&source).with_context(|| format!("invalid config file {:?}", path))
    }

    /// Engine-level options merged into every load. `base_url` stands in for an
    /// unset `doc_base_url`.
    pub fn api_parameters(&self, base_url: &str) -> BTreeMap<String, Value> {
        let mut parameters = self.api.clone();
        parameters.insert(
            "disable_auto_fetch".to_owned(),
            Value::Bool(self.disable_auto_fetch),
        );
        parameters.insert("disable_range".to_owned(), Value::Bool(self.disable_range));
        parameters.insert("disable_stream".to_owned(), Value::Bool(self.disable_stream));

        let doc_base_url = self
            .doc_base_url
            .clone()
            .filter(|url| !url.is_empty())
            .or_else(|| (!base_url.is_empty()).then(|| base_url.to_owned()));
        if let Some(url) = doc_base_url {
            parameters.insert("doc_base_url".to_owned(), Value::String(url));
        }
        parameters
    }
}
