use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde_json::Value;

use crate::ViewerOptions;

/// Free-form options supplied by the caller of `open`. They win over configured options.
pub type LoadOptions = BTreeMap<String, Value>;

/// What the caller asks to open.
#[derive(Clone, PartialEq, Eq)]
pub enum Resource {
    Url(String),
    Data(Bytes),
    /// `url` is fetched; `original_url` is what the user asked for and names the document.
    Redirected { url: String, original_url: String },
}

impl Resource {
    /// URL the session title and base URL are derived from.
    pub fn title_url(&self) -> Option<&str> {
        match self {
            Resource::Url(url) => Some(url),
            Resource::Data(_) => None,
            Resource::Redirected { original_url, .. } => Some(original_url),
        }
    }

    fn into_source(self) -> LoadSource {
        match self {
            Resource::Url(url) | Resource::Redirected { url, .. } => LoadSource::Url(url),
            Resource::Data(data) => LoadSource::Data(data),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Url(url) => f.write_str(url),
            Resource::Data(data) => write!(f, "<{} bytes>", data.len()),
            Resource::Redirected { url, original_url } => write!(f, "{original_url} (via {url})"),
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum LoadSource {
    Url(String),
    Data(Bytes),
}

impl fmt::Debug for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            LoadSource::Data(data) => write!(f, "Data(<{} bytes>)", data.len()),
        }
    }
}

/// Parameters handed to the document engine for one loading task.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadParameters {
    pub source: LoadSource,
    pub options: BTreeMap<String, Value>,
}

impl LoadParameters {
    /// Resource fields first, then configured API options, then caller extras.
    /// An extra `url` string replaces the resource's source.
    pub fn build(
        resource: Resource,
        options: &ViewerOptions,
        base_url: &str,
        extra: LoadOptions,
    ) -> Self {
        let mut source = resource.into_source();
        let mut merged = options.api_parameters(base_url);
        for (key, value) in extra {
            if key == "url" {
                if let Value::String(url) = &value {
                    source = LoadSource::Url(url.clone());
                    continue;
                }
            }
            merged.insert(key, value);
        }
        Self {
            source,
            options: merged,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.source {
            LoadSource::Url(url) => Some(url),
            LoadSource::Data(_) => None,
        }
    }

    pub fn disable_auto_fetch(&self) -> bool {
        self.flag("disable_auto_fetch")
    }

    pub fn password(&self) -> Option<&str> {
        self.options.get("password").and_then(Value::as_str)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.options
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
