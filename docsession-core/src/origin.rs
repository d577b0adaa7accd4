use std::sync::Arc;

use url::Url;

use crate::{OriginError, ViewerOptions};

/// Pre-flight check run by [`crate::SessionController::open_url`] before any loading task exists.
pub trait OriginValidator: Send + Sync {
    fn validate(&self, file: &str) -> Result<(), OriginError>;
}

/// Origin policy for the configured viewer URL; anything goes when none is set.
pub fn validator_for(options: &ViewerOptions) -> Result<Arc<dyn OriginValidator>, OriginError> {
    match &options.viewer_url {
        Some(viewer_url) => Ok(Arc::new(HostedOriginPolicy::new(
            viewer_url,
            options.hosted_viewer_origins.clone(),
        )?)),
        None => Ok(Arc::new(AllowAllOrigins)),
    }
}

/// Accepts everything.
pub struct AllowAllOrigins;

impl OriginValidator for AllowAllOrigins {
    fn validate(&self, _file: &str) -> Result<(), OriginError> {
        Ok(())
    }
}

/// Same-origin policy relative to the viewer's own URL.
///
/// Viewers served from one of the hosted origins accept any file. Otherwise the
/// file (resolved against the viewer URL) must share the viewer's origin; `blob:`
/// URLs are always accepted.
pub struct HostedOriginPolicy {
    viewer_url: Url,
    hosted_origins: Vec<String>,
}

impl HostedOriginPolicy {
    pub fn new(viewer_url: &str, hosted_origins: Vec<String>) -> Result<Self, OriginError> {
        let viewer_url = Url::parse(viewer_url).map_err(|err| OriginError::InvalidUrl {
            url: viewer_url.to_owned(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            viewer_url,
            hosted_origins,
        })
    }

    fn viewer_origin(&self) -> String {
        self.viewer_url.origin().ascii_serialization()
    }
}

impl OriginValidator for HostedOriginPolicy {
    fn validate(&self, file: &str) -> Result<(), OriginError> {
        let viewer_origin = self.viewer_origin();
        if self.hosted_origins.iter().any(|origin| *origin == viewer_origin) {
            return Ok(());
        }

        let resolved = self
            .viewer_url
            .join(file)
            .map_err(|err| OriginError::InvalidUrl {
                url: file.to_owned(),
                reason: err.to_string(),
            })?;
        if resolved.scheme() == "blob" {
            return Ok(());
        }

        let origin = resolved.origin().ascii_serialization();
        if origin != viewer_origin {
            return Err(OriginError::Mismatch {
                origin,
                viewer_origin,
            });
        }
        Ok(())
    }
}
