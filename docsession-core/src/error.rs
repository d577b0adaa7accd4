use thiserror::Error;

/// Failure of a loading task, as reported by the document engine.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid or corrupted PDF file: {0}")]
    InvalidPdf(String),
    #[error("missing PDF file: {0}")]
    Missing(String),
    #[error("unexpected server response ({status}) while retrieving PDF {url}")]
    UnexpectedResponse { status: u16, url: String },
    #[error("no password given for an encrypted document")]
    PasswordRequired,
    #[error("loading task was destroyed before completion")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LoadError {
    /// Localization key and English fallback for the user-visible message.
    pub fn message_key(&self) -> (&'static str, &'static str) {
        match self {
            LoadError::InvalidPdf(_) => ("invalid_file_error", "Invalid or corrupted PDF file."),
            LoadError::Missing(_) => ("missing_file_error", "Missing PDF file."),
            LoadError::UnexpectedResponse { .. } => {
                ("unexpected_response_error", "Unexpected server response.")
            }
            LoadError::PasswordRequired => (
                "password_error",
                "A password is required to open this PDF file.",
            ),
            LoadError::Cancelled | LoadError::Other(_) => {
                ("loading_error", "An error occurred while loading the PDF.")
            }
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OriginError {
    #[error("file origin does not match viewer's")]
    Mismatch { origin: String, viewer_origin: String },
    #[error("invalid file URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Origin(#[from] OriginError),
    #[error(transparent)]
    Load(#[from] LoadError),
}

impl SessionError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SessionError::Origin(_) => "origin_rejected",
            SessionError::Load(LoadError::Cancelled) => "load_cancelled",
            SessionError::Load(_) => "load_failed",
        }
    }
}
