use anyhow::{anyhow, Result};
use pdfium_render::prelude::*;
use tracing::warn;

use crate::decode::{unsupported_features, DecodeError, Decoded, Decoder};

/// Decoder backed by the Pdfium library.
pub struct PdfiumDecoder {
    pdfium: Pdfium,
}

impl PdfiumDecoder {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_build_hint() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self { pdfium })
    }
}

impl Decoder for PdfiumDecoder {
    fn decode(&self, data: &[u8], password: Option<&str>) -> Result<Decoded, DecodeError> {
        let document = self
            .pdfium
            .load_pdf_from_byte_slice(data, password)
            .map_err(|err| match err {
                PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
                    DecodeError::PasswordRequired
                }
                other => DecodeError::Invalid(format!("{other:?}")),
            })?;

        let pages = usize::try_from(document.pages().len()).unwrap_or_default();
        let title = document
            .metadata()
            .get(PdfDocumentMetadataTagType::Title)
            .map(|tag| tag.value().trim().to_owned())
            .filter(|title| !title.is_empty());

        Ok(Decoded {
            pages,
            title,
            unsupported_features: unsupported_features(data),
        })
    }
}

fn bind_pdfium_from_build_hint() -> Option<Pdfium> {
    match option_env!("DOCSESSION_PDFIUM_LIBRARY_PATH") {
        Some(path) if !path.is_empty() => match Pdfium::bind_to_library(path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!(path, ?err, "failed to load Pdfium from build-provided path");
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {err:?}", cwd_path.display())),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err:?}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}
