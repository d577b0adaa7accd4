//! Document engines for the session controller: fetch the resource, decode it,
//! and hand back a [`docsession_core::LoadedDocument`].

use std::sync::Arc;

use docsession_core::DocumentEngine;
#[cfg(feature = "pdf")]
use tracing::warn;

mod decode;
mod download;
mod fetch;
#[cfg(feature = "pdf")]
mod pdfium;
mod task;

pub use decode::{unsupported_features, DecodeError, Decoded, Decoder, ScanDecoder};
pub use download::DirectoryDownloadManager;
pub use fetch::{fetch, Fetched};
#[cfg(feature = "pdf")]
pub use pdfium::PdfiumDecoder;
pub use task::Engine;

pub type ScanningEngine = Engine<ScanDecoder>;

#[cfg(feature = "pdf")]
pub type PdfiumEngine = Engine<PdfiumDecoder>;

impl<D: Decoder + Default> Default for Engine<D> {
    fn default() -> Self {
        Self::new(D::default())
    }
}

/// Pdfium when it can be bound, the byte scanner otherwise.
pub fn default_engine() -> Arc<dyn DocumentEngine> {
    pdfium_engine().unwrap_or_else(|| Arc::new(ScanningEngine::default()))
}

#[cfg(feature = "pdf")]
fn pdfium_engine() -> Option<Arc<dyn DocumentEngine>> {
    match PdfiumDecoder::new() {
        Ok(decoder) => Some(Arc::new(Engine::new(decoder))),
        Err(err) => {
            warn!(error = %err, "pdfium unavailable, falling back to the scanning decoder");
            None
        }
    }
}

#[cfg(not(feature = "pdf"))]
fn pdfium_engine() -> Option<Arc<dyn DocumentEngine>> {
    None
}
