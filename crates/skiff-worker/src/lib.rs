//! Skiff background worker library
//!
//! A concurrency-bounded, best-effort background queue used for post-upload
//! text extraction. Jobs are fire-and-forget: failures are logged and
//! recorded, never propagated back to the upload path.

pub mod extractor;
pub mod queue;

pub use extractor::{
    is_extraction_eligible, ExtractionOutcome, PdfTextExtractor, StorageExtractionHandler,
    TextExtractor,
};
pub use queue::{ExtractionHandler, ExtractionJob, ExtractionQueue};
