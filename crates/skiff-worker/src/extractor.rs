use crate::queue::{ExtractionHandler, ExtractionJob};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use skiff_db::FileRepository;
use skiff_storage::StorageFactory;
use std::sync::Arc;

/// Result of a text extraction run.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub text: String,
    pub confidence: f64,
}

/// Black-box text extraction collaborator. Real OCR engines plug in behind
/// this trait; the built-in implementation only reads embedded text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, data: Vec<u8>, content_type: &str) -> Result<ExtractionOutcome>;
}

/// Content types the extraction queue is fed with after upload.
pub fn is_extraction_eligible(content_type: &str) -> bool {
    content_type == "application/pdf" || content_type.starts_with("text/")
}

/// Embedded-text extractor for PDFs and plain text.
///
/// PDF parsing runs on the blocking pool. Confidence is 1.0 when embedded
/// text was found and 0.0 otherwise; scanned documents without a text layer
/// need an external OCR collaborator.
pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, data: Vec<u8>, content_type: &str) -> Result<ExtractionOutcome> {
        if content_type.starts_with("text/") {
            let text = String::from_utf8_lossy(&data).into_owned();
            let confidence = if text.trim().is_empty() { 0.0 } else { 1.0 };
            return Ok(ExtractionOutcome { text, confidence });
        }

        let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data))
            .await
            .context("extraction task panicked")?
            .context("failed to parse PDF")?;

        let confidence = if text.trim().is_empty() { 0.0 } else { 1.0 };
        Ok(ExtractionOutcome { text, confidence })
    }
}

/// Production job handler: fetches the object, runs the extractor, and
/// backfills the file record.
///
/// Failures are terminal for the file: it is marked extracted with an empty
/// result so it is not retried indefinitely, and the error is reported to
/// the queue for logging only.
pub struct StorageExtractionHandler {
    storage: Arc<StorageFactory>,
    files: FileRepository,
    extractor: Arc<dyn TextExtractor>,
}

impl StorageExtractionHandler {
    pub fn new(
        storage: Arc<StorageFactory>,
        files: FileRepository,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            storage,
            files,
            extractor,
        }
    }

    async fn fetch_bytes(&self, storage_key: &str) -> Result<Vec<u8>> {
        let backend = self
            .storage
            .get_active()
            .await
            .context("no active storage backend")?;

        let mut stream = backend
            .open_stream(storage_key, None)
            .await
            .with_context(|| format!("failed to open {}", storage_key))?;

        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk.context("failed to read object")?);
        }
        Ok(data)
    }
}

#[async_trait]
impl ExtractionHandler for StorageExtractionHandler {
    async fn handle(&self, job: &ExtractionJob) -> Result<()> {
        let result = async {
            let data = self.fetch_bytes(&job.storage_key).await?;
            self.extractor.extract(data, &job.content_type).await
        }
        .await;

        match result {
            Ok(outcome) => {
                let chars = outcome.text.chars().count();
                self.files
                    .mark_extracted(job.file_id, Some(outcome.text), Some(outcome.confidence))
                    .await
                    .context("failed to store extraction result")?;
                tracing::info!(
                    file_id = %job.file_id,
                    chars = chars,
                    "Text extraction stored"
                );
                Ok(())
            }
            Err(e) => {
                // Mark processed with an empty result so the file is not
                // picked up again.
                self.files
                    .mark_extracted(job.file_id, None, None)
                    .await
                    .context("failed to store empty extraction result")?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_covers_pdf_and_text() {
        assert!(is_extraction_eligible("application/pdf"));
        assert!(is_extraction_eligible("text/plain"));
        assert!(is_extraction_eligible("text/csv"));
        assert!(!is_extraction_eligible("image/png"));
        assert!(!is_extraction_eligible("video/mp4"));
    }

    #[tokio::test]
    async fn plain_text_extraction_passes_through() {
        let extractor = PdfTextExtractor;
        let outcome = extractor
            .extract(b"hello extraction".to_vec(), "text/plain")
            .await
            .unwrap();
        assert_eq!(outcome.text, "hello extraction");
        assert_eq!(outcome.confidence, 1.0);
    }

    #[tokio::test]
    async fn empty_text_has_zero_confidence() {
        let extractor = PdfTextExtractor;
        let outcome = extractor
            .extract(b"   \n".to_vec(), "text/plain")
            .await
            .unwrap();
        assert_eq!(outcome.confidence, 0.0);
    }

    #[tokio::test]
    async fn malformed_pdf_is_an_error() {
        let extractor = PdfTextExtractor;
        let result = extractor
            .extract(b"not a pdf at all".to_vec(), "application/pdf")
            .await;
        assert!(result.is_err());
    }
}
