//! Client-side upload orchestration.
//!
//! Files under the threshold go up in a single direct request. Larger files
//! are split into fixed-size chunks and uploaded in bounded-concurrency
//! batches with per-part retry, aggregated progress reporting, and a
//! pause/resume control that stops scheduling new batches (in-flight part
//! requests still run to completion).

use crate::{api_prefix, ApiClient};
use anyhow::{Context, Result};
use bytes::Bytes;
use skiff_core::constants::{
    CHUNK_SIZE_BYTES, DIRECT_UPLOAD_THRESHOLD_BYTES, PART_UPLOAD_CONCURRENCY,
};
use skiff_core::models::{
    CompletePart, CompleteUploadRequest, ReceivePartResponse, StartUploadRequest,
    StartUploadResponse, UploadedFileResponse, Visibility,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Size of the body slices used for incremental progress reporting.
const PROGRESS_SLICE_BYTES: usize = 64 * 1024;

/// Aggregated upload progress across all in-flight parts.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    /// `bytes_uploaded / total_bytes` in 0.0..=1.0
    pub ratio: f64,
    /// Instantaneous estimate over the whole transfer so far.
    pub throughput_bytes_per_sec: f64,
}

pub type ProgressObserver = Arc<dyn Fn(Progress) + Send + Sync>;

/// Pauses scheduling of new upload batches. Parts already in flight finish;
/// this is not a hard cancel.
#[derive(Clone)]
pub struct PauseHandle {
    paused: Arc<AtomicBool>,
}

impl PauseHandle {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Tunables for the orchestrator. The server dictates the actual chunk size
/// at session start; `direct_threshold_bytes` decides when to chunk at all.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub direct_threshold_bytes: u64,
    pub concurrency: usize,
    pub max_part_retries: u32,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            direct_threshold_bytes: DIRECT_UPLOAD_THRESHOLD_BYTES,
            concurrency: PART_UPLOAD_CONCURRENCY,
            max_part_retries: 3,
        }
    }
}

/// Per-upload options mirrored into the file record.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub visibility: Visibility,
    pub password: Option<String>,
    pub random_url: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            visibility: Visibility::Private,
            password: None,
            random_url: false,
        }
    }
}

/// Chunk byte lengths for a file: every chunk is full-sized except the last
/// remainder. A 12 MiB file at 5 MiB chunks splits into 5 MiB, 5 MiB, 2 MiB.
pub fn part_sizes(total_size: u64, chunk_size: u64) -> Vec<u64> {
    assert!(chunk_size > 0, "chunk size must be non-zero");
    let mut sizes = Vec::new();
    let mut remaining = total_size;
    while remaining > 0 {
        let size = remaining.min(chunk_size);
        sizes.push(size);
        remaining -= size;
    }
    sizes
}

/// Byte offset of a 1-based part number.
pub fn part_offset(part_number: i32, chunk_size: u64) -> u64 {
    (part_number as u64 - 1) * chunk_size
}

/// Chunked upload driver.
pub struct ChunkedUploader {
    client: ApiClient,
    config: UploaderConfig,
    paused: Arc<AtomicBool>,
    observer: Option<ProgressObserver>,
}

impl ChunkedUploader {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            config: UploaderConfig::default(),
            paused: Arc::new(AtomicBool::new(false)),
            observer: None,
        }
    }

    pub fn with_config(mut self, config: UploaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a progress observer; called as bytes reach the wire.
    pub fn on_progress(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Control for pausing/resuming batch scheduling.
    pub fn pause_handle(&self) -> PauseHandle {
        PauseHandle {
            paused: self.paused.clone(),
        }
    }

    /// Upload a local file, choosing direct or chunked transfer by size.
    pub async fn upload_path(
        &self,
        path: &Path,
        options: UploadOptions,
    ) -> Result<UploadedFileResponse> {
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        let total_size = metadata.len();

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Path has no usable filename")?
            .to_string();

        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        if total_size <= self.config.direct_threshold_bytes {
            self.upload_direct(path, &filename, &content_type, total_size, &options)
                .await
        } else {
            self.upload_chunked(path, &filename, &content_type, total_size, &options)
                .await
        }
    }

    async fn upload_direct(
        &self,
        path: &Path,
        filename: &str,
        content_type: &str,
        total_size: u64,
        options: &UploadOptions,
    ) -> Result<UploadedFileResponse> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(data)
                    .file_name(filename.to_string())
                    .mime_str(content_type)
                    .context("Invalid content type")?,
            )
            .text("visibility", options.visibility.to_string())
            .text("random_url", options.random_url.to_string());
        if let Some(ref password) = options.password {
            form = form.text("password", password.clone());
        }

        let response: UploadedFileResponse = self
            .client
            .post_multipart(&format!("{}/files", api_prefix()), form)
            .await?;

        self.report(total_size, total_size, Instant::now());

        tracing::info!(
            file = %filename,
            size_bytes = total_size,
            "Direct upload finished"
        );

        Ok(response)
    }

    async fn upload_chunked(
        &self,
        path: &Path,
        filename: &str,
        content_type: &str,
        total_size: u64,
        options: &UploadOptions,
    ) -> Result<UploadedFileResponse> {
        let start_request = StartUploadRequest {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            total_size,
            visibility: options.visibility,
            password: options.password.clone(),
            random_url: options.random_url,
        };

        let session: StartUploadResponse = self
            .client
            .post_json(&format!("{}/uploads", api_prefix()), &start_request)
            .await
            .context("Failed to initiate upload session")?;

        let chunk_size = session.chunk_size;
        let sizes = part_sizes(total_size, chunk_size);
        anyhow::ensure!(
            sizes.len() == session.total_chunks as usize,
            "Server expects {} parts, local chunking produced {}",
            session.total_chunks,
            sizes.len()
        );

        tracing::info!(
            session_id = %session.session_id,
            total_chunks = session.total_chunks,
            chunk_size = chunk_size,
            "Starting chunked upload"
        );

        let uploaded = Arc::new(AtomicU64::new(0));
        let started_at = Instant::now();
        let part_numbers: Vec<i32> = (1..=session.total_chunks).collect();
        let mut completed: Vec<CompletePart> = Vec::with_capacity(part_numbers.len());

        for batch in part_numbers.chunks(self.config.concurrency.max(1)) {
            // Pause stops scheduling new batches only; parts already in
            // flight run to completion.
            self.wait_while_paused().await;

            let futures = batch.iter().map(|&part_number| {
                let size = sizes[part_number as usize - 1];
                let offset = part_offset(part_number, chunk_size);
                self.upload_one_part(
                    path,
                    session.session_id,
                    part_number,
                    offset,
                    size,
                    uploaded.clone(),
                    total_size,
                    started_at,
                )
            });

            let batch_results = futures::future::try_join_all(futures).await?;
            completed.extend(batch_results);
        }

        // Upload order may interleave; completion order must not.
        completed.sort_by_key(|p| p.part_number);

        let response: UploadedFileResponse = self
            .client
            .post_json(
                &format!("{}/uploads/{}/complete", api_prefix(), session.session_id),
                &CompleteUploadRequest { parts: completed },
            )
            .await
            .context("Failed to complete upload")?;

        tracing::info!(
            session_id = %session.session_id,
            size_bytes = total_size,
            duration_ms = started_at.elapsed().as_secs_f64() * 1000.0,
            "Chunked upload finished"
        );

        Ok(response)
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_one_part(
        &self,
        path: &Path,
        session_id: uuid::Uuid,
        part_number: i32,
        offset: u64,
        size: u64,
        uploaded: Arc<AtomicU64>,
        total_size: u64,
        started_at: Instant,
    ) -> Result<CompletePart> {
        let mut attempt = 0u32;
        loop {
            match self
                .try_upload_part(
                    path,
                    session_id,
                    part_number,
                    offset,
                    size,
                    &uploaded,
                    total_size,
                    started_at,
                )
                .await
            {
                Ok(part) => return Ok(part),
                Err(e) if attempt < self.config.max_part_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(250 * 2u64.pow(attempt.min(5)));
                    tracing::warn!(
                        part_number = part_number,
                        attempt = attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Part upload failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "Part {} failed after {} retries",
                        part_number, self.config.max_part_retries
                    )));
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn try_upload_part(
        &self,
        path: &Path,
        session_id: uuid::Uuid,
        part_number: i32,
        offset: u64,
        size: u64,
        uploaded: &Arc<AtomicU64>,
        total_size: u64,
        started_at: Instant,
    ) -> Result<CompletePart> {
        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        let mut data = vec![0u8; size as usize];
        file.read_exact(&mut data)
            .await
            .context("Short read while slicing chunk")?;
        let data = Bytes::from(data);

        // Body slices feed the progress observer as they are pulled onto the
        // wire; a failed attempt rolls its contribution back.
        let counted_this_attempt = Arc::new(AtomicU64::new(0));
        let slices: Vec<Bytes> = (0..data.len())
            .step_by(PROGRESS_SLICE_BYTES)
            .map(|start| data.slice(start..(start + PROGRESS_SLICE_BYTES).min(data.len())))
            .collect();

        let uploaded_for_stream = uploaded.clone();
        let counted_for_stream = counted_this_attempt.clone();
        let observer = self.observer.clone();
        let stream = futures::stream::iter(slices.into_iter().map(move |slice| {
            let len = slice.len() as u64;
            let so_far = uploaded_for_stream.fetch_add(len, Ordering::SeqCst) + len;
            counted_for_stream.fetch_add(len, Ordering::SeqCst);
            if let Some(ref observer) = observer {
                observer(make_progress(so_far, total_size, started_at));
            }
            Ok::<Bytes, std::io::Error>(slice)
        }));

        let result: Result<ReceivePartResponse> = self
            .client
            .put_body(
                &format!(
                    "{}/uploads/{}/parts/{}",
                    api_prefix(),
                    session_id,
                    part_number
                ),
                reqwest::Body::wrap_stream(stream),
            )
            .await;

        match result {
            Ok(response) => Ok(CompletePart {
                part_number: response.part_number,
                part_id: response.part_id,
            }),
            Err(e) => {
                // Keep the aggregate honest across retries.
                let counted = counted_this_attempt.load(Ordering::SeqCst);
                uploaded.fetch_sub(counted, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn wait_while_paused(&self) {
        while self.paused.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    fn report(&self, bytes_uploaded: u64, total_bytes: u64, started_at: Instant) {
        if let Some(ref observer) = self.observer {
            observer(make_progress(bytes_uploaded, total_bytes, started_at));
        }
    }
}

fn make_progress(bytes_uploaded: u64, total_bytes: u64, started_at: Instant) -> Progress {
    let elapsed = started_at.elapsed().as_secs_f64().max(f64::EPSILON);
    Progress {
        bytes_uploaded,
        total_bytes,
        ratio: if total_bytes > 0 {
            bytes_uploaded as f64 / total_bytes as f64
        } else {
            1.0
        },
        throughput_bytes_per_sec: bytes_uploaded as f64 / elapsed,
    }
}

/// Default chunk size used when sizing uploads without a live session.
pub fn default_chunk_size() -> u64 {
    CHUNK_SIZE_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn twelve_mib_splits_into_5_5_2() {
        let sizes = part_sizes(12 * MIB, 5 * MIB);
        assert_eq!(sizes, vec![5 * MIB, 5 * MIB, 2 * MIB]);
    }

    #[test]
    fn exact_multiple_has_no_remainder_part() {
        let sizes = part_sizes(10 * MIB, 5 * MIB);
        assert_eq!(sizes, vec![5 * MIB, 5 * MIB]);
    }

    #[test]
    fn small_file_is_a_single_part() {
        let sizes = part_sizes(100, 5 * MIB);
        assert_eq!(sizes, vec![100]);
    }

    #[test]
    fn offsets_follow_part_numbers() {
        assert_eq!(part_offset(1, 5 * MIB), 0);
        assert_eq!(part_offset(2, 5 * MIB), 5 * MIB);
        assert_eq!(part_offset(3, 5 * MIB), 10 * MIB);
    }

    #[test]
    fn progress_ratio_and_throughput() {
        let started = Instant::now() - Duration::from_secs(2);
        let progress = make_progress(50, 200, started);
        assert_eq!(progress.bytes_uploaded, 50);
        assert!((progress.ratio - 0.25).abs() < 1e-9);
        // ~25 bytes/sec over two seconds.
        assert!(progress.throughput_bytes_per_sec > 10.0);
        assert!(progress.throughput_bytes_per_sec < 50.0);
    }

    #[test]
    fn pause_handle_round_trips() {
        let paused = Arc::new(AtomicBool::new(false));
        let handle = PauseHandle { paused };
        assert!(!handle.is_paused());
        handle.pause();
        assert!(handle.is_paused());
        handle.resume();
        assert!(!handle.is_paused());
    }

    #[test]
    fn completed_parts_sort_by_number() {
        let mut parts = vec![
            CompletePart {
                part_number: 3,
                part_id: "c".to_string(),
            },
            CompletePart {
                part_number: 1,
                part_id: "a".to_string(),
            },
            CompletePart {
                part_number: 2,
                part_id: "b".to_string(),
            },
        ];
        parts.sort_by_key(|p| p.part_number);
        let numbers: Vec<i32> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}
