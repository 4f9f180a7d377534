use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

/// One unit of background work: extract text for a freshly uploaded file.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub file_id: Uuid,
    pub storage_key: String,
    pub content_type: String,
}

/// Performs the actual per-job work. Split from the queue so the dispatch
/// machinery can be exercised without storage or a database.
#[async_trait]
pub trait ExtractionHandler: Send + Sync {
    async fn handle(&self, job: &ExtractionJob) -> Result<()>;
}

/// In-process background queue with a configurable concurrency ceiling
/// (default 1 concurrent job).
///
/// `submit` is fire-and-forget: a full queue drops the job with a warning
/// and a failed job is logged without halting the queue. `queue_length()`
/// and `active_count()` expose the gauges for observability.
pub struct ExtractionQueue {
    tx: mpsc::Sender<ExtractionJob>,
    queued: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl ExtractionQueue {
    /// Create a queue backed by a bounded channel and spawn its worker pool.
    ///
    /// # Arguments
    /// * `handler` - performs the per-job work
    /// * `max_concurrent` - concurrency ceiling (clamped to at least 1)
    /// * `queue_size` - channel bound; submissions beyond it are dropped
    pub fn new(
        handler: Arc<dyn ExtractionHandler>,
        max_concurrent: usize,
        queue_size: usize,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let queued = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let queued_clone = queued.clone();
        let active_clone = active.clone();
        tokio::spawn(async move {
            Self::worker_pool(rx, handler, max_concurrent, queued_clone, active_clone).await;
        });

        tracing::info!(
            max_concurrent = max_concurrent,
            queue_size = queue_size,
            "Extraction queue initialized"
        );

        Self { tx, queued, active }
    }

    /// Enqueue a job and trigger draining. Never blocks and never fails the
    /// caller: a full queue is logged and the job is dropped.
    pub fn submit(&self, job: ExtractionJob) {
        match self.tx.try_send(job) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::SeqCst);
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(
                    file_id = %job.file_id,
                    "Extraction queue is full, dropping job"
                );
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::error!(
                    file_id = %job.file_id,
                    "Extraction queue worker stopped, dropping job"
                );
            }
        }
    }

    /// Jobs accepted but not yet started.
    pub fn queue_length(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Jobs currently running.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    async fn worker_pool(
        mut rx: mpsc::Receiver<ExtractionJob>,
        handler: Arc<dyn ExtractionHandler>,
        max_concurrent: usize,
        queued: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
    ) {
        let semaphore = Arc::new(Semaphore::new(max_concurrent));

        while let Some(job) = rx.recv().await {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            queued.fetch_sub(1, Ordering::SeqCst);

            let handler = handler.clone();
            let active = active.clone();

            tokio::spawn(async move {
                let _permit = permit;
                active.fetch_add(1, Ordering::SeqCst);

                let start = std::time::Instant::now();
                match handler.handle(&job).await {
                    Ok(()) => {
                        tracing::info!(
                            file_id = %job.file_id,
                            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                            "Extraction job completed"
                        );
                    }
                    Err(e) => {
                        // A failed job never halts the queue.
                        tracing::error!(
                            file_id = %job.file_id,
                            error = %e,
                            "Extraction job failed"
                        );
                    }
                }

                active.fetch_sub(1, Ordering::SeqCst);
            });
        }

        tracing::info!("Extraction queue worker stopped");
    }
}

impl Clone for ExtractionQueue {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            queued: self.queued.clone(),
            active: self.active.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct RecordingHandler {
        running: AtomicUsize,
        peak: AtomicUsize,
        handled: AtomicUsize,
        release: Notify,
        hold: bool,
        fail_every_other: bool,
    }

    impl RecordingHandler {
        fn new(hold: bool, fail_every_other: bool) -> Arc<Self> {
            Arc::new(Self {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                handled: AtomicUsize::new(0),
                release: Notify::new(),
                hold,
                fail_every_other,
            })
        }
    }

    #[async_trait]
    impl ExtractionHandler for RecordingHandler {
        async fn handle(&self, job: &ExtractionJob) -> Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            if self.hold {
                self.release.notified().await;
            }

            self.running.fetch_sub(1, Ordering::SeqCst);
            let n = self.handled.fetch_add(1, Ordering::SeqCst);

            if self.fail_every_other && n % 2 == 0 {
                anyhow::bail!("synthetic failure for {}", job.file_id);
            }
            Ok(())
        }
    }

    fn job() -> ExtractionJob {
        ExtractionJob {
            file_id: Uuid::new_v4(),
            storage_key: "files/o/test.pdf".to_string(),
            content_type: "application/pdf".to_string(),
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn concurrency_ceiling_is_enforced() {
        let handler = RecordingHandler::new(true, false);
        let queue = ExtractionQueue::new(handler.clone(), 2, 16);

        for _ in 0..5 {
            queue.submit(job());
        }

        // Exactly two jobs may run at once; the rest wait their turn.
        wait_until(|| handler.running.load(Ordering::SeqCst) == 2).await;
        assert!(queue.active_count() >= 2);
        assert_eq!(handler.peak.load(Ordering::SeqCst), 2);

        for _ in 0..5 {
            handler.release.notify_one();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        wait_until(|| handler.handled.load(Ordering::SeqCst) == 5).await;
        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
        wait_until(|| queue.active_count() == 0).await;
        assert_eq!(queue.queue_length(), 0);
    }

    #[tokio::test]
    async fn failed_jobs_do_not_halt_the_queue() {
        let handler = RecordingHandler::new(false, true);
        let queue = ExtractionQueue::new(handler.clone(), 1, 16);

        for _ in 0..4 {
            queue.submit(job());
        }

        wait_until(|| handler.handled.load(Ordering::SeqCst) == 4).await;
    }

    #[tokio::test]
    async fn full_queue_drops_submissions_without_error() {
        let handler = RecordingHandler::new(true, false);
        let queue = ExtractionQueue::new(handler.clone(), 1, 1);

        // One job runs, one sits in the channel; the rest are dropped.
        for _ in 0..10 {
            queue.submit(job());
        }

        wait_until(|| handler.running.load(Ordering::SeqCst) == 1).await;
        assert!(queue.queue_length() <= 2);

        for _ in 0..10 {
            handler.release.notify_one();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        wait_until(|| handler.running.load(Ordering::SeqCst) == 0).await;
        assert!(handler.handled.load(Ordering::SeqCst) <= 3);
    }
}
