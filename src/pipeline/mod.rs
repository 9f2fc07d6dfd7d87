//! The ingestion pipeline: a debounced inbox watcher feeding a bounded,
//! deduplicated queue drained by a fixed pool of workers. Each screenshot is
//! captioned by the vision service, recomposed into a generation prompt,
//! rendered by the generation service, persisted to the outbox via an atomic
//! rename, and only then deleted from the inbox.

pub mod watcher;

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::config::{AppConfig, PathConfig};
use crate::models::generation::{GenerationRequest, GenerationResult};
use crate::models::item::{ItemState, WorkItem};
use crate::services::imagegen::ImageGenBackend;
use crate::services::prompts::PromptCatalog;
use crate::services::vision::VisionBackend;
use crate::services::ApiError;

/// Pipeline tunables, split out so tests can shrink delays.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub queue_capacity: usize,
    pub worker_count: usize,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub stable_quiet: Duration,
    pub stable_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 50,
            worker_count: 2,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            stable_quiet: Duration::from_millis(500),
            stable_timeout: Duration::from_secs(5),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            worker_count: config.worker_count.max(1),
            ..Self::default()
        }
    }
}

enum Job {
    Screenshot(WorkItem),
    Manual { id: Uuid, request: GenerationRequest },
}

/// Watcher-side half of the queue: canonical-path dedup plus a non-blocking
/// enqueue. Duplicate events and queue overflow both drop the event, never
/// the watcher thread.
#[derive(Clone)]
pub(crate) struct Intake {
    tx: mpsc::Sender<Job>,
    inflight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Intake {
    pub(crate) fn offer(&self, path: PathBuf) {
        let path = path.canonicalize().unwrap_or(path);

        {
            let mut inflight = self.inflight.lock().expect("inflight lock poisoned");
            if !inflight.insert(path.clone()) {
                tracing::debug!(file = %path.display(), "Already in flight, event ignored");
                return;
            }
        }

        match self.tx.try_send(Job::Screenshot(WorkItem::new(path.clone()))) {
            Ok(()) => {
                metrics::gauge!("pipeline_queue_depth")
                    .set((self.tx.max_capacity() - self.tx.capacity()) as f64);
                tracing::info!(file = %path.display(), "Screenshot queued");
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::counter!("pipeline_events_dropped").increment(1);
                tracing::warn!(file = %path.display(), "Queue full, dropping event");
                self.release(&path);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.release(&path);
            }
        }
    }

    fn release(&self, path: &Path) {
        self.inflight
            .lock()
            .expect("inflight lock poisoned")
            .remove(path);
    }
}

/// Cloneable submission handle for the web surface.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::Sender<Job>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("generation queue is full")]
    QueueFull,
    #[error("pipeline is shut down")]
    Closed,
}

impl PipelineHandle {
    /// Submit a manual generation request. It joins the same queue and
    /// workers as watched screenshots, entering at the generation stage.
    pub fn submit_manual(&self, request: GenerationRequest) -> Result<Uuid, SubmitError> {
        let id = Uuid::new_v4();
        self.tx
            .try_send(Job::Manual { id, request })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
            })?;
        Ok(id)
    }

    /// Number of jobs currently waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

struct WorkerCtx {
    paths: PathConfig,
    vision: Arc<dyn VisionBackend>,
    imagegen: Arc<dyn ImageGenBackend>,
    catalog: PromptCatalog,
    inflight: Arc<Mutex<HashSet<PathBuf>>>,
    settings: PipelineSettings,
}

pub struct IngestionPipeline {
    ctx: Arc<WorkerCtx>,
    tx: mpsc::Sender<Job>,
    rx: mpsc::Receiver<Job>,
}

impl IngestionPipeline {
    pub fn new(
        paths: PathConfig,
        vision: Arc<dyn VisionBackend>,
        imagegen: Arc<dyn ImageGenBackend>,
        catalog: PromptCatalog,
        settings: PipelineSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity);
        let ctx = Arc::new(WorkerCtx {
            paths,
            vision,
            imagegen,
            catalog,
            inflight: Arc::new(Mutex::new(HashSet::new())),
            settings,
        });
        Self { ctx, tx, rx }
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run until shutdown: reconcile the inbox, start the watcher, drain the
    /// queue with the worker pool. In-flight items finish; queued items are
    /// dropped (their source files survive for the next startup scan).
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let Self { ctx, tx, rx } = self;
        let intake = Intake {
            tx,
            inflight: ctx.inflight.clone(),
        };

        // Recover anything left over from a previous run before watching.
        scan_inbox(&ctx.paths.inbox_dir, &intake);

        let watcher_task = {
            let inbox = ctx.paths.inbox_dir.clone();
            let intake = intake.clone();
            let quiet = ctx.settings.stable_quiet;
            let stable_timeout = ctx.settings.stable_timeout;
            let shutdown = shutdown.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = watcher::watch_inbox(inbox, intake, quiet, stable_timeout, shutdown)
                {
                    tracing::error!(error = %e, "Inbox watcher failed");
                }
            })
        };
        drop(intake);

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut workers = Vec::with_capacity(ctx.settings.worker_count);
        for worker_id in 0..ctx.settings.worker_count {
            let ctx = ctx.clone();
            let rx = rx.clone();
            let mut shutdown = shutdown.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            job = rx.recv() => job,
                            _ = shutdown_signalled(&mut shutdown) => None,
                        }
                    };
                    let Some(job) = job else { break };
                    match job {
                        Job::Screenshot(item) => process_screenshot(&ctx, item).await,
                        Job::Manual { id, request } => process_manual(&ctx, id, request).await,
                    }
                }
                tracing::debug!(worker_id, "Worker stopped");
            }));
        }

        for worker in workers {
            let _ = worker.await;
        }
        let _ = watcher_task.await;
        tracing::info!("Ingestion pipeline stopped");
    }
}

/// Resolves once the shutdown flag flips (or the sender goes away).
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn scan_inbox(inbox: &Path, intake: &Intake) {
    let entries = match std::fs::read_dir(inbox) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(dir = %inbox.display(), error = %e, "Could not scan inbox");
            return;
        }
    };

    let mut found = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && watcher::is_image_file(&path) {
            intake.offer(path);
            found += 1;
        }
    }
    if found > 0 {
        tracing::info!(count = found, "Recovered existing screenshots from inbox");
    }
}

enum ItemOutcome {
    Generated(PathBuf),
    AlreadyProcessed,
    Discarded,
    Abandoned,
}

async fn process_screenshot(ctx: &Arc<WorkerCtx>, mut item: WorkItem) {
    let start = Instant::now();
    let outcome = run_item(ctx, &mut item).await;

    // Terminal either way, so drop the dedup claim.
    ctx.inflight
        .lock()
        .expect("inflight lock poisoned")
        .remove(&item.source);

    if let ItemOutcome::Generated(output) = outcome {
        metrics::counter!("pipeline_items_total").increment(1);
        metrics::histogram!("pipeline_processing_seconds").record(start.elapsed().as_secs_f64());
        tracing::info!(
            file = %item.source.display(),
            output = %output.display(),
            attempts = item.attempts,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Screenshot processed"
        );
    }
}

async fn run_item(ctx: &WorkerCtx, item: &mut WorkItem) -> ItemOutcome {
    let source = item.source.clone();

    // The file may have vanished since the event; nothing to retry then.
    let bytes = match tokio::fs::read(&source).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(file = %source.display(), error = %e, "Could not read screenshot, discarding");
            return ItemOutcome::Discarded;
        }
    };

    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("screenshot")
        .to_string();

    // A leftover source whose output already exists means a previous run
    // crashed between write and delete. Reclaim it without regenerating.
    if has_existing_output(&ctx.paths.outbox_dir, &stem) {
        tracing::info!(file = %source.display(), "Matching output already exists, reclaiming source");
        remove_source(&source).await;
        return ItemOutcome::AlreadyProcessed;
    }

    let dimensions = match image_dimensions(&bytes) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(file = %source.display(), error = %e, "Not a decodable image, discarding");
            return ItemOutcome::Discarded;
        }
    };

    item.state = ItemState::Analyzing;
    let caption = match with_retry(
        "vision",
        ctx.settings.max_attempts,
        ctx.settings.retry_base_delay,
        &mut item.attempts,
        || ctx.vision.analyze(&bytes, ctx.catalog.instruction()),
    )
    .await
    {
        Ok(caption) => caption,
        Err(e) => return abandon(item, "vision analysis", e),
    };

    let request = ctx.catalog.compose(&caption, dimensions);
    tracing::debug!(
        file = %source.display(),
        size = %request.size,
        prompt_len = request.prompt.len(),
        "Composed generation request"
    );

    item.state = ItemState::Generating;
    let image_bytes = match with_retry(
        "generation",
        ctx.settings.max_attempts,
        ctx.settings.retry_base_delay,
        &mut item.attempts,
        || ctx.imagegen.generate(&request),
    )
    .await
    {
        Ok(bytes) => bytes,
        Err(e) => return abandon(item, "image generation", e),
    };

    item.state = ItemState::Persisting;
    let result = GenerationResult {
        image_bytes,
        output_filename: output_filename(&stem, Utc::now()),
    };
    let output_path = match persist_output(&ctx.paths.outbox_dir, &result).await {
        Ok(path) => path,
        Err(e) => {
            metrics::counter!("pipeline_items_failed").increment(1);
            tracing::error!(file = %source.display(), error = %e, "Failed to persist output, source left in place");
            item.state = ItemState::Abandoned;
            return ItemOutcome::Abandoned;
        }
    };

    // Source removal strictly follows the durable write. A failure here is
    // tolerated; the existing-output check reclaims the file next time.
    remove_source(&source).await;
    item.state = ItemState::Done;
    ItemOutcome::Generated(output_path)
}

fn abandon(item: &mut WorkItem, stage: &str, err: ApiError) -> ItemOutcome {
    item.state = ItemState::Abandoned;
    item.last_error = Some(err.to_string());
    metrics::counter!("pipeline_items_failed").increment(1);
    tracing::error!(
        file = %item.source.display(),
        stage,
        attempts = item.attempts,
        error = %err,
        "Item abandoned, source left in place for inspection"
    );
    ItemOutcome::Abandoned
}

async fn process_manual(ctx: &Arc<WorkerCtx>, id: Uuid, request: GenerationRequest) {
    tracing::info!(request_id = %id, size = %request.size, "Processing manual generation request");

    let mut attempts = 0u32;
    let image_bytes = match with_retry(
        "generation",
        ctx.settings.max_attempts,
        ctx.settings.retry_base_delay,
        &mut attempts,
        || ctx.imagegen.generate(&request),
    )
    .await
    {
        Ok(bytes) => bytes,
        Err(e) => {
            metrics::counter!("pipeline_items_failed").increment(1);
            tracing::error!(request_id = %id, attempts, error = %e, "Manual generation failed");
            return;
        }
    };

    let short_id = id.simple().to_string();
    let result = GenerationResult {
        image_bytes,
        output_filename: output_filename(&format!("manual_{}", &short_id[..8]), Utc::now()),
    };
    match persist_output(&ctx.paths.outbox_dir, &result).await {
        Ok(path) => {
            metrics::counter!("pipeline_items_total").increment(1);
            tracing::info!(request_id = %id, output = %path.display(), "Manual generation complete");
        }
        Err(e) => {
            metrics::counter!("pipeline_items_failed").increment(1);
            tracing::error!(request_id = %id, error = %e, "Failed to persist manual output");
        }
    }
}

/// Retry an API call with exponential backoff. Only transient failures are
/// retried; the attempt counter is shared with the caller's WorkItem.
pub(crate) async fn with_retry<T, F, Fut>(
    operation: &str,
    max_attempts: u32,
    base_delay: Duration,
    attempts: &mut u32,
    mut call: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1u32;
    loop {
        *attempts += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = base_delay * 2u32.saturating_pow(attempt - 1);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

pub fn output_filename(stem: &str, now: DateTime<Utc>) -> String {
    format!("generated_{}_{}.png", now.format("%Y%m%d_%H%M%S"), stem)
}

/// Extracts the source stem back out of an output filename; the inverse of
/// [`output_filename`]. Returns `None` for anything not shaped like one.
fn output_stem(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("generated_")?;
    let rest = rest.strip_suffix(".png")?;
    // "YYYYMMDD_HHMMSS_" is a fixed 16 ASCII bytes.
    let bytes = rest.as_bytes();
    if bytes.len() <= 16 || bytes[8] != b'_' || bytes[15] != b'_' {
        return None;
    }
    if !bytes[..8].iter().all(u8::is_ascii_digit) || !bytes[9..15].iter().all(u8::is_ascii_digit) {
        return None;
    }
    Some(&rest[16..])
}

/// Whether the outbox already holds an output generated from this stem.
/// The stem is compared exactly, never as a suffix: `1.png` must not be
/// reclaimed because `shot_1.png` was processed earlier.
pub fn has_existing_output(outbox: &Path, stem: &str) -> bool {
    match std::fs::read_dir(outbox) {
        Ok(entries) => entries.flatten().any(|entry| {
            let name = entry.file_name();
            name.to_str().and_then(output_stem) == Some(stem)
        }),
        Err(_) => false,
    }
}

/// Two-phase commit, write side: temp file in the outbox, then atomic rename
/// into place. Any file the gallery can list is therefore always complete.
pub async fn persist_output(outbox: &Path, result: &GenerationResult) -> std::io::Result<PathBuf> {
    let final_path = outbox.join(&result.output_filename);
    let tmp_path = outbox.join(format!(".{}.tmp", result.output_filename));

    tokio::fs::write(&tmp_path, &result.image_bytes).await?;
    match tokio::fs::rename(&tmp_path, &final_path).await {
        Ok(()) => Ok(final_path),
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            Err(e)
        }
    }
}

async fn remove_source(source: &Path) {
    match tokio::fs::remove_file(source).await {
        Ok(()) => tracing::info!(file = %source.display(), "Source screenshot removed"),
        Err(e) => tracing::warn!(
            file = %source.display(),
            error = %e,
            "Could not delete source screenshot; it will be reclaimed on a later pass"
        ),
    }
}

fn image_dimensions(bytes: &[u8]) -> Result<(u32, u32), image::ImageError> {
    image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()
}
