//! End-to-end pipeline tests against temp directories and stub AI backends.
//! No network, no real services: the stubs script success, transient failure,
//! and permanent failure so the retry and commit behavior can be observed
//! through the filesystem.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use dreamshot::config::PathConfig;
use dreamshot::models::generation::GenerationRequest;
use dreamshot::pipeline::{IngestionPipeline, PipelineSettings, SubmitError};
use dreamshot::services::imagegen::ImageGenBackend;
use dreamshot::services::prompts::PromptCatalog;
use dreamshot::services::vision::VisionBackend;
use dreamshot::services::ApiError;

struct StubVision {
    calls: Arc<AtomicU32>,
    /// Fail transiently this many times before succeeding.
    fail_transient: u32,
    /// Always fail permanently instead.
    permanent: bool,
}

impl StubVision {
    fn ok(calls: Arc<AtomicU32>) -> Self {
        Self {
            calls,
            fail_transient: 0,
            permanent: false,
        }
    }
}

#[async_trait]
impl VisionBackend for StubVision {
    async fn analyze(&self, _image_bytes: &[u8], _instruction: &str) -> Result<String, ApiError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.permanent {
            return Err(ApiError::permanent("HTTP 400: malformed request"));
        }
        if n < self.fail_transient {
            return Err(ApiError::transient("connection timed out"));
        }
        Ok("a quiet grassy park with a winding path".to_string())
    }
}

struct StubImageGen {
    calls: Arc<AtomicU32>,
    permanent: bool,
}

impl StubImageGen {
    fn ok(calls: Arc<AtomicU32>) -> Self {
        Self {
            calls,
            permanent: false,
        }
    }
}

#[async_trait]
impl ImageGenBackend for StubImageGen {
    async fn generate(&self, _request: &GenerationRequest) -> Result<Vec<u8>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.permanent {
            return Err(ApiError::permanent("HTTP 400: prompt rejected"));
        }
        Ok(b"fake png bytes".to_vec())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    paths: PathConfig,
    vision_calls: Arc<AtomicU32>,
    imagegen_calls: Arc<AtomicU32>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = PathConfig {
            inbox_dir: dir.path().join("Screenshots"),
            outbox_dir: dir.path().join("Outputs"),
            logs_dir: dir.path().join("logs"),
        };
        paths.ensure_dirs().unwrap();
        Self {
            _dir: dir,
            paths,
            vision_calls: Arc::new(AtomicU32::new(0)),
            imagegen_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            queue_capacity: 8,
            worker_count: 2,
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(10),
            stable_quiet: Duration::from_millis(50),
            stable_timeout: Duration::from_secs(2),
        }
    }

    fn pipeline(&self, vision: StubVision, imagegen: StubImageGen) -> IngestionPipeline {
        IngestionPipeline::new(
            self.paths.clone(),
            Arc::new(vision),
            Arc::new(imagegen),
            PromptCatalog::new(),
            Self::settings(),
        )
    }

    fn drop_screenshot(&self, name: &str) -> PathBuf {
        let path = self.paths.inbox_dir.join(name);
        std::fs::write(&path, make_png(64, 36)).unwrap();
        path
    }

    fn outputs(&self) -> Vec<String> {
        std::fs::read_dir(&self.paths.outbox_dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }
}

fn make_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 90, 60]));
    let mut buf = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut buf),
        image::ImageFormat::Png,
    )
    .unwrap();
    buf
}

async fn wait_until(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn shut_down(tx: watch::Sender<bool>, task: tokio::task::JoinHandle<()>) {
    let _ = tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
}

#[tokio::test]
async fn test_startup_scan_processes_preexisting_file() {
    let harness = Harness::new();
    let source = harness.drop_screenshot("shot_0001.png");

    let pipeline = harness.pipeline(
        StubVision::ok(harness.vision_calls.clone()),
        StubImageGen::ok(harness.imagegen_calls.clone()),
    );
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(pipeline.run(rx));

    // The file predates the watcher, so only the startup scan can find it.
    assert!(
        wait_until(
            || !harness.outputs().is_empty() && !source.exists(),
            Duration::from_secs(10)
        )
        .await,
        "expected an output and a reclaimed source"
    );

    let outputs = harness.outputs();
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].starts_with("generated_"));
    assert!(outputs[0].ends_with("_shot_0001.png"));
    assert_eq!(harness.vision_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.imagegen_calls.load(Ordering::SeqCst), 1);

    shut_down(tx, task).await;
}

#[tokio::test]
async fn test_watcher_picks_up_new_file() {
    let harness = Harness::new();
    let pipeline = harness.pipeline(
        StubVision::ok(harness.vision_calls.clone()),
        StubImageGen::ok(harness.imagegen_calls.clone()),
    );
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(pipeline.run(rx));

    // Let the watcher install before the file arrives.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let source = harness.drop_screenshot("live_shot.png");

    assert!(
        wait_until(
            || !harness.outputs().is_empty() && !source.exists(),
            Duration::from_secs(15)
        )
        .await,
        "expected the watcher to pick up the new file"
    );

    shut_down(tx, task).await;
}

#[tokio::test]
async fn test_transient_failures_retried_to_success() {
    let harness = Harness::new();
    let vision = StubVision {
        calls: harness.vision_calls.clone(),
        fail_transient: 2,
        permanent: false,
    };
    let source = harness.drop_screenshot("flaky.png");

    let pipeline = harness.pipeline(vision, StubImageGen::ok(harness.imagegen_calls.clone()));
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(pipeline.run(rx));

    assert!(wait_until(|| !harness.outputs().is_empty(), Duration::from_secs(10)).await);

    // Two transient failures plus the success: exactly three attempts.
    assert_eq!(harness.vision_calls.load(Ordering::SeqCst), 3);
    assert!(!source.exists());

    shut_down(tx, task).await;
}

#[tokio::test]
async fn test_permanent_vision_failure_abandons_after_one_attempt() {
    let harness = Harness::new();
    let vision = StubVision {
        calls: harness.vision_calls.clone(),
        fail_transient: 0,
        permanent: true,
    };
    let source = harness.drop_screenshot("rejected.png");

    let pipeline = harness.pipeline(vision, StubImageGen::ok(harness.imagegen_calls.clone()));
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(pipeline.run(rx));

    assert!(
        wait_until(
            || harness.vision_calls.load(Ordering::SeqCst) >= 1,
            Duration::from_secs(10)
        )
        .await
    );
    // Give the pipeline a moment to (incorrectly) retry or delete.
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(harness.vision_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.imagegen_calls.load(Ordering::SeqCst), 0);
    // The source is left in place for manual inspection.
    assert!(source.exists());
    assert!(harness.outputs().is_empty());

    shut_down(tx, task).await;
}

#[tokio::test]
async fn test_generation_failure_preserves_source() {
    // Fault injected after captioning but before any output is written:
    // the write-then-delete invariant says the source must survive.
    let harness = Harness::new();
    let imagegen = StubImageGen {
        calls: harness.imagegen_calls.clone(),
        permanent: true,
    };
    let source = harness.drop_screenshot("unlucky.png");

    let pipeline = harness.pipeline(StubVision::ok(harness.vision_calls.clone()), imagegen);
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(pipeline.run(rx));

    assert!(
        wait_until(
            || harness.imagegen_calls.load(Ordering::SeqCst) >= 1,
            Duration::from_secs(10)
        )
        .await
    );
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(source.exists());
    assert!(harness.outputs().is_empty());

    shut_down(tx, task).await;
}

#[tokio::test]
async fn test_existing_output_prevents_regeneration() {
    let harness = Harness::new();
    // Simulate a crash after write but before delete on a previous run.
    std::fs::write(
        harness
            .paths
            .outbox_dir
            .join("generated_20260101_000000_orphan.png"),
        b"previous output",
    )
    .unwrap();
    let source = harness.drop_screenshot("orphan.png");

    let pipeline = harness.pipeline(
        StubVision::ok(harness.vision_calls.clone()),
        StubImageGen::ok(harness.imagegen_calls.clone()),
    );
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(pipeline.run(rx));

    assert!(
        wait_until(|| !source.exists(), Duration::from_secs(10)).await,
        "leftover source should be reclaimed"
    );

    // No second output, no API traffic.
    assert_eq!(harness.outputs().len(), 1);
    assert_eq!(harness.vision_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.imagegen_calls.load(Ordering::SeqCst), 0);

    shut_down(tx, task).await;
}

#[tokio::test]
async fn test_non_image_files_ignored() {
    let harness = Harness::new();
    std::fs::write(harness.paths.inbox_dir.join("notes.txt"), b"not an image").unwrap();

    let pipeline = harness.pipeline(
        StubVision::ok(harness.vision_calls.clone()),
        StubImageGen::ok(harness.imagegen_calls.clone()),
    );
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(pipeline.run(rx));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.vision_calls.load(Ordering::SeqCst), 0);
    assert!(harness.paths.inbox_dir.join("notes.txt").exists());

    shut_down(tx, task).await;
}

#[tokio::test]
async fn test_manual_request_lands_in_outbox() {
    let harness = Harness::new();
    let pipeline = harness.pipeline(
        StubVision::ok(harness.vision_calls.clone()),
        StubImageGen::ok(harness.imagegen_calls.clone()),
    );
    let handle = pipeline.handle();
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(pipeline.run(rx));

    let catalog = PromptCatalog::new();
    let request = catalog.compose_manual("a lighthouse at dawn", None, 1280, 720);
    handle.submit_manual(request).unwrap();

    assert!(wait_until(|| !harness.outputs().is_empty(), Duration::from_secs(10)).await);
    let outputs = harness.outputs();
    assert!(outputs[0].starts_with("generated_"));
    assert!(outputs[0].contains("_manual_"));
    // Manual requests enter at the generation stage: no vision call.
    assert_eq!(harness.vision_calls.load(Ordering::SeqCst), 0);

    shut_down(tx, task).await;
}

#[tokio::test]
async fn test_full_queue_rejects_without_blocking() {
    let harness = Harness::new();
    let mut settings = Harness::settings();
    settings.queue_capacity = 1;

    // Never run the pipeline: nothing drains the queue.
    let pipeline = IngestionPipeline::new(
        harness.paths.clone(),
        Arc::new(StubVision::ok(harness.vision_calls.clone())),
        Arc::new(StubImageGen::ok(harness.imagegen_calls.clone())),
        PromptCatalog::new(),
        settings,
    );
    let handle = pipeline.handle();

    let catalog = PromptCatalog::new();
    let first = catalog.compose_manual("first", None, 1024, 1024);
    let second = catalog.compose_manual("second", None, 1024, 1024);

    assert!(handle.submit_manual(first).is_ok());
    assert!(matches!(
        handle.submit_manual(second),
        Err(SubmitError::QueueFull)
    ));
    assert_eq!(handle.queue_depth(), 1);

    drop(pipeline);
}

#[tokio::test]
async fn test_duplicate_source_processed_once() {
    let harness = Harness::new();
    let source = harness.drop_screenshot("double.png");

    let pipeline = harness.pipeline(
        StubVision::ok(harness.vision_calls.clone()),
        StubImageGen::ok(harness.imagegen_calls.clone()),
    );
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(pipeline.run(rx));

    assert!(wait_until(|| !source.exists(), Duration::from_secs(10)).await);
    // The startup scan and any watcher event for the same path must
    // coalesce into a single processed item.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.vision_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.outputs().len(), 1);

    shut_down(tx, task).await;
}
