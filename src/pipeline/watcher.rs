//! Inbox watching. Raw filesystem events are debounced, filtered down to
//! image files, held until the file stops growing, and then offered to the
//! pipeline's intake. Everything here runs on a blocking thread; the intake
//! hand-off is non-blocking so a slow pipeline can never stall the watcher.

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::pipeline::Intake;

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "tiff"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Wait until the file's size holds still across one quiet period, meaning
/// the writer has finished. Returns false if it never settles in time.
pub fn wait_for_stable(path: &Path, quiet: Duration, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let mut last_size: Option<u64> = None;

    while Instant::now() < deadline {
        match std::fs::metadata(path) {
            Ok(meta) => {
                let size = meta.len();
                if size > 0 && last_size == Some(size) {
                    return true;
                }
                last_size = Some(size);
            }
            Err(_) => {
                last_size = None;
            }
        }
        std::thread::sleep(quiet);
    }
    false
}

/// Watch the inbox non-recursively until shutdown. Stable image files are
/// offered to the intake; everything else is ignored.
pub(crate) fn watch_inbox(
    inbox: PathBuf,
    intake: Intake,
    quiet: Duration,
    stable_timeout: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<(), notify::Error> {
    let (tx, rx) = channel::<PathBuf>();

    let mut debouncer = new_debouncer(
        quiet,
        move |res: Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| match res {
            Ok(events) => {
                for event in events {
                    if matches!(event.kind, DebouncedEventKind::Any) {
                        let _ = tx.send(event.path);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Filesystem watch error");
            }
        },
    )?;

    debouncer
        .watcher()
        .watch(&inbox, RecursiveMode::NonRecursive)?;

    tracing::info!(dir = %inbox.display(), "Watching inbox for new screenshots");

    loop {
        if *shutdown.borrow() {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(path) => {
                if !is_image_file(&path) || !path.is_file() {
                    continue;
                }
                if !wait_for_stable(&path, quiet, stable_timeout) {
                    tracing::warn!(file = %path.display(), "File never stabilized, skipping");
                    continue;
                }
                intake.offer(path);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::info!("Inbox watcher stopped");
    Ok(())
}
