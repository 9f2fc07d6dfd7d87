use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Where a screenshot is in its trip through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Queued,
    Analyzing,
    Generating,
    Persisting,
    Done,
    Abandoned,
}

/// One screenshot under processing. Created when the watcher observes a
/// stable file, mutated only by the worker driving it, dropped from in-memory
/// tracking on terminal success or failure.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub source: PathBuf,
    pub arrived_at: DateTime<Utc>,
    pub state: ItemState,
    /// Total external API attempts spent on this item so far.
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl WorkItem {
    pub fn new(source: PathBuf) -> Self {
        Self {
            source,
            arrived_at: Utc::now(),
            state: ItemState::Queued,
            attempts: 0,
            last_error: None,
        }
    }
}
