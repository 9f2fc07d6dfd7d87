use std::sync::Arc;

use crate::config::PathConfig;
use crate::pipeline::PipelineHandle;
use crate::services::prompts::PromptCatalog;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<PathConfig>,
    pub catalog: Arc<PromptCatalog>,
    pub pipeline: PipelineHandle,
}

impl AppState {
    pub fn new(paths: Arc<PathConfig>, catalog: PromptCatalog, pipeline: PipelineHandle) -> Self {
        Self {
            paths,
            catalog: Arc::new(catalog),
            pipeline,
        }
    }
}
