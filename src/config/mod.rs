use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Bearer credential shared by the vision and generation endpoints.
    pub api_key: String,

    /// Vision-understanding (image captioning) endpoint.
    #[serde(default = "default_vision_api_url")]
    pub vision_api_url: String,

    /// Model name passed to the vision endpoint.
    #[serde(default = "default_vision_model")]
    pub vision_model: String,

    /// Text-to-image generation endpoint.
    pub image_api_url: String,

    /// Model name passed to the generation endpoint.
    pub image_model: String,

    /// Server bind address (e.g., "127.0.0.1:8505").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Pending-item capacity of the ingestion queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of concurrent pipeline workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Seconds to let in-flight items finish on shutdown.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Request timeout for vision calls, in seconds.
    #[serde(default = "default_vision_timeout_secs")]
    pub vision_timeout_secs: u64,

    /// Request timeout for generation calls, in seconds.
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,

    /// Directory overrides; the paths file takes precedence over these.
    pub screenshots_dir: Option<PathBuf>,
    pub outputs_dir: Option<PathBuf>,
    pub logs_dir: Option<PathBuf>,

    /// Optional JSON file mapping the three working directories.
    #[serde(default = "default_paths_file")]
    pub paths_file: PathBuf,
}

fn default_vision_api_url() -> String {
    "https://ark.cn-beijing.volces.com/api/v3/chat/completions".to_string()
}

fn default_vision_model() -> String {
    "doubao-1.5-thinking-vision-pro-250428".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8505".to_string()
}

fn default_queue_capacity() -> usize {
    50
}

fn default_worker_count() -> usize {
    2
}

fn default_shutdown_grace_secs() -> u64 {
    15
}

fn default_vision_timeout_secs() -> u64 {
    30
}

fn default_generation_timeout_secs() -> u64 {
    60
}

fn default_paths_file() -> PathBuf {
    PathBuf::from("paths.json")
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}

/// Shape of the optional paths file. Every field is optional; anything
/// missing falls back to the environment and then to the relative defaults.
#[derive(Debug, Deserialize)]
struct PathsFile {
    screenshots_dir: Option<PathBuf>,
    outputs_dir: Option<PathBuf>,
    logs_dir: Option<PathBuf>,
}

/// The three working directories, resolved once at startup and passed into
/// every component that touches the filesystem.
#[derive(Debug, Clone)]
pub struct PathConfig {
    /// Where new screenshots appear.
    pub inbox_dir: PathBuf,
    /// Where generated images are published.
    pub outbox_dir: PathBuf,
    /// Where the plain-text log file lives.
    pub logs_dir: PathBuf,
}

impl PathConfig {
    /// Resolve directories with precedence: paths file, then environment
    /// overrides, then relative defaults.
    pub fn resolve(config: &AppConfig) -> Result<Self, ConfigError> {
        let from_file = load_paths_file(&config.paths_file)?;

        let pick = |file: Option<PathBuf>, env: &Option<PathBuf>, fallback: &str| {
            file.or_else(|| env.clone())
                .unwrap_or_else(|| PathBuf::from(fallback))
        };

        let (file_inbox, file_outbox, file_logs) = match from_file {
            Some(f) => (f.screenshots_dir, f.outputs_dir, f.logs_dir),
            None => (None, None, None),
        };

        Ok(Self {
            inbox_dir: pick(file_inbox, &config.screenshots_dir, "Screenshots"),
            outbox_dir: pick(file_outbox, &config.outputs_dir, "Outputs"),
            logs_dir: pick(file_logs, &config.logs_dir, "logs"),
        })
    }

    /// Create any missing directory. Failure here is fatal at startup.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        for dir in [&self.inbox_dir, &self.outbox_dir, &self.logs_dir] {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}

fn load_paths_file(path: &Path) -> Result<Option<PathsFile>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::PathsFileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = serde_json::from_str(&contents).map_err(|source| ConfigError::PathsFileParse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(parsed))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read paths file {path}: {source}")]
    PathsFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse paths file {path}: {source}")]
    PathsFileParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}
