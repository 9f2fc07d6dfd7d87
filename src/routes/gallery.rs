use axum::extract::{Path as AxumPath, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::pipeline::SubmitError;
use crate::services::prompts::generation_preset;

#[derive(Debug, Serialize)]
pub struct GalleryEntry {
    pub filename: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

/// GET /api/v1/gallery — outbox contents, newest first.
///
/// The pipeline may be renaming files into the directory while we iterate;
/// entries that disappear mid-listing are simply skipped.
pub async fn list_gallery(
    State(state): State<AppState>,
) -> Result<Json<Vec<GalleryEntry>>, StatusCode> {
    let mut dir = tokio::fs::read_dir(&state.paths.outbox_dir)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut entries = Vec::new();
    while let Ok(Some(entry)) = dir.next_entry().await {
        let Some(filename) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if filename.starts_with('.') || !crate::pipeline::watcher::is_image_file(&entry.path()) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        entries.push(GalleryEntry {
            filename,
            size_bytes: meta.len(),
            modified,
        });
    }

    entries.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(Json(entries))
}

/// The outbox is flat, so anything that looks like a path is an attack, and
/// dot-prefixed names are the pipeline's in-progress temp files.
fn is_servable_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains("..")
}

/// GET /api/v1/gallery/{filename} — serve one generated image.
pub async fn fetch_image(
    State(state): State<AppState>,
    AxumPath(filename): AxumPath<String>,
) -> Result<impl IntoResponse, StatusCode> {
    if !is_servable_filename(&filename) {
        return Err(StatusCode::BAD_REQUEST);
    }

    let path = state.paths.outbox_dir.join(&filename);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let content_type = match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    };

    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    /// Caption to generate from, or the name of a preset prompt.
    pub caption: String,
    pub width: u32,
    pub height: u32,
    pub style: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub request_id: Uuid,
    pub status: String,
    pub message: String,
}

/// POST /api/v1/generate — submit a manual generation request. It enters
/// the pipeline at the generation stage and lands in the gallery like any
/// watched screenshot.
pub async fn submit_generation(
    State(state): State<AppState>,
    Json(body): Json<GenerateBody>,
) -> Result<(StatusCode, Json<GenerateResponse>), StatusCode> {
    if body.caption.trim().is_empty() || body.width == 0 || body.height == 0 {
        return Err(StatusCode::BAD_REQUEST);
    }

    // A preset name expands to its stored prompt text.
    let caption = generation_preset(body.caption.trim()).unwrap_or(body.caption.trim());

    let request =
        state
            .catalog
            .compose_manual(caption, body.style.as_deref(), body.width, body.height);

    let request_id = state
        .pipeline
        .submit_manual(request)
        .map_err(|e: SubmitError| {
            tracing::warn!(error = %e, "Manual generation request rejected");
            StatusCode::SERVICE_UNAVAILABLE
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateResponse {
            request_id,
            status: "queued".to_string(),
            message: "Generation request submitted".to_string(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_servable_filename_rejects_paths_and_temp_files() {
        assert!(is_servable_filename("generated_20260101_000000_shot.png"));

        assert!(!is_servable_filename(""));
        assert!(!is_servable_filename("../etc/passwd"));
        assert!(!is_servable_filename("a/b.png"));
        assert!(!is_servable_filename("a\\b.png"));
        // In-progress pipeline writes must never be served.
        assert!(!is_servable_filename(".generated_x.png.tmp"));
    }
}
