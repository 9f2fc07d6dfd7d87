use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub queue_depth: usize,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub inbox: ComponentHealth,
    pub outbox: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub path: String,
}

fn check_dir(path: &std::path::Path) -> ComponentHealth {
    let status = if path.is_dir() { "ok" } else { "error" };
    ComponentHealth {
        status: status.to_string(),
        path: path.display().to_string(),
    }
}

/// GET /health — process health plus working-directory status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let inbox = check_dir(&state.paths.inbox_dir);
    let outbox = check_dir(&state.paths.outbox_dir);

    let all_healthy = inbox.status == "ok" && outbox.status == "ok";
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        queue_depth: state.pipeline.queue_depth(),
        checks: HealthChecks { inbox, outbox },
    };

    (status_code, Json(response))
}
