use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::serializer::Inbound;

#[derive(Clone)]
pub struct ApiState {
    inbound: mpsc::Sender<Inbound>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn router(inbound: mpsc::Sender<Inbound>) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/regions/{name}", get(handle_get_region))
        .with_state(ApiState { inbound })
}

async fn handle_get_status(State(state): State<ApiState>) -> axum::response::Response {
    let (reply, status) = oneshot::channel();
    if state.inbound.send(Inbound::Status(reply)).await.is_err() {
        return engine_unavailable();
    }
    match status.await {
        Ok(status) => Json(status).into_response(),
        Err(_) => engine_unavailable(),
    }
}

async fn handle_get_region(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> axum::response::Response {
    let (reply, region) = oneshot::channel();
    let request = Inbound::RegionStatus(name.clone(), reply);
    if state.inbound.send(request).await.is_err() {
        return engine_unavailable();
    }
    match region.await {
        Ok(Some(region)) => Json(region).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, &format!("Unknown region '{name}'")),
        Err(_) => engine_unavailable(),
    }
}

fn engine_unavailable() -> axum::response::Response {
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        "Lighting engine is not running",
    )
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
