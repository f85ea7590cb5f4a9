use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::jobs::Scheduler;

/// Read-only operator surface over a running poller.
#[derive(Clone)]
pub struct AdminState {
    pub scheduler: Scheduler,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics/prom", get(metrics_prom))
        .route("/jobs/:id", get(get_job))
        .with_state(state)
}

/// Bind `addr` and serve the admin router until the listener fails.
pub async fn serve(addr: &str, state: AdminState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "admin api listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn internal_err(e: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: format!("internal error: {e}"),
        }),
    )
        .into_response()
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn status(State(state): State<AdminState>) -> Response {
    match state.scheduler.status().await {
        Ok(snap) => Json(snap).into_response(),
        Err(e) => internal_err(e),
    }
}

pub async fn metrics_prom(State(state): State<AdminState>) -> Response {
    match state.scheduler.status().await {
        Ok(snap) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            snap.to_prometheus(),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics error: {e}"),
        )
            .into_response(),
    }
}

pub async fn get_job(Path(id): Path<Uuid>, State(state): State<AdminState>) -> Response {
    match state.scheduler.store().get_job(id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorBody {
                error: "job not found".into(),
            }),
        )
            .into_response(),
        Err(e) => internal_err(e),
    }
}
