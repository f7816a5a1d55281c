use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
};
use validator::Validate;

use crate::{
    dto::admin::{BroadcastRequest, CleanupResponse, ClearResponse, DiagnosticsResponse},
    error::AppError,
    services::admin_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/admin/diagnostics",
    tag = "admin",
    responses((status = 200, description = "Aggregate connection and event state", body = DiagnosticsResponse))
)]
/// Read the current aggregate connection and event state.
pub async fn diagnostics(
    State(state): State<SharedState>,
) -> Result<Json<DiagnosticsResponse>, AppError> {
    let report = admin_service::diagnostics(&state).await?;
    Ok(Json(report))
}

#[utoipa::path(
    post,
    path = "/admin/cleanup",
    tag = "admin",
    responses((status = 200, description = "Eviction counts", body = CleanupResponse))
)]
/// Run an explicit garbage-collection pass over both shared tables.
pub async fn cleanup(State(state): State<SharedState>) -> Result<Json<CleanupResponse>, AppError> {
    let report = admin_service::cleanup(&state).await?;
    Ok(Json(report))
}

#[utoipa::path(
    delete,
    path = "/admin/events",
    tag = "admin",
    responses((status = 200, description = "Cleared counts", body = ClearResponse))
)]
/// Drop every pending event and evict dead connections.
pub async fn clear_events(
    State(state): State<SharedState>,
) -> Result<Json<ClearResponse>, AppError> {
    let report = admin_service::clear_events(&state).await?;
    Ok(Json(report))
}

#[utoipa::path(
    post,
    path = "/admin/broadcast",
    tag = "admin",
    request_body = BroadcastRequest,
    responses((status = 202, description = "Message queued for every viewer"))
)]
/// Broadcast an operator message on the global feed.
pub async fn broadcast(
    State(state): State<SharedState>,
    Json(payload): Json<BroadcastRequest>,
) -> Result<StatusCode, AppError> {
    payload.validate()?;
    admin_service::broadcast_message(&state, &payload.message).await;
    Ok(StatusCode::ACCEPTED)
}

/// Configure the administrative endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/admin/diagnostics", get(diagnostics))
        .route("/admin/cleanup", post(cleanup))
        .route("/admin/events", delete(clear_events))
        .route("/admin/broadcast", post(broadcast))
}
