use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::game::{MatchSnapshot, MoveHistoryEntry, MoveRequest},
    error::AppError,
    identity::Viewer,
    services::game_service,
    state::SharedState,
};

#[utoipa::path(
    post,
    path = "/games",
    tag = "game",
    responses((status = 200, description = "Match created", body = MatchSnapshot))
)]
/// Create a fresh match with the caller seated as white.
pub async fn create_game(
    State(state): State<SharedState>,
    viewer: Viewer,
) -> Result<Json<MatchSnapshot>, AppError> {
    let snapshot = game_service::create_match(&state, &viewer).await?;
    Ok(Json(snapshot))
}

#[utoipa::path(
    post,
    path = "/games/{id}/join",
    tag = "game",
    params(("id" = Uuid, Path, description = "Match to join")),
    responses((status = 200, description = "Seat taken or observing", body = MatchSnapshot))
)]
/// Take the free black seat, or observe when both seats are taken.
pub async fn join_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    viewer: Viewer,
) -> Result<Json<MatchSnapshot>, AppError> {
    let snapshot = game_service::join_match(&state, &viewer, id).await?;
    Ok(Json(snapshot))
}

#[utoipa::path(
    post,
    path = "/games/{id}/moves",
    tag = "game",
    params(("id" = Uuid, Path, description = "Match being played")),
    request_body = MoveRequest,
    responses((status = 200, description = "Move applied", body = MatchSnapshot))
)]
/// Submit a move for validation, persistence, and fan-out.
pub async fn submit_move(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    viewer: Viewer,
    Json(payload): Json<MoveRequest>,
) -> Result<Json<MatchSnapshot>, AppError> {
    payload.validate()?;
    let snapshot = game_service::submit_move(&state, &viewer, id, payload).await?;
    Ok(Json(snapshot))
}

#[utoipa::path(
    get,
    path = "/games/{id}",
    tag = "game",
    params(("id" = Uuid, Path, description = "Match to read")),
    responses((status = 200, description = "Match snapshot", body = MatchSnapshot))
)]
/// Read the current snapshot of one match.
pub async fn get_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MatchSnapshot>, AppError> {
    let snapshot = game_service::get_match(&state, id).await?;
    Ok(Json(snapshot))
}

#[utoipa::path(
    get,
    path = "/games",
    tag = "game",
    responses((status = 200, description = "Recently active matches", body = [MatchSnapshot]))
)]
/// List recently active matches, newest first.
pub async fn list_games(
    State(state): State<SharedState>,
) -> Result<Json<Vec<MatchSnapshot>>, AppError> {
    let snapshots = game_service::list_recent(&state).await?;
    Ok(Json(snapshots))
}

#[utoipa::path(
    get,
    path = "/games/{id}/moves",
    tag = "game",
    params(("id" = Uuid, Path, description = "Match whose log to read")),
    responses((status = 200, description = "Move log, oldest first", body = [MoveHistoryEntry]))
)]
/// Read the full move log of a match.
pub async fn move_history(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<MoveHistoryEntry>>, AppError> {
    let entries = game_service::move_history(&state, id).await?;
    Ok(Json(entries))
}

/// Configure the match lifecycle endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/games", post(create_game).get(list_games))
        .route("/games/{id}", get(get_game))
        .route("/games/{id}/join", post(join_game))
        .route("/games/{id}/moves", post(submit_move).get(move_history))
}
