use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    routing::{get, post},
};
use futures::Stream;
use validator::Validate;

use crate::{
    dto::stream::{EventStreamQuery, SubscribeRequest, SubscriptionResponse},
    error::AppError,
    identity::Viewer,
    services::stream_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/events",
    tag = "stream",
    params(EventStreamQuery),
    responses((status = 200, description = "Event stream", content_type = "text/event-stream", body = String))
)]
/// Open a long-lived event stream, optionally scoped to one match.
///
/// The first message is always the `connected` acknowledgement carrying the
/// assigned connection id.
pub async fn open_events(
    State(state): State<SharedState>,
    Query(query): Query<EventStreamQuery>,
    viewer: Viewer,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let sse = stream_service::open_stream(&state, viewer, query.game).await?;
    Ok(sse)
}

#[utoipa::path(
    post,
    path = "/streams/{connection_id}/subscriptions",
    tag = "stream",
    params(("connection_id" = String, Path, description = "Stream to subscribe")),
    request_body = SubscribeRequest,
    responses(
        (status = 200, description = "Subscription added", body = SubscriptionResponse)
    )
)]
/// Subscribe an open stream to a match.
pub async fn subscribe(
    State(state): State<SharedState>,
    Path(connection_id): Path<String>,
    Json(payload): Json<SubscribeRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    payload.validate()?;
    let response = stream_service::subscribe(&state, &connection_id, payload).await?;
    Ok(Json(response))
}

/// Configure the event stream endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/events", get(open_events))
        .route("/streams/{connection_id}/subscriptions", post(subscribe))
}
