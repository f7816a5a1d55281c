use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::UnboundedReceiverStream};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dao::models::{ConnectionRecord, EventPayload, ParticipantRole, Side, now_ms};
use crate::dto::stream::{SubscribeRequest, SubscriptionResponse};
use crate::error::ServiceError;
use crate::identity::Viewer;
use crate::services::{consumer, events, game_service};
use crate::state::SharedState;

/// Open a new push stream for `viewer`, optionally pre-subscribed to one
/// match.
///
/// The stream is registered locally and mirrored into the shared connection
/// table, the `connected` acknowledgement is queued ahead of anything else,
/// and both per-stream loops are started. A storage outage downgrades the
/// stream to local-only delivery instead of refusing the connection.
pub async fn open_stream(
    state: &SharedState,
    viewer: Viewer,
    game: Option<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>, ServiceError> {
    let connection_id = Uuid::new_v4().simple().to_string();
    let now = now_ms();

    let mut record = ConnectionRecord::new(&connection_id, &viewer.owner_id, now);
    record.owner_address = viewer.address.clone();

    if let Some(game) = game {
        let (role, side) = resolve_role(state, game, &viewer.owner_id).await?;
        record.subscriptions.insert(game.to_string());
        record.role = Some(role);
        record.role_detail = side.map(|side| side_label(side).to_owned());
    }

    if let Err(err) = state.connections().put(&record).await {
        warn!(
            connection_id,
            error = %err,
            "could not persist connection row; stream is local-only until storage returns"
        );
    }

    let (tx, rx) = mpsc::unbounded_channel();
    // queue the ack before registering so no broadcast can get ahead of it
    let _ = tx.send(EventPayload::Connected {
        connection_id: connection_id.clone(),
    });
    state.registry().register(
        &connection_id,
        &viewer.owner_id,
        tx.clone(),
        record.subscriptions.clone(),
    );
    consumer::start(state, &connection_id, &viewer.owner_id, &tx);

    info!(connection_id, owner_id = %viewer.owner_id, ?game, "stream opened");

    if let Some(game) = game {
        events::broadcast_viewer_activity(state, Some(&game.to_string())).await;
    }
    events::broadcast_connection_stats(state).await;

    Ok(to_sse_response(rx))
}

/// Subscribe an existing stream to a match, deriving the viewer's role from
/// the match's own seats.
///
/// Only the process owning the stream can subscribe it; anything else is an
/// unknown connection here.
pub async fn subscribe(
    state: &SharedState,
    connection_id: &str,
    request: SubscribeRequest,
) -> Result<SubscriptionResponse, ServiceError> {
    let game: Uuid = request
        .game
        .parse()
        .map_err(|_| ServiceError::InvalidInput(format!("`{}` is not a match id", request.game)))?;

    let Some(owner_id) = state.registry().owner_of(connection_id) else {
        return Err(ServiceError::NotFound(format!(
            "connection `{connection_id}` is not open here"
        )));
    };

    let (role, side) = resolve_role(state, game, &owner_id).await?;
    let role_detail = side.map(|side| side_label(side).to_owned());
    let scope = game.to_string();

    state.registry().subscribe(connection_id, &scope);
    match state
        .connections()
        .patch(connection_id, |record| {
            record.subscriptions.insert(scope.clone());
            record.role = Some(role);
            record.role_detail = role_detail.clone();
        })
        .await
    {
        Ok(true) => {}
        Ok(false) => warn!(
            connection_id,
            "durable row missing during subscribe; poll loop will close the stream"
        ),
        Err(err) => warn!(
            connection_id,
            error = %err,
            "could not persist subscription; remote producers will not see it until storage returns"
        ),
    }

    if role == ParticipantRole::Player {
        events::broadcast_participant_joined(state, &scope, &owner_id, side).await;
    }
    events::broadcast_viewer_activity(state, Some(&scope)).await;

    Ok(SubscriptionResponse {
        connection_id: connection_id.to_owned(),
        game,
        role,
        role_detail,
    })
}

/// Derive a viewer's role in a match from the match record's seats.
async fn resolve_role(
    state: &SharedState,
    game: Uuid,
    owner_id: &str,
) -> Result<(ParticipantRole, Option<Side>), ServiceError> {
    match game_service::load_match(state, game).await {
        Ok(record) => Ok(match record.side_of(owner_id) {
            Some(side) => (ParticipantRole::Player, Some(side)),
            None => (ParticipantRole::Observer, None),
        }),
        Err(err @ ServiceError::NotFound(_)) => Err(err),
        Err(err) => {
            // storage outage: admit the viewer as an observer rather than
            // bouncing the stream
            warn!(%game, error = %err, "could not resolve role; defaulting to observer");
            Ok((ParticipantRole::Observer, None))
        }
    }
}

/// Human-readable seat name stored as the role detail.
fn side_label(side: Side) -> &'static str {
    match side {
        Side::White => "white",
        Side::Black => "black",
    }
}

/// Convert the stream's payload channel into an SSE response. Each payload
/// becomes one discrete SSE message named after its kind.
fn to_sse_response(
    rx: mpsc::UnboundedReceiver<EventPayload>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = UnboundedReceiverStream::new(rx).filter_map(|payload| {
        match serde_json::to_string(&payload) {
            Ok(data) => Some(Ok(Event::default().event(payload.kind()).data(data))),
            Err(err) => {
                warn!(kind = payload.kind(), error = %err, "failed to serialize event payload");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::dao::memory::MemoryStore;
    use crate::services::game_service;
    use crate::state::AppState;

    async fn test_state() -> SharedState {
        let state = AppState::new(AppConfig::default());
        state.install_store(Arc::new(MemoryStore::new())).await;
        state
    }

    fn viewer(id: &str) -> Viewer {
        Viewer {
            owner_id: id.into(),
            address: None,
        }
    }

    fn register(state: &SharedState, connection_id: &str, owner_id: &str) {
        let (tx, _rx) = mpsc::unbounded_channel();
        state
            .registry()
            .register(connection_id, owner_id, tx, BTreeSet::new());
    }

    #[tokio::test]
    async fn subscribe_rejects_a_connection_owned_elsewhere() {
        let state = test_state().await;
        let err = subscribe(
            &state,
            "ghost",
            SubscribeRequest {
                game: Uuid::new_v4().to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn subscribe_rejects_an_unknown_match() {
        let state = test_state().await;
        register(&state, "c1", "alice");

        let err = subscribe(
            &state,
            "c1",
            SubscribeRequest {
                game: Uuid::new_v4().to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn subscribe_derives_the_role_from_the_match_seats() {
        let state = test_state().await;
        let snapshot = game_service::create_match(&state, &viewer("alice"))
            .await
            .unwrap();
        register(&state, "c1", "alice");
        register(&state, "c2", "carol");

        let seated = subscribe(
            &state,
            "c1",
            SubscribeRequest {
                game: snapshot.id.to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(seated.role, ParticipantRole::Player);
        assert_eq!(seated.role_detail.as_deref(), Some("white"));

        let watching = subscribe(
            &state,
            "c2",
            SubscribeRequest {
                game: snapshot.id.to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(watching.role, ParticipantRole::Observer);
        assert!(watching.role_detail.is_none());

        // subscriptions only ever grow by explicit subscribe
        let scopes = state.registry().subscriptions_of("c1").unwrap();
        assert!(scopes.contains(&snapshot.id.to_string()));
    }
}
