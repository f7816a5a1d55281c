//! Broadcast helpers giving every caller the same event vocabulary.

use tracing::warn;

use crate::dao::models::{EventPayload, MatchOutcome, Side, now_ms};
use crate::state::SharedState;

/// Broadcast the new position of a match to its scope, skipping the mover.
pub async fn broadcast_state_changed(
    state: &SharedState,
    game_id: &str,
    fen: &str,
    san: Option<String>,
    by: &str,
) {
    state
        .broadcaster()
        .broadcast(
            EventPayload::StateChanged {
                game_id: game_id.to_owned(),
                fen: fen.to_owned(),
                san,
                by: Some(by.to_owned()),
            },
            Some(game_id.to_owned()),
            Some(by.to_owned()),
        )
        .await;
}

/// Announce a newly created match on the global feed.
pub async fn broadcast_match_created(state: &SharedState, game_id: &str, owner_id: &str) {
    state
        .broadcaster()
        .broadcast(
            EventPayload::ParticipantJoined {
                game_id: game_id.to_owned(),
                owner_id: owner_id.to_owned(),
                side: Some(Side::White),
            },
            None,
            None,
        )
        .await;
}

/// Broadcast a seat being taken, scoped to the match and skipping the joiner.
pub async fn broadcast_participant_joined(
    state: &SharedState,
    game_id: &str,
    owner_id: &str,
    side: Option<Side>,
) {
    state
        .broadcaster()
        .broadcast(
            EventPayload::ParticipantJoined {
                game_id: game_id.to_owned(),
                owner_id: owner_id.to_owned(),
                side,
            },
            Some(game_id.to_owned()),
            Some(owner_id.to_owned()),
        )
        .await;
}

/// Broadcast a seated player leaving, scoped to the match.
pub async fn broadcast_participant_left(state: &SharedState, game_id: &str, owner_id: &str) {
    state
        .broadcaster()
        .broadcast(
            EventPayload::ParticipantLeft {
                game_id: game_id.to_owned(),
                owner_id: owner_id.to_owned(),
            },
            Some(game_id.to_owned()),
            Some(owner_id.to_owned()),
        )
        .await;
}

/// Broadcast a match reaching its terminal state, scoped to the match.
pub async fn broadcast_scope_ended(state: &SharedState, game_id: &str, outcome: MatchOutcome) {
    state
        .broadcaster()
        .broadcast(
            EventPayload::ScopeEnded {
                game_id: game_id.to_owned(),
                outcome,
            },
            Some(game_id.to_owned()),
            None,
        )
        .await;
}

/// Broadcast an operator message on the global feed.
pub async fn broadcast_out_of_band(state: &SharedState, message: &str) {
    state
        .broadcaster()
        .broadcast(
            EventPayload::OutOfBandMessage {
                message: message.to_owned(),
            },
            None,
            None,
        )
        .await;
}

/// Broadcast the viewer count for one scope (or the global feed).
pub async fn broadcast_viewer_activity(state: &SharedState, scope: Option<&str>) {
    let viewers = viewer_count(state, scope).await;
    state
        .broadcaster()
        .broadcast(
            EventPayload::ViewerActivity {
                game_id: scope.map(str::to_owned),
                viewers,
            },
            scope.map(str::to_owned),
            None,
        )
        .await;
}

/// Broadcast aggregate connection counts on the global feed.
pub async fn broadcast_connection_stats(state: &SharedState) {
    let total = viewer_count(state, None).await;
    let local = state.registry().count_for(None);
    state
        .broadcaster()
        .broadcast(EventPayload::ConnectionStats { total, local }, None, None)
        .await;
}

/// Count active viewers for a scope.
///
/// The durable table is the authoritative count — every physical connection
/// writes exactly one row there, so it never double-counts. When storage is
/// degraded the local registry stands in, undercounting remote viewers
/// rather than guessing.
pub async fn viewer_count(state: &SharedState, scope: Option<&str>) -> usize {
    let now = now_ms();
    let ttl = state.config().connection_ttl_ms();
    match state.connections().list_active(now, ttl).await {
        Ok(active) => match scope {
            None => active.len(),
            Some(scope) => active
                .iter()
                .filter(|record| record.subscriptions.contains(scope))
                .count(),
        },
        Err(err) => {
            warn!(error = %err, "falling back to local registry for viewer count");
            state.registry().count_for(scope)
        }
    }
}
