use tracing::{info, warn};
use uuid::Uuid;

use crate::dao::models::{MatchRecord, MatchStatus, MoveRecord, Side, now_ms};
use crate::dto::game::{MatchSnapshot, MoveHistoryEntry, MoveRequest};
use crate::engine::{INITIAL_FEN, MoveSubmission};
use crate::error::ServiceError;
use crate::identity::Viewer;
use crate::services::{events, rewards};
use crate::state::SharedState;

const MATCH_KEY_PREFIX: &str = "gambit:match:";
const MOVES_KEY_PREFIX: &str = "gambit:moves:";
const RECENT_MATCHES_KEY: &str = "gambit:matches:recent";

/// How many matches the lobby listing returns.
const RECENT_MATCHES_LIMIT: i64 = 20;

fn match_key(id: Uuid) -> String {
    format!("{MATCH_KEY_PREFIX}{id}")
}

fn moves_key(id: Uuid) -> String {
    format!("{MOVES_KEY_PREFIX}{id}")
}

/// Create a fresh match with the caller seated as white.
pub async fn create_match(state: &SharedState, viewer: &Viewer) -> Result<MatchSnapshot, ServiceError> {
    let now = now_ms();
    let record = MatchRecord {
        match_id: Uuid::new_v4(),
        fen: INITIAL_FEN.to_owned(),
        white: Some(viewer.owner_id.clone()),
        black: None,
        status: MatchStatus::Open,
        outcome: None,
        created_at: now,
        updated_at: now,
        move_count: 0,
    };
    save_match(state, &record).await?;
    info!(match_id = %record.match_id, owner_id = %viewer.owner_id, "match created");

    events::broadcast_match_created(state, &record.match_id.to_string(), &viewer.owner_id).await;
    Ok(record.into())
}

/// Seat the caller as black when the seat is free; otherwise they remain an
/// observer. Re-joining a match you already sit in is a no-op.
pub async fn join_match(
    state: &SharedState,
    viewer: &Viewer,
    id: Uuid,
) -> Result<MatchSnapshot, ServiceError> {
    let mut record = load_match(state, id).await?;

    if record.side_of(&viewer.owner_id).is_some() {
        return Ok(record.into());
    }
    if record.status == MatchStatus::Finished {
        return Err(ServiceError::InvalidState("match already finished".into()));
    }
    if record.black.is_some() {
        // both seats taken: the caller watches as an observer
        return Ok(record.into());
    }

    record.black = Some(viewer.owner_id.clone());
    record.status = MatchStatus::Active;
    record.updated_at = now_ms();
    save_match(state, &record).await?;
    info!(match_id = %id, owner_id = %viewer.owner_id, "black seat taken");

    events::broadcast_participant_joined(
        state,
        &id.to_string(),
        &viewer.owner_id,
        Some(Side::Black),
    )
    .await;
    Ok(record.into())
}

/// Apply a move submitted by a seated player and fan the new position out.
///
/// Re-submitting the position already on record is a no-op — replays and
/// double-clicks must not double-apply.
pub async fn submit_move(
    state: &SharedState,
    viewer: &Viewer,
    id: Uuid,
    request: MoveRequest,
) -> Result<MatchSnapshot, ServiceError> {
    let mut record = load_match(state, id).await?;

    if record.status == MatchStatus::Finished {
        return Err(ServiceError::InvalidState("match already finished".into()));
    }
    let Some(side) = record.side_of(&viewer.owner_id) else {
        return Err(ServiceError::InvalidState(
            "only seated players may move".into(),
        ));
    };
    if record.status == MatchStatus::Open {
        return Err(ServiceError::InvalidState(
            "waiting for the second player".into(),
        ));
    }

    if request.fen == record.fen {
        return Ok(record.into());
    }

    if state.engine().current_turn(&record.fen) != Some(side) {
        return Err(ServiceError::InvalidInput("not your turn".into()));
    }

    let submission = MoveSubmission {
        san: request.san.clone(),
        fen_after: request.fen,
        claimed_outcome: request.outcome,
    };
    let applied = state.engine().apply_move(&record.fen, &submission)?;
    let terminal = applied
        .outcome
        .or_else(|| state.engine().is_terminal(&applied.fen));

    let now = now_ms();
    record.fen = applied.fen.clone();
    record.move_count += 1;
    record.updated_at = now;
    if let Some(outcome) = terminal {
        record.status = MatchStatus::Finished;
        record.outcome = Some(outcome);
    }
    save_match(state, &record).await?;
    append_move(
        state,
        id,
        MoveRecord {
            san: submission.san.clone(),
            fen: applied.fen.clone(),
            by: viewer.owner_id.clone(),
            played_at: now,
        },
    )
    .await;

    let scope = id.to_string();
    events::broadcast_state_changed(
        state,
        &scope,
        &applied.fen,
        Some(submission.san),
        &viewer.owner_id,
    )
    .await;
    if let Some(outcome) = record.outcome {
        info!(match_id = %id, ?outcome, "match finished");
        events::broadcast_scope_ended(state, &scope, outcome).await;
        rewards::settle(state, &record);
    }

    Ok(record.into())
}

/// Public snapshot of one match.
pub async fn get_match(state: &SharedState, id: Uuid) -> Result<MatchSnapshot, ServiceError> {
    Ok(load_match(state, id).await?.into())
}

/// Most recently active matches, newest first.
pub async fn list_recent(state: &SharedState) -> Result<Vec<MatchSnapshot>, ServiceError> {
    let store = state.store().require().await?;
    let ids = store
        .zrange_rev(RECENT_MATCHES_KEY, 0, RECENT_MATCHES_LIMIT - 1)
        .await?;

    let mut snapshots = Vec::with_capacity(ids.len());
    for raw in ids {
        let Ok(id) = raw.parse::<Uuid>() else {
            warn!(member = %raw, "skipping non-uuid entry in recent matches index");
            continue;
        };
        match load_match(state, id).await {
            Ok(record) => snapshots.push(record.into()),
            // index can outlive the record; skip rather than fail the listing
            Err(ServiceError::NotFound(_)) => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(snapshots)
}

/// Full move log of a match, oldest first.
pub async fn move_history(
    state: &SharedState,
    id: Uuid,
) -> Result<Vec<MoveHistoryEntry>, ServiceError> {
    // surface NotFound for unknown matches rather than an empty log
    load_match(state, id).await?;

    let store = state.store().require().await?;
    let raw_moves = store.lrange(&moves_key(id), 0, -1).await?;
    Ok(raw_moves
        .into_iter()
        .filter_map(|raw| match serde_json::from_str::<MoveRecord>(&raw) {
            Ok(record) => Some(record.into()),
            Err(err) => {
                warn!(match_id = %id, error = %err, "skipping unreadable move log entry");
                None
            }
        })
        .collect())
}

/// Load a match record, treating an unreadable row as unusable state.
pub(crate) async fn load_match(state: &SharedState, id: Uuid) -> Result<MatchRecord, ServiceError> {
    let store = state.store().require().await?;
    let Some(raw) = store.get(&match_key(id)).await? else {
        return Err(ServiceError::NotFound(format!("match `{id}` not found")));
    };
    serde_json::from_str(&raw).map_err(|err| {
        warn!(match_id = %id, error = %err, "match record failed to deserialize");
        ServiceError::InvalidState(format!("match `{id}` record is unreadable"))
    })
}

/// Persist a match record and refresh its slot in the recency index.
async fn save_match(state: &SharedState, record: &MatchRecord) -> Result<(), ServiceError> {
    let store = state.store().require().await?;
    let serialized = serde_json::to_string(record)
        .map_err(|err| ServiceError::InvalidState(format!("serialize match record: {err}")))?;
    store.put(&match_key(record.match_id), serialized).await?;
    store
        .zadd(
            RECENT_MATCHES_KEY,
            record.match_id.to_string(),
            record.updated_at as f64,
        )
        .await?;
    Ok(())
}

/// Append one entry to the match's move log; the log is advisory, so a
/// failed append is logged and swallowed.
async fn append_move(state: &SharedState, id: Uuid, entry: MoveRecord) {
    let serialized = match serde_json::to_string(&entry) {
        Ok(serialized) => serialized,
        Err(err) => {
            warn!(match_id = %id, error = %err, "failed to serialize move log entry");
            return;
        }
    };
    let append = async {
        let store = state.store().require().await?;
        store.rpush(&moves_key(id), serialized).await
    };
    if let Err(err) = append.await {
        warn!(match_id = %id, error = %err, "failed to append to move log");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::dao::memory::MemoryStore;
    use crate::dao::models::{EventPayload, MatchOutcome};
    use crate::error::ServiceError;

    const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPPPPPP/RNBQKBNR b KQkq e3 0 1";
    const AFTER_E5: &str = "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPPPPPP/RNBQKBNR w KQkq e6 0 2";

    async fn test_state() -> SharedState {
        let state = crate::state::AppState::new(AppConfig::default());
        state.install_store(Arc::new(MemoryStore::new())).await;
        state
    }

    fn viewer(id: &str) -> Viewer {
        Viewer {
            owner_id: id.into(),
            address: None,
        }
    }

    fn e4() -> MoveRequest {
        MoveRequest {
            san: "e4".into(),
            fen: AFTER_E4.into(),
            outcome: None,
        }
    }

    async fn seated_match(state: &SharedState) -> Uuid {
        let snapshot = create_match(state, &viewer("alice")).await.unwrap();
        join_match(state, &viewer("bob"), snapshot.id).await.unwrap();
        snapshot.id
    }

    #[tokio::test]
    async fn join_takes_the_black_seat_once() {
        let state = test_state().await;
        let id = seated_match(&state).await;

        let record = load_match(&state, id).await.unwrap();
        assert_eq!(record.white.as_deref(), Some("alice"));
        assert_eq!(record.black.as_deref(), Some("bob"));
        assert_eq!(record.status, MatchStatus::Active);

        // third viewer observes, seats unchanged
        let snapshot = join_match(&state, &viewer("carol"), id).await.unwrap();
        assert_eq!(snapshot.black.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn move_fans_out_scoped_and_excluding_the_mover() {
        let state = test_state().await;
        let id = seated_match(&state).await;
        // earlier lifecycle events are not what this test is about
        state.outbox().drain_all(now_ms()).await.unwrap();

        let snapshot = submit_move(&state, &viewer("alice"), id, e4()).await.unwrap();
        assert_eq!(snapshot.move_count, 1);
        assert_eq!(snapshot.fen, AFTER_E4);

        let drained = state.outbox().drain_all(now_ms()).await.unwrap();
        let state_changed: Vec<_> = drained
            .valid
            .iter()
            .filter(|envelope| matches!(envelope.payload, EventPayload::StateChanged { .. }))
            .collect();
        assert_eq!(state_changed.len(), 1);
        assert_eq!(state_changed[0].target_scope.as_deref(), Some(id.to_string().as_str()));
        assert_eq!(state_changed[0].exclude_owner_id.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn resubmitting_the_recorded_position_is_a_noop() {
        let state = test_state().await;
        let id = seated_match(&state).await;

        submit_move(&state, &viewer("alice"), id, e4()).await.unwrap();
        state.outbox().drain_all(now_ms()).await.unwrap();

        // the duplicate changes nothing and fans nothing out
        let snapshot = submit_move(&state, &viewer("alice"), id, e4()).await.unwrap();
        assert_eq!(snapshot.move_count, 1);
        let drained = state.outbox().drain_all(now_ms()).await.unwrap();
        assert!(drained.valid.is_empty());
    }

    #[tokio::test]
    async fn only_the_side_to_move_may_move() {
        let state = test_state().await;
        let id = seated_match(&state).await;

        let err = submit_move(&state, &viewer("bob"), id, e4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let err = submit_move(&state, &viewer("carol"), id, e4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn moves_are_rejected_until_both_seats_are_taken() {
        let state = test_state().await;
        let snapshot = create_match(&state, &viewer("alice")).await.unwrap();

        let err = submit_move(&state, &viewer("alice"), snapshot.id, e4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn claimed_outcome_finishes_the_match_and_fans_out_the_end() {
        let state = test_state().await;
        let id = seated_match(&state).await;
        submit_move(&state, &viewer("alice"), id, e4()).await.unwrap();
        state.outbox().drain_all(now_ms()).await.unwrap();

        let finishing = MoveRequest {
            san: "e5".into(),
            fen: AFTER_E5.into(),
            outcome: Some(MatchOutcome::Draw),
        };
        let snapshot = submit_move(&state, &viewer("bob"), id, finishing).await.unwrap();
        assert_eq!(snapshot.status, MatchStatus::Finished);
        assert_eq!(snapshot.outcome, Some(MatchOutcome::Draw));

        let drained = state.outbox().drain_all(now_ms()).await.unwrap();
        assert!(drained.valid.iter().any(|envelope| matches!(
            envelope.payload,
            EventPayload::ScopeEnded { .. }
        )));

        let err = submit_move(&state, &viewer("alice"), id, e4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[tokio::test]
    async fn move_log_grows_oldest_first() {
        let state = test_state().await;
        let id = seated_match(&state).await;
        submit_move(&state, &viewer("alice"), id, e4()).await.unwrap();

        let log = move_history(&state, id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].san, "e4");
        assert_eq!(log[0].by, "alice");
    }

    #[tokio::test]
    async fn recent_listing_returns_newest_first() {
        let state = test_state().await;
        let first = create_match(&state, &viewer("alice")).await.unwrap();
        let second = create_match(&state, &viewer("bob")).await.unwrap();
        // recency scores are epoch millis; make the touch strictly newer
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        join_match(&state, &viewer("carol"), first.id).await.unwrap();

        let listed = list_recent(&state).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|snapshot| snapshot.id).collect();
        // `first` was touched last by the join
        assert_eq!(ids.first(), Some(&first.id));
        assert!(ids.contains(&second.id));
    }
}
