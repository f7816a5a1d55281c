use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

use crate::dao::models::{EventPayload, ParticipantRole, now_ms};
use crate::services::events;
use crate::state::SharedState;

/// Start the two periodic tasks owning a freshly opened stream: the outbox
/// poll loop and the keepalive pusher.
///
/// Each task stops on its own when the stream dies (channel closed, push
/// failure, durable row evicted); whichever notices first runs the teardown,
/// which is idempotent.
pub fn start(
    state: &SharedState,
    connection_id: &str,
    owner_id: &str,
    tx: &mpsc::UnboundedSender<EventPayload>,
) {
    tokio::spawn(poll_loop(
        state.clone(),
        connection_id.to_owned(),
        owner_id.to_owned(),
        tx.clone(),
    ));
    tokio::spawn(keepalive_loop(
        state.clone(),
        connection_id.to_owned(),
        owner_id.to_owned(),
        tx.clone(),
    ));
}

/// Drain the shared outbox on a fixed cadence, forward matching envelopes,
/// and refresh the durable heartbeat.
async fn poll_loop(
    state: SharedState,
    connection_id: String,
    owner_id: String,
    tx: mpsc::UnboundedSender<EventPayload>,
) {
    // Jitter the first tick so streams opened together do not drain in
    // lockstep against the shared table.
    let poll = state.config().poll_interval();
    let jitter = rand::rng().random_range(0..poll.as_millis().max(1) as u64);
    sleep(Duration::from_millis(jitter)).await;

    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            _ = ticker.tick() => {
                if !poll_tick(&state, &connection_id, &owner_id, &tx).await {
                    break;
                }
            }
        }
    }

    teardown(&state, &connection_id, &owner_id).await;
}

/// One poll pass. Returns `false` when the stream should be torn down.
async fn poll_tick(
    state: &SharedState,
    connection_id: &str,
    owner_id: &str,
    tx: &mpsc::UnboundedSender<EventPayload>,
) -> bool {
    // Unregistered elsewhere (dead channel eviction, admin clear): stop.
    let Some(subscriptions) = state.registry().subscriptions_of(connection_id) else {
        return false;
    };

    let now = now_ms();
    match state.outbox().drain_all(now).await {
        Ok(outcome) => {
            for envelope in outcome.valid {
                if !envelope.matches(&subscriptions, owner_id) {
                    continue;
                }
                if tx.send(envelope.payload).is_err() {
                    return false;
                }
            }
        }
        Err(err) => {
            // Storage hiccup: skip this pass, the next tick retries.
            debug!(connection_id, error = %err, "outbox drain failed");
        }
    }

    match state.connections().touch(connection_id, now).await {
        Ok(true) => true,
        Ok(false) => {
            // The durable row is gone — a TTL sweep evicted this connection.
            // An evicted connection stays evicted; the client reconnects
            // under a fresh id.
            info!(connection_id, "durable row evicted; closing stream");
            false
        }
        Err(err) => {
            warn!(connection_id, error = %err, "heartbeat refresh failed");
            true
        }
    }
}

/// Push a lightweight keepalive payload so intermediaries do not time out an
/// idle stream; a failed push means the stream is dead.
async fn keepalive_loop(
    state: SharedState,
    connection_id: String,
    owner_id: String,
    tx: mpsc::UnboundedSender<EventPayload>,
) {
    let mut ticker = interval(state.config().keepalive_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick of a tokio interval fires immediately; skip it so a new
    // stream is not greeted with a heartbeat before the connected ack settles
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            _ = ticker.tick() => {
                if tx.send(EventPayload::Heartbeat).is_err() {
                    break;
                }
            }
        }
    }

    teardown(&state, &connection_id, &owner_id).await;
}

/// Tear a stream down: drop the local registration, best-effort remove the
/// durable row, and fan out presence updates. Safe to call twice — only the
/// caller that actually unregisters does the work.
pub async fn teardown(state: &SharedState, connection_id: &str, owner_id: &str) {
    let Some(subscriptions) = state.registry().unregister(connection_id) else {
        return;
    };
    info!(connection_id, owner_id, "stream closed; tearing down");

    // Role comes from the durable row; read it before deleting.
    let role = match state.connections().get(connection_id).await {
        Ok(Some(record)) => record.role,
        _ => None,
    };

    if let Err(err) = state.connections().remove(connection_id).await {
        warn!(
            connection_id,
            error = %err,
            "failed to remove durable connection row; TTL sweep will reclaim it"
        );
    }

    for scope in &subscriptions {
        if role == Some(ParticipantRole::Player) {
            events::broadcast_participant_left(state, scope, owner_id).await;
        }
        events::broadcast_viewer_activity(state, Some(scope)).await;
    }
    events::broadcast_connection_stats(state).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::timeout;

    use super::*;
    use crate::config::AppConfig;
    use crate::dao::memory::MemoryStore;
    use crate::dao::models::{ConnectionRecord, EventEnvelope};
    use crate::state::AppState;

    async fn test_state() -> SharedState {
        let state = AppState::new(AppConfig::default());
        state.install_store(Arc::new(MemoryStore::new())).await;
        state
    }

    /// Open a fake stream: durable row, local registration, both loops.
    async fn open(
        state: &SharedState,
        connection_id: &str,
        owner_id: &str,
        scopes: &[&str],
    ) -> mpsc::UnboundedReceiver<EventPayload> {
        let now = now_ms();
        let mut record = ConnectionRecord::new(connection_id, owner_id, now);
        record.subscriptions = scopes.iter().map(|scope| scope.to_string()).collect();
        state.connections().put(&record).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        state.registry().register(
            connection_id,
            owner_id,
            tx.clone(),
            record.subscriptions.clone(),
        );
        start(state, connection_id, owner_id, &tx);
        rx
    }

    async fn next_matching(
        rx: &mut mpsc::UnboundedReceiver<EventPayload>,
        predicate: impl Fn(&EventPayload) -> bool,
    ) -> Option<EventPayload> {
        timeout(Duration::from_secs(60), async {
            while let Some(payload) = rx.recv().await {
                if predicate(&payload) {
                    return Some(payload);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_delivers_matching_envelopes_from_the_outbox() {
        let state = test_state().await;
        let mut rx = open(&state, "c1", "bob", &["game-a"]).await;

        // a producer in another process queues a scoped envelope
        let envelope = EventEnvelope::new(
            EventPayload::OutOfBandMessage { message: "hi".into() },
            Some("game-a".into()),
            Some("alice".into()),
            now_ms(),
            state.config().event_ttl_ms(),
        );
        state.outbox().publish(&envelope).await.unwrap();

        let received = next_matching(&mut rx, |payload| {
            matches!(payload, EventPayload::OutOfBandMessage { .. })
        })
        .await;
        assert!(received.is_some(), "scoped envelope never arrived");
    }

    #[tokio::test(start_paused = true)]
    async fn excluded_owner_never_receives_the_envelope() {
        let state = test_state().await;
        let mut rx = open(&state, "c1", "bob", &["game-a"]).await;

        let now = now_ms();
        let ttl = state.config().event_ttl_ms();
        // older envelope excludes bob; the marker behind it does not
        let excluded = EventEnvelope::new(
            EventPayload::OutOfBandMessage { message: "secret".into() },
            Some("game-a".into()),
            Some("bob".into()),
            now,
            ttl,
        );
        let marker = EventEnvelope::new(
            EventPayload::OutOfBandMessage { message: "marker".into() },
            Some("game-a".into()),
            None,
            now + 1,
            ttl,
        );
        state.outbox().publish(&excluded).await.unwrap();
        state.outbox().publish(&marker).await.unwrap();

        // delivery is oldest-first, so if the excluded envelope leaked it
        // would arrive ahead of the marker
        let first = next_matching(&mut rx, |payload| {
            matches!(payload, EventPayload::OutOfBandMessage { .. })
        })
        .await
        .expect("marker never arrived");
        match first {
            EventPayload::OutOfBandMessage { message } => assert_eq!(message, "marker"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_stream_tears_the_connection_down() {
        let state = test_state().await;
        let rx = open(&state, "c1", "bob", &[]).await;

        drop(rx);
        // let both loops observe the closed channel and tear down
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(state.registry().count_for(None), 0);
        let row = state.connections().get("c1").await.unwrap();
        assert!(row.is_none(), "durable row survived teardown");
    }

    #[tokio::test(start_paused = true)]
    async fn evicted_durable_row_closes_the_stream() {
        let state = test_state().await;
        let _rx = open(&state, "c1", "bob", &[]).await;

        // a TTL sweep elsewhere removed the row
        state.connections().remove("c1").await.unwrap();

        timeout(Duration::from_secs(60), async {
            while state.registry().count_for(None) > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .expect("stream was not torn down after its row vanished");
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_payloads_flow_on_an_idle_stream() {
        let state = test_state().await;
        let mut rx = open(&state, "c1", "bob", &[]).await;

        let heartbeat =
            next_matching(&mut rx, |payload| matches!(payload, EventPayload::Heartbeat)).await;
        assert!(heartbeat.is_some(), "no keepalive within the window");
    }
}
