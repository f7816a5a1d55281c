//! Seam to the reward ledger collaborator.
//!
//! Match results trigger a fire-and-forget award; settlement itself (points,
//! on-chain credits) happens elsewhere and can never fail a game request.

use futures::future::BoxFuture;
use tracing::info;
use uuid::Uuid;

use crate::dao::models::{MatchOutcome, MatchRecord};
use crate::state::SharedState;

/// External ledger receiving match results.
pub trait RewardSink: Send + Sync {
    /// Record the outcome of a finished match.
    fn award(
        &self,
        match_id: Uuid,
        outcome: MatchOutcome,
        white: Option<String>,
        black: Option<String>,
    ) -> BoxFuture<'static, ()>;
}

/// Default sink that only logs what would be settled.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRewardSink;

impl RewardSink for LogRewardSink {
    fn award(
        &self,
        match_id: Uuid,
        outcome: MatchOutcome,
        white: Option<String>,
        black: Option<String>,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            info!(%match_id, ?outcome, ?white, ?black, "match result recorded for settlement");
        })
    }
}

/// Kick off settlement for a finished match without awaiting it.
pub fn settle(state: &SharedState, record: &MatchRecord) {
    let Some(outcome) = record.outcome else {
        return;
    };
    let award = state.rewards().award(
        record.match_id,
        outcome,
        record.white.clone(),
        record.black.clone(),
    );
    tokio::spawn(award);
}
