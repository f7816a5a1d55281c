use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::dao::models::{MatchOutcome, MatchRecord, MatchStatus, MoveRecord};
use crate::dto::format_epoch_ms;
use crate::dto::validation::{validate_fen, validate_san};

/// A move submitted by a seated player.
///
/// The client ships the position it computed; the rule engine seam decides
/// whether to accept it.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MoveRequest {
    /// Move in standard algebraic notation.
    pub san: String,
    /// Position after the move, FEN-encoded.
    pub fen: String,
    /// Terminal result, when the client believes this move ends the match.
    #[serde(default)]
    pub outcome: Option<MatchOutcome>,
}

impl Validate for MoveRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_san(&self.san) {
            errors.add("san", e);
        }
        if let Err(e) = validate_fen(&self.fen) {
            errors.add("fen", e);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Public snapshot of one match.
#[derive(Debug, Serialize, ToSchema)]
pub struct MatchSnapshot {
    /// Match identifier; doubles as the stream subscription scope.
    pub id: Uuid,
    /// Current position, FEN-encoded.
    pub fen: String,
    /// Viewer seated as white.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub white: Option<String>,
    /// Viewer seated as black.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub black: Option<String>,
    /// Lifecycle state.
    pub status: MatchStatus,
    /// Final result, once finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MatchOutcome>,
    /// Number of moves applied so far.
    pub move_count: u32,
    /// Creation time, RFC 3339.
    pub created_at: String,
    /// Last state change, RFC 3339.
    pub updated_at: String,
}

impl From<MatchRecord> for MatchSnapshot {
    fn from(record: MatchRecord) -> Self {
        Self {
            id: record.match_id,
            fen: record.fen,
            white: record.white,
            black: record.black,
            status: record.status,
            outcome: record.outcome,
            move_count: record.move_count,
            created_at: format_epoch_ms(record.created_at),
            updated_at: format_epoch_ms(record.updated_at),
        }
    }
}

/// One entry of a match's move log.
#[derive(Debug, Serialize, ToSchema)]
pub struct MoveHistoryEntry {
    /// Move in standard algebraic notation.
    pub san: String,
    /// Position after the move.
    pub fen: String,
    /// Viewer who played it.
    pub by: String,
    /// When it was applied, RFC 3339.
    pub played_at: String,
}

impl From<MoveRecord> for MoveHistoryEntry {
    fn from(record: MoveRecord) -> Self {
        Self {
            san: record.san,
            fen: record.fen,
            by: record.by,
            played_at: format_epoch_ms(record.played_at),
        }
    }
}
