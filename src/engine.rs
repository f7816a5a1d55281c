//! Seam to the chess rule engine collaborator.
//!
//! The coordinator treats move legality as someone else's problem: it hands a
//! current position and a submission to a [`RuleEngine`] and gets back the
//! next position (or a rejection). The default [`FenRelay`] engine performs
//! structural checks only, trusting a validating client for full legality.

use thiserror::Error;

use crate::dao::models::{MatchOutcome, Side};

/// A move submitted by a player, carrying the position the client computed.
#[derive(Debug, Clone)]
pub struct MoveSubmission {
    /// Move in standard algebraic notation.
    pub san: String,
    /// Position after the move, FEN-encoded.
    pub fen_after: String,
    /// Terminal result claimed by the submitter, if the move ends the match.
    pub claimed_outcome: Option<MatchOutcome>,
}

/// Result of a successfully applied move.
#[derive(Debug, Clone)]
pub struct MoveApplied {
    /// Position after the move.
    pub fen: String,
    /// Terminal result, when the move ended the match.
    pub outcome: Option<MatchOutcome>,
}

/// Rejections raised by a rule engine.
#[derive(Debug, Error)]
pub enum RuleError {
    /// Submitted position is not structurally valid FEN.
    #[error("malformed FEN `{0}`")]
    MalformedFen(String),
    /// Submitted position does not hand the move to the other side.
    #[error("move does not alternate the side to move")]
    OutOfTurn,
    /// Current stored position is unreadable; the match record is unusable.
    #[error("stored position is not valid FEN")]
    CorruptPosition,
}

/// Opaque move-validator / state-transition oracle.
pub trait RuleEngine: Send + Sync {
    /// Validate `submission` against `current_fen` and produce the next
    /// position.
    fn apply_move(
        &self,
        current_fen: &str,
        submission: &MoveSubmission,
    ) -> Result<MoveApplied, RuleError>;

    /// Side to move in `fen`, when it parses.
    fn current_turn(&self, fen: &str) -> Option<Side>;

    /// Terminal result encoded in `fen`, when the engine can tell.
    fn is_terminal(&self, fen: &str) -> Option<MatchOutcome>;
}

/// Structural validator that trusts the submitting client for legality.
///
/// Checks that the submitted FEN is shaped like a position and that the side
/// to move alternates; everything deeper belongs to the real engine this
/// seam stands in for.
#[derive(Debug, Default, Clone, Copy)]
pub struct FenRelay;

impl RuleEngine for FenRelay {
    fn apply_move(
        &self,
        current_fen: &str,
        submission: &MoveSubmission,
    ) -> Result<MoveApplied, RuleError> {
        let before = side_to_move(current_fen).ok_or(RuleError::CorruptPosition)?;
        let after = side_to_move(&submission.fen_after)
            .ok_or_else(|| RuleError::MalformedFen(submission.fen_after.clone()))?;
        if before == after {
            return Err(RuleError::OutOfTurn);
        }

        Ok(MoveApplied {
            fen: submission.fen_after.clone(),
            outcome: submission.claimed_outcome,
        })
    }

    fn current_turn(&self, fen: &str) -> Option<Side> {
        side_to_move(fen)
    }

    fn is_terminal(&self, _fen: &str) -> Option<MatchOutcome> {
        // A position alone cannot be judged terminal without move generation;
        // the relay defers to the claimed outcome in apply_move.
        None
    }
}

/// Standard starting position.
pub const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Parse the side-to-move field out of a structurally valid FEN.
fn side_to_move(fen: &str) -> Option<Side> {
    let mut fields = fen.split_ascii_whitespace();
    let placement = fields.next()?;
    if placement.split('/').count() != 8 {
        return None;
    }
    let side = match fields.next()? {
        "w" => Side::White,
        "b" => Side::Black,
        _ => return None,
    };
    // a full FEN carries castling, en passant, halfmove, fullmove
    if fields.count() != 4 {
        return None;
    }
    Some(side)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPPPPPP/RNBQKBNR b KQkq e3 0 1";

    fn submission(fen_after: &str) -> MoveSubmission {
        MoveSubmission {
            san: "e4".into(),
            fen_after: fen_after.into(),
            claimed_outcome: None,
        }
    }

    #[test]
    fn relay_accepts_alternating_move() {
        let applied = FenRelay
            .apply_move(INITIAL_FEN, &submission(AFTER_E4))
            .unwrap();
        assert_eq!(applied.fen, AFTER_E4);
        assert!(applied.outcome.is_none());
    }

    #[test]
    fn relay_rejects_same_side_position() {
        let same_side = INITIAL_FEN;
        let err = FenRelay
            .apply_move(INITIAL_FEN, &submission(same_side))
            .unwrap_err();
        assert!(matches!(err, RuleError::OutOfTurn));
    }

    #[test]
    fn relay_rejects_garbage_fen() {
        let err = FenRelay
            .apply_move(INITIAL_FEN, &submission("definitely not chess"))
            .unwrap_err();
        assert!(matches!(err, RuleError::MalformedFen(_)));
    }

    #[test]
    fn turn_parses_from_fen() {
        assert_eq!(FenRelay.current_turn(INITIAL_FEN), Some(Side::White));
        assert_eq!(FenRelay.current_turn(AFTER_E4), Some(Side::Black));
        assert_eq!(FenRelay.current_turn("nope"), None);
    }
}
