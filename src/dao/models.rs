use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Current wall-clock time as epoch milliseconds.
///
/// Table entries store raw epoch millis so records written by one process can
/// be aged out by another without sharing anything beyond the clock.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// One logical viewer stream, as recorded in the shared connection table.
///
/// The row outlives the process that created it; any process can age it out
/// once `last_heartbeat` falls behind the connection TTL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionRecord {
    /// Opaque identifier minted when the stream was opened.
    pub connection_id: String,
    /// Stable viewer identity; survives reconnects, unlike the connection id.
    pub owner_id: String,
    /// Optional secondary identity (e.g. a linked wallet), attached lazily.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_address: Option<String>,
    /// When the stream was opened (epoch millis).
    pub connected_at: u64,
    /// Last heartbeat refresh (epoch millis); drives TTL eviction.
    pub last_heartbeat: u64,
    /// Scope identifiers this connection subscribed to. The global feed is
    /// implicit and never appears here.
    #[serde(default)]
    pub subscriptions: BTreeSet<String>,
    /// Classification within a subscribed scope, derived from that scope's
    /// own state rather than stored as ground truth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ParticipantRole>,
    /// Detail for `role`, e.g. which side a player holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_detail: Option<String>,
}

impl ConnectionRecord {
    /// Build a fresh record for a stream opened at `now`.
    pub fn new(connection_id: impl Into<String>, owner_id: impl Into<String>, now: u64) -> Self {
        Self {
            connection_id: connection_id.into(),
            owner_id: owner_id.into(),
            owner_address: None,
            connected_at: now,
            last_heartbeat: now,
            subscriptions: BTreeSet::new(),
            role: None,
            role_detail: None,
        }
    }

    /// Whether the heartbeat is still within `ttl_ms` of `now`.
    pub fn is_live(&self, now: u64, ttl_ms: u64) -> bool {
        now.saturating_sub(self.last_heartbeat) < ttl_ms
    }
}

/// How a connection relates to a match it subscribed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// Seated player in the match.
    Player,
    /// Spectator with no seat.
    Observer,
}

/// A transient, TTL-bounded message queued in the shared event outbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Opaque unique identifier, also the outbox field key.
    pub event_id: String,
    /// The message itself.
    pub payload: EventPayload,
    /// When set, only connections subscribed to this scope may consume the
    /// event; absent means the global feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_scope: Option<String>,
    /// Originating viewer, skipped during delivery so actions are not echoed
    /// back to their author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_owner_id: Option<String>,
    /// Creation time (epoch millis).
    pub created_at: u64,
    /// Hard deadline (epoch millis); past it the envelope is discarded, never
    /// delivered.
    pub expires_at: u64,
}

impl EventEnvelope {
    /// Mint an envelope expiring `ttl_ms` after `now`.
    pub fn new(
        payload: EventPayload,
        target_scope: Option<String>,
        exclude_owner_id: Option<String>,
        now: u64,
        ttl_ms: u64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().simple().to_string(),
            payload,
            target_scope,
            exclude_owner_id,
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
        }
    }

    /// Whether the TTL window has closed as of `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Whether a connection with the given subscriptions and owner should
    /// receive this envelope.
    pub fn matches(&self, subscriptions: &BTreeSet<String>, owner_id: &str) -> bool {
        if self
            .exclude_owner_id
            .as_deref()
            .is_some_and(|excluded| excluded == owner_id)
        {
            return false;
        }
        match self.target_scope.as_deref() {
            Some(scope) => subscriptions.contains(scope),
            None => true,
        }
    }
}

/// Closed set of payloads pushed down viewer streams and through the outbox.
///
/// The `kind` tag is the wire-level discriminator; entries whose tag is
/// unknown fail to deserialize and are swept as corrupted rather than passed
/// through.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// Acknowledgement sent first on every new stream.
    Connected {
        /// Identifier assigned to the freshly opened stream.
        connection_id: String,
    },
    /// Ignorable keepalive so intermediaries do not time out idle streams.
    Heartbeat,
    /// Aggregate connection counts.
    ConnectionStats {
        /// Active rows in the shared connection table (authoritative total).
        total: usize,
        /// Live streams registered in this process.
        local: usize,
    },
    /// The match position changed.
    StateChanged {
        /// Match the new position belongs to.
        game_id: String,
        /// Full position after the move, FEN-encoded.
        fen: String,
        /// Move in standard algebraic notation, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        san: Option<String>,
        /// Viewer who played the move; lets clients suppress their own echo.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        by: Option<String>,
    },
    /// A viewer took a seat in the match.
    ParticipantJoined {
        /// Match joined.
        game_id: String,
        /// Viewer who joined.
        owner_id: String,
        /// Seat taken, absent for observers.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        side: Option<Side>,
    },
    /// A seated viewer left the match.
    ParticipantLeft {
        /// Match left.
        game_id: String,
        /// Viewer who left.
        owner_id: String,
    },
    /// The match reached a terminal state.
    ScopeEnded {
        /// Match that ended.
        game_id: String,
        /// Final result.
        outcome: MatchOutcome,
    },
    /// Spectator count changed for a scope (or globally when absent).
    ViewerActivity {
        /// Scope the count applies to; absent for the global feed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        game_id: Option<String>,
        /// Number of active viewers.
        viewers: usize,
    },
    /// Free-form broadcast outside the match state flow.
    OutOfBandMessage {
        /// Message body.
        message: String,
    },
}

impl EventPayload {
    /// Wire-level tag, used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Connected { .. } => "connected",
            EventPayload::Heartbeat => "heartbeat",
            EventPayload::ConnectionStats { .. } => "connection_stats",
            EventPayload::StateChanged { .. } => "state_changed",
            EventPayload::ParticipantJoined { .. } => "participant_joined",
            EventPayload::ParticipantLeft { .. } => "participant_left",
            EventPayload::ScopeEnded { .. } => "scope_ended",
            EventPayload::ViewerActivity { .. } => "viewer_activity",
            EventPayload::OutOfBandMessage { .. } => "out_of_band_message",
        }
    }
}

/// Chess side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// White pieces.
    White,
    /// Black pieces.
    Black,
}

/// Terminal result of a match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    /// White won.
    WhiteWins,
    /// Black won.
    BlackWins,
    /// Drawn by agreement, stalemate, or material.
    Draw,
}

/// Lifecycle of a stored match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Waiting for the second player.
    Open,
    /// Both seats taken, moves being played.
    Active,
    /// Terminal; the outcome field is set.
    Finished,
}

/// Stored record of one match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRecord {
    /// Stable match identifier; its string form is the subscription scope.
    pub match_id: Uuid,
    /// Current position, FEN-encoded.
    pub fen: String,
    /// Owner id seated as white.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white: Option<String>,
    /// Owner id seated as black.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub black: Option<String>,
    /// Lifecycle state.
    pub status: MatchStatus,
    /// Final result once `status` is finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<MatchOutcome>,
    /// Creation time (epoch millis).
    pub created_at: u64,
    /// Last state change (epoch millis).
    pub updated_at: u64,
    /// Number of moves applied so far.
    pub move_count: u32,
}

impl MatchRecord {
    /// Seat held by `owner_id`, if any.
    pub fn side_of(&self, owner_id: &str) -> Option<Side> {
        if self.white.as_deref() == Some(owner_id) {
            Some(Side::White)
        } else if self.black.as_deref() == Some(owner_id) {
            Some(Side::Black)
        } else {
            None
        }
    }
}

/// One entry of a match's append-only move log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoveRecord {
    /// Move in standard algebraic notation.
    pub san: String,
    /// Position after the move.
    pub fen: String,
    /// Viewer who played it.
    pub by: String,
    /// When it was applied (epoch millis).
    pub played_at: u64,
}
