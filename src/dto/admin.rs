use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dao::connection_table::ConnectionSweep;
use crate::dao::event_outbox::OutboxEntry;
use crate::dao::models::{ConnectionRecord, ParticipantRole};
use crate::dto::format_epoch_ms;

/// Aggregate view of the connection and event tables.
#[derive(Debug, Serialize, ToSchema)]
pub struct DiagnosticsResponse {
    /// Whether the backend is running without a storage connection.
    pub degraded: bool,
    /// Active rows in the shared connection table (authoritative total; each
    /// physical connection contributes exactly one row).
    pub total_connections: usize,
    /// Live streams registered in this process; a subset of the total, never
    /// added to it.
    pub local_connections: usize,
    /// Active viewer count per subscribed scope, in first-seen order.
    pub viewers_per_scope: IndexMap<String, usize>,
    /// Active connections.
    pub connections: Vec<ConnectionSummary>,
    /// Pending outbox entries, including expired and corrupt ones.
    pub outbox: Vec<OutboxEntryReport>,
}

/// One active connection row.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionSummary {
    /// Connection identifier.
    pub connection_id: String,
    /// Stable viewer identity.
    pub owner_id: String,
    /// Subscribed scopes.
    pub subscriptions: Vec<String>,
    /// Derived role, when subscribed to a match.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ParticipantRole>,
    /// When the stream was opened, RFC 3339.
    pub connected_at: String,
    /// Last heartbeat refresh, RFC 3339.
    pub last_heartbeat: String,
}

impl From<ConnectionRecord> for ConnectionSummary {
    fn from(record: ConnectionRecord) -> Self {
        Self {
            connection_id: record.connection_id,
            owner_id: record.owner_id,
            subscriptions: record.subscriptions.into_iter().collect(),
            role: record.role,
            connected_at: format_epoch_ms(record.connected_at),
            last_heartbeat: format_epoch_ms(record.last_heartbeat),
        }
    }
}

/// One outbox entry as seen by a non-destructive peek.
#[derive(Debug, Serialize, ToSchema)]
pub struct OutboxEntryReport {
    /// Event identifier.
    pub event_id: String,
    /// Payload tag, absent when the entry did not parse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// TTL window has closed.
    pub is_expired: bool,
    /// Entry failed to deserialize.
    pub is_corrupted: bool,
    /// Creation time, RFC 3339, when the entry parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Deadline, RFC 3339, when the entry parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl From<OutboxEntry> for OutboxEntryReport {
    fn from(entry: OutboxEntry) -> Self {
        Self {
            event_id: entry.event_id,
            kind: entry.kind,
            is_expired: entry.is_expired,
            is_corrupted: entry.is_corrupted,
            created_at: entry.created_at.map(format_epoch_ms),
            expires_at: entry.expires_at.map(format_epoch_ms),
        }
    }
}

/// Counts reported by an explicit garbage-collection pass.
#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupResponse {
    /// Connections evicted for a missed heartbeat.
    pub connections_evicted_stale: usize,
    /// Connection rows discarded because they failed to deserialize.
    pub connections_evicted_corrupt: usize,
    /// Events discarded because their TTL passed.
    pub events_expired: usize,
    /// Event entries discarded because they failed to deserialize.
    pub events_corrupted: usize,
}

impl CleanupResponse {
    /// Combine the two sweep results into one report.
    pub fn from_sweeps(connections: ConnectionSweep, events: (usize, usize)) -> Self {
        Self {
            connections_evicted_stale: connections.evicted_stale,
            connections_evicted_corrupt: connections.evicted_corrupt,
            events_expired: events.0,
            events_corrupted: events.1,
        }
    }
}

/// Counts reported by the destructive clear operation.
#[derive(Debug, Serialize, ToSchema)]
pub struct ClearResponse {
    /// Pending events dropped, valid ones included.
    pub events_cleared: usize,
    /// Dead connections evicted alongside.
    pub connections_evicted: usize,
}

/// Operator message to broadcast on the global feed.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct BroadcastRequest {
    /// Message body.
    #[validate(length(min = 1, max = 500))]
    pub message: String,
}
