use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Administrative diagnostics payloads.
pub mod admin;
/// Match lifecycle payloads.
pub mod game;
/// Health endpoint payloads.
pub mod health;
/// Stream subscription payloads.
pub mod stream;
/// Validation helpers for DTOs.
pub mod validation;

/// Render an epoch-millis timestamp as RFC 3339 for diagnostic payloads.
pub(crate) fn format_epoch_ms(epoch_ms: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000)
        .ok()
        .and_then(|timestamp| timestamp.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}
