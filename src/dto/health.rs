use serde::Serialize;
use utoipa::ToSchema;

/// Health endpoint payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Overall service status, `ok` or `degraded`.
    pub status: &'static str,
    /// Whether the backend is running without a storage connection.
    pub degraded: bool,
}

impl HealthResponse {
    /// Healthy response.
    pub fn ok() -> Self {
        Self {
            status: "ok",
            degraded: false,
        }
    }

    /// Response for degraded (storage-less) mode.
    pub fn degraded() -> Self {
        Self {
            status: "degraded",
            degraded: true,
        }
    }
}
