use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::dao::models::ParticipantRole;
use crate::dto::validation::validate_scope_id;

/// Query parameters accepted when opening an event stream.
#[derive(Debug, Deserialize, IntoParams)]
pub struct EventStreamQuery {
    /// Match to subscribe to immediately; omit for the global feed only.
    pub game: Option<Uuid>,
}

/// Request to subscribe an existing stream to a match.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscribeRequest {
    /// Identifier of the match to follow.
    pub game: String,
}

impl Validate for SubscribeRequest {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if let Err(e) = validate_scope_id(&self.game) {
            errors.add("game", e);
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Confirmation of a subscription, with the derived role.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionResponse {
    /// Stream that was subscribed.
    pub connection_id: String,
    /// Match now followed.
    pub game: Uuid,
    /// Role derived from the match's seats.
    pub role: ParticipantRole,
    /// Which side, when the viewer holds a seat.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_detail: Option<String>,
}
