use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Gambit Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::stream::open_events,
        crate::routes::stream::subscribe,
        crate::routes::game::create_game,
        crate::routes::game::join_game,
        crate::routes::game::submit_move,
        crate::routes::game::get_game,
        crate::routes::game::list_games,
        crate::routes::game::move_history,
        crate::routes::admin::diagnostics,
        crate::routes::admin::cleanup,
        crate::routes::admin::clear_events,
        crate::routes::admin::broadcast,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::stream::SubscribeRequest,
            crate::dto::stream::SubscriptionResponse,
            crate::dto::game::MoveRequest,
            crate::dto::game::MatchSnapshot,
            crate::dto::game::MoveHistoryEntry,
            crate::dto::admin::DiagnosticsResponse,
            crate::dto::admin::CleanupResponse,
            crate::dto::admin::ClearResponse,
            crate::dto::admin::BroadcastRequest,
            crate::dao::models::EventPayload,
            crate::dao::models::Side,
            crate::dao::models::MatchOutcome,
            crate::dao::models::MatchStatus,
            crate::dao::models::ParticipantRole,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "stream", description = "Server-sent event streams and subscriptions"),
        (name = "game", description = "Match lifecycle operations"),
        (name = "admin", description = "Diagnostics and maintenance operations"),
    )
)]
pub struct ApiDoc;
