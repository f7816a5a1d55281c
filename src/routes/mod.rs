use axum::Router;

use crate::state::SharedState;

/// Diagnostics and maintenance endpoints.
pub mod admin;
/// OpenAPI document and Swagger UI.
pub mod docs;
/// Match lifecycle endpoints.
pub mod game;
/// Health endpoints.
pub mod health;
/// Event stream endpoints.
pub mod stream;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(stream::router())
        .merge(game::router())
        .merge(admin::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
