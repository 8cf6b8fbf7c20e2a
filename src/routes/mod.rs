use axum::{Router, middleware};

use crate::state::SharedState;

pub mod docs;
pub mod game;
pub mod health;
pub mod monitor;
pub mod rate_limit;
pub mod websocket;

/// Compose all route trees. The REST surface is rate-limited per client;
/// the WebSocket upgrade and docs are not.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .nest("/api/game", game::router())
        .nest("/api/monitor", monitor::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit,
        ));

    let docs_router = docs::router(state.clone());

    api_router
        .merge(websocket::router())
        .merge(docs_router)
        .with_state(state)
}
