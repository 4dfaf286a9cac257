//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::{handlers::*, websocket::websocket_handler};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>, metrics_enabled: bool) -> Router {
    let router = Router::new()
        .route("/health", get(health_handler))
        // Lobby and round management
        .route("/rounds", post(open_round_handler))
        .route("/rounds/current", get(current_round_handler))
        .route("/rounds/:id/start", post(start_round_handler))
        .route("/rounds/:id/abort", post(abort_round_handler))
        // Card selection
        .route("/rounds/:id/catalog", get(catalog_handler))
        .route("/rounds/:id/catalog/:catalog_id", get(catalog_entry_handler))
        .route("/rounds/:id/cards", get(my_cards_handler))
        .route("/rounds/:id/cards/:catalog_id/view", post(view_card_handler))
        .route("/rounds/:id/cards/:catalog_id/purchase", post(purchase_card_handler))
        // Play
        .route("/rounds/:id/claims", post(claim_handler))
        .route("/players/me/sync", get(sync_handler))
        .route("/players/me/preferences", put(preferences_handler))
        // Real-time channel
        .route("/ws", get(websocket_handler));

    // Metrics endpoint for Prometheus
    let router = if metrics_enabled {
        router.route("/metrics", get(metrics_handler))
    } else {
        router
    };
    router.with_state(state)
}
