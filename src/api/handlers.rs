//! Request Handlers
//!
//! Thin adapters: authenticate, call the round engine, shape the response.

use super::{auth::AuthPlayer, errors::ApiError, middleware::RequestId, models::*};
use crate::common::types::{CardPurchase, CatalogId, RoundId};
use crate::config::ApiConfig;
use crate::errors::BingoError;
use crate::games::engine::{Actor, Catalog, CatalogEntry, ClaimOutcome, RoundEngine, SyncState};
use crate::games::events::{EventBus, RoundView};
use crate::games::patterns::Shape;
use crate::metrics::GameMetrics;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use tracing::info;

/// Shared application state
pub struct AppState {
    pub engine: Arc<RoundEngine>,
    pub metrics: Arc<GameMetrics>,
    pub config: ApiConfig,
}

impl AppState {
    pub fn events(&self) -> &EventBus {
        self.engine.events()
    }
}

fn api_error(request_id: &RequestId) -> impl FnOnce(BingoError) -> ApiError + '_ {
    move |e| ApiError::from_bingo(request_id.0.clone(), e)
}

/// Health check handler
/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let live_round = state.engine.store().live_round().ok().flatten().map(|round| round.id);
    Json(HealthResponse {
        status: "Running".to_string(),
        live_round,
        active_rounds: state.engine.active_rounds(),
    })
}

/// GET /rounds/current
pub async fn current_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<CurrentRoundResponse>, ApiError> {
    let round = state.engine.store().live_round().map_err(api_error(&request_id))?;
    Ok(Json(CurrentRoundResponse {
        round: round.as_ref().map(RoundView::from),
    }))
}

/// POST /rounds
pub async fn open_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    AuthPlayer(player): AuthPlayer,
    Json(body): Json<OpenRoundRequest>,
) -> Result<(StatusCode, Json<RoundView>), ApiError> {
    let shape = body.shape.unwrap_or(Shape::AnyLine);
    let round = state
        .engine
        .open_round_for(&player, body.stake, shape)
        .map_err(api_error(&request_id))?;
    info!(request_id = %request_id.0, round_id = round.id, player_id = player.id, "round opened over HTTP");
    Ok((StatusCode::CREATED, Json(RoundView::from(&round))))
}

/// POST /rounds/:id/start
pub async fn start_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    AuthPlayer(player): AuthPlayer,
    Path(round_id): Path<RoundId>,
    Json(body): Json<StartRoundRequest>,
) -> Result<Json<RoundView>, ApiError> {
    let round = state
        .engine
        .start_round(&Actor::Player(player), round_id, body.countdown_secs)
        .map_err(api_error(&request_id))?;
    Ok(Json(RoundView::from(&round)))
}

/// POST /rounds/:id/abort
pub async fn abort_round_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    AuthPlayer(player): AuthPlayer,
    Path(round_id): Path<RoundId>,
) -> Result<Json<AbortResponse>, ApiError> {
    let summary = state
        .engine
        .abort_round(&Actor::Player(player), round_id)
        .await
        .map_err(api_error(&request_id))?;
    Ok(Json(AbortResponse::from(summary)))
}

/// GET /rounds/:id/catalog
pub async fn catalog_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    AuthPlayer(player): AuthPlayer,
    Path(round_id): Path<RoundId>,
) -> Result<Json<Catalog>, ApiError> {
    state
        .engine
        .catalog(player.id, round_id)
        .map(Json)
        .map_err(api_error(&request_id))
}

/// GET /rounds/:id/catalog/:catalog_id
pub async fn catalog_entry_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    AuthPlayer(_player): AuthPlayer,
    Path((round_id, catalog_id)): Path<(RoundId, CatalogId)>,
) -> Result<Json<CatalogEntry>, ApiError> {
    state
        .engine
        .catalog_entry(round_id, catalog_id)
        .map(Json)
        .map_err(api_error(&request_id))
}

/// POST /rounds/:id/cards/:catalog_id/view
pub async fn view_card_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    AuthPlayer(player): AuthPlayer,
    Path((round_id, catalog_id)): Path<(RoundId, CatalogId)>,
    Json(body): Json<ViewRequest>,
) -> Result<Json<ViewResponse>, ApiError> {
    let lock = state
        .engine
        .view_card(&player, round_id, catalog_id, body.viewing)
        .map_err(api_error(&request_id))?;
    Ok(Json(ViewResponse { catalog_id, state: lock }))
}

/// POST /rounds/:id/cards/:catalog_id/purchase
pub async fn purchase_card_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    AuthPlayer(player): AuthPlayer,
    Path((round_id, catalog_id)): Path<(RoundId, CatalogId)>,
) -> Result<(StatusCode, Json<PurchaseResponse>), ApiError> {
    let receipt = state
        .engine
        .purchase_card(&player, round_id, catalog_id)
        .map_err(api_error(&request_id))?;
    Ok((StatusCode::CREATED, Json(PurchaseResponse::from(receipt))))
}

/// GET /rounds/:id/cards
pub async fn my_cards_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    AuthPlayer(player): AuthPlayer,
    Path(round_id): Path<RoundId>,
) -> Result<Json<Vec<CardPurchase>>, ApiError> {
    state
        .engine
        .my_cards(player.id, round_id)
        .map(Json)
        .map_err(api_error(&request_id))
}

/// POST /rounds/:id/claims
pub async fn claim_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    AuthPlayer(player): AuthPlayer,
    Path(round_id): Path<RoundId>,
    Json(body): Json<ClaimRequest>,
) -> Result<Json<ClaimOutcome>, ApiError> {
    let marked = body.marked.into_iter().collect();
    state
        .engine
        .claim(&player, round_id, body.catalog_id, marked)
        .await
        .map(Json)
        .map_err(api_error(&request_id))
}

/// GET /players/me/sync
pub async fn sync_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    AuthPlayer(player): AuthPlayer,
) -> Result<Json<SyncState>, ApiError> {
    state
        .engine
        .sync(player.id)
        .await
        .map(Json)
        .map_err(api_error(&request_id))
}

/// PUT /players/me/preferences
pub async fn preferences_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    AuthPlayer(player): AuthPlayer,
    Json(body): Json<PreferencesRequest>,
) -> Result<Json<PlayerResponse>, ApiError> {
    let player = state
        .engine
        .update_preferences(player.id, body.auto_claim)
        .await
        .map_err(api_error(&request_id))?;
    Ok(Json(PlayerResponse::from(&player)))
}

/// Prometheus text exposition
/// GET /metrics
pub async fn metrics_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.render().map_err(api_error(&request_id))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
