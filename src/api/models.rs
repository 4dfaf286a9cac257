//! API Request and Response Models

use crate::cards::{CardGrid, CardLockState};
use crate::common::types::{CatalogId, Player, PlayerId, PurchaseId, RoundId};
use crate::games::events::RoundView;
use crate::games::patterns::Shape;
use crate::store::{PurchaseReceipt, RefundSummary};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub live_round: Option<RoundId>,
    pub active_rounds: usize,
}

/// GET /rounds/current
#[derive(Debug, Serialize)]
pub struct CurrentRoundResponse {
    pub round: Option<RoundView>,
}

/// POST /rounds
#[derive(Debug, Deserialize)]
pub struct OpenRoundRequest {
    pub stake: u64,
    /// Any line when omitted
    pub shape: Option<Shape>,
}

/// POST /rounds/:id/start
#[derive(Debug, Deserialize)]
pub struct StartRoundRequest {
    pub countdown_secs: u64,
}

/// POST /rounds/:id/cards/:catalog_id/view
#[derive(Debug, Deserialize)]
pub struct ViewRequest {
    pub viewing: bool,
}

/// POST /rounds/:id/claims
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub catalog_id: CatalogId,
    /// Numbers the player marked on that card
    #[serde(default)]
    pub marked: Vec<u8>,
}

/// PUT /players/me/preferences
#[derive(Debug, Deserialize)]
pub struct PreferencesRequest {
    pub auto_claim: bool,
}

/// Player as shown to themselves; never carries the session token
#[derive(Debug, Serialize, Deserialize)]
pub struct PlayerResponse {
    pub id: PlayerId,
    pub username: String,
    pub balance: u64,
    pub premium: bool,
    pub auto_claim: bool,
}

impl From<&Player> for PlayerResponse {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id,
            username: player.username.clone(),
            balance: player.balance,
            premium: player.has_premium(Utc::now()),
            auto_claim: player.auto_claim,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub purchase_id: PurchaseId,
    pub round_id: RoundId,
    pub catalog_id: CatalogId,
    pub grid: CardGrid,
    pub balance: u64,
    pub pool: u64,
    pub cards_held: usize,
}

impl From<PurchaseReceipt> for PurchaseResponse {
    fn from(receipt: PurchaseReceipt) -> Self {
        Self {
            purchase_id: receipt.purchase.id,
            round_id: receipt.purchase.round_id,
            catalog_id: receipt.purchase.catalog_id,
            grid: receipt.purchase.grid,
            balance: receipt.balance,
            pool: receipt.round.pool,
            cards_held: receipt.cards_held,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ViewResponse {
    pub catalog_id: CatalogId,
    pub state: CardLockState,
}

#[derive(Debug, Serialize)]
pub struct AbortResponse {
    pub round: RoundView,
    pub refunds: BTreeMap<PlayerId, u64>,
    pub total_refunded: u64,
}

impl From<RefundSummary> for AbortResponse {
    fn from(summary: RefundSummary) -> Self {
        Self {
            round: RoundView::from(&summary.round),
            total_refunded: summary.total(),
            refunds: summary.refunds,
        }
    }
}
