//! Shared type definitions for the bingo round core
//!
//! Canonical persisted records (rounds, card purchases, players, ledger
//! entries) used by the store, the engine and the API layer.

use crate::cards::CardGrid;
use crate::games::patterns::Shape;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type RoundId = u64;
pub type PlayerId = u64;
pub type PurchaseId = u64;
pub type LedgerId = u64;
/// Label under which a card layout is offered before purchase
pub type CatalogId = u32;

/// Round lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Pending,
    Active,
    Finished,
    Aborted,
}

impl RoundStatus {
    /// Pending or active; at most one such round exists at a time
    pub fn is_live(self) -> bool {
        matches!(self, RoundStatus::Pending | RoundStatus::Active)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Pending => write!(f, "pending"),
            RoundStatus::Active => write!(f, "active"),
            RoundStatus::Finished => write!(f, "finished"),
            RoundStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Who opened a round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Opener {
    /// Automatic scheduler
    System,
    Player { player_id: PlayerId, username: String },
}

impl Opener {
    pub fn is_system(&self) -> bool {
        matches!(self, Opener::System)
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        match self {
            Opener::System => None,
            Opener::Player { player_id, .. } => Some(*player_id),
        }
    }
}

/// Persisted round record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub id: RoundId,
    /// Sequential per UTC day, starting at 1
    pub display_id: u32,
    pub status: RoundStatus,
    /// Price of one card
    pub stake: u64,
    /// Prize pool accumulated from purchases
    pub pool: u64,
    pub shape: Shape,
    pub opener: Opener,
    #[serde(default)]
    pub special: bool,
    #[serde(default)]
    pub winner_ids: Vec<PlayerId>,
    pub created_at: DateTime<Utc>,
}

/// Persisted card purchase, never mutated after insert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CardPurchase {
    pub id: PurchaseId,
    pub player_id: PlayerId,
    pub round_id: RoundId,
    pub catalog_id: CatalogId,
    pub grid: CardGrid,
    pub purchased_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlayerRole {
    #[default]
    Player,
    Admin,
    SuperAdmin,
}

/// Player account as seen by the round core; owned by the account subsystem
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    pub balance: u64,
    #[serde(default)]
    pub role: PlayerRole,
    pub session_token: String,
    #[serde(default)]
    pub premium_expires_at: Option<DateTime<Utc>>,
    /// Opt-in for automatic claiming, honoured only while premium is active
    #[serde(default = "default_auto_claim")]
    pub auto_claim: bool,
}

fn default_auto_claim() -> bool {
    true
}

impl Player {
    pub fn new(id: PlayerId, username: impl Into<String>, balance: u64, session_token: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            balance,
            role: PlayerRole::Player,
            session_token: session_token.into(),
            premium_expires_at: None,
            auto_claim: true,
        }
    }

    pub fn has_premium(&self, now: DateTime<Utc>) -> bool {
        self.premium_expires_at.map(|expiry| expiry > now).unwrap_or(false)
    }

    /// Premium and opted in
    pub fn auto_claims(&self, now: DateTime<Utc>) -> bool {
        self.auto_claim && self.has_premium(now)
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == PlayerRole::SuperAdmin
    }

    pub fn can_open_rounds(&self) -> bool {
        matches!(self.role, PlayerRole::Admin | PlayerRole::SuperAdmin)
    }
}

/// Kind of balance movement recorded in the ledger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    CardPurchase,
    RoundWin,
    RoundRefund,
    RecoveryRefund,
    ExcessWinnerRefund,
    DrawExhaustionRefund,
}

/// One debit or credit performed by the core, kept for reconciliation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: LedgerId,
    pub player_id: PlayerId,
    pub kind: LedgerKind,
    /// Signed: negative for debits
    pub amount: i64,
    pub related_player: Option<PlayerId>,
    pub round_id: Option<RoundId>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
