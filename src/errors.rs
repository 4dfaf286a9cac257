//! Error types for the bingo round core
//!
//! Errors are grouped the way callers react to them: validation problems are
//! reported back unchanged, conflicts mean "pick another card / the round moved
//! on", storage failures are rolled back and surfaced as a generic failure.

use crate::common::types::{CatalogId, PlayerId, RoundId, RoundStatus};
use thiserror::Error;

/// Root error type for all bingo operations
#[derive(Debug, Error)]
pub enum BingoError {
    /// Bad input from the requester, nothing changed
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Lost a race or the round moved on; the caller may retry with another choice
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Persistence failures, always rolled back
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication failed")]
    Unauthenticated,

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),
}

/// Synchronous validation failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("stake must be greater than zero")]
    InvalidStake,

    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: u64, required: u64 },

    #[error("card #{0} already selected")]
    DuplicateCard(CatalogId),

    #[error("max cards reached ({max} per player)")]
    MaxCardsReached { max: usize },

    #[error("catalog id {0} is out of range")]
    InvalidCatalogId(CatalogId),

    #[error("premium entitlement required")]
    PremiumRequired,

    #[error("invalid countdown: {0}")]
    InvalidCountdown(String),

    #[error("amount overflow: {0}")]
    AmountOverflow(String),
}

/// Concurrency conflicts, reported with a specific signal rather than a generic failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("card #{0} is taken, try another card")]
    CardTaken(CatalogId),

    #[error("card #{catalog_id} is being viewed by player {viewer}")]
    CardBeingViewed { catalog_id: CatalogId, viewer: PlayerId },

    #[error("round {round_id} is closed ({status})")]
    RoundClosed { round_id: RoundId, status: RoundStatus },

    #[error("round {0} is already pending or active")]
    RoundAlreadyLive(RoundId),

    #[error("round {0} is already counting down")]
    AlreadyStarting(RoundId),

    #[error("settlement of round {0} is in progress")]
    SettlementInProgress(RoundId),
}

/// Storage system errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database open failed: {0}")]
    OpenFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

impl BingoError {
    pub fn not_found(what: impl Into<String>) -> Self {
        BingoError::NotFound(what.into())
    }

    pub fn round_closed(round_id: RoundId, status: RoundStatus) -> Self {
        BingoError::Conflict(ConflictError::RoundClosed { round_id, status })
    }

    /// True when the caller is expected to retry with a different choice
    pub fn is_conflict(&self) -> bool {
        matches!(self, BingoError::Conflict(_))
    }
}

#[cfg(feature = "persistent")]
impl From<rocksdb::Error> for BingoError {
    fn from(e: rocksdb::Error) -> Self {
        BingoError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<serde_json::Error> for BingoError {
    fn from(e: serde_json::Error) -> Self {
        BingoError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

// Convenience type alias for Results
pub type BingoResult<T> = Result<T, BingoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err: BingoError = ValidationError::InsufficientBalance { balance: 5, required: 10 }.into();

        assert!(err.to_string().contains("Validation error"));
        assert!(err.to_string().contains("have 5, need 10"));
    }

    #[test]
    fn test_conflict_classification() {
        let err: BingoError = ConflictError::CardTaken(7).into();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("try another card"));

        let err = BingoError::not_found("round 3");
        assert!(!err.is_conflict());
        assert_eq!(err.to_string(), "round 3 not found");
    }

    #[test]
    fn test_round_closed_carries_status() {
        let err = BingoError::round_closed(4, RoundStatus::Finished);
        assert!(err.to_string().contains("round 4 is closed (finished)"));
    }
}
