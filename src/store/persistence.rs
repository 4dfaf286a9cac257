//! Durable backends behind the game store

use crate::common::types::{CardPurchase, LedgerEntry, Player, Round};
use crate::errors::{BingoResult, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One record write; a transaction is a list of these applied all-or-nothing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mutation {
    PutPlayer(Player),
    PutRound(Round),
    PutCard(CardPurchase),
    PutLedger(LedgerEntry),
}

/// Storage backend used by [`GameStore`](super::GameStore)
pub trait Persistence: Send + Sync {
    /// Write the whole batch atomically or nothing at all
    fn persist(&self, batch: &[Mutation]) -> BingoResult<()>;

    /// Every record currently stored, in an order safe to replay
    fn load(&self) -> BingoResult<Vec<Mutation>>;

    fn name(&self) -> &'static str;
}

impl<P: Persistence + ?Sized> Persistence for Arc<P> {
    fn persist(&self, batch: &[Mutation]) -> BingoResult<()> {
        (**self).persist(batch)
    }

    fn load(&self) -> BingoResult<Vec<Mutation>> {
        (**self).load()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// In-process backend for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryPersistence {
    records: Mutex<Vec<Mutation>>,
    fail_writes: AtomicBool,
    batches: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed records that `load` will return, as if written by an earlier process
    pub fn with_records(records: Vec<Mutation>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Make every following write fail, to exercise rollback paths
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of batches committed so far
    pub fn batches_written(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

impl Persistence for MemoryPersistence {
    fn persist(&self, batch: &[Mutation]) -> BingoResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("memory backend is refusing writes".to_string()).into());
        }
        let mut records = self.records.lock().map_err(|_| StorageError::LockPoisoned)?;
        records.extend_from_slice(batch);
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> BingoResult<Vec<Mutation>> {
        let records = self.records.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(records.clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_refuses_writes_on_demand() {
        let backend = MemoryPersistence::new();
        let player = Player::new(1, "almaz", 50, "tok");

        backend.persist(&[Mutation::PutPlayer(player.clone())]).unwrap();
        assert_eq!(backend.batches_written(), 1);

        backend.set_fail_writes(true);
        assert!(backend.persist(&[Mutation::PutPlayer(player)]).is_err());
        assert_eq!(backend.batches_written(), 1);
        assert_eq!(backend.load().unwrap().len(), 1);
    }
}
