//! RocksDB backend
//!
//! Each record lives under a typed key prefix with a zero-padded id so prefix
//! scans come back in id order. Values are JSON.

use super::persistence::{Mutation, Persistence};
use crate::common::types::{CardPurchase, LedgerEntry, Player, Round};
use crate::errors::{BingoError, BingoResult, StorageError};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const PLAYER_PREFIX: &str = "player:";
const ROUND_PREFIX: &str = "round:";
const CARD_PREFIX: &str = "card:";
const LEDGER_PREFIX: &str = "ledger:";

fn record_key(prefix: &str, id: u64) -> Vec<u8> {
    format!("{}{:020}", prefix, id).into_bytes()
}

fn mutation_key(mutation: &Mutation) -> Vec<u8> {
    match mutation {
        Mutation::PutPlayer(player) => record_key(PLAYER_PREFIX, player.id),
        Mutation::PutRound(round) => record_key(ROUND_PREFIX, round.id),
        Mutation::PutCard(card) => record_key(CARD_PREFIX, card.id),
        Mutation::PutLedger(entry) => record_key(LEDGER_PREFIX, entry.id),
    }
}

fn mutation_value(mutation: &Mutation) -> BingoResult<Vec<u8>> {
    let bytes = match mutation {
        Mutation::PutPlayer(player) => serde_json::to_vec(player),
        Mutation::PutRound(round) => serde_json::to_vec(round),
        Mutation::PutCard(card) => serde_json::to_vec(card),
        Mutation::PutLedger(entry) => serde_json::to_vec(entry),
    };
    bytes.map_err(|e| BingoError::Storage(StorageError::WriteFailed(format!("Failed to encode record: {}", e))))
}

#[derive(Clone)]
pub struct RocksPersistence {
    db: Arc<DB>,
}

impl RocksPersistence {
    pub fn open<P: AsRef<Path>>(path: P) -> BingoResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path.as_ref())
            .map_err(|e| StorageError::OpenFailed(format!("{}: {}", path.as_ref().display(), e)))?;
        info!(path = %path.as_ref().display(), "opened rocksdb store");
        Ok(Self { db: Arc::new(db) })
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> BingoResult<Vec<T>> {
        let mut records = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));

        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let record = serde_json::from_slice(&value).map_err(|e| {
                StorageError::CorruptedData(format!(
                    "Failed to decode {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ))
            })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl Persistence for RocksPersistence {
    fn persist(&self, batch: &[Mutation]) -> BingoResult<()> {
        let mut write = WriteBatch::default();
        for mutation in batch {
            write.put(mutation_key(mutation), mutation_value(mutation)?);
        }
        self.db.write(write)?;
        Ok(())
    }

    fn load(&self) -> BingoResult<Vec<Mutation>> {
        let mut records: Vec<Mutation> = Vec::new();
        records.extend(self.scan::<Player>(PLAYER_PREFIX)?.into_iter().map(Mutation::PutPlayer));
        records.extend(self.scan::<Round>(ROUND_PREFIX)?.into_iter().map(Mutation::PutRound));
        records.extend(self.scan::<CardPurchase>(CARD_PREFIX)?.into_iter().map(Mutation::PutCard));
        records.extend(self.scan::<LedgerEntry>(LEDGER_PREFIX)?.into_iter().map(Mutation::PutLedger));
        Ok(records)
    }

    fn name(&self) -> &'static str {
        "rocksdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_sort_by_id() {
        assert!(record_key(ROUND_PREFIX, 9) < record_key(ROUND_PREFIX, 10));
        assert_eq!(
            String::from_utf8(record_key(CARD_PREFIX, 42)).unwrap(),
            "card:00000000000000000042"
        );
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = RocksPersistence::open(dir.path()).unwrap();
            backend
                .persist(&[
                    Mutation::PutPlayer(Player::new(2, "kebede", 10, "b")),
                    Mutation::PutPlayer(Player::new(1, "almaz", 20, "a")),
                ])
                .unwrap();
        }

        let backend = RocksPersistence::open(dir.path()).unwrap();
        let records = backend.load().unwrap();
        assert_eq!(records.len(), 2);
        match &records[0] {
            Mutation::PutPlayer(player) => assert_eq!(player.username, "almaz"),
            other => panic!("unexpected record {:?}", other),
        }
    }
}
