//! Transactional record store
//!
//! All persisted records live in memory behind one lock. A transaction reads
//! the tables, validates, and produces a batch of [`Mutation`]s; the batch is
//! written to the backend first and only applied in memory once the write has
//! succeeded. A failed write therefore changes nothing on either side.

pub mod persistence;
#[cfg(feature = "persistent")]
pub mod rocks;

pub use persistence::{MemoryPersistence, Mutation, Persistence};
#[cfg(feature = "persistent")]
pub use rocks::RocksPersistence;

use crate::cards::CardGrid;
use crate::common::types::{
    CardPurchase, CatalogId, LedgerEntry, LedgerId, LedgerKind, Opener, Player, PlayerId, PurchaseId, Round,
    RoundId, RoundStatus,
};
use crate::errors::{BingoError, BingoResult, ConflictError, StorageError, ValidationError};
use crate::games::patterns::Shape;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, error, info};

#[derive(Default)]
struct Tables {
    players: BTreeMap<PlayerId, Player>,
    rounds: BTreeMap<RoundId, Round>,
    cards: BTreeMap<PurchaseId, CardPurchase>,
    ledger: BTreeMap<LedgerId, LedgerEntry>,
}

impl Tables {
    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::PutPlayer(player) => {
                self.players.insert(player.id, player);
            }
            Mutation::PutRound(round) => {
                self.rounds.insert(round.id, round);
            }
            Mutation::PutCard(card) => {
                self.cards.insert(card.id, card);
            }
            Mutation::PutLedger(entry) => {
                self.ledger.insert(entry.id, entry);
            }
        }
    }

    fn next_round_id(&self) -> RoundId {
        self.rounds.keys().next_back().map_or(1, |id| id + 1)
    }

    fn next_purchase_id(&self) -> PurchaseId {
        self.cards.keys().next_back().map_or(1, |id| id + 1)
    }

    fn next_ledger_id(&self) -> LedgerId {
        self.ledger.keys().next_back().map_or(1, |id| id + 1)
    }

    fn player(&self, player_id: PlayerId) -> BingoResult<&Player> {
        self.players
            .get(&player_id)
            .ok_or_else(|| BingoError::not_found(format!("player {}", player_id)))
    }

    fn round(&self, round_id: RoundId) -> BingoResult<&Round> {
        self.rounds
            .get(&round_id)
            .ok_or_else(|| BingoError::not_found(format!("round {}", round_id)))
    }

    fn live_round(&self) -> Option<&Round> {
        self.rounds.values().find(|round| round.status.is_live())
    }

    fn round_cards(&self, round_id: RoundId) -> impl Iterator<Item = &CardPurchase> {
        self.cards.values().filter(move |card| card.round_id == round_id)
    }

    fn rounds_created_on(&self, date: NaiveDate) -> u32 {
        self.rounds
            .values()
            .filter(|round| round.created_at.date_naive() == date)
            .count() as u32
    }
}

/// Parameters of a new round
#[derive(Debug, Clone)]
pub struct NewRound {
    pub stake: u64,
    pub shape: Shape,
    pub opener: Opener,
    pub special: bool,
}

/// Parameters of a card purchase
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub player_id: PlayerId,
    pub round_id: RoundId,
    pub catalog_id: CatalogId,
    pub grid: CardGrid,
    pub max_cards: usize,
    /// Share of the stake that goes into the prize pool
    pub pool_share_percent: u64,
}

#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    pub purchase: CardPurchase,
    pub round: Round,
    pub balance: u64,
    /// Cards the player now holds in the round
    pub cards_held: usize,
}

/// Outcome of refunding every purchase of a round
#[derive(Debug, Clone)]
pub struct RefundSummary {
    pub round: Round,
    /// Amount credited per player
    pub refunds: BTreeMap<PlayerId, u64>,
}

impl RefundSummary {
    pub fn total(&self) -> u64 {
        self.refunds.values().sum()
    }
}

/// Ledger ids handed out inside one transaction
struct LedgerWriter {
    next_id: LedgerId,
    now: DateTime<Utc>,
    entries: Vec<Mutation>,
}

impl LedgerWriter {
    fn new(tables: &Tables, now: DateTime<Utc>) -> Self {
        Self {
            next_id: tables.next_ledger_id(),
            now,
            entries: Vec::new(),
        }
    }

    fn record(&mut self, player_id: PlayerId, kind: LedgerKind, amount: i64, round_id: RoundId, description: String) {
        self.entries.push(Mutation::PutLedger(LedgerEntry {
            id: self.next_id,
            player_id,
            kind,
            amount,
            related_player: None,
            round_id: Some(round_id),
            description,
            created_at: self.now,
        }));
        self.next_id += 1;
    }

    fn into_mutations(self) -> Vec<Mutation> {
        self.entries
    }
}

fn signed(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

/// Overflow-checked money addition
fn credit(total: u64, amount: u64, what: &str) -> BingoResult<u64> {
    total
        .checked_add(amount)
        .ok_or_else(|| ValidationError::AmountOverflow(format!("{} {} + {}", what, total, amount)).into())
}

pub struct GameStore {
    tables: RwLock<Tables>,
    backend: Box<dyn Persistence>,
}

impl GameStore {
    /// Open a store over `backend`, replaying every record it holds
    pub fn open(backend: Box<dyn Persistence>) -> BingoResult<Self> {
        let mut tables = Tables::default();
        let records = backend.load()?;
        let count = records.len();
        for record in records {
            tables.apply(record);
        }
        info!(
            backend = backend.name(),
            records = count,
            rounds = tables.rounds.len(),
            players = tables.players.len(),
            "game store loaded"
        );
        Ok(Self {
            tables: RwLock::new(tables),
            backend,
        })
    }

    /// Ephemeral store for tests and throwaway runs
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            backend: Box::new(MemoryPersistence::new()),
        }
    }

    fn read(&self) -> BingoResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| BingoError::Storage(StorageError::LockPoisoned))
    }

    /// Run one all-or-nothing transaction
    fn transact<T>(&self, body: impl FnOnce(&Tables) -> BingoResult<(Vec<Mutation>, T)>) -> BingoResult<T> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| BingoError::Storage(StorageError::LockPoisoned))?;

        let (batch, output) = body(&tables)?;
        if let Err(e) = self.backend.persist(&batch) {
            error!(error = %e, mutations = batch.len(), "transaction rolled back");
            return Err(e);
        }
        for mutation in batch {
            tables.apply(mutation);
        }
        Ok(output)
    }

    // ---------------------------------------------------------------------
    // Players
    // ---------------------------------------------------------------------

    pub fn upsert_player(&self, player: Player) -> BingoResult<()> {
        self.transact(|_| Ok((vec![Mutation::PutPlayer(player)], ())))
    }

    pub fn player(&self, player_id: PlayerId) -> BingoResult<Option<Player>> {
        Ok(self.read()?.players.get(&player_id).cloned())
    }

    /// Resolve a connection's claimed identity
    pub fn authenticate(&self, player_id: PlayerId, session_token: &str) -> BingoResult<Player> {
        let tables = self.read()?;
        match tables.players.get(&player_id) {
            Some(player) if !session_token.is_empty() && player.session_token == session_token => Ok(player.clone()),
            _ => Err(BingoError::Unauthenticated),
        }
    }

    /// Toggle auto-claim; only players with an active premium entitlement may
    pub fn set_auto_claim(&self, player_id: PlayerId, enabled: bool, now: DateTime<Utc>) -> BingoResult<Player> {
        self.transact(|tables| {
            let mut player = tables.player(player_id)?.clone();
            if !player.has_premium(now) {
                return Err(ValidationError::PremiumRequired.into());
            }
            player.auto_claim = enabled;
            Ok((vec![Mutation::PutPlayer(player.clone())], player))
        })
    }

    pub fn ledger_for(&self, player_id: PlayerId) -> BingoResult<Vec<LedgerEntry>> {
        Ok(self
            .read()?
            .ledger
            .values()
            .filter(|entry| entry.player_id == player_id)
            .cloned()
            .collect())
    }

    // ---------------------------------------------------------------------
    // Rounds
    // ---------------------------------------------------------------------

    /// Insert a pending round. Fails while any other round is pending or active.
    pub fn create_round(&self, new_round: NewRound, now: DateTime<Utc>) -> BingoResult<Round> {
        if new_round.stake == 0 {
            return Err(ValidationError::InvalidStake.into());
        }

        self.transact(|tables| {
            if let Some(live) = tables.live_round() {
                return Err(ConflictError::RoundAlreadyLive(live.id).into());
            }

            let round = Round {
                id: tables.next_round_id(),
                display_id: tables.rounds_created_on(now.date_naive()) + 1,
                status: RoundStatus::Pending,
                stake: new_round.stake,
                pool: 0,
                shape: new_round.shape,
                opener: new_round.opener,
                special: new_round.special,
                winner_ids: Vec::new(),
                created_at: now,
            };
            debug!(round_id = round.id, display_id = round.display_id, "round row created");
            Ok((vec![Mutation::PutRound(round.clone())], round))
        })
    }

    pub fn round(&self, round_id: RoundId) -> BingoResult<Option<Round>> {
        Ok(self.read()?.rounds.get(&round_id).cloned())
    }

    pub fn live_round(&self) -> BingoResult<Option<Round>> {
        Ok(self.read()?.live_round().cloned())
    }

    /// Every pending or active round; more than one only after an inconsistent shutdown
    pub fn live_rounds(&self) -> BingoResult<Vec<Round>> {
        Ok(self
            .read()?
            .rounds
            .values()
            .filter(|round| round.status.is_live())
            .cloned()
            .collect())
    }

    /// Daily identifier the next round created at `now` would get
    pub fn next_display_id(&self, now: DateTime<Utc>) -> BingoResult<u32> {
        Ok(self.read()?.rounds_created_on(now.date_naive()) + 1)
    }

    /// Move a round to `to`, provided it currently sits in one of `from`
    pub fn transition_round(&self, round_id: RoundId, from: &[RoundStatus], to: RoundStatus) -> BingoResult<Round> {
        self.transact(|tables| {
            let mut round = tables.round(round_id)?.clone();
            if !from.contains(&round.status) {
                return Err(BingoError::round_closed(round_id, round.status));
            }
            round.status = to;
            Ok((vec![Mutation::PutRound(round.clone())], round))
        })
    }

    // ---------------------------------------------------------------------
    // Cards
    // ---------------------------------------------------------------------

    /// Debit the stake, insert the purchase and grow the pool in one transaction
    pub fn purchase_card(&self, request: PurchaseRequest, now: DateTime<Utc>) -> BingoResult<PurchaseReceipt> {
        self.transact(|tables| {
            let mut round = tables.round(request.round_id)?.clone();
            if round.status != RoundStatus::Pending {
                return Err(BingoError::round_closed(round.id, round.status));
            }

            let mut player = tables.player(request.player_id)?.clone();
            let mut held = 0usize;
            for card in tables.round_cards(round.id) {
                if card.catalog_id == request.catalog_id {
                    if card.player_id == player.id {
                        return Err(ValidationError::DuplicateCard(request.catalog_id).into());
                    }
                    return Err(ConflictError::CardTaken(request.catalog_id).into());
                }
                if card.player_id == player.id {
                    held += 1;
                }
            }
            if held >= request.max_cards {
                return Err(ValidationError::MaxCardsReached { max: request.max_cards }.into());
            }
            if player.balance < round.stake {
                return Err(ValidationError::InsufficientBalance {
                    balance: player.balance,
                    required: round.stake,
                }
                .into());
            }

            player.balance -= round.stake;
            round.pool = credit(round.pool, round.stake.saturating_mul(request.pool_share_percent) / 100, "pool")?;

            let purchase = CardPurchase {
                id: tables.next_purchase_id(),
                player_id: player.id,
                round_id: round.id,
                catalog_id: request.catalog_id,
                grid: request.grid,
                purchased_at: now,
            };

            let mut ledger = LedgerWriter::new(tables, now);
            ledger.record(
                player.id,
                LedgerKind::CardPurchase,
                -signed(round.stake),
                round.id,
                format!("Card #{} for round #{}", request.catalog_id, round.display_id),
            );

            let receipt = PurchaseReceipt {
                purchase: purchase.clone(),
                round: round.clone(),
                balance: player.balance,
                cards_held: held + 1,
            };

            let mut batch = vec![
                Mutation::PutPlayer(player),
                Mutation::PutCard(purchase),
                Mutation::PutRound(round),
            ];
            batch.extend(ledger.into_mutations());
            Ok((batch, receipt))
        })
    }

    pub fn cards_for_round(&self, round_id: RoundId) -> BingoResult<Vec<CardPurchase>> {
        Ok(self.read()?.round_cards(round_id).cloned().collect())
    }

    pub fn cards_of(&self, player_id: PlayerId, round_id: RoundId) -> BingoResult<Vec<CardPurchase>> {
        Ok(self
            .read()?
            .round_cards(round_id)
            .filter(|card| card.player_id == player_id)
            .cloned()
            .collect())
    }

    pub fn distinct_players(&self, round_id: RoundId) -> BingoResult<usize> {
        let tables = self.read()?;
        let players: BTreeSet<PlayerId> = tables.round_cards(round_id).map(|card| card.player_id).collect();
        Ok(players.len())
    }

    // ---------------------------------------------------------------------
    // Settlement
    // ---------------------------------------------------------------------

    /// Credit `share` to every winner and finish the round in one transaction
    pub fn pay_winners(
        &self,
        round_id: RoundId,
        winners: &[PlayerId],
        share: u64,
        now: DateTime<Utc>,
    ) -> BingoResult<Round> {
        self.transact(|tables| {
            let mut round = tables.round(round_id)?.clone();
            if !round.status.is_live() {
                return Err(BingoError::round_closed(round_id, round.status));
            }

            let mut batch = Vec::new();
            let mut ledger = LedgerWriter::new(tables, now);
            for winner in winners {
                let mut player = tables.player(*winner)?.clone();
                player.balance = credit(player.balance, share, "balance")?;
                ledger.record(
                    player.id,
                    LedgerKind::RoundWin,
                    signed(share),
                    round.id,
                    format!("Won round #{}", round.display_id),
                );
                batch.push(Mutation::PutPlayer(player));
            }

            round.status = RoundStatus::Finished;
            round.winner_ids = winners.to_vec();
            batch.push(Mutation::PutRound(round.clone()));
            batch.extend(ledger.into_mutations());
            Ok((batch, round))
        })
    }

    /// Return one stake per purchased card and close the round as `final_status`.
    ///
    /// Only a live round can be refunded, so each purchase is credited at most once.
    pub fn refund_round(
        &self,
        round_id: RoundId,
        kind: LedgerKind,
        final_status: RoundStatus,
        now: DateTime<Utc>,
    ) -> BingoResult<RefundSummary> {
        self.transact(|tables| {
            let mut round = tables.round(round_id)?.clone();
            if !round.status.is_live() {
                return Err(BingoError::round_closed(round_id, round.status));
            }

            let mut refunds: BTreeMap<PlayerId, u64> = BTreeMap::new();
            for card in tables.round_cards(round_id) {
                let owed = refunds.entry(card.player_id).or_default();
                *owed = credit(*owed, round.stake, "refund")?;
            }

            let mut batch = Vec::new();
            let mut ledger = LedgerWriter::new(tables, now);
            for (player_id, amount) in &refunds {
                let mut player = tables.player(*player_id)?.clone();
                player.balance = credit(player.balance, *amount, "balance")?;
                ledger.record(
                    *player_id,
                    kind,
                    signed(*amount),
                    round.id,
                    format!("Refund for round #{}", round.display_id),
                );
                batch.push(Mutation::PutPlayer(player));
            }

            round.status = final_status;
            batch.push(Mutation::PutRound(round.clone()));
            batch.extend(ledger.into_mutations());
            Ok((batch, RefundSummary { round, refunds }))
        })
    }
}
