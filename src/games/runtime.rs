//! In-memory state of active rounds
//!
//! A [`RoundRuntime`] exists only while its round is `active`: it is inserted
//! into the [`RuntimeTable`] on activation and removed on every terminal
//! transition. Timer tasks belonging to the round are held as abort handles
//! and cancelled on the way out.

use crate::cards::{generator::NUMBER_UNIVERSE, CardGrid};
use crate::common::types::{CatalogId, PlayerId, PurchaseId, Round, RoundId};
use crate::games::patterns::Shape;
use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

/// A purchased card as seen by the draw loop
#[derive(Debug, Clone)]
pub struct ParticipantCard {
    pub purchase_id: PurchaseId,
    pub player_id: PlayerId,
    pub username: String,
    pub catalog_id: CatalogId,
    pub grid: CardGrid,
    /// Premium and opted into automatic claiming
    pub auto_claim: bool,
}

pub struct RoundRuntime {
    pub round_id: RoundId,
    pub display_id: u32,
    pub shape: Shape,
    pub stake: u64,
    pub cards: Vec<ParticipantCard>,
    drawn: Vec<u8>,
    drawn_set: HashSet<u8>,
    winners: Vec<PlayerId>,
    ending: bool,
    settled: bool,
    draw_task: Option<AbortHandle>,
    settle_task: Option<AbortHandle>,
}

impl RoundRuntime {
    pub fn new(round: &Round, cards: Vec<ParticipantCard>) -> Self {
        Self {
            round_id: round.id,
            display_id: round.display_id,
            shape: round.shape,
            stake: round.stake,
            cards,
            drawn: Vec::new(),
            drawn_set: HashSet::new(),
            winners: Vec::new(),
            ending: false,
            settled: false,
            draw_task: None,
            settle_task: None,
        }
    }

    /// Draw history in order
    pub fn drawn(&self) -> &[u8] {
        &self.drawn
    }

    pub fn drawn_set(&self) -> &HashSet<u8> {
        &self.drawn_set
    }

    pub fn last_drawn(&self) -> Option<u8> {
        self.drawn.last().copied()
    }

    pub fn exhausted(&self) -> bool {
        self.drawn.len() >= NUMBER_UNIVERSE as usize
    }

    /// Draw one number uniformly from those not yet drawn
    pub fn draw_number<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<u8> {
        let remaining: Vec<u8> = (1..=NUMBER_UNIVERSE)
            .filter(|n| !self.drawn_set.contains(n))
            .collect();
        let number = *remaining.choose(rng)?;
        self.drawn.push(number);
        self.drawn_set.insert(number);
        Some(number)
    }

    pub fn card(&self, player_id: PlayerId, catalog_id: CatalogId) -> Option<&ParticipantCard> {
        self.cards
            .iter()
            .find(|card| card.player_id == player_id && card.catalog_id == catalog_id)
    }

    pub fn winners(&self) -> &[PlayerId] {
        &self.winners
    }

    pub fn is_winner(&self, player_id: PlayerId) -> bool {
        self.winners.contains(&player_id)
    }

    /// Returns false when the player already qualified
    pub fn add_winner(&mut self, player_id: PlayerId) -> bool {
        if self.is_winner(player_id) {
            return false;
        }
        self.winners.push(player_id);
        true
    }

    pub fn is_ending(&self) -> bool {
        self.ending
    }

    /// Set the ending flag; true only for the first caller
    pub fn begin_ending(&mut self) -> bool {
        !std::mem::replace(&mut self.ending, true)
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Set the settled flag; true only for the first caller
    pub fn mark_settled(&mut self) -> bool {
        self.ending = true;
        !std::mem::replace(&mut self.settled, true)
    }

    pub fn set_auto_claim(&mut self, player_id: PlayerId, enabled: bool) {
        for card in self.cards.iter_mut().filter(|card| card.player_id == player_id) {
            card.auto_claim = enabled;
        }
    }

    pub fn set_draw_task(&mut self, handle: AbortHandle) {
        if let Some(previous) = self.draw_task.replace(handle) {
            previous.abort();
        }
    }

    pub fn set_settle_task(&mut self, handle: AbortHandle) {
        if let Some(previous) = self.settle_task.replace(handle) {
            previous.abort();
        }
    }

    /// Forget the draw task without aborting it; used by the task itself on its way out
    pub fn detach_draw_task(&mut self) {
        self.draw_task = None;
    }

    pub fn detach_settle_task(&mut self) {
        self.settle_task = None;
    }

    pub fn cancel_draw_task(&mut self) {
        if let Some(handle) = self.draw_task.take() {
            handle.abort();
        }
    }

    pub fn cancel_timers(&mut self) {
        self.cancel_draw_task();
        if let Some(handle) = self.settle_task.take() {
            handle.abort();
        }
    }

    pub fn has_draw_task(&self) -> bool {
        self.draw_task.is_some()
    }
}

/// Timers that exist before a round has runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundTimer {
    /// Pending round counting down to activation
    Countdown,
    /// Special round waiting for players
    Expiry,
}

/// Owned table of runtime state, keyed by round
#[derive(Default)]
pub struct RuntimeTable {
    rounds: DashMap<RoundId, Arc<Mutex<RoundRuntime>>>,
    timers: DashMap<(RoundId, RoundTimer), AbortHandle>,
}

impl RuntimeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, runtime: RoundRuntime) -> Arc<Mutex<RoundRuntime>> {
        let round_id = runtime.round_id;
        let entry = Arc::new(Mutex::new(runtime));
        self.rounds.insert(round_id, entry.clone());
        entry
    }

    pub fn get(&self, round_id: RoundId) -> Option<Arc<Mutex<RoundRuntime>>> {
        self.rounds.get(&round_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, round_id: RoundId) -> Option<Arc<Mutex<RoundRuntime>>> {
        self.rounds.remove(&round_id).map(|(_, entry)| entry)
    }

    pub fn active_count(&self) -> usize {
        self.rounds.len()
    }

    /// Install a timer, aborting any earlier one of the same kind
    pub fn set_timer(&self, round_id: RoundId, timer: RoundTimer, handle: AbortHandle) {
        if let Some(previous) = self.timers.insert((round_id, timer), handle) {
            previous.abort();
        }
    }

    /// Install a timer unless one of the same kind exists; the rejected handle is aborted
    pub fn try_set_timer(&self, round_id: RoundId, timer: RoundTimer, handle: AbortHandle) -> bool {
        match self.timers.entry((round_id, timer)) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                handle.abort();
                false
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(handle);
                true
            }
        }
    }

    pub fn has_timer(&self, round_id: RoundId, timer: RoundTimer) -> bool {
        self.timers.contains_key(&(round_id, timer))
    }

    /// Remove a timer without aborting it; used by the timer task itself when it fires
    pub fn detach_timer(&self, round_id: RoundId, timer: RoundTimer) -> bool {
        self.timers.remove(&(round_id, timer)).is_some()
    }

    pub fn cancel_timer(&self, round_id: RoundId, timer: RoundTimer) {
        if let Some((_, handle)) = self.timers.remove(&(round_id, timer)) {
            handle.abort();
        }
    }

    pub fn cancel_round_timers(&self, round_id: RoundId) {
        self.cancel_timer(round_id, RoundTimer::Countdown);
        self.cancel_timer(round_id, RoundTimer::Expiry);
    }
}
