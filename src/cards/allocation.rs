//! Preview and purchase locks for pending rounds

use crate::cards::generator::BASE_CATALOG_SIZE;
use crate::common::types::{CatalogId, PlayerId, RoundId};
use crate::errors::ConflictError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Preview/lock state of one catalog id in a pending round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardLockState {
    pub viewers: BTreeSet<PlayerId>,
    pub locked_by: Option<PlayerId>,
}

impl CardLockState {
    pub fn is_locked(&self) -> bool {
        self.locked_by.is_some()
    }
}

/// How many catalog ids are offered for a round
#[derive(Debug, Clone, Copy)]
pub struct SupplyPolicy {
    /// Ids 1..=base are always offered
    pub base_size: CatalogId,
    /// Extra slots per connected player once demand outgrows the base catalog
    pub slots_per_player: CatalogId,
    /// Fall back to overflow ids when fewer unused slots than this remain
    pub min_free_slots: CatalogId,
}

impl Default for SupplyPolicy {
    fn default() -> Self {
        Self {
            base_size: BASE_CATALOG_SIZE,
            slots_per_player: 5,
            min_free_slots: 10,
        }
    }
}

impl SupplyPolicy {
    /// Highest catalog id to offer given the connected players and the locks taken so far
    pub fn upper_bound(&self, connected_players: usize, locked: &BTreeSet<CatalogId>) -> CatalogId {
        let base_locked = locked.range(..=self.base_size).count() as CatalogId;
        let base_free = self.base_size.saturating_sub(base_locked);
        if base_free >= self.min_free_slots {
            return self.base_size;
        }

        let demand = (connected_players as CatalogId)
            .saturating_mul(self.slots_per_player)
            .saturating_add(self.slots_per_player);
        let needed = (locked.len() as CatalogId).saturating_add(self.min_free_slots);
        demand.max(needed).max(self.base_size)
    }
}

/// Process-wide preview/lock table, keyed by round then catalog id.
///
/// Every check-and-set happens while holding the round's map entry, so two
/// concurrent lock attempts on the same card can never both succeed.
pub struct CardAllocationRegistry {
    rounds: DashMap<RoundId, HashMap<CatalogId, CardLockState>>,
}

impl CardAllocationRegistry {
    pub fn new() -> Self {
        Self {
            rounds: DashMap::new(),
        }
    }

    /// Start previewing a card; only one viewer at a time and never a locked card
    pub fn enter_preview(
        &self,
        round_id: RoundId,
        catalog_id: CatalogId,
        player_id: PlayerId,
    ) -> Result<CardLockState, ConflictError> {
        let mut round = self.rounds.entry(round_id).or_default();
        let state = round.entry(catalog_id).or_default();

        if state.is_locked() {
            return Err(ConflictError::CardTaken(catalog_id));
        }
        if let Some(viewer) = state.viewers.iter().find(|viewer| **viewer != player_id) {
            return Err(ConflictError::CardBeingViewed {
                catalog_id,
                viewer: *viewer,
            });
        }

        state.viewers.insert(player_id);
        Ok(state.clone())
    }

    /// Stop previewing a card
    pub fn leave_preview(&self, round_id: RoundId, catalog_id: CatalogId, player_id: PlayerId) -> CardLockState {
        let mut round = self.rounds.entry(round_id).or_default();
        let state = round.entry(catalog_id).or_default();
        state.viewers.remove(&player_id);
        state.clone()
    }

    /// Claim the card for purchase before any store work happens.
    ///
    /// Rejects any existing holder, including the requester's own earlier
    /// attempt, so a double submit cannot slip through.
    pub fn try_lock(
        &self,
        round_id: RoundId,
        catalog_id: CatalogId,
        player_id: PlayerId,
    ) -> Result<CardLockState, ConflictError> {
        let mut round = self.rounds.entry(round_id).or_default();
        let state = round.entry(catalog_id).or_default();

        if state.is_locked() {
            return Err(ConflictError::CardTaken(catalog_id));
        }

        state.locked_by = Some(player_id);
        state.viewers.remove(&player_id);
        Ok(state.clone())
    }

    /// Undo a lock after a failed purchase; only the holder can release it
    pub fn release(&self, round_id: RoundId, catalog_id: CatalogId, player_id: PlayerId) -> Option<CardLockState> {
        let mut round = self.rounds.get_mut(&round_id)?;
        let state = round.get_mut(&catalog_id)?;
        if state.locked_by != Some(player_id) {
            return None;
        }
        state.locked_by = None;
        Some(state.clone())
    }

    /// Lock state of a single card
    pub fn state(&self, round_id: RoundId, catalog_id: CatalogId) -> CardLockState {
        self.rounds
            .get(&round_id)
            .and_then(|round| round.get(&catalog_id).cloned())
            .unwrap_or_default()
    }

    /// All known card states of a round
    pub fn snapshot(&self, round_id: RoundId) -> BTreeMap<CatalogId, CardLockState> {
        self.rounds
            .get(&round_id)
            .map(|round| round.iter().map(|(id, state)| (*id, state.clone())).collect())
            .unwrap_or_default()
    }

    pub fn locked_ids(&self, round_id: RoundId) -> BTreeSet<CatalogId> {
        self.rounds
            .get(&round_id)
            .map(|round| {
                round
                    .iter()
                    .filter(|(_, state)| state.is_locked())
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Forget a round once it leaves `pending`
    pub fn discard_round(&self, round_id: RoundId) -> bool {
        self.rounds.remove(&round_id).is_some()
    }

    /// Rounds currently tracked
    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }
}

impl Default for CardAllocationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_single_viewer_exclusivity() {
        let registry = CardAllocationRegistry::new();

        let state = registry.enter_preview(1, 7, 10).unwrap();
        assert!(state.viewers.contains(&10));

        // Same viewer re-entering is fine
        assert!(registry.enter_preview(1, 7, 10).is_ok());

        let err = registry.enter_preview(1, 7, 11).unwrap_err();
        assert_eq!(err, ConflictError::CardBeingViewed { catalog_id: 7, viewer: 10 });

        let state = registry.leave_preview(1, 7, 10);
        assert!(state.viewers.is_empty());
        assert!(registry.enter_preview(1, 7, 11).is_ok());
    }

    #[test]
    fn test_preview_rejected_once_locked() {
        let registry = CardAllocationRegistry::new();
        registry.try_lock(1, 3, 10).unwrap();

        assert_eq!(registry.enter_preview(1, 3, 11).unwrap_err(), ConflictError::CardTaken(3));
    }

    #[test]
    fn test_lock_is_strict_even_for_holder() {
        let registry = CardAllocationRegistry::new();
        registry.enter_preview(1, 5, 10).unwrap();

        let state = registry.try_lock(1, 5, 10).unwrap();
        assert_eq!(state.locked_by, Some(10));
        assert!(state.viewers.is_empty());

        assert_eq!(registry.try_lock(1, 5, 10).unwrap_err(), ConflictError::CardTaken(5));
    }

    #[test]
    fn test_release_only_by_holder() {
        let registry = CardAllocationRegistry::new();
        registry.try_lock(1, 5, 10).unwrap();

        assert!(registry.release(1, 5, 11).is_none());
        assert!(registry.state(1, 5).is_locked());

        let state = registry.release(1, 5, 10).unwrap();
        assert!(!state.is_locked());
        assert!(registry.try_lock(1, 5, 11).is_ok());
    }

    #[test]
    fn test_concurrent_lock_attempts_single_winner() {
        let registry = Arc::new(CardAllocationRegistry::new());

        let handles: Vec<_> = (0..16u64)
            .map(|player| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.try_lock(1, 42, player).is_ok())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(registry.state(1, 42).is_locked());
    }

    #[test]
    fn test_rounds_are_isolated_and_discarded() {
        let registry = CardAllocationRegistry::new();
        registry.try_lock(1, 5, 10).unwrap();
        assert!(registry.try_lock(2, 5, 11).is_ok());

        assert!(registry.discard_round(1));
        assert!(registry.snapshot(1).is_empty());
        assert_eq!(registry.locked_ids(2).len(), 1);
    }

    #[test]
    fn test_supply_policy_keeps_base_catalog_until_nearly_full() {
        let policy = SupplyPolicy::default();
        let mut locked: BTreeSet<CatalogId> = (1..=80).collect();
        assert_eq!(policy.upper_bound(40, &locked), 100);

        // 91 taken leaves 9 free slots, below the threshold
        locked.extend(81..=91);
        let bound = policy.upper_bound(3, &locked);
        assert_eq!(bound, 101);

        // Many connected players widen the window proportionally
        assert_eq!(policy.upper_bound(30, &locked), 155);
    }
}
