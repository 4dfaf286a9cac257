//! Settlement of a finished round
//!
//! The payout decision is a pure function of pool, winner count and the
//! excess-winner threshold. Executing it is one store transaction: either
//! every credit plus the status change lands, or nothing does and the round
//! stays where it was for manual remediation.

use crate::common::types::{LedgerKind, PlayerId, Round, RoundId, RoundStatus};
use crate::errors::BingoResult;
use crate::store::{GameStore, RefundSummary};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What to do with a round's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementPlan {
    NoWinner,
    /// Floor division; `remainder` stays with the house
    Split { share: u64, remainder: u64 },
    /// Too many simultaneous winners: void the round and refund stakes
    ExcessWinners,
}

impl SettlementPlan {
    pub fn decide(pool: u64, winner_count: usize, max_winners: usize) -> Self {
        match winner_count {
            0 => SettlementPlan::NoWinner,
            n if n > max_winners => SettlementPlan::ExcessWinners,
            n => {
                let n = n as u64;
                SettlementPlan::Split {
                    share: pool / n,
                    remainder: pool % n,
                }
            }
        }
    }
}

/// Result of executing a plan
#[derive(Debug, Clone)]
pub enum SettlementOutcome {
    NoWinner { round: Round },
    Paid {
        round: Round,
        winners: Vec<PlayerId>,
        share: u64,
        remainder: u64,
    },
    Refunded { summary: RefundSummary, winners: Vec<PlayerId> },
}

impl SettlementOutcome {
    pub fn round(&self) -> &Round {
        match self {
            SettlementOutcome::NoWinner { round } => round,
            SettlementOutcome::Paid { round, .. } => round,
            SettlementOutcome::Refunded { summary, .. } => &summary.round,
        }
    }
}

pub struct SettlementEngine {
    store: Arc<GameStore>,
    max_winners: usize,
}

impl SettlementEngine {
    pub fn new(store: Arc<GameStore>, max_winners: usize) -> Self {
        Self { store, max_winners }
    }

    /// Apply the payout rule for `winners` to a live round
    pub fn execute(&self, round_id: RoundId, winners: &[PlayerId], now: DateTime<Utc>) -> BingoResult<SettlementOutcome> {
        let round = self
            .store
            .round(round_id)?
            .ok_or_else(|| crate::errors::BingoError::not_found(format!("round {}", round_id)))?;

        let plan = SettlementPlan::decide(round.pool, winners.len(), self.max_winners);
        info!(round_id, pool = round.pool, winners = winners.len(), ?plan, "settling round");

        let result = match plan {
            SettlementPlan::NoWinner => self
                .store
                .transition_round(round_id, &[RoundStatus::Pending, RoundStatus::Active], RoundStatus::Finished)
                .map(|round| SettlementOutcome::NoWinner { round }),
            SettlementPlan::Split { share, remainder } => self
                .store
                .pay_winners(round_id, winners, share, now)
                .map(|round| SettlementOutcome::Paid {
                    round,
                    winners: winners.to_vec(),
                    share,
                    remainder,
                }),
            SettlementPlan::ExcessWinners => {
                warn!(round_id, winners = winners.len(), max = self.max_winners, "excess winners, refunding stakes");
                self.store
                    .refund_round(round_id, LedgerKind::ExcessWinnerRefund, RoundStatus::Aborted, now)
                    .map(|summary| SettlementOutcome::Refunded {
                        summary,
                        winners: winners.to_vec(),
                    })
            }
        };

        if let Err(e) = &result {
            error!(round_id, error = %e, "settlement failed, round left for manual remediation");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::catalog_card;
    use crate::common::types::{Opener, Player};
    use crate::games::patterns::Shape;
    use crate::store::{NewRound, PurchaseRequest};

    #[test]
    fn test_even_split() {
        assert_eq!(
            SettlementPlan::decide(210, 3, 3),
            SettlementPlan::Split { share: 70, remainder: 0 }
        );
    }

    #[test]
    fn test_remainder_retained() {
        assert_eq!(
            SettlementPlan::decide(101, 2, 3),
            SettlementPlan::Split { share: 50, remainder: 1 }
        );
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(SettlementPlan::decide(100, 0, 3), SettlementPlan::NoWinner);
        assert_eq!(SettlementPlan::decide(100, 4, 3), SettlementPlan::ExcessWinners);
        assert_eq!(
            SettlementPlan::decide(100, 4, 5),
            SettlementPlan::Split { share: 25, remainder: 0 }
        );
    }

    /// Four players with one card each in an active round; pool = 4 * 8
    fn active_round(store: &Arc<GameStore>) -> Round {
        for id in 1..=4 {
            store.upsert_player(Player::new(id, format!("p{}", id), 100, "t")).unwrap();
        }
        let round = store
            .create_round(
                NewRound { stake: 10, shape: Shape::AnyLine, opener: Opener::System, special: false },
                Utc::now(),
            )
            .unwrap();
        for id in 1..=4u64 {
            store
                .purchase_card(
                    PurchaseRequest {
                        player_id: id,
                        round_id: round.id,
                        catalog_id: id as u32,
                        grid: catalog_card(id as u32, round.id),
                        max_cards: 5,
                        pool_share_percent: 80,
                    },
                    Utc::now(),
                )
                .unwrap();
        }
        store
            .transition_round(round.id, &[RoundStatus::Pending], RoundStatus::Active)
            .unwrap()
    }

    #[test]
    fn test_two_winners_paid() {
        let store = Arc::new(GameStore::in_memory());
        let round = active_round(&store);
        let engine = SettlementEngine::new(store.clone(), 3);

        let outcome = engine.execute(round.id, &[1, 2], Utc::now()).unwrap();
        assert_eq!(outcome.round().status, RoundStatus::Finished);
        assert_eq!(outcome.round().winner_ids, vec![1, 2]);
        assert!(matches!(outcome, SettlementOutcome::Paid { share: 16, remainder: 0, .. }));

        assert_eq!(store.player(1).unwrap().unwrap().balance, 90 + 16);
        assert_eq!(store.player(3).unwrap().unwrap().balance, 90);
        let wins: Vec<_> = store
            .ledger_for(2)
            .unwrap()
            .into_iter()
            .filter(|entry| entry.kind == LedgerKind::RoundWin)
            .collect();
        assert_eq!(wins.len(), 1);
        assert_eq!(wins[0].amount, 16);
    }

    #[test]
    fn test_four_winners_abort_with_full_refunds() {
        let store = Arc::new(GameStore::in_memory());
        let round = active_round(&store);
        let engine = SettlementEngine::new(store.clone(), 3);

        let outcome = engine.execute(round.id, &[1, 2, 3, 4], Utc::now()).unwrap();
        assert_eq!(outcome.round().status, RoundStatus::Aborted);
        for id in 1..=4 {
            // Stake back in full, not a quarter of the pool
            assert_eq!(store.player(id).unwrap().unwrap().balance, 100);
        }
    }

    #[test]
    fn test_zero_winners_finishes_without_payout() {
        let store = Arc::new(GameStore::in_memory());
        let round = active_round(&store);
        let engine = SettlementEngine::new(store.clone(), 3);

        let outcome = engine.execute(round.id, &[], Utc::now()).unwrap();
        assert!(matches!(outcome, SettlementOutcome::NoWinner { .. }));
        assert_eq!(store.player(1).unwrap().unwrap().balance, 90);
    }

    #[test]
    fn test_settling_twice_fails_without_paying_twice() {
        let store = Arc::new(GameStore::in_memory());
        let round = active_round(&store);
        let engine = SettlementEngine::new(store.clone(), 3);

        engine.execute(round.id, &[1], Utc::now()).unwrap();
        assert!(engine.execute(round.id, &[1], Utc::now()).is_err());
        assert_eq!(store.player(1).unwrap().unwrap().balance, 90 + 32);
    }
}
