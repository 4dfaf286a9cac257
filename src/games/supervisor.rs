//! Crash recovery and the automatic round cycle

use crate::common::types::{LedgerKind, Opener, Round, RoundId, RoundStatus};
use crate::config::CycleConfig;
use crate::errors::{BingoError, BingoResult, ConflictError};
use crate::games::engine::RoundEngine;
use crate::games::events::GameEvent;
use crate::store::NewRound;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Rounds closed by [`CycleSupervisor::recover`]
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub rounds: Vec<RoundId>,
    pub players_refunded: usize,
    pub amount_refunded: u64,
}

pub struct CycleSupervisor {
    engine: Arc<RoundEngine>,
    config: CycleConfig,
}

impl CycleSupervisor {
    pub fn new(engine: Arc<RoundEngine>, config: CycleConfig) -> Self {
        Self { engine, config }
    }

    /// Abort and refund every round a previous process left pending or active
    pub fn recover(&self) -> BingoResult<RecoveryReport> {
        let store = self.engine.store();
        let mut report = RecoveryReport::default();

        for round in store.live_rounds()? {
            let summary = store.refund_round(round.id, LedgerKind::RecoveryRefund, RoundStatus::Aborted, Utc::now())?;
            warn!(
                round_id = round.id,
                previous = %round.status,
                players = summary.refunds.len(),
                refunded = summary.total(),
                "🔧 recovered stranded round"
            );
            self.engine.metrics().rounds_aborted.inc();
            self.engine.metrics().refunds_issued.inc_by(summary.refunds.len() as u64);
            report.rounds.push(round.id);
            report.players_refunded += summary.refunds.len();
            report.amount_refunded += summary.total();
        }

        if !report.rounds.is_empty() {
            self.engine.events().to_everyone(GameEvent::idle());
        }
        self.engine.metrics().live_rounds.set(0);
        info!(rounds = report.rounds.len(), refunded = report.amount_refunded, "recovery complete");
        Ok(report)
    }

    /// Parameters of the next automatic round; every n-th round of the day is special
    pub fn plan_next(&self, now: DateTime<Utc>) -> BingoResult<NewRound> {
        let display_id = self.engine.store().next_display_id(now)?;
        let special = display_id % self.config.special_every == 0;
        let (stake, shape) = if special {
            (self.config.special_stake, self.config.special_shape)
        } else {
            (self.config.base_stake, self.config.base_shape)
        };
        Ok(NewRound {
            stake,
            shape,
            opener: Opener::System,
            special,
        })
    }

    /// Open an automatic round unless one is already pending or active
    pub fn ensure_round(&self) -> BingoResult<Option<Round>> {
        if self.engine.store().live_round()?.is_some() {
            return Ok(None);
        }

        let plan = self.plan_next(Utc::now())?;
        let round = match self.engine.open_round(plan) {
            Ok(round) => round,
            // Someone else opened one in between
            Err(BingoError::Conflict(ConflictError::RoundAlreadyLive(_))) => return Ok(None),
            Err(e) => return Err(e),
        };

        if round.special {
            info!(round_id = round.id, display_id = round.display_id, "✨ special round offered");
            self.engine.schedule_expiry(round.id, self.config.special_expiry());
        }
        Ok(Some(round))
    }

    /// Keep a round on offer: after every round end (plus the configured delay)
    /// and on every poll tick
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let signal = self.engine.round_closed_signal();
            info!(
                poll_ms = self.config.poll_interval_ms,
                next_round_delay_ms = self.config.next_round_delay_ms,
                "round cycle started"
            );

            loop {
                if let Err(e) = self.ensure_round() {
                    error!(error = %e, "failed to offer the next round");
                }

                tokio::select! {
                    _ = signal.notified() => {
                        debug!("round closed, waiting before offering the next one");
                        tokio::time::sleep(self.config.next_round_delay()).await;
                    }
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                }
            }
        })
    }
}
