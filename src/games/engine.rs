//! Round engine
//!
//! Drives one round at a time through `pending -> active -> finished | aborted`.
//! Persisted state goes through the [`GameStore`]; per-round in-memory state
//! lives in the [`RuntimeTable`] from activation until the round ends. Every
//! timer (countdown, draw loop, settlement grace, special-round expiry) is a
//! spawned task whose abort handle is owned by the state it belongs to.

use crate::cards::{
    catalog_card, generator::MAX_CATALOG_ID, CardAllocationRegistry, CardGrid, CardLockState, SupplyPolicy,
};
use crate::common::types::{
    CardPurchase, CatalogId, LedgerKind, Opener, Player, PlayerId, Round, RoundId, RoundStatus,
};
use crate::config::GameConfig;
use crate::errors::{BingoError, BingoResult, ConflictError, ValidationError};
use crate::games::announcer::RoundAnnouncer;
use crate::games::events::{EventBus, GameEvent, RoundView};
use crate::games::patterns::{validate_claim, Shape};
use crate::games::runtime::{ParticipantCard, RoundRuntime, RoundTimer, RuntimeTable};
use crate::games::settlement::{SettlementEngine, SettlementOutcome};
use crate::metrics::GameMetrics;
use crate::store::{GameStore, NewRound, PurchaseReceipt, PurchaseRequest, RefundSummary};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Who is asking for a privileged round operation
#[derive(Debug, Clone)]
pub enum Actor {
    /// Scheduler, expiry timer, recovery
    System,
    Player(Player),
}

impl Actor {
    /// Opener of the round, a super admin, or the system
    fn may_manage(&self, round: &Round) -> bool {
        match self {
            Actor::System => true,
            Actor::Player(player) => player.is_super_admin() || round.opener.player_id() == Some(player.id),
        }
    }

    fn label(&self) -> String {
        match self {
            Actor::System => "system".to_string(),
            Actor::Player(player) => player.username.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub catalog_id: CatalogId,
    pub grid: CardGrid,
    pub state: CardLockState,
}

/// Cards offered for a pending round
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub round_id: RoundId,
    pub upper_bound: CatalogId,
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimOutcome {
    pub accepted: bool,
    pub message: String,
}

/// Everything a reconnecting client needs to redraw the lobby
#[derive(Debug, Clone, Serialize)]
pub struct SyncState {
    pub round: Option<RoundView>,
    pub drawn: Vec<u8>,
    pub last_drawn: Option<u8>,
    pub my_cards: Vec<CardPurchase>,
    pub card_states: BTreeMap<CatalogId, CardLockState>,
    pub balance: u64,
    pub premium: bool,
    pub auto_claim: bool,
}

/// What one draw-loop tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Drew(u8),
    /// A winner registered; the loop stops and settlement is pending
    Frozen,
    /// All numbers drawn without a winner; stakes were refunded
    Exhausted,
    /// No active round behind this id anymore
    Stopped,
}

pub struct RoundEngine {
    config: GameConfig,
    store: Arc<GameStore>,
    registry: CardAllocationRegistry,
    runtimes: RuntimeTable,
    events: EventBus,
    announcer: Arc<dyn RoundAnnouncer>,
    metrics: Arc<GameMetrics>,
    settlement: SettlementEngine,
    supply: SupplyPolicy,
    round_closed: Arc<Notify>,
}

impl RoundEngine {
    pub fn new(
        config: GameConfig,
        store: Arc<GameStore>,
        events: EventBus,
        announcer: Arc<dyn RoundAnnouncer>,
        metrics: Arc<GameMetrics>,
    ) -> Self {
        let supply = SupplyPolicy {
            base_size: config.base_catalog_size,
            slots_per_player: config.slots_per_player,
            min_free_slots: config.min_free_slots,
        };
        let settlement = SettlementEngine::new(store.clone(), config.max_winners);
        Self {
            config,
            store,
            registry: CardAllocationRegistry::new(),
            runtimes: RuntimeTable::new(),
            events,
            announcer,
            metrics,
            settlement,
            supply,
            round_closed: Arc::new(Notify::new()),
        }
    }

    pub fn store(&self) -> &Arc<GameStore> {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn registry(&self) -> &CardAllocationRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<GameMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Notified every time a round reaches a terminal state
    pub fn round_closed_signal(&self) -> Arc<Notify> {
        self.round_closed.clone()
    }

    pub fn active_rounds(&self) -> usize {
        self.runtimes.active_count()
    }

    fn pending_round(&self, round_id: RoundId) -> BingoResult<Round> {
        let round = self.load_round(round_id)?;
        if round.status != RoundStatus::Pending {
            return Err(BingoError::round_closed(round_id, round.status));
        }
        Ok(round)
    }

    fn load_round(&self, round_id: RoundId) -> BingoResult<Round> {
        self.store
            .round(round_id)?
            .ok_or_else(|| BingoError::not_found(format!("round {}", round_id)))
    }

    fn check_catalog_id(catalog_id: CatalogId) -> BingoResult<()> {
        if catalog_id == 0 || catalog_id > MAX_CATALOG_ID {
            return Err(ValidationError::InvalidCatalogId(catalog_id).into());
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Opening and starting
    // ---------------------------------------------------------------------

    /// Create a pending round; fails while another round is pending or active
    pub fn open_round(&self, new_round: NewRound) -> BingoResult<Round> {
        let round = self.store.create_round(new_round, Utc::now())?;
        self.metrics.rounds_opened.inc();
        self.refresh_live_gauge();
        info!(
            round_id = round.id,
            display_id = round.display_id,
            stake = round.stake,
            shape = %round.shape,
            special = round.special,
            "🎱 round opened"
        );
        self.events.to_everyone(GameEvent::round_state(&round));
        Ok(round)
    }

    /// Open a round on behalf of an admin player
    pub fn open_round_for(&self, player: &Player, stake: u64, shape: Shape) -> BingoResult<Round> {
        if !player.can_open_rounds() {
            return Err(BingoError::Forbidden("only admins can open rounds".to_string()));
        }
        self.open_round(NewRound {
            stake,
            shape,
            opener: Opener::Player {
                player_id: player.id,
                username: player.username.clone(),
            },
            special: false,
        })
    }

    /// Schedule activation of a pending round after `countdown_secs`
    pub fn start_round(self: &Arc<Self>, actor: &Actor, round_id: RoundId, countdown_secs: u64) -> BingoResult<Round> {
        let round = self.pending_round(round_id)?;
        if !actor.may_manage(&round) {
            return Err(BingoError::Forbidden(format!("{} cannot start round {}", actor.label(), round_id)));
        }
        if countdown_secs > self.config.max_countdown_secs {
            return Err(ValidationError::InvalidCountdown(format!(
                "{}s exceeds the {}s maximum",
                countdown_secs, self.config.max_countdown_secs
            ))
            .into());
        }
        if !self.schedule_activation(round_id, Duration::from_secs(countdown_secs)) {
            return Err(ConflictError::AlreadyStarting(round_id).into());
        }
        info!(round_id, countdown_secs, by = %actor.label(), "round start requested");
        Ok(round)
    }

    /// Returns false when a countdown is already running
    fn schedule_activation(self: &Arc<Self>, round_id: RoundId, delay: Duration) -> bool {
        if self.runtimes.has_timer(round_id, RoundTimer::Countdown) {
            return false;
        }

        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.runtimes.detach_timer(round_id, RoundTimer::Countdown);
            if let Err(e) = engine.activate(round_id).await {
                warn!(round_id, error = %e, "activation after countdown failed");
            }
        });
        if !self.runtimes.try_set_timer(round_id, RoundTimer::Countdown, task.abort_handle()) {
            return false;
        }

        let starts_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.events.to_round(
            round_id,
            GameEvent::Countdown {
                round_id,
                seconds: delay.as_secs(),
                starts_at,
            },
        );
        true
    }

    fn maybe_auto_start(self: &Arc<Self>, round: &Round, players: usize) {
        if !round.opener.is_system() || players < self.config.auto_start_threshold {
            return;
        }
        if self.schedule_activation(round.id, self.config.auto_start_countdown()) {
            info!(round_id = round.id, players, "participation threshold reached, auto-start scheduled");
        }
    }

    /// Mark the round active, snapshot its cards and start drawing
    pub async fn activate(self: &Arc<Self>, round_id: RoundId) -> BingoResult<()> {
        let round = self
            .store
            .transition_round(round_id, &[RoundStatus::Pending], RoundStatus::Active)?;
        self.runtimes.cancel_timer(round_id, RoundTimer::Expiry);
        self.registry.discard_round(round_id);

        let cards = self.participant_cards(&round)?;
        let players = cards.iter().map(|card| card.player_id).collect::<BTreeSet<_>>().len();
        let card_count = cards.len();
        let runtime = self.runtimes.insert(RoundRuntime::new(&round, cards));

        let engine = Arc::clone(self);
        let task = tokio::spawn(async move { engine.run_draw_loop(round_id).await });
        runtime.lock().await.set_draw_task(task.abort_handle());

        info!(round_id, display_id = round.display_id, players, cards = card_count, "▶️ round active");
        self.events.to_everyone(GameEvent::round_state(&round));
        self.announcer
            .round_opened(round.id, round.display_id, round.pool, round.shape)
            .await;
        Ok(())
    }

    fn participant_cards(&self, round: &Round) -> BingoResult<Vec<ParticipantCard>> {
        let now = Utc::now();
        let mut players: BTreeMap<PlayerId, Option<Player>> = BTreeMap::new();
        let mut cards = Vec::new();

        for purchase in self.store.cards_for_round(round.id)? {
            let owner = match players.get(&purchase.player_id) {
                Some(owner) => owner.clone(),
                None => {
                    let owner = self.store.player(purchase.player_id)?;
                    players.insert(purchase.player_id, owner.clone());
                    owner
                }
            };
            let (username, auto_claim) = owner
                .map(|player| (player.username.clone(), player.auto_claims(now)))
                .unwrap_or_else(|| (format!("player {}", purchase.player_id), false));

            cards.push(ParticipantCard {
                purchase_id: purchase.id,
                player_id: purchase.player_id,
                username,
                catalog_id: purchase.catalog_id,
                grid: purchase.grid,
                auto_claim,
            });
        }
        Ok(cards)
    }

    // ---------------------------------------------------------------------
    // Draw loop
    // ---------------------------------------------------------------------

    async fn run_draw_loop(self: Arc<Self>, round_id: RoundId) {
        let period = self.config.draw_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.draw_tick(round_id).await {
                Ok(TickOutcome::Drew(_)) => {}
                Ok(outcome) => {
                    debug!(round_id, ?outcome, "draw loop stopped");
                    break;
                }
                Err(e) => {
                    error!(round_id, error = %e, "draw tick failed, loop stopped");
                    break;
                }
            }
        }
    }

    /// One draw. Called by the draw loop; also usable to drive a round by hand.
    pub async fn draw_tick(self: &Arc<Self>, round_id: RoundId) -> BingoResult<TickOutcome> {
        let Some(runtime) = self.runtimes.get(round_id) else {
            return Ok(TickOutcome::Stopped);
        };

        let status = self.store.round(round_id)?.map(|round| round.status);
        if status != Some(RoundStatus::Active) {
            // Closed behind the loop's back
            runtime.lock().await.detach_draw_task();
            self.runtimes.remove(round_id);
            info!(round_id, ?status, "round no longer active, draw loop going idle");
            self.events.to_everyone(GameEvent::idle());
            return Ok(TickOutcome::Stopped);
        }

        let mut rt = runtime.lock().await;
        if rt.is_ending() {
            return Ok(TickOutcome::Frozen);
        }
        if rt.exhausted() {
            drop(rt);
            self.finish_exhausted(round_id).await?;
            return Ok(TickOutcome::Exhausted);
        }

        let drawn = {
            let mut rng = rand::thread_rng();
            rt.draw_number(&mut rng)
        };
        let Some(number) = drawn else {
            return Ok(TickOutcome::Stopped);
        };

        self.metrics.numbers_drawn.inc();
        debug!(round_id, number, count = rt.drawn().len(), "number drawn");
        self.events.to_round(
            round_id,
            GameEvent::NumberDrawn {
                round_id,
                number,
                drawn_count: rt.drawn().len(),
            },
        );

        let winners = Self::auto_claim_winners(&rt, number);
        if winners.is_empty() {
            return Ok(TickOutcome::Drew(number));
        }

        for &(player_id, catalog_id) in &winners {
            rt.add_winner(player_id);
            self.metrics.claims_valid.inc();
            info!(round_id, player_id, catalog_id, number, "🏆 auto-claim registered");
            self.events.to_player(
                player_id,
                GameEvent::ClaimResult {
                    round_id,
                    player_id,
                    accepted: true,
                    message: format!("BINGO! Card #{} won on {}", catalog_id, number),
                },
            );
        }

        if rt.begin_ending() {
            // May be running inside the draw task itself
            rt.detach_draw_task();
            if let Some((player_id, catalog_id)) = winners.first() {
                self.announce_bingo(round_id, *player_id, *catalog_id);
            }
            self.schedule_settlement(&mut rt);
        }
        Ok(TickOutcome::Frozen)
    }

    /// Auto-claiming cards that win on `number`, one per player
    fn auto_claim_winners(rt: &RoundRuntime, number: u8) -> Vec<(PlayerId, CatalogId)> {
        let marks = rt.drawn_set();
        let mut winners: Vec<(PlayerId, CatalogId)> = Vec::new();
        for card in rt.cards.iter().filter(|card| card.auto_claim) {
            if rt.is_winner(card.player_id) || winners.iter().any(|(player, _)| *player == card.player_id) {
                continue;
            }
            if validate_claim(&card.grid, marks, marks, rt.shape, Some(number)).is_valid() {
                winners.push((card.player_id, card.catalog_id));
            }
        }
        winners
    }

    async fn finish_exhausted(self: &Arc<Self>, round_id: RoundId) -> BingoResult<()> {
        if let Some(runtime) = self.runtimes.get(round_id) {
            let mut rt = runtime.lock().await;
            if !rt.mark_settled() {
                return Ok(());
            }
            rt.detach_draw_task();
            rt.cancel_timers();
        }

        let result = self
            .store
            .refund_round(round_id, LedgerKind::DrawExhaustionRefund, RoundStatus::Finished, Utc::now());
        self.runtimes.remove(round_id);
        let summary = result?;

        warn!(round_id, refunded = summary.total(), "all numbers drawn without a winner, stakes refunded");
        self.metrics.rounds_finished.inc();
        self.publish_refunds(&summary, "Stake refunded: no winner before the draw ran out");
        self.close_out(&summary.round, "Draw exhausted (refunded)", Vec::new(), 0)
            .await;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Claims and settlement
    // ---------------------------------------------------------------------

    /// Validate a claim on one of the player's cards
    pub async fn claim(
        self: &Arc<Self>,
        player: &Player,
        round_id: RoundId,
        catalog_id: CatalogId,
        marked: HashSet<u8>,
    ) -> BingoResult<ClaimOutcome> {
        let Some(runtime) = self.runtimes.get(round_id) else {
            let round = self.load_round(round_id)?;
            return Err(BingoError::round_closed(round_id, round.status));
        };

        let mut rt = runtime.lock().await;
        if rt.is_settled() {
            return Err(ConflictError::SettlementInProgress(round_id).into());
        }
        let card = rt
            .card(player.id, catalog_id)
            .cloned()
            .ok_or_else(|| BingoError::not_found(format!("card #{} of {} in round {}", catalog_id, player.username, round_id)))?;

        if rt.is_winner(player.id) {
            return Ok(ClaimOutcome {
                accepted: true,
                message: "Already registered as a winner".to_string(),
            });
        }

        let verdict = validate_claim(&card.grid, &marked, rt.drawn_set(), rt.shape, rt.last_drawn());
        if let Some(reason) = verdict.reason() {
            self.metrics.claims_invalid.inc();
            info!(round_id, player_id = player.id, catalog_id, %reason, "claim rejected");
            self.events.to_player(
                player.id,
                GameEvent::ClaimResult {
                    round_id,
                    player_id: player.id,
                    accepted: false,
                    message: reason.clone(),
                },
            );
            return Ok(ClaimOutcome {
                accepted: false,
                message: reason,
            });
        }

        rt.add_winner(player.id);
        self.metrics.claims_valid.inc();
        info!(round_id, player_id = player.id, catalog_id, winners = rt.winners().len(), "🏆 claim accepted");
        let message = format!("BINGO! Card #{} registered as a winner", catalog_id);
        self.events.to_player(
            player.id,
            GameEvent::ClaimResult {
                round_id,
                player_id: player.id,
                accepted: true,
                message: message.clone(),
            },
        );

        if rt.begin_ending() {
            rt.cancel_draw_task();
            self.announce_bingo(round_id, player.id, catalog_id);
            self.schedule_settlement(&mut rt);
        }
        Ok(ClaimOutcome { accepted: true, message })
    }

    /// Tell the whole round why the draw stopped
    fn announce_bingo(&self, round_id: RoundId, player_id: PlayerId, catalog_id: CatalogId) {
        self.events.to_round(
            round_id,
            GameEvent::BingoClaimed {
                round_id,
                player_id,
                catalog_id,
                message: "BINGO CLAIMED! Checking splits...".to_string(),
            },
        );
    }

    fn schedule_settlement(self: &Arc<Self>, rt: &mut RoundRuntime) {
        let round_id = rt.round_id;
        let grace = self.config.settlement_grace();
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            engine.settle(round_id).await;
        });
        rt.set_settle_task(task.abort_handle());
        debug!(round_id, grace_ms = grace.as_millis() as u64, "settlement scheduled");
    }

    /// Pay out the collected winners; runs at most once per round
    pub async fn settle(self: &Arc<Self>, round_id: RoundId) -> Option<SettlementOutcome> {
        let runtime = self.runtimes.get(round_id)?;
        let winners = {
            let mut rt = runtime.lock().await;
            if !rt.mark_settled() {
                return None;
            }
            rt.detach_settle_task();
            rt.cancel_draw_task();
            rt.winners().to_vec()
        };

        let result = self.settlement.execute(round_id, &winners, Utc::now());
        self.runtimes.remove(round_id);
        let outcome = result.ok()?;

        let (description, share) = match &outcome {
            SettlementOutcome::NoWinner { .. } => {
                self.metrics.rounds_finished.inc();
                ("No winner".to_string(), 0)
            }
            SettlementOutcome::Paid { winners, share, remainder, .. } => {
                self.metrics.rounds_finished.inc();
                info!(round_id, share, remainder, winners = winners.len(), "💰 winners paid");
                for winner in winners {
                    self.publish_balance(*winner, format!("You won {}!", share));
                }
                (self.winner_names(winners), *share)
            }
            SettlementOutcome::Refunded { summary, .. } => {
                self.metrics.rounds_aborted.inc();
                self.publish_refunds(summary, "Stake refunded: too many simultaneous winners");
                (format!("Refunded (>{} winners)", self.config.max_winners), 0)
            }
        };

        let winners = match &outcome {
            SettlementOutcome::Paid { winners, .. } => winners.clone(),
            _ => Vec::new(),
        };
        self.close_out(outcome.round(), &description, winners, share).await;
        Some(outcome)
    }

    fn winner_names(&self, winners: &[PlayerId]) -> String {
        winners
            .iter()
            .map(|id| match self.store.player(*id) {
                Ok(Some(player)) => player.username,
                _ => format!("player {}", id),
            })
            .collect::<Vec<_>>()
            .join(" & ")
    }

    // ---------------------------------------------------------------------
    // Abort
    // ---------------------------------------------------------------------

    /// Refund every stake and mark the round aborted
    pub async fn abort_round(self: &Arc<Self>, actor: &Actor, round_id: RoundId) -> BingoResult<RefundSummary> {
        let round = self.load_round(round_id)?;
        if !actor.may_manage(&round) {
            return Err(BingoError::Forbidden(format!("{} cannot abort round {}", actor.label(), round_id)));
        }
        if !round.status.is_live() {
            return Err(BingoError::round_closed(round_id, round.status));
        }

        let summary = match self.runtimes.get(round_id) {
            Some(runtime) => {
                let mut rt = runtime.lock().await;
                if rt.is_ending() {
                    return Err(ConflictError::SettlementInProgress(round_id).into());
                }
                let summary = self
                    .store
                    .refund_round(round_id, LedgerKind::RoundRefund, RoundStatus::Aborted, Utc::now())?;
                rt.mark_settled();
                rt.cancel_timers();
                summary
            }
            None => self
                .store
                .refund_round(round_id, LedgerKind::RoundRefund, RoundStatus::Aborted, Utc::now())?,
        };
        self.runtimes.remove(round_id);

        warn!(round_id, by = %actor.label(), refunded = summary.total(), "⛔ round aborted");
        self.metrics.rounds_aborted.inc();
        self.publish_refunds(&summary, "Stake refunded: round aborted");
        self.close_out(&summary.round, "Aborted", Vec::new(), 0).await;
        Ok(summary)
    }

    /// Abort a special round that nobody started within `after`
    pub fn schedule_expiry(self: &Arc<Self>, round_id: RoundId, after: Duration) {
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            engine.runtimes.detach_timer(round_id, RoundTimer::Expiry);
            match engine.store.round(round_id) {
                Ok(Some(round)) if round.status == RoundStatus::Pending => {
                    info!(round_id, "special round expired unplayed");
                    if let Err(e) = engine.abort_round(&Actor::System, round_id).await {
                        warn!(round_id, error = %e, "expiry abort failed");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(round_id, error = %e, "expiry check failed"),
            }
        });
        self.runtimes.set_timer(round_id, RoundTimer::Expiry, task.abort_handle());
    }

    fn publish_balance(&self, player_id: PlayerId, message: String) {
        if let Ok(Some(player)) = self.store.player(player_id) {
            self.events.to_player(
                player_id,
                GameEvent::PlayerUpdate {
                    player_id,
                    balance: player.balance,
                    message,
                },
            );
        }
    }

    fn publish_refunds(&self, summary: &RefundSummary, message: &str) {
        self.metrics.refunds_issued.inc_by(summary.refunds.len() as u64);
        for player_id in summary.refunds.keys() {
            self.publish_balance(*player_id, message.to_string());
        }
    }

    /// Shared tail of every terminal transition
    async fn close_out(self: &Arc<Self>, round: &Round, description: &str, winners: Vec<PlayerId>, share: u64) {
        self.runtimes.cancel_round_timers(round.id);
        self.registry.discard_round(round.id);
        self.refresh_live_gauge();

        self.events.to_everyone(GameEvent::RoundEnded {
            round_id: round.id,
            display_id: round.display_id,
            status: round.status,
            description: description.to_string(),
            winners,
            share,
        });
        self.announcer
            .round_ended(round.id, description, round.display_id)
            .await;

        self.schedule_idle_broadcast();
        self.round_closed.notify_one();
    }

    fn schedule_idle_broadcast(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let delay = self.config.idle_broadcast_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(None) = engine.store.live_round() {
                engine.events.to_everyone(GameEvent::idle());
            }
        });
    }

    fn refresh_live_gauge(&self) {
        if let Ok(live) = self.store.live_rounds() {
            self.metrics.live_rounds.set(live.len() as i64);
        }
    }

    // ---------------------------------------------------------------------
    // Card selection
    // ---------------------------------------------------------------------

    /// Start or stop previewing a card of a pending round
    pub fn view_card(
        &self,
        player: &Player,
        round_id: RoundId,
        catalog_id: CatalogId,
        viewing: bool,
    ) -> BingoResult<CardLockState> {
        Self::check_catalog_id(catalog_id)?;
        self.pending_round(round_id)?;

        let state = if viewing {
            self.registry.enter_preview(round_id, catalog_id, player.id)?
        } else {
            self.registry.leave_preview(round_id, catalog_id, player.id)
        };
        self.events
            .to_round(round_id, GameEvent::card_state(round_id, catalog_id, state.clone()));
        Ok(state)
    }

    /// Lock, debit and record a card purchase
    pub fn purchase_card(
        self: &Arc<Self>,
        player: &Player,
        round_id: RoundId,
        catalog_id: CatalogId,
    ) -> BingoResult<PurchaseReceipt> {
        Self::check_catalog_id(catalog_id)?;
        self.pending_round(round_id)?;

        // Lock before any store work so a concurrent attempt fails fast
        let state = self.registry.try_lock(round_id, catalog_id, player.id).map_err(|e| {
            debug!(round_id, catalog_id, player_id = player.id, "lock lost: {}", e);
            BingoError::from(e)
        })?;
        self.events
            .to_round(round_id, GameEvent::card_state(round_id, catalog_id, state));

        let request = PurchaseRequest {
            player_id: player.id,
            round_id,
            catalog_id,
            grid: catalog_card(catalog_id, round_id),
            max_cards: self.config.max_cards_per_player,
            pool_share_percent: self.config.pool_share_percent,
        };
        let receipt = match self.store.purchase_card(request, Utc::now()) {
            Ok(receipt) => receipt,
            Err(e) => {
                if let Some(state) = self.registry.release(round_id, catalog_id, player.id) {
                    self.events
                        .to_round(round_id, GameEvent::card_state(round_id, catalog_id, state));
                }
                if matches!(e, BingoError::Conflict(ConflictError::RoundClosed { .. })) {
                    self.registry.discard_round(round_id);
                }
                info!(round_id, catalog_id, player_id = player.id, error = %e, "purchase rejected");
                return Err(e);
            }
        };

        self.metrics.cards_sold.inc();
        let players = self.store.distinct_players(round_id)?;
        info!(
            round_id,
            catalog_id,
            player_id = player.id,
            pool = receipt.round.pool,
            players,
            "🎟️ card purchased"
        );
        self.events.to_round(
            round_id,
            GameEvent::PoolUpdate {
                round_id,
                pool: receipt.round.pool,
                players,
            },
        );
        self.events.to_everyone(GameEvent::round_state(&receipt.round));
        self.events.to_player(
            player.id,
            GameEvent::PlayerUpdate {
                player_id: player.id,
                balance: receipt.balance,
                message: format!("Card #{} purchased", catalog_id),
            },
        );

        self.maybe_auto_start(&receipt.round, players);
        Ok(receipt)
    }

    /// Offered catalog of a pending round, sized by the supply policy
    pub fn catalog(&self, player_id: PlayerId, round_id: RoundId) -> BingoResult<Catalog> {
        let round = self.pending_round(round_id)?;
        let player = self
            .store
            .player(player_id)?
            .ok_or_else(|| BingoError::not_found(format!("player {}", player_id)))?;

        let held = self.store.cards_of(player_id, round_id)?.len();
        if held >= self.config.max_cards_per_player {
            return Err(ValidationError::MaxCardsReached {
                max: self.config.max_cards_per_player,
            }
            .into());
        }
        if player.balance < round.stake {
            return Err(ValidationError::InsufficientBalance {
                balance: player.balance,
                required: round.stake,
            }
            .into());
        }

        let states = self.card_states(round_id)?;
        let locked: BTreeSet<CatalogId> = states
            .iter()
            .filter(|(_, state)| state.is_locked())
            .map(|(id, _)| *id)
            .collect();
        let upper_bound = self
            .supply
            .upper_bound(self.events.connected_players(round_id), &locked)
            .min(MAX_CATALOG_ID);

        let entries = (1..=upper_bound)
            .map(|catalog_id| CatalogEntry {
                catalog_id,
                grid: catalog_card(catalog_id, round_id),
                state: states.get(&catalog_id).cloned().unwrap_or_default(),
            })
            .collect();

        Ok(Catalog {
            round_id,
            upper_bound,
            entries,
        })
    }

    /// A single catalog card with its current lock state
    pub fn catalog_entry(&self, round_id: RoundId, catalog_id: CatalogId) -> BingoResult<CatalogEntry> {
        Self::check_catalog_id(catalog_id)?;
        self.load_round(round_id)?;
        let state = self.card_states(round_id)?.remove(&catalog_id).unwrap_or_default();
        Ok(CatalogEntry {
            catalog_id,
            grid: catalog_card(catalog_id, round_id),
            state,
        })
    }

    /// Registry state merged with sold cards, so locks survive a restart
    fn card_states(&self, round_id: RoundId) -> BingoResult<BTreeMap<CatalogId, CardLockState>> {
        let mut states = self.registry.snapshot(round_id);
        for card in self.store.cards_for_round(round_id)? {
            states
                .entry(card.catalog_id)
                .or_default()
                .locked_by
                .get_or_insert(card.player_id);
        }
        Ok(states)
    }

    pub fn my_cards(&self, player_id: PlayerId, round_id: RoundId) -> BingoResult<Vec<CardPurchase>> {
        self.store.cards_of(player_id, round_id)
    }

    // ---------------------------------------------------------------------
    // Player state
    // ---------------------------------------------------------------------

    /// Snapshot of the live round for one player
    pub async fn sync(&self, player_id: PlayerId) -> BingoResult<SyncState> {
        let player = self
            .store
            .player(player_id)?
            .ok_or_else(|| BingoError::not_found(format!("player {}", player_id)))?;
        let now = Utc::now();

        let mut state = SyncState {
            round: None,
            drawn: Vec::new(),
            last_drawn: None,
            my_cards: Vec::new(),
            card_states: BTreeMap::new(),
            balance: player.balance,
            premium: player.has_premium(now),
            auto_claim: player.auto_claim,
        };

        let Some(round) = self.store.live_round()? else {
            return Ok(state);
        };
        state.my_cards = self.store.cards_of(player_id, round.id)?;
        match round.status {
            RoundStatus::Pending => state.card_states = self.card_states(round.id)?,
            _ => {
                if let Some(runtime) = self.runtimes.get(round.id) {
                    let rt = runtime.lock().await;
                    state.drawn = rt.drawn().to_vec();
                    state.last_drawn = rt.last_drawn();
                }
            }
        }
        state.round = Some(RoundView::from(&round));
        Ok(state)
    }

    /// Toggle auto-claim for a premium player, effective in the running round too
    pub async fn update_preferences(&self, player_id: PlayerId, auto_claim: bool) -> BingoResult<Player> {
        let now = Utc::now();
        let player = self.store.set_auto_claim(player_id, auto_claim, now)?;

        if let Some(round) = self.store.live_round()? {
            if let Some(runtime) = self.runtimes.get(round.id) {
                runtime.lock().await.set_auto_claim(player_id, player.auto_claims(now));
            }
        }

        info!(player_id, auto_claim, "preferences updated");
        self.events.to_player(
            player_id,
            GameEvent::PlayerUpdate {
                player_id,
                balance: player.balance,
                message: format!("Auto-claim {}", if auto_claim { "enabled" } else { "disabled" }),
            },
        );
        Ok(player)
    }
}
