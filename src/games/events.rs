//! Real-time events published by the round engine
//!
//! Every event is wrapped in an [`Envelope`] naming its audience. Sockets
//! subscribe to one broadcast channel and keep only the envelopes meant for
//! them, so the engine never needs to know who is connected. Presence (which
//! players have a socket attached to which round) is tracked here too, because
//! the catalog supply policy scales with it.

use crate::cards::CardLockState;
use crate::common::types::{CatalogId, PlayerId, Round, RoundId, RoundStatus};
use crate::games::patterns::Shape;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Public view of a round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundView {
    pub round_id: RoundId,
    pub display_id: u32,
    pub status: RoundStatus,
    pub stake: u64,
    pub pool: u64,
    pub shape: Shape,
    pub special: bool,
}

impl From<&Round> for RoundView {
    fn from(round: &Round) -> Self {
        Self {
            round_id: round.id,
            display_id: round.display_id,
            status: round.status,
            stake: round.stake,
            pool: round.pool,
            shape: round.shape,
            special: round.special,
        }
    }
}

/// Events pushed to connected players
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    /// Lobby state; `round` is `None` while idle
    RoundState { round: Option<RoundView> },

    Countdown {
        round_id: RoundId,
        seconds: u64,
        starts_at: DateTime<Utc>,
    },

    NumberDrawn {
        round_id: RoundId,
        number: u8,
        drawn_count: usize,
    },

    PoolUpdate {
        round_id: RoundId,
        pool: u64,
        players: usize,
    },

    /// Changed lock states only
    CardStates {
        round_id: RoundId,
        states: BTreeMap<CatalogId, CardLockState>,
    },

    ClaimResult {
        round_id: RoundId,
        player_id: PlayerId,
        accepted: bool,
        message: String,
    },

    /// First accepted claim of a round; draws stop while settlement waits out the grace window
    BingoClaimed {
        round_id: RoundId,
        player_id: PlayerId,
        catalog_id: CatalogId,
        message: String,
    },

    RoundEnded {
        round_id: RoundId,
        display_id: u32,
        status: RoundStatus,
        description: String,
        winners: Vec<PlayerId>,
        share: u64,
    },

    PlayerUpdate {
        player_id: PlayerId,
        balance: u64,
        message: String,
    },

    Heartbeat { timestamp: i64 },
}

impl GameEvent {
    pub fn idle() -> Self {
        GameEvent::RoundState { round: None }
    }

    pub fn round_state(round: &Round) -> Self {
        GameEvent::RoundState {
            round: Some(RoundView::from(round)),
        }
    }

    pub fn card_state(round_id: RoundId, catalog_id: CatalogId, state: CardLockState) -> Self {
        GameEvent::CardStates {
            round_id,
            states: BTreeMap::from([(catalog_id, state)]),
        }
    }
}

/// Who an event is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    /// Sockets attached to the round
    Round(RoundId),
    /// Every socket of one player
    Player(PlayerId),
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub audience: Audience,
    pub event: GameEvent,
}

impl Envelope {
    /// Whether a socket owned by `player_id` and attached to `round_id` should see this
    pub fn is_for(&self, player_id: PlayerId, round_id: Option<RoundId>) -> bool {
        match self.audience {
            Audience::Everyone => true,
            Audience::Round(target) => round_id == Some(target),
            Audience::Player(target) => target == player_id,
        }
    }
}

/// Broadcast fan-out plus per-round presence
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Envelope>,
    /// round -> player -> attached sockets
    presence: Arc<DashMap<RoundId, HashMap<PlayerId, usize>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            presence: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn publish(&self, audience: Audience, event: GameEvent) {
        // No receivers is fine
        let delivered = self.tx.send(Envelope { audience, event }).unwrap_or(0);
        trace!(?audience, delivered, "event published");
    }

    pub fn to_round(&self, round_id: RoundId, event: GameEvent) {
        self.publish(Audience::Round(round_id), event);
    }

    pub fn to_player(&self, player_id: PlayerId, event: GameEvent) {
        self.publish(Audience::Player(player_id), event);
    }

    pub fn to_everyone(&self, event: GameEvent) {
        self.publish(Audience::Everyone, event);
    }

    /// Record a socket of `player_id` joining a round
    pub fn attach(&self, round_id: RoundId, player_id: PlayerId) {
        *self.presence.entry(round_id).or_default().entry(player_id).or_default() += 1;
    }

    pub fn detach(&self, round_id: RoundId, player_id: PlayerId) {
        let mut emptied = false;
        if let Some(mut players) = self.presence.get_mut(&round_id) {
            if let Some(count) = players.get_mut(&player_id) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    players.remove(&player_id);
                }
            }
            emptied = players.is_empty();
        }
        if emptied {
            self.presence.remove_if(&round_id, |_, players| players.is_empty());
        }
    }

    /// Distinct players with at least one socket on the round
    pub fn connected_players(&self, round_id: RoundId) -> usize {
        self.presence.get(&round_id).map(|players| players.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_filtering() {
        let to_round = Envelope { audience: Audience::Round(3), event: GameEvent::idle() };
        assert!(to_round.is_for(1, Some(3)));
        assert!(!to_round.is_for(1, Some(4)));
        assert!(!to_round.is_for(1, None));

        let to_player = Envelope { audience: Audience::Player(7), event: GameEvent::idle() };
        assert!(to_player.is_for(7, None));
        assert!(!to_player.is_for(8, Some(3)));

        let everyone = Envelope { audience: Audience::Everyone, event: GameEvent::idle() };
        assert!(everyone.is_for(99, None));
    }

    #[test]
    fn test_presence_counts_distinct_players() {
        let bus = EventBus::new(16);
        bus.attach(1, 10);
        bus.attach(1, 10);
        bus.attach(1, 11);
        assert_eq!(bus.connected_players(1), 2);

        bus.detach(1, 10);
        assert_eq!(bus.connected_players(1), 2);
        bus.detach(1, 10);
        bus.detach(1, 11);
        assert_eq!(bus.connected_players(1), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.to_round(5, GameEvent::NumberDrawn { round_id: 5, number: 42, drawn_count: 1 });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.audience, Audience::Round(5));
        let json = serde_json::to_value(&envelope.event).unwrap();
        assert_eq!(json["type"], "number_drawn");
        assert_eq!(json["number"], 42);
    }
}
