//! End-to-end round flows against the in-memory backend

use bingo_hall::common::types::{Opener, Player, PlayerId, Round, RoundId, RoundStatus};
use bingo_hall::config::{BingoConfig, GameConfig};
use bingo_hall::errors::{BingoError, ConflictError};
use bingo_hall::games::engine::{Actor, TickOutcome};
use bingo_hall::games::events::GameEvent;
use bingo_hall::games::{validate_claim, CycleSupervisor, EventBus, LogAnnouncer, RoundEngine, Shape};
use bingo_hall::metrics::GameMetrics;
use bingo_hall::store::{GameStore, MemoryPersistence, NewRound};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Hand-driven draws: the background loop ticks once a minute
fn manual_config() -> GameConfig {
    GameConfig {
        draw_interval_ms: 60_000,
        settlement_grace_ms: 30,
        idle_broadcast_delay_ms: 5,
        ..GameConfig::default()
    }
}

fn engine_over(store: Arc<GameStore>, config: GameConfig) -> Arc<RoundEngine> {
    Arc::new(RoundEngine::new(
        config,
        store,
        EventBus::new(1_024),
        Arc::new(LogAnnouncer),
        Arc::new(GameMetrics::new().unwrap()),
    ))
}

fn seeded_store(players: u64) -> Arc<GameStore> {
    let store = Arc::new(GameStore::in_memory());
    for id in 1..=players {
        store
            .upsert_player(Player::new(id, format!("player{}", id), 100, format!("tok{}", id)))
            .unwrap();
    }
    store
}

fn open(engine: &RoundEngine, shape: Shape) -> Round {
    engine
        .open_round(NewRound {
            stake: 10,
            shape,
            opener: Opener::System,
            special: false,
        })
        .unwrap()
}

fn player(engine: &RoundEngine, id: PlayerId) -> Player {
    engine.store().player(id).unwrap().unwrap()
}

async fn wait_for_status(engine: &RoundEngine, round_id: RoundId, status: RoundStatus) {
    for _ in 0..400 {
        if engine.store().round(round_id).unwrap().unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("round {} never reached {}", round_id, status);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buyers_of_one_card() {
    let store = seeded_store(6);
    let engine = engine_over(store.clone(), manual_config());
    let round = open(&engine, Shape::AnyLine);

    let mut handles = Vec::new();
    for id in 1..=6 {
        let engine = engine.clone();
        let buyer = player(&engine, id);
        handles.push(tokio::spawn(async move { engine.purchase_card(&buyer, round.id, 42) }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert!(e.is_conflict(), "unexpected error {}", e),
        }
    }
    assert_eq!(winners, 1);

    let sold = store.cards_for_round(round.id).unwrap();
    assert_eq!(sold.len(), 1);
    let owner = sold[0].player_id;
    for id in 1..=6 {
        let expected = if id == owner { 90 } else { 100 };
        assert_eq!(player(&engine, id).balance, expected);
    }
    assert_eq!(store.round(round.id).unwrap().unwrap().pool, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_opens_leave_one_live_round() {
    let engine = engine_over(seeded_store(0), manual_config());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine.open_round(NewRound {
                stake: 10,
                shape: Shape::AnyLine,
                opener: Opener::System,
                special: false,
            })
        }));
    }

    let mut opened = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => opened += 1,
            Err(BingoError::Conflict(ConflictError::RoundAlreadyLive(_))) => {}
            Err(e) => panic!("unexpected error {}", e),
        }
    }
    assert_eq!(opened, 1);
    assert_eq!(engine.store().live_rounds().unwrap().len(), 1);
}

#[tokio::test]
async fn test_manual_claim_wins_the_pool() {
    let store = seeded_store(2);
    let engine = engine_over(store.clone(), manual_config());
    let mut rx = engine.events().subscribe();
    let round = open(&engine, Shape::AnyLine);

    engine.purchase_card(&player(&engine, 1), round.id, 11).unwrap();
    engine.purchase_card(&player(&engine, 2), round.id, 12).unwrap();
    engine.activate(round.id).await.unwrap();

    let grid = engine.my_cards(1, round.id).unwrap()[0].grid;
    let on_card: HashSet<u8> = grid.numbers().collect();

    // Draw until card #11 holds a line completed by the live number
    let marked = loop {
        match engine.draw_tick(round.id).await.unwrap() {
            TickOutcome::Drew(_) => {}
            other => panic!("unexpected {:?}", other),
        }
        let sync = engine.sync(1).await.unwrap();
        let drawn: HashSet<u8> = sync.drawn.iter().copied().collect();
        let marked: HashSet<u8> = on_card.intersection(&drawn).copied().collect();
        if validate_claim(&grid, &marked, &drawn, Shape::AnyLine, sync.last_drawn).is_valid() {
            break marked;
        }
    };

    // A mark that was never drawn is rejected without ending anything
    let drawn = engine.sync(2).await.unwrap().drawn;
    let undrawn = (1..=75u8).find(|n| !drawn.contains(n)).unwrap_or(75);
    let bogus = engine
        .claim(&player(&engine, 2), round.id, 12, HashSet::from([undrawn]))
        .await
        .unwrap();
    assert!(!bogus.accepted);

    let outcome = engine.claim(&player(&engine, 1), round.id, 11, marked).await.unwrap();
    assert!(outcome.accepted);
    assert_eq!(engine.draw_tick(round.id).await.unwrap(), TickOutcome::Frozen);

    wait_for_status(&engine, round.id, RoundStatus::Finished).await;
    let finished = store.round(round.id).unwrap().unwrap();
    assert_eq!(finished.winner_ids, vec![1]);
    assert_eq!(player(&engine, 1).balance, 90 + 16);
    assert_eq!(player(&engine, 2).balance, 90);

    let mut ended = None;
    while let Ok(envelope) = rx.try_recv() {
        if let GameEvent::RoundEnded { description, share, .. } = envelope.event {
            ended = Some((description, share));
        }
    }
    assert_eq!(ended, Some(("player1".to_string(), 16)));

    // The round is gone; late claims are told so
    let late = engine
        .claim(&player(&engine, 2), round.id, 12, HashSet::new())
        .await
        .unwrap_err();
    assert!(late.is_conflict());
}

#[tokio::test]
async fn test_premium_auto_claim_freezes_the_draw() {
    let store = seeded_store(2);
    let mut premium = store.player(2).unwrap().unwrap();
    premium.premium_expires_at = Some(Utc::now() + chrono::Duration::days(1));
    store.upsert_player(premium).unwrap();

    let engine = engine_over(store.clone(), manual_config());
    let round = open(&engine, Shape::AnyLine);
    engine.purchase_card(&player(&engine, 1), round.id, 1).unwrap();
    engine.purchase_card(&player(&engine, 2), round.id, 2).unwrap();
    engine.activate(round.id).await.unwrap();

    let mut draws = 0;
    loop {
        match engine.draw_tick(round.id).await.unwrap() {
            TickOutcome::Drew(_) => draws += 1,
            TickOutcome::Frozen => break,
            other => panic!("unexpected {:?} after {} draws", other, draws),
        }
    }

    wait_for_status(&engine, round.id, RoundStatus::Finished).await;
    let finished = store.round(round.id).unwrap().unwrap();
    assert_eq!(finished.winner_ids, vec![2]);
    assert_eq!(player(&engine, 2).balance, 90 + 16);
}

#[tokio::test]
async fn test_abort_while_pending_refunds_everyone() {
    let store = seeded_store(3);
    let engine = engine_over(store.clone(), manual_config());
    let round = open(&engine, Shape::FullHouse);
    for id in 1..=2 {
        engine.purchase_card(&player(&engine, id), round.id, id as u32).unwrap();
    }
    engine.purchase_card(&player(&engine, 1), round.id, 9).unwrap();

    let summary = engine.abort_round(&Actor::System, round.id).await.unwrap();
    assert_eq!(summary.refunds.get(&1), Some(&20));
    assert_eq!(summary.total(), 30);
    assert_eq!(summary.round.status, RoundStatus::Aborted);
    for id in 1..=3 {
        assert_eq!(player(&engine, id).balance, 100);
    }

    // Aborting twice is a closed-round conflict, not a second refund
    assert!(engine.abort_round(&Actor::System, round.id).await.unwrap_err().is_conflict());
    assert_eq!(player(&engine, 1).balance, 100);
}

#[tokio::test]
async fn test_restart_recovery_refunds_exactly_once() {
    let backend = Arc::new(MemoryPersistence::new());
    let round_id = {
        let store = Arc::new(GameStore::open(Box::new(backend.clone())).unwrap());
        for id in 1..=2 {
            store
                .upsert_player(Player::new(id, format!("player{}", id), 100, "t"))
                .unwrap();
        }
        let engine = engine_over(store, manual_config());
        let round = open(&engine, Shape::AnyLine);
        engine.purchase_card(&player(&engine, 1), round.id, 1).unwrap();
        engine.purchase_card(&player(&engine, 2), round.id, 2).unwrap();
        engine.activate(round.id).await.unwrap();
        engine.draw_tick(round.id).await.unwrap();
        round.id
        // Process "crashes" here: runtime state is dropped, records remain
    };

    let restarted = Arc::new(GameStore::open(Box::new(backend.clone())).unwrap());
    assert_eq!(restarted.round(round_id).unwrap().unwrap().status, RoundStatus::Active);
    assert_eq!(restarted.player(1).unwrap().unwrap().balance, 90);

    let engine = engine_over(restarted, manual_config());
    let supervisor = CycleSupervisor::new(engine.clone(), BingoConfig::testing().cycle);
    let report = supervisor.recover().unwrap();
    assert_eq!(report.rounds, vec![round_id]);
    assert_eq!(report.amount_refunded, 20);

    // A second restart finds nothing left to refund
    let again = Arc::new(GameStore::open(Box::new(backend)).unwrap());
    assert_eq!(again.round(round_id).unwrap().unwrap().status, RoundStatus::Aborted);
    assert_eq!(again.player(1).unwrap().unwrap().balance, 100);
    let engine = engine_over(again, manual_config());
    let report = CycleSupervisor::new(engine, BingoConfig::testing().cycle).recover().unwrap();
    assert!(report.rounds.is_empty());
}

#[tokio::test]
async fn test_cycle_reopens_after_round_ends() {
    let config = BingoConfig::testing();
    let engine = engine_over(seeded_store(0), config.game.clone());
    let supervisor = Arc::new(CycleSupervisor::new(engine.clone(), config.cycle.clone()));
    let cycle = supervisor.spawn();

    let first = wait_for_live(&engine, None).await;
    assert_eq!(first.display_id, 1);
    engine.abort_round(&Actor::System, first.id).await.unwrap();

    let second = wait_for_live(&engine, Some(first.id)).await;
    assert_eq!(second.display_id, 2);
    assert_eq!(second.opener, Opener::System);
    cycle.abort();
}

async fn wait_for_live(engine: &RoundEngine, other_than: Option<RoundId>) -> Round {
    for _ in 0..400 {
        if let Some(round) = engine.store().live_round().unwrap() {
            if Some(round.id) != other_than {
                return round;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no new live round appeared");
}
