//! End-to-end match lifecycle through the registry and scheduler

use std::sync::Arc;
use std::time::Duration;

use arena_match_server::game::{
    MatchConfig, MatchEvent, MatchRegistry, MatchState, RegistryConfig,
};
use uuid::Uuid;

/// Let timers run for `secs` seconds of paused time
async fn run_for(secs: u64) {
    for _ in 0..secs {
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
    }
}

fn duel_config() -> MatchConfig {
    MatchConfig {
        min_players: 2,
        max_players: 2,
        countdown_secs: 5,
        ..MatchConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn duel_runs_from_waiting_to_ending() {
    let registry = MatchRegistry::default();
    let game = registry.create_match(duel_config());
    let mut events = game.subscribe();

    let p1 = Uuid::new_v4();
    let p2 = Uuid::new_v4();

    assert!(registry.join_match(p1, "P1", &game));
    assert_eq!(game.state(), MatchState::Waiting);

    assert!(registry.join_match(p2, "P2", &game));
    assert_eq!(game.state(), MatchState::Starting);

    run_for(6).await;
    assert_eq!(game.state(), MatchState::Active);
    let mut alive = game.alive_players();
    alive.sort_unstable();
    let mut expected = vec![p1, p2];
    expected.sort_unstable();
    assert_eq!(alive, expected);

    game.record_damage(p2, p1, 100.0);
    assert!(game.eliminate_player(&p2));

    assert_eq!(game.alive_players(), vec![p1]);
    assert_eq!(game.winner(), Some(p1));
    assert_eq!(game.state(), MatchState::Ending);
    assert_eq!(game.combat().take_killer(p2), Some(p1));

    let standings = game.standings();
    assert_eq!(standings[0].player_id, p1);
    assert_eq!(standings[0].placement, Some(1));
    assert_eq!(standings[1].player_id, p2);
    assert_eq!(standings[1].placement, Some(2));
    assert_eq!(standings[1].damage_taken, 100.0);

    let mut saw_end = false;
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.match_id(), game.id());
        if let MatchEvent::MatchEnded { winner, .. } = event {
            assert_eq!(winner, Some(p1));
            saw_end = true;
        }
    }
    assert!(saw_end);
}

#[tokio::test(start_paused = true)]
async fn credited_elimination_settles_kill_and_assist() {
    let registry = MatchRegistry::default();
    let game = registry.create_match(MatchConfig {
        min_players: 3,
        max_players: 3,
        countdown_secs: 1,
        ..MatchConfig::default()
    });

    let (a, b, v) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    for (id, name) in [(a, "A"), (b, "B"), (v, "V")] {
        assert!(registry.join_match(id, name, &game));
    }
    run_for(2).await;
    assert_eq!(game.state(), MatchState::Active);

    game.record_damage(v, a, 30.0);
    game.record_damage(v, b, 40.0);

    let elimination = game.eliminate_with_credit(&v).unwrap();
    assert_eq!(elimination.placement, 3);
    assert_eq!(elimination.killer, Some(b));
    assert_eq!(elimination.assisters, vec![a]);

    assert_eq!(game.player(&b).unwrap().kills, 1);
    assert_eq!(game.player(&a).unwrap().assists, 1);
    assert_eq!(game.state(), MatchState::Active);
    assert!(game.is_spectator(&v));
}

#[tokio::test(start_paused = true)]
async fn abandoned_match_is_reclaimed_by_background_task() {
    let registry = Arc::new(MatchRegistry::new(RegistryConfig {
        match_defaults: duel_config(),
        idle_timeout: Duration::from_secs(10),
        reclaim_interval: Duration::from_secs(1),
        ..RegistryConfig::default()
    }));
    registry.spawn_reclaimer();

    let game = registry.create_match(duel_config());
    let player = Uuid::new_v4();
    assert!(registry.join_match(player, "Solo", &game));
    assert!(registry.leave_match(&player));
    assert_eq!(game.player_count(), 0);

    assert!(registry.find_joinable_match().is_some());

    run_for(12).await;

    assert!(registry.get(game.id()).is_none());
    assert!(registry.find_joinable_match().is_none());
    assert_eq!(registry.active_matches(), 0);

    registry.shutdown();
}

#[tokio::test(start_paused = true)]
async fn finished_match_is_reclaimed_after_grace() {
    let registry = Arc::new(MatchRegistry::new(RegistryConfig {
        match_defaults: duel_config(),
        end_grace: Duration::from_secs(5),
        reclaim_interval: Duration::from_secs(1),
        ..RegistryConfig::default()
    }));
    registry.spawn_reclaimer();

    let game = registry.create_match(duel_config());
    let p1 = Uuid::new_v4();
    let p2 = Uuid::new_v4();
    assert!(registry.join_match(p1, "P1", &game));
    assert!(registry.join_match(p2, "P2", &game));
    run_for(6).await;
    assert!(game.eliminate_player(&p2));
    assert_eq!(game.state(), MatchState::Ending);

    // Results stay visible during the grace period
    run_for(3).await;
    assert!(registry.get(game.id()).is_some());
    assert_eq!(registry.match_of(&p1).as_ref(), Some(game.id()));

    run_for(4).await;
    assert!(registry.get(game.id()).is_none());
    assert!(registry.match_of(&p1).is_none());
    assert!(registry.match_of(&p2).is_none());

    // Former members are free to join again
    assert!(registry.quick_join(p1, "P1").is_ok());

    registry.shutdown();
}
