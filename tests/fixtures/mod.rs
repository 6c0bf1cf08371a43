//! Shared setup for integration tests

#![allow(dead_code)]

use leaderboard_service::competition::{
    LevelCountryMatcher, LifecycleManager, MatchmakingScheduler, SchedulerConfig,
};
use leaderboard_service::membership::MembershipService;
use leaderboard_service::storage::{CompetitionStore, InMemoryStore};
use leaderboard_service::types::{Membership, MembershipStatus, Player};
use std::sync::Arc;
use std::time::Duration;

/// Store, service and scheduler sharing one in-memory backend
pub struct TestSystem {
    pub store: Arc<InMemoryStore>,
    pub service: MembershipService,
    pub scheduler: MatchmakingScheduler,
}

pub fn create_test_system() -> TestSystem {
    create_test_system_with_batch(10)
}

pub fn create_test_system_with_batch(batch_size: usize) -> TestSystem {
    let store = Arc::new(InMemoryStore::new());
    let dyn_store: Arc<dyn CompetitionStore> = store.clone();

    let service = MembershipService::new(dyn_store.clone());
    let lifecycle = LifecycleManager::new(dyn_store.clone(), chrono::Duration::seconds(60));
    let scheduler = MatchmakingScheduler::new(
        dyn_store,
        lifecycle,
        Arc::new(LevelCountryMatcher::new()),
        SchedulerConfig {
            interval: Duration::from_secs(30),
            batch_size,
        },
    );

    TestSystem {
        store,
        service,
        scheduler,
    }
}

/// Register `(player_id, level, country)` triples
pub async fn register_players(service: &MembershipService, players: &[(&str, i32, &str)]) {
    for (player_id, level, country) in players {
        service
            .create_player(Player::new(*player_id, *level, *country))
            .await
            .expect("Failed to create player");
    }
}

/// Register and enqueue players in the given order
pub async fn register_and_join(service: &MembershipService, players: &[(&str, i32, &str)]) {
    register_players(service, players).await;
    for (player_id, _, _) in players {
        service
            .join(player_id)
            .await
            .expect("Failed to join matchmaking");
    }
}

/// Memberships of a player that still hold a queue or competition slot
pub fn open_memberships(store: &InMemoryStore, player_id: &str) -> Vec<Membership> {
    store
        .memberships_of(player_id)
        .expect("Failed to read memberships")
        .into_iter()
        .filter(|m| matches!(m.status, MembershipStatus::Waiting | MembershipStatus::Active))
        .collect()
}
