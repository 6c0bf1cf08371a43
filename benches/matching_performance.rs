//! Performance benchmarks for group selection and matchmaking cycles

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use leaderboard_service::competition::{
    LevelCountryMatcher, LifecycleManager, MatchmakingScheduler, Matchmaker, SchedulerConfig,
};
use leaderboard_service::membership::MembershipService;
use leaderboard_service::storage::{CompetitionStore, InMemoryStore};
use leaderboard_service::types::{Membership, MembershipStatus, Player};
use leaderboard_service::utils::current_timestamp;
use std::sync::Arc;

const COUNTRIES: [&str; 6] = ["US", "DE", "BR", "JP", "KR", "NL"];

fn waiting_batch(size: usize, levels: i32) -> Vec<Membership> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..size)
        .map(|i| {
            let joined_at = base + Duration::milliseconds(i as i64);
            Membership {
                id: i as i64 + 1,
                player_id: format!("player{}", i),
                competition_id: None,
                status: MembershipStatus::Waiting,
                score: 0,
                joined_at,
                updated_at: joined_at,
                level: (i as i32 * 7) % levels,
                country_code: COUNTRIES[i % COUNTRIES.len()].to_string(),
            }
        })
        .collect()
}

fn bench_select_group(c: &mut Criterion) {
    let matcher = LevelCountryMatcher::new();
    let mut group = c.benchmark_group("select_group");

    for size in [10usize, 100, 1000] {
        // Distinct levels force the country pass
        let mixed = waiting_batch(size, 5);
        let distinct = waiting_batch(size, size as i32);

        group.bench_with_input(BenchmarkId::new("shared_levels", size), &mixed, |b, batch| {
            b.iter(|| matcher.select_group(black_box(batch)))
        });
        group.bench_with_input(
            BenchmarkId::new("distinct_levels", size),
            &distinct,
            |b, batch| b.iter(|| matcher.select_group(black_box(batch))),
        );
    }

    group.finish();
}

fn bench_matchmaking_cycle(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("join_and_cycle_10_players", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let store: Arc<dyn CompetitionStore> = Arc::new(InMemoryStore::new());
                let service = MembershipService::new(store.clone());
                let scheduler = MatchmakingScheduler::new(
                    store.clone(),
                    LifecycleManager::new(store.clone(), Duration::seconds(60)),
                    Arc::new(LevelCountryMatcher::new()),
                    SchedulerConfig::default(),
                );

                for i in 0..10 {
                    let player_id = format!("player{}", i);
                    service
                        .create_player(Player::new(player_id.as_str(), i % 3, "US"))
                        .await
                        .unwrap();
                    service.join(&player_id).await.unwrap();
                }

                black_box(scheduler.run_cycle(current_timestamp()).await.unwrap())
            })
        })
    });
}

criterion_group!(benches, bench_select_group, bench_matchmaking_cycle);
criterion_main!(benches);
