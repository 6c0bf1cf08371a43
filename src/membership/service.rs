//! Request-path operations on players and memberships
//!
//! These run concurrently with the scheduler and with each other. None of
//! them take locks of their own; the checks done here give precise errors and
//! the store's conditional writes keep the invariants when a check goes stale.

use crate::error::{ErrorKind, LeaderboardError, Result};
use crate::metrics::MetricsCollector;
use crate::storage::{CompetitionStore, NewMembership, StoreError};
use crate::types::{
    CompetitionId, Leaderboard, LeaderboardEntry, MembershipRef, Player,
};
use crate::utils::current_timestamp;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Counters kept by the membership service
#[derive(Debug, Clone, Default)]
pub struct MembershipStats {
    /// Players enqueued
    pub joins_accepted: u64,
    /// Joins refused because of an open membership
    pub joins_rejected: u64,
    /// Score submissions applied
    pub scores_accepted: u64,
    /// Score submissions refused
    pub scores_rejected: u64,
}

/// Player-facing membership operations
#[derive(Clone)]
pub struct MembershipService {
    store: Arc<dyn CompetitionStore>,
    stats: Arc<RwLock<MembershipStats>>,
    metrics_collector: Option<Arc<MetricsCollector>>,
}

impl MembershipService {
    pub fn new(store: Arc<dyn CompetitionStore>) -> Self {
        Self {
            store,
            stats: Arc::new(RwLock::new(MembershipStats::default())),
            metrics_collector: None,
        }
    }

    /// Create a service that reports to `metrics_collector`
    pub fn with_metrics(store: Arc<dyn CompetitionStore>, metrics_collector: Arc<MetricsCollector>) -> Self {
        Self {
            metrics_collector: Some(metrics_collector),
            ..Self::new(store)
        }
    }

    /// Enqueue a player for the next matchmaking cycle
    pub async fn join(&self, player_id: &str) -> Result<MembershipRef> {
        let timer = std::time::Instant::now();
        let result = self.try_join(player_id).await;

        let outcome = match &result {
            Ok(_) => "accepted",
            Err(LeaderboardError::PlayerNotFound { .. }) => "player_not_found",
            Err(LeaderboardError::PlayerAlreadyActive { .. }) => "already_active",
            Err(LeaderboardError::PlayerAlreadyWaiting { .. }) => "already_waiting",
            Err(_) => "error",
        };
        self.update_stats(|stats| match &result {
            Ok(_) => stats.joins_accepted += 1,
            Err(e) if e.is_conflict() => stats.joins_rejected += 1,
            Err(_) => {}
        });
        if let Some(metrics) = &self.metrics_collector {
            metrics.record_join(outcome, timer.elapsed());
        }
        result
    }

    async fn try_join(&self, player_id: &str) -> Result<MembershipRef> {
        debug!("Player {} attempting to join matchmaking", player_id);
        let now = current_timestamp();

        let player = self.require_player(player_id).await?;

        if self.store.get_active_membership(player_id, now).await?.is_some() {
            info!("Player {} already in active competition", player_id);
            return Err(LeaderboardError::PlayerAlreadyActive {
                player_id: player_id.to_string(),
            });
        }

        if self.store.is_player_waiting(player_id).await? {
            info!("Player {} is already in the waiting queue", player_id);
            return Err(LeaderboardError::PlayerAlreadyWaiting {
                player_id: player_id.to_string(),
            });
        }

        let membership = self
            .store
            .create_membership(NewMembership::waiting(&player, now), now)
            .await
            .map_err(|e| match e {
                StoreError::AlreadyWaiting { player_id } => {
                    LeaderboardError::PlayerAlreadyWaiting { player_id }
                }
                StoreError::AlreadyActive { player_id } => {
                    LeaderboardError::PlayerAlreadyActive { player_id }
                }
                other => other.into(),
            })?;

        info!(
            membership_id = membership.id,
            level = membership.level,
            country = %membership.country_code,
            "Player {} added to matchmaking queue",
            player_id
        );
        Ok(MembershipRef::from(&membership))
    }

    /// Add `delta` to the player's score in their running competition.
    /// Scores never decrease, so a negative delta is rejected untouched.
    pub async fn submit_score(&self, player_id: &str, delta: i64) -> Result<()> {
        let timer = std::time::Instant::now();
        let result = self.try_submit_score(player_id, delta).await;

        let outcome = match &result {
            Ok(()) => "accepted",
            Err(LeaderboardError::NegativeScore { .. }) => "negative_score",
            Err(LeaderboardError::PlayerNotFound { .. }) => "player_not_found",
            Err(LeaderboardError::NotInActiveCompetition { .. }) => "not_in_competition",
            Err(_) => "error",
        };
        self.update_stats(|stats| match &result {
            Ok(()) => stats.scores_accepted += 1,
            Err(e) if e.is_conflict() || e.kind() == ErrorKind::InvalidInput => {
                stats.scores_rejected += 1
            }
            Err(_) => {}
        });
        if let Some(metrics) = &self.metrics_collector {
            metrics.record_score(outcome, timer.elapsed());
        }
        result
    }

    async fn try_submit_score(&self, player_id: &str, delta: i64) -> Result<()> {
        if delta < 0 {
            return Err(LeaderboardError::NegativeScore { delta });
        }
        let now = current_timestamp();
        self.require_player(player_id).await?;

        let membership = self
            .store
            .get_active_membership(player_id, now)
            .await?
            .ok_or_else(|| LeaderboardError::NotInActiveCompetition {
                player_id: player_id.to_string(),
            })?;

        // The competition may have ended since the lookup; the increment
        // re-checks and matches nothing in that case.
        if !self.store.add_score(player_id, delta, current_timestamp()).await? {
            warn!(
                "Competition of player {} ended before score {} was applied",
                player_id, delta
            );
            return Err(LeaderboardError::NotInActiveCompetition {
                player_id: player_id.to_string(),
            });
        }

        debug!(
            "Score {} added to player {} in competition {:?}",
            delta, player_id, membership.competition_id
        );
        Ok(())
    }

    /// Leaderboard of a competition, best score first
    pub async fn get_leaderboard(&self, competition_id: CompetitionId) -> Result<Leaderboard> {
        let timer = std::time::Instant::now();
        let memberships = self.store.get_leaderboard(competition_id).await?;
        self.record_request("get_leaderboard", timer);

        if memberships.is_empty() {
            debug!("No leaderboard found for competition {}", competition_id);
            return Err(LeaderboardError::LeaderboardNotFound { competition_id });
        }

        Ok(Leaderboard {
            leaderboard_id: competition_id,
            ends_at: None,
            leaderboard: memberships.iter().map(LeaderboardEntry::from).collect(),
        })
    }

    /// Leaderboard of the player's most recent competition. `None` when the
    /// player has never been placed in one.
    pub async fn get_player_leaderboard(&self, player_id: &str) -> Result<Option<Leaderboard>> {
        let timer = std::time::Instant::now();
        let result = self.try_get_player_leaderboard(player_id).await;
        self.record_request("get_player_leaderboard", timer);
        result
    }

    async fn try_get_player_leaderboard(&self, player_id: &str) -> Result<Option<Leaderboard>> {
        let competition_id = match self.store.get_latest_membership(player_id).await? {
            Some(membership) => match membership.competition_id {
                Some(id) => id,
                None => {
                    debug!("Player {} is still waiting for a competition", player_id);
                    return Ok(None);
                }
            },
            None => {
                debug!("No membership found for player {}", player_id);
                return Ok(None);
            }
        };

        let competition = self
            .store
            .get_competition(competition_id)
            .await?
            .ok_or_else(|| LeaderboardError::Internal {
                message: format!("membership references missing competition {}", competition_id),
            })?;
        let memberships = self.store.get_leaderboard(competition_id).await?;

        Ok(Some(Leaderboard {
            leaderboard_id: competition_id,
            ends_at: Some(competition.ends_at),
            leaderboard: memberships.iter().map(LeaderboardEntry::from).collect(),
        }))
    }

    /// Register a new player
    pub async fn create_player(&self, player: Player) -> Result<()> {
        let player_id = player.player_id.clone();
        self.store.create_player(player).await.map_err(|e| match e {
            StoreError::Duplicate { .. } => LeaderboardError::PlayerAlreadyExists {
                player_id: player_id.clone(),
            },
            other => other.into(),
        })?;
        info!("Created player {}", player_id);
        Ok(())
    }

    pub async fn get_player(&self, player_id: &str) -> Result<Player> {
        self.require_player(player_id).await
    }

    /// Change a player's level and country. Open memberships keep the
    /// snapshot they were created with.
    pub async fn update_player(&self, player: Player) -> Result<()> {
        let player_id = player.player_id.clone();
        if !self.store.update_player(player).await? {
            return Err(LeaderboardError::PlayerNotFound { player_id });
        }
        info!("Updated player {}", player_id);
        Ok(())
    }

    /// Snapshot of the service counters
    pub fn get_stats(&self) -> Result<MembershipStats> {
        let stats = self.stats.read().map_err(|_| LeaderboardError::Internal {
            message: "Failed to acquire stats read lock".to_string(),
        })?;
        Ok(stats.clone())
    }

    async fn require_player(&self, player_id: &str) -> Result<Player> {
        self.store
            .get_player(player_id)
            .await?
            .ok_or_else(|| LeaderboardError::PlayerNotFound {
                player_id: player_id.to_string(),
            })
    }

    fn update_stats(&self, update: impl FnOnce(&mut MembershipStats)) {
        match self.stats.write() {
            Ok(mut stats) => update(&mut stats),
            Err(_) => warn!("Failed to acquire stats write lock"),
        }
    }

    fn record_request(&self, operation: &str, started: std::time::Instant) {
        if let Some(metrics) = &self.metrics_collector {
            metrics.record_request(operation, started.elapsed());
        }
    }
}
