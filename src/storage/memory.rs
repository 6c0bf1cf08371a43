//! In-memory store
//!
//! All state sits behind one `RwLock` that is held for the whole of every
//! operation, which makes each trait method atomic with respect to the others.

use crate::storage::{
    ClosedCompetitions, CompetitionStore, NewMembership, StoreError, StoreResult,
};
use crate::types::{
    Competition, CompetitionId, CompetitionStatus, Membership, MembershipId, MembershipStatus,
    Player, PlayerId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct StoreState {
    players: HashMap<PlayerId, Player>,
    competitions: HashMap<CompetitionId, Competition>,
    memberships: BTreeMap<MembershipId, Membership>,
    next_membership_id: MembershipId,
}

impl StoreState {
    fn competition_accepts_scores(&self, membership: &Membership, now: DateTime<Utc>) -> bool {
        membership
            .competition_id
            .and_then(|id| self.competitions.get(&id))
            .map(|competition| membership.can_score_in(competition, now))
            .unwrap_or(false)
    }

    fn active_membership_mut(&mut self, player_id: &str, now: DateTime<Utc>) -> Option<&mut Membership> {
        let id = self
            .memberships
            .values()
            .find(|m| m.player_id == player_id && self.competition_accepts_scores(m, now))
            .map(|m| m.id)?;
        self.memberships.get_mut(&id)
    }
}

/// In-memory implementation of [`CompetitionStore`]
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| StoreError::Unavailable {
            message: "Failed to acquire store read lock".to_string(),
        })
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| StoreError::Unavailable {
            message: "Failed to acquire store write lock".to_string(),
        })
    }

    /// All memberships of a player, oldest first (for tests and debugging)
    pub fn memberships_of(&self, player_id: &str) -> StoreResult<Vec<Membership>> {
        let state = self.read()?;
        Ok(state
            .memberships
            .values()
            .filter(|m| m.player_id == player_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CompetitionStore for InMemoryStore {
    async fn get_player(&self, player_id: &str) -> StoreResult<Option<Player>> {
        Ok(self.read()?.players.get(player_id).cloned())
    }

    async fn create_player(&self, player: Player) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.players.contains_key(&player.player_id) {
            return Err(StoreError::Duplicate {
                entity: "player",
                key: player.player_id,
            });
        }
        state.players.insert(player.player_id.clone(), player);
        Ok(())
    }

    async fn update_player(&self, player: Player) -> StoreResult<bool> {
        let mut state = self.write()?;
        match state.players.get_mut(&player.player_id) {
            Some(existing) => {
                *existing = player;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_active_competition(&self) -> StoreResult<Option<Competition>> {
        let state = self.read()?;
        Ok(state
            .competitions
            .values()
            .filter(|c| c.status == CompetitionStatus::Active)
            .min_by_key(|c| c.started_at)
            .cloned())
    }

    async fn create_competition(&self, competition: Competition) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.competitions.contains_key(&competition.competition_id) {
            return Err(StoreError::Duplicate {
                entity: "competition",
                key: competition.competition_id.to_string(),
            });
        }
        state
            .competitions
            .insert(competition.competition_id, competition);
        Ok(())
    }

    async fn get_competition(&self, competition_id: CompetitionId) -> StoreResult<Option<Competition>> {
        Ok(self.read()?.competitions.get(&competition_id).cloned())
    }

    async fn update_competition(&self, competition: Competition) -> StoreResult<bool> {
        let mut state = self.write()?;
        match state.competitions.get_mut(&competition.competition_id) {
            Some(existing) => {
                *existing = competition;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_expired_competitions(&self, now: DateTime<Utc>) -> StoreResult<ClosedCompetitions> {
        let mut state = self.write()?;
        let mut closed = ClosedCompetitions::default();

        for competition in state.competitions.values_mut() {
            if competition.status == CompetitionStatus::Active && competition.is_expired(now) {
                competition
                    .complete()
                    .map_err(|e| StoreError::Corrupt { message: e.to_string() })?;
                closed.competition_ids.push(competition.competition_id);
            }
        }

        let expired: HashSet<CompetitionId> = state
            .competitions
            .values()
            .filter(|c| c.status == CompetitionStatus::Completed && c.is_expired(now))
            .map(|c| c.competition_id)
            .collect();

        for membership in state.memberships.values_mut() {
            let in_expired = membership
                .competition_id
                .map(|id| expired.contains(&id))
                .unwrap_or(false);
            if membership.status == MembershipStatus::Active && in_expired {
                membership
                    .complete()
                    .map_err(|e| StoreError::Corrupt { message: e.to_string() })?;
                closed.memberships_completed += 1;
            }
        }

        Ok(closed)
    }

    async fn get_waiting_memberships(&self, limit: usize) -> StoreResult<Vec<Membership>> {
        let state = self.read()?;
        let mut waiting: Vec<Membership> = state
            .memberships
            .values()
            .filter(|m| m.status == MembershipStatus::Waiting)
            .cloned()
            .collect();
        waiting.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        waiting.truncate(limit);
        Ok(waiting)
    }

    async fn activate_memberships(
        &self,
        player_ids: &[PlayerId],
        competition_id: CompetitionId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.write()?;
        if !state.competitions.contains_key(&competition_id) {
            return Err(StoreError::NotFound {
                entity: "competition",
                key: competition_id.to_string(),
            });
        }

        let wanted: HashSet<&str> = player_ids.iter().map(String::as_str).collect();
        let mut activated = 0;
        for membership in state.memberships.values_mut() {
            if membership.status == MembershipStatus::Waiting
                && wanted.contains(membership.player_id.as_str())
            {
                membership
                    .activate(competition_id, now)
                    .map_err(|e| StoreError::Corrupt { message: e.to_string() })?;
                activated += 1;
            }
        }
        Ok(activated)
    }

    async fn is_player_waiting(&self, player_id: &str) -> StoreResult<bool> {
        let state = self.read()?;
        Ok(state
            .memberships
            .values()
            .any(|m| m.player_id == player_id && m.status == MembershipStatus::Waiting))
    }

    async fn get_active_membership(&self, player_id: &str, now: DateTime<Utc>) -> StoreResult<Option<Membership>> {
        let state = self.read()?;
        Ok(state
            .memberships
            .values()
            .find(|m| m.player_id == player_id && state.competition_accepts_scores(m, now))
            .cloned())
    }

    async fn get_latest_membership(&self, player_id: &str) -> StoreResult<Option<Membership>> {
        let state = self.read()?;
        Ok(state
            .memberships
            .values()
            .filter(|m| m.player_id == player_id)
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn create_membership(&self, membership: NewMembership, now: DateTime<Utc>) -> StoreResult<Membership> {
        let mut state = self.write()?;
        let player_id = membership.player_id.clone();

        let mut stale = Vec::new();
        for existing in state.memberships.values().filter(|m| m.player_id == player_id) {
            match existing.status {
                MembershipStatus::Waiting => {
                    return Err(StoreError::AlreadyWaiting { player_id });
                }
                MembershipStatus::Active if state.competition_accepts_scores(existing, now) => {
                    return Err(StoreError::AlreadyActive { player_id });
                }
                MembershipStatus::Active => stale.push(existing.id),
                MembershipStatus::Completed | MembershipStatus::Cancelled => {}
            }
        }

        for id in stale {
            if let Some(m) = state.memberships.get_mut(&id) {
                debug!(player_id = %m.player_id, membership_id = id, "Completing stale active membership");
                m.complete()
                    .map_err(|e| StoreError::Corrupt { message: e.to_string() })?;
            }
        }

        state.next_membership_id += 1;
        let created = Membership {
            id: state.next_membership_id,
            player_id,
            competition_id: None,
            status: MembershipStatus::Waiting,
            score: 0,
            joined_at: membership.joined_at,
            updated_at: membership.joined_at,
            level: membership.level,
            country_code: membership.country_code,
        };
        state.memberships.insert(created.id, created.clone());
        Ok(created)
    }

    async fn add_score(&self, player_id: &str, delta: i64, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.write()?;
        match state.active_membership_mut(player_id, now) {
            Some(membership) => {
                membership.score = membership.score.checked_add(delta).ok_or_else(|| {
                    StoreError::ScoreOverflow {
                        player_id: player_id.to_string(),
                    }
                })?;
                membership.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_leaderboard(&self, competition_id: CompetitionId) -> StoreResult<Vec<Membership>> {
        let state = self.read()?;
        let mut entries: Vec<Membership> = state
            .memberships
            .values()
            .filter(|m| m.competition_id == Some(competition_id))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.player_id.cmp(&b.player_id)));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{current_timestamp, generate_competition_id};
    use chrono::Duration;

    async fn store_with_players(ids: &[&str]) -> InMemoryStore {
        let store = InMemoryStore::new();
        for id in ids {
            store.create_player(Player::new(*id, 1, "US")).await.unwrap();
        }
        store
    }

    fn competition(now: DateTime<Utc>, ends_in: Duration) -> Competition {
        Competition {
            competition_id: generate_competition_id(),
            started_at: now - Duration::seconds(120),
            ends_at: now + ends_in,
            level: 1,
            country_code: "US".to_string(),
            status: CompetitionStatus::Active,
        }
    }

    async fn enqueue(store: &InMemoryStore, player_id: &str, joined_at: DateTime<Utc>) -> Membership {
        let player = store.get_player(player_id).await.unwrap().unwrap();
        store
            .create_membership(NewMembership::waiting(&player, joined_at), joined_at)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_player_rejected() {
        let store = store_with_players(&["p1"]).await;
        let err = store.create_player(Player::new("p1", 2, "TR")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { entity: "player", .. }));
        assert!(!store.update_player(Player::new("ghost", 1, "US")).await.unwrap());
    }

    #[tokio::test]
    async fn test_waiting_set_is_ordered_and_bounded() {
        let store = store_with_players(&["a", "b", "c"]).await;
        let now = current_timestamp();
        enqueue(&store, "c", now).await;
        enqueue(&store, "a", now - Duration::seconds(10)).await;
        enqueue(&store, "b", now - Duration::seconds(5)).await;

        let waiting = store.get_waiting_memberships(2).await.unwrap();
        let players: Vec<_> = waiting.iter().map(|m| m.player_id.as_str()).collect();
        assert_eq!(players, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_activation_only_touches_waiting_rows() {
        let store = store_with_players(&["a", "b"]).await;
        let now = current_timestamp();
        enqueue(&store, "a", now).await;
        enqueue(&store, "b", now).await;

        let first = competition(now, Duration::seconds(60));
        store.create_competition(first.clone()).await.unwrap();
        let ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(store.activate_memberships(&ids, first.competition_id, now).await.unwrap(), 2);

        let second = competition(now, Duration::seconds(60));
        store.create_competition(second.clone()).await.unwrap();
        assert_eq!(store.activate_memberships(&ids, second.competition_id, now).await.unwrap(), 0);

        let active = store.get_active_membership("a", now).await.unwrap().unwrap();
        assert_eq!(active.competition_id, Some(first.competition_id));
    }

    #[tokio::test]
    async fn test_complete_expired_is_idempotent() {
        let store = store_with_players(&["a", "b"]).await;
        let now = current_timestamp();
        enqueue(&store, "a", now).await;
        enqueue(&store, "b", now).await;
        let expired = competition(now, Duration::seconds(-1));
        store.create_competition(expired.clone()).await.unwrap();
        let ids = vec!["a".to_string(), "b".to_string()];
        store.activate_memberships(&ids, expired.competition_id, now).await.unwrap();

        let closed = store.complete_expired_competitions(now).await.unwrap();
        assert_eq!(closed.competition_ids, vec![expired.competition_id]);
        assert_eq!(closed.memberships_completed, 2);

        let again = store.complete_expired_competitions(now).await.unwrap();
        assert!(again.is_empty());

        let stored = store.get_competition(expired.competition_id).await.unwrap().unwrap();
        assert_eq!(stored.status, CompetitionStatus::Completed);
        for m in store.get_leaderboard(expired.competition_id).await.unwrap() {
            assert_eq!(m.status, MembershipStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_create_membership_conflicts() {
        let store = store_with_players(&["a"]).await;
        let now = current_timestamp();
        enqueue(&store, "a", now).await;

        let player = store.get_player("a").await.unwrap().unwrap();
        let err = store
            .create_membership(NewMembership::waiting(&player, now), now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyWaiting { .. }));

        let running = competition(now, Duration::seconds(60));
        store.create_competition(running.clone()).await.unwrap();
        store
            .activate_memberships(&["a".to_string()], running.competition_id, now)
            .await
            .unwrap();
        let err = store
            .create_membership(NewMembership::waiting(&player, now), now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyActive { .. }));
    }

    #[tokio::test]
    async fn test_stale_active_membership_completed_on_rejoin() {
        let store = store_with_players(&["a"]).await;
        let now = current_timestamp();
        enqueue(&store, "a", now - Duration::seconds(90)).await;
        let ended = competition(now, Duration::seconds(-5));
        store.create_competition(ended.clone()).await.unwrap();
        store
            .activate_memberships(&["a".to_string()], ended.competition_id, now - Duration::seconds(60))
            .await
            .unwrap();

        let rejoined = enqueue(&store, "a", now).await;
        assert_eq!(rejoined.status, MembershipStatus::Waiting);

        let statuses: Vec<_> = store
            .memberships_of("a")
            .unwrap()
            .iter()
            .map(|m| m.status)
            .collect();
        assert_eq!(statuses, vec![MembershipStatus::Completed, MembershipStatus::Waiting]);
    }

    #[tokio::test]
    async fn test_add_score_requires_running_competition() {
        let store = store_with_players(&["a"]).await;
        let now = current_timestamp();
        assert!(!store.add_score("a", 5, now).await.unwrap());

        enqueue(&store, "a", now).await;
        let running = competition(now, Duration::seconds(30));
        store.create_competition(running.clone()).await.unwrap();
        store
            .activate_memberships(&["a".to_string()], running.competition_id, now)
            .await
            .unwrap();

        assert!(store.add_score("a", 10, now).await.unwrap());
        assert!(store.add_score("a", 5, now).await.unwrap());
        assert!(!store.add_score("a", 5, now + Duration::seconds(31)).await.unwrap());

        let board = store.get_leaderboard(running.competition_id).await.unwrap();
        assert_eq!(board[0].score, 15);
    }

    #[tokio::test]
    async fn test_add_score_overflow_leaves_score_unchanged() {
        let store = store_with_players(&["a"]).await;
        let now = current_timestamp();
        enqueue(&store, "a", now).await;
        let running = competition(now, Duration::seconds(30));
        store.create_competition(running.clone()).await.unwrap();
        store
            .activate_memberships(&["a".to_string()], running.competition_id, now)
            .await
            .unwrap();

        assert!(store.add_score("a", i64::MAX - 1, now).await.unwrap());
        let err = store.add_score("a", 2, now).await.unwrap_err();
        assert!(matches!(err, StoreError::ScoreOverflow { ref player_id } if player_id == "a"));

        let board = store.get_leaderboard(running.competition_id).await.unwrap();
        assert_eq!(board[0].score, i64::MAX - 1);
    }
}
