//! Persistence gateway for players, competitions and memberships
//!
//! Every method of [`CompetitionStore`] is a single atomic operation. The
//! conditional ones (`activate_memberships`, `add_score`, `create_membership`)
//! re-check the state they depend on inside that operation, so callers never
//! need to lock across a read and a write.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::types::{Competition, CompetitionId, Membership, Player, PlayerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Storage-level failures
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("player {player_id} already has a waiting membership")]
    AlreadyWaiting { player_id: PlayerId },

    #[error("player {player_id} already has an active membership")]
    AlreadyActive { player_id: PlayerId },

    #[error("{entity} already exists: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("score of player {player_id} would overflow")]
    ScoreOverflow { player_id: PlayerId },

    #[error("corrupt row: {message}")]
    Corrupt { message: String },

    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Data needed to enqueue a player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMembership {
    pub player_id: PlayerId,
    pub level: i32,
    pub country_code: String,
    pub joined_at: DateTime<Utc>,
}

impl NewMembership {
    /// Snapshot the player's current level and country
    pub fn waiting(player: &Player, joined_at: DateTime<Utc>) -> Self {
        Self {
            player_id: player.player_id.clone(),
            level: player.level,
            country_code: player.country_code.clone(),
            joined_at,
        }
    }
}

/// What `complete_expired_competitions` closed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosedCompetitions {
    pub competition_ids: Vec<CompetitionId>,
    pub memberships_completed: u64,
}

impl ClosedCompetitions {
    pub fn is_empty(&self) -> bool {
        self.competition_ids.is_empty() && self.memberships_completed == 0
    }
}

/// Abstract transactional store consumed by the core
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompetitionStore: Send + Sync {
    /// Fetch a player by id
    async fn get_player(&self, player_id: &str) -> StoreResult<Option<Player>>;

    /// Register a new player; `Duplicate` if the id is taken
    async fn create_player(&self, player: Player) -> StoreResult<()>;

    /// Overwrite a player's profile; `false` if the player does not exist
    async fn update_player(&self, player: Player) -> StoreResult<bool>;

    /// The competition currently ACTIVE, if any
    async fn get_active_competition(&self) -> StoreResult<Option<Competition>>;

    async fn create_competition(&self, competition: Competition) -> StoreResult<()>;

    async fn get_competition(&self, competition_id: CompetitionId) -> StoreResult<Option<Competition>>;

    /// Overwrite a competition; `false` if it does not exist
    async fn update_competition(&self, competition: Competition) -> StoreResult<bool>;

    /// Close every ACTIVE competition with `ends_at <= now` together with its
    /// ACTIVE memberships
    async fn complete_expired_competitions(&self, now: DateTime<Utc>) -> StoreResult<ClosedCompetitions>;

    /// WAITING memberships ordered by `joined_at`, then `id`
    async fn get_waiting_memberships(&self, limit: usize) -> StoreResult<Vec<Membership>>;

    /// Move the listed players' WAITING memberships to ACTIVE in the given
    /// competition. Rows no longer WAITING are left alone. Returns the number
    /// of memberships activated.
    async fn activate_memberships(
        &self,
        player_ids: &[PlayerId],
        competition_id: CompetitionId,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn is_player_waiting(&self, player_id: &str) -> StoreResult<bool>;

    /// ACTIVE membership whose competition ends after `now`
    async fn get_active_membership(&self, player_id: &str, now: DateTime<Utc>) -> StoreResult<Option<Membership>>;

    /// Most recently updated membership of the player
    async fn get_latest_membership(&self, player_id: &str) -> StoreResult<Option<Membership>>;

    /// Insert a WAITING membership. Refuses with `AlreadyWaiting` or
    /// `AlreadyActive` when the player already holds one; an ACTIVE membership
    /// whose competition ended by `now` is completed instead of refused.
    async fn create_membership(&self, membership: NewMembership, now: DateTime<Utc>) -> StoreResult<Membership>;

    /// Add `delta` to the player's ACTIVE membership if its competition ends
    /// after `now`. Returns `false` when no membership qualified.
    async fn add_score(&self, player_id: &str, delta: i64, now: DateTime<Utc>) -> StoreResult<bool>;

    /// Memberships of a competition ordered by score desc, player id asc
    async fn get_leaderboard(&self, competition_id: CompetitionId) -> StoreResult<Vec<Membership>>;
}
