//! Error types for the leaderboard service
//!
//! Request-path operations return [`LeaderboardError`], whose [`ErrorKind`]
//! tells a transport layer whether the caller hit a missing resource, a state
//! conflict, or an internal failure.

use crate::storage::StoreError;
use crate::types::{CompetitionId, PlayerId};

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, LeaderboardError>;

/// Coarse classification of a [`LeaderboardError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    Internal,
}

/// Errors surfaced by the membership service
#[derive(Debug, thiserror::Error)]
pub enum LeaderboardError {
    #[error("player not found: {player_id}")]
    PlayerNotFound { player_id: PlayerId },

    #[error("leaderboard not found: {competition_id}")]
    LeaderboardNotFound { competition_id: CompetitionId },

    #[error("player already exists: {player_id}")]
    PlayerAlreadyExists { player_id: PlayerId },

    #[error("player already in active competition: {player_id}")]
    PlayerAlreadyActive { player_id: PlayerId },

    #[error("player already in waiting queue: {player_id}")]
    PlayerAlreadyWaiting { player_id: PlayerId },

    #[error("player not in active competition: {player_id}")]
    NotInActiveCompetition { player_id: PlayerId },

    #[error("score must not decrease: {delta}")]
    NegativeScore { delta: i64 },

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("internal service error: {message}")]
    Internal { message: String },
}

impl LeaderboardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LeaderboardError::NegativeScore { .. } => ErrorKind::InvalidInput,
            LeaderboardError::PlayerNotFound { .. } | LeaderboardError::LeaderboardNotFound { .. } => {
                ErrorKind::NotFound
            }
            LeaderboardError::PlayerAlreadyExists { .. }
            | LeaderboardError::PlayerAlreadyActive { .. }
            | LeaderboardError::PlayerAlreadyWaiting { .. }
            | LeaderboardError::NotInActiveCompetition { .. } => ErrorKind::Conflict,
            LeaderboardError::Storage(_) | LeaderboardError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}
