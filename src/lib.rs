//! Leaderboard Service - timed competitions with periodic matchmaking
//!
//! Players join a waiting queue, a background scheduler groups them by level
//! and country into competitions of fixed duration, and scores are tracked
//! per competition until it expires.

pub mod api;
pub mod competition;
pub mod config;
pub mod error;
pub mod membership;
pub mod metrics;
pub mod service;
pub mod storage;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{ErrorKind, LeaderboardError, Result};
pub use types::*;

// Re-export key components
pub use competition::{LevelCountryMatcher, MatchmakingScheduler, Matchmaker, SchedulerConfig};
pub use membership::MembershipService;
pub use storage::{CompetitionStore, InMemoryStore, PgStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
