//! Competition management for the leaderboard service
//!
//! This module holds the competition and membership state machine, the
//! grouping policy that founds new competitions, and the periodic scheduler
//! that drives both.

pub mod lifecycle;
pub mod matching;
pub mod scheduler;

// Re-export commonly used types
pub use lifecycle::{LifecycleError, LifecycleManager, TransitionError};
pub use matching::{LevelCountryMatcher, MatchGroup, Matchmaker, MIN_GROUP_SIZE};
pub use scheduler::{CycleError, CycleStep, MatchmakingScheduler, SchedulerConfig};
