//! Common types used throughout the leaderboard service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for players
pub type PlayerId = String;

/// Unique identifier for competitions (also exposed as the leaderboard id)
pub type CompetitionId = Uuid;

/// Surrogate key of a membership row, assigned by the store
pub type MembershipId = i64;

/// A registered player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub player_id: PlayerId,
    pub level: i32,
    pub country_code: String,
}

impl Player {
    pub fn new(player_id: impl Into<PlayerId>, level: i32, country_code: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            level,
            country_code: country_code.into(),
        }
    }
}

/// Status of a competition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompetitionStatus {
    Active,
    Completed,
    Cancelled,
}

impl CompetitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompetitionStatus::Active => "ACTIVE",
            CompetitionStatus::Completed => "COMPLETED",
            CompetitionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for CompetitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CompetitionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(CompetitionStatus::Active),
            "COMPLETED" => Ok(CompetitionStatus::Completed),
            "CANCELLED" => Ok(CompetitionStatus::Cancelled),
            other => Err(format!("unknown competition status: {}", other)),
        }
    }
}

/// A time-boxed competition founded by one matchmaking group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competition {
    pub competition_id: CompetitionId,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub level: i32,
    pub country_code: String,
    pub status: CompetitionStatus,
}

/// Status of a player's membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipStatus {
    Waiting,
    Active,
    Completed,
    Cancelled,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Waiting => "WAITING",
            MembershipStatus::Active => "ACTIVE",
            MembershipStatus::Completed => "COMPLETED",
            MembershipStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(MembershipStatus::Waiting),
            "ACTIVE" => Ok(MembershipStatus::Active),
            "COMPLETED" => Ok(MembershipStatus::Completed),
            "CANCELLED" => Ok(MembershipStatus::Cancelled),
            other => Err(format!("unknown membership status: {}", other)),
        }
    }
}

/// A player's participation in, or wait for, one competition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub player_id: PlayerId,
    /// `None` while the membership is waiting to be grouped
    pub competition_id: Option<CompetitionId>,
    pub status: MembershipStatus,
    pub score: i64,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Level snapshot taken at join time
    pub level: i32,
    /// Country snapshot taken at join time
    pub country_code: String,
}

/// Reference returned to a caller after a successful join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRef {
    pub membership_id: MembershipId,
    pub player_id: PlayerId,
    pub status: MembershipStatus,
    pub joined_at: DateTime<Utc>,
}

impl From<&Membership> for MembershipRef {
    fn from(m: &Membership) -> Self {
        Self {
            membership_id: m.id,
            player_id: m.player_id.clone(),
            status: m.status,
            joined_at: m.joined_at,
        }
    }
}

/// One row of a leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub player_id: PlayerId,
    pub score: i64,
}

impl From<&Membership> for LeaderboardEntry {
    fn from(m: &Membership) -> Self {
        Self {
            player_id: m.player_id.clone(),
            score: m.score,
        }
    }
}

/// Leaderboard of a single competition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaderboard {
    pub leaderboard_id: CompetitionId,
    /// Expiry of the competition as unix seconds; filled in for player-scoped lookups
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ends_at: Option<DateTime<Utc>>,
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Why a matchmaking group was formed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchCriterion {
    Level(i32),
    Country(String),
    Fallback,
}

impl std::fmt::Display for MatchCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchCriterion::Level(level) => write!(f, "level {}", level),
            MatchCriterion::Country(country) => write!(f, "country {}", country),
            MatchCriterion::Fallback => write!(f, "fallback (all waiting players)"),
        }
    }
}

/// Outcome of one matchmaking cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A competition is still running, nothing was opened
    CompetitionInProgress(CompetitionId),
    /// Fewer than two players were waiting
    NotEnoughPlayers(usize),
    /// A new competition was opened for the listed players
    CompetitionOpened {
        competition_id: CompetitionId,
        criterion: MatchCriterion,
        player_ids: Vec<PlayerId>,
    },
}
