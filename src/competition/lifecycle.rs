//! Competition and membership lifecycle
//!
//! The transition rules here are pure functions over loaded entities. The
//! [`LifecycleManager`] applies them through the store when the scheduler
//! closes expired competitions or opens a new one for a matched group.

use crate::competition::matching::MatchGroup;
use crate::storage::{ClosedCompetitions, CompetitionStore, StoreError, StoreResult};
use crate::types::{
    Competition, CompetitionId, CompetitionStatus, Membership, MembershipStatus,
};
use crate::utils::generate_competition_id;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rejected state transition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("competition {competition_id} cannot move from {from} to {to}")]
    Competition {
        competition_id: CompetitionId,
        from: CompetitionStatus,
        to: CompetitionStatus,
    },

    #[error("membership {membership_id} cannot move from {from} to {to}")]
    Membership {
        membership_id: i64,
        from: MembershipStatus,
        to: MembershipStatus,
    },
}

/// Failure to open a competition for a matched group
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot open a competition for an empty group")]
    EmptyGroup,

    #[error("competition started at {started_at} would end past the supported time range (duration {duration})")]
    EndOutOfRange {
        started_at: DateTime<Utc>,
        duration: Duration,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CompetitionStatus {
    /// ACTIVE is the only state with outgoing transitions
    pub fn can_transition_to(self, next: CompetitionStatus) -> bool {
        matches!(
            (self, next),
            (CompetitionStatus::Active, CompetitionStatus::Completed)
                | (CompetitionStatus::Active, CompetitionStatus::Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, CompetitionStatus::Active)
    }
}

impl MembershipStatus {
    pub fn can_transition_to(self, next: MembershipStatus) -> bool {
        matches!(
            (self, next),
            (MembershipStatus::Waiting, MembershipStatus::Active)
                | (MembershipStatus::Waiting, MembershipStatus::Cancelled)
                | (MembershipStatus::Active, MembershipStatus::Completed)
                | (MembershipStatus::Active, MembershipStatus::Cancelled)
        )
    }

    /// Whether a membership in this state must reference a competition.
    /// CANCELLED may go either way, depending on where it was cancelled from.
    pub fn requires_competition(self) -> Option<bool> {
        match self {
            MembershipStatus::Waiting => Some(false),
            MembershipStatus::Active | MembershipStatus::Completed => Some(true),
            MembershipStatus::Cancelled => None,
        }
    }
}

impl Competition {
    /// Build a new ACTIVE competition founded by `founder`. `None` when
    /// `now + duration` is not representable.
    pub fn open(founder: &Membership, now: DateTime<Utc>, duration: Duration) -> Option<Self> {
        Some(Self {
            competition_id: generate_competition_id(),
            started_at: now,
            ends_at: now.checked_add_signed(duration)?,
            level: founder.level,
            country_code: founder.country_code.clone(),
            status: CompetitionStatus::Active,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ends_at <= now
    }

    /// Whether scores may still be submitted at `now`
    pub fn accepts_scores(&self, now: DateTime<Utc>) -> bool {
        self.status == CompetitionStatus::Active && !self.is_expired(now)
    }

    fn transition(&mut self, to: CompetitionStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::Competition {
                competition_id: self.competition_id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.transition(CompetitionStatus::Completed)
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.transition(CompetitionStatus::Cancelled)
    }
}

impl Membership {
    fn transition(&mut self, to: MembershipStatus, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::Membership {
                membership_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// WAITING -> ACTIVE in `competition_id`
    pub fn activate(&mut self, competition_id: CompetitionId, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(MembershipStatus::Active, now)?;
        self.competition_id = Some(competition_id);
        Ok(())
    }

    /// ACTIVE -> COMPLETED. `updated_at` is kept so the latest-membership
    /// lookup still reflects the last score change.
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        let updated_at = self.updated_at;
        self.transition(MembershipStatus::Completed, updated_at)
    }

    /// ACTIVE or WAITING -> CANCELLED
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(MembershipStatus::Cancelled, now)
    }

    /// Whether this membership belongs to `competition` and may score at `now`
    pub fn can_score_in(&self, competition: &Competition, now: DateTime<Utc>) -> bool {
        self.status == MembershipStatus::Active
            && self.competition_id == Some(competition.competition_id)
            && competition.accepts_scores(now)
    }

    /// `competition_id` is present exactly when the status requires one
    pub fn is_consistent(&self) -> bool {
        self.status
            .requires_competition()
            .map_or(true, |required| required == self.competition_id.is_some())
    }
}

/// Applies lifecycle transitions through the store
pub struct LifecycleManager {
    store: Arc<dyn CompetitionStore>,
    competition_duration: Duration,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn CompetitionStore>, competition_duration: Duration) -> Self {
        Self {
            store,
            competition_duration,
        }
    }

    pub fn competition_duration(&self) -> Duration {
        self.competition_duration
    }

    /// Close expired competitions and their ACTIVE memberships
    pub async fn close_expired(&self, now: DateTime<Utc>) -> StoreResult<ClosedCompetitions> {
        let closed = self.store.complete_expired_competitions(now).await?;
        if closed.is_empty() {
            debug!("No expired competitions to close");
        } else {
            info!(
                competitions = closed.competition_ids.len(),
                memberships = closed.memberships_completed,
                "Closed expired competitions: {:?}",
                closed.competition_ids
            );
        }
        Ok(closed)
    }

    pub async fn active_competition(&self) -> StoreResult<Option<Competition>> {
        self.store.get_active_competition().await
    }

    /// Create a competition for `group` and activate its members
    pub async fn open_competition(
        &self,
        group: &MatchGroup,
        now: DateTime<Utc>,
    ) -> Result<Competition, LifecycleError> {
        let founder = group.founder().ok_or(LifecycleError::EmptyGroup)?;
        let competition = Competition::open(founder, now, self.competition_duration).ok_or(
            LifecycleError::EndOutOfRange {
                started_at: now,
                duration: self.competition_duration,
            },
        )?;
        info!(
            competition_id = %competition.competition_id,
            ends_at = %competition.ends_at,
            "Creating competition for {} players ({})",
            group.len(),
            group.criterion
        );
        self.store.create_competition(competition.clone()).await?;

        let player_ids = group.player_ids();
        let activated = self
            .store
            .activate_memberships(&player_ids, competition.competition_id, now)
            .await?;

        if activated < player_ids.len() as u64 {
            warn!(
                competition_id = %competition.competition_id,
                "Only {}/{} grouped players were still waiting",
                activated,
                player_ids.len()
            );
        }

        Ok(competition)
    }
}
