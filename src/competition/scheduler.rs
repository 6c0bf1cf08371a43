//! Periodic matchmaking scheduler
//!
//! Each tick runs one cycle: close expired competitions, stop if a
//! competition is still running, otherwise group the longest-waiting players
//! and open a competition for them. Cycle failures are logged and counted,
//! never propagated out of [`MatchmakingScheduler::run`].

use crate::competition::lifecycle::{LifecycleError, LifecycleManager};
use crate::competition::matching::{Matchmaker, MIN_GROUP_SIZE};
use crate::metrics::MetricsCollector;
use crate::storage::{CompetitionStore, StoreError};
use crate::types::CycleOutcome;
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Default time between cycles
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of waiting players considered per cycle
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Scheduler settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Step of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStep {
    CloseExpired,
    SingletonGuard,
    LoadWaiting,
    OpenCompetition,
}

impl CycleStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStep::CloseExpired => "close_expired",
            CycleStep::SingletonGuard => "singleton_guard",
            CycleStep::LoadWaiting => "load_waiting",
            CycleStep::OpenCompetition => "open_competition",
        }
    }

    fn fail(self) -> impl FnOnce(StoreError) -> CycleError {
        move |source| CycleError {
            step: self,
            source: source.into(),
        }
    }
}

impl std::fmt::Display for CycleStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cycle aborted at `step`
#[derive(Debug, thiserror::Error)]
#[error("matchmaking cycle failed at {step}: {source}")]
pub struct CycleError {
    pub step: CycleStep,
    #[source]
    pub source: LifecycleError,
}

/// Runs matchmaking cycles on a fixed interval
pub struct MatchmakingScheduler {
    store: Arc<dyn CompetitionStore>,
    lifecycle: LifecycleManager,
    matcher: Arc<dyn Matchmaker>,
    config: SchedulerConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MatchmakingScheduler {
    pub fn new(
        store: Arc<dyn CompetitionStore>,
        lifecycle: LifecycleManager,
        matcher: Arc<dyn Matchmaker>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            lifecycle,
            matcher,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Tick until `shutdown` fires. The first cycle runs one full interval
    /// after the call; the signal is only observed between cycles.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Matchmaking scheduler started (interval {:?}, batch size {})",
            period, self.config.batch_size
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Matchmaking scheduler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {}
            }

            match self.run_cycle(current_timestamp()).await {
                Ok(outcome) => debug!("Matchmaking cycle finished: {:?}", outcome),
                Err(e) => error!(step = %e.step, "Matchmaking cycle aborted: {}", e.source),
            }
        }

        info!("Matchmaking scheduler stopped");
    }

    /// Run a single cycle as of `now`
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleOutcome, CycleError> {
        let started = std::time::Instant::now();
        let result = self.cycle(now).await;

        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(outcome) => metrics.record_cycle(outcome, started.elapsed()),
                Err(e) => metrics.record_cycle_failure(e.step.as_str(), started.elapsed()),
            }
        }
        result
    }

    async fn cycle(&self, now: DateTime<Utc>) -> Result<CycleOutcome, CycleError> {
        let closed = self
            .lifecycle
            .close_expired(now)
            .await
            .map_err(CycleStep::CloseExpired.fail())?;
        if let Some(metrics) = &self.metrics {
            metrics.record_competitions_closed(&closed);
        }

        if let Some(running) = self
            .lifecycle
            .active_competition()
            .await
            .map_err(CycleStep::SingletonGuard.fail())?
        {
            debug!(
                competition_id = %running.competition_id,
                "Competition still running until {}, skipping matchmaking",
                running.ends_at
            );
            return Ok(CycleOutcome::CompetitionInProgress(running.competition_id));
        }

        let waiting = self
            .store
            .get_waiting_memberships(self.config.batch_size)
            .await
            .map_err(CycleStep::LoadWaiting.fail())?;
        if let Some(metrics) = &self.metrics {
            metrics.set_players_waiting(waiting.len());
        }

        if waiting.len() < MIN_GROUP_SIZE {
            debug!("Not enough waiting players ({})", waiting.len());
            return Ok(CycleOutcome::NotEnoughPlayers(waiting.len()));
        }

        let group = match self.matcher.select_group(&waiting) {
            Some(group) => group,
            None => return Ok(CycleOutcome::NotEnoughPlayers(waiting.len())),
        };

        let competition = self
            .lifecycle
            .open_competition(&group, now)
            .await
            .map_err(|source| CycleError {
                step: CycleStep::OpenCompetition,
                source,
            })?;

        info!(
            competition_id = %competition.competition_id,
            players = group.len(),
            "Opened competition by {}",
            group.criterion
        );

        Ok(CycleOutcome::CompetitionOpened {
            competition_id: competition.competition_id,
            criterion: group.criterion.clone(),
            player_ids: group.player_ids(),
        })
    }
}
