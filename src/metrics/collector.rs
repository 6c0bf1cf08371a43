//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the leaderboard service:
//! matchmaking cycles, competition lifecycle, and the player-facing
//! membership operations.

use crate::storage::ClosedCompetitions;
use crate::types::{CycleOutcome, MatchCriterion};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;

/// Main metrics collector for the leaderboard service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Matchmaking and competition metrics
    matchmaking_metrics: MatchmakingMetrics,

    /// Join, score and leaderboard request metrics
    membership_metrics: MembershipMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Matchmaking and competition metrics
#[derive(Clone)]
pub struct MatchmakingMetrics {
    /// Completed cycles by outcome
    pub cycles_total: IntCounterVec,

    /// Aborted cycles by the step that failed
    pub cycle_failures_total: IntCounterVec,

    /// Wall time of one cycle
    pub cycle_duration: Histogram,

    /// Competitions opened by grouping criterion
    pub competitions_opened_total: IntCounterVec,

    /// Competitions closed after expiry
    pub competitions_closed_total: IntCounter,

    /// Players moved from waiting into a competition
    pub players_matched_total: IntCounter,

    /// Size of the waiting batch seen by the last cycle
    pub players_waiting: IntGauge,
}

/// Membership request metrics
#[derive(Clone)]
pub struct MembershipMetrics {
    /// Join requests by outcome
    pub joins_total: IntCounterVec,

    /// Score submissions by outcome
    pub scores_total: IntCounterVec,

    /// Request handling time by operation
    pub request_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let matchmaking_metrics = MatchmakingMetrics::new(&registry)?;
        let membership_metrics = MembershipMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            matchmaking_metrics,
            membership_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get matchmaking metrics
    pub fn matchmaking(&self) -> &MatchmakingMetrics {
        &self.matchmaking_metrics
    }

    /// Get membership metrics
    pub fn membership(&self) -> &MembershipMetrics {
        &self.membership_metrics
    }

    /// Record a cycle that ran to completion
    pub fn record_cycle(&self, outcome: &CycleOutcome, duration: Duration) {
        let label = match outcome {
            CycleOutcome::CompetitionInProgress(_) => "in_progress",
            CycleOutcome::NotEnoughPlayers(_) => "not_enough_players",
            CycleOutcome::CompetitionOpened { .. } => "opened",
        };

        self.matchmaking_metrics
            .cycles_total
            .with_label_values(&[label])
            .inc();

        self.matchmaking_metrics
            .cycle_duration
            .observe(duration.as_secs_f64());

        if let CycleOutcome::CompetitionOpened {
            criterion,
            player_ids,
            ..
        } = outcome
        {
            let criterion_str = match criterion {
                MatchCriterion::Level(_) => "level",
                MatchCriterion::Country(_) => "country",
                MatchCriterion::Fallback => "fallback",
            };
            self.matchmaking_metrics
                .competitions_opened_total
                .with_label_values(&[criterion_str])
                .inc();
            self.matchmaking_metrics
                .players_matched_total
                .inc_by(player_ids.len() as u64);
        }
    }

    /// Record a cycle aborted at `step`
    pub fn record_cycle_failure(&self, step: &str, duration: Duration) {
        self.matchmaking_metrics
            .cycle_failures_total
            .with_label_values(&[step])
            .inc();

        self.matchmaking_metrics
            .cycle_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_competitions_closed(&self, closed: &ClosedCompetitions) {
        self.matchmaking_metrics
            .competitions_closed_total
            .inc_by(closed.competition_ids.len() as u64);
    }

    pub fn set_players_waiting(&self, count: usize) {
        self.matchmaking_metrics
            .players_waiting
            .set(count as i64);
    }

    /// Record a join attempt
    pub fn record_join(&self, outcome: &str, duration: Duration) {
        self.membership_metrics
            .joins_total
            .with_label_values(&[outcome])
            .inc();
        self.record_request("join", duration);
    }

    /// Record a score submission
    pub fn record_score(&self, outcome: &str, duration: Duration) {
        self.membership_metrics
            .scores_total
            .with_label_values(&[outcome])
            .inc();
        self.record_request("submit_score", duration);
    }

    /// Record request handling time for `operation`
    pub fn record_request(&self, operation: &str, duration: Duration) {
        self.membership_metrics
            .request_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("leaderboard_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "leaderboard_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("leaderboard_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
        })
    }
}

impl MatchmakingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let cycles_total = IntCounterVec::new(
            Opts::new(
                "leaderboard_matchmaking_cycles_total",
                "Matchmaking cycles completed",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let cycle_failures_total = IntCounterVec::new(
            Opts::new(
                "leaderboard_matchmaking_cycle_failures_total",
                "Matchmaking cycles aborted",
            ),
            &["step"],
        )?;
        registry.register(Box::new(cycle_failures_total.clone()))?;

        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "leaderboard_matchmaking_cycle_duration_seconds",
                "Matchmaking cycle duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(cycle_duration.clone()))?;

        let competitions_opened_total = IntCounterVec::new(
            Opts::new(
                "leaderboard_competitions_opened_total",
                "Competitions opened",
            ),
            &["criterion"],
        )?;
        registry.register(Box::new(competitions_opened_total.clone()))?;

        let competitions_closed_total = IntCounter::new(
            "leaderboard_competitions_closed_total",
            "Competitions closed after expiry",
        )?;
        registry.register(Box::new(competitions_closed_total.clone()))?;

        let players_matched_total = IntCounter::new(
            "leaderboard_players_matched_total",
            "Players placed into competitions",
        )?;
        registry.register(Box::new(players_matched_total.clone()))?;

        let players_waiting = IntGauge::new(
            "leaderboard_players_waiting",
            "Waiting players seen by the last cycle",
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        Ok(Self {
            cycles_total,
            cycle_failures_total,
            cycle_duration,
            competitions_opened_total,
            competitions_closed_total,
            players_matched_total,
            players_waiting,
        })
    }
}

impl MembershipMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let joins_total = IntCounterVec::new(
            Opts::new("leaderboard_joins_total", "Join requests"),
            &["outcome"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let scores_total = IntCounterVec::new(
            Opts::new("leaderboard_scores_total", "Score submissions"),
            &["outcome"],
        )?;
        registry.register(Box::new(scores_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "leaderboard_request_duration_seconds",
                "Membership operation duration",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            joins_total,
            scores_total,
            request_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        let _service = collector.service();
        let _matchmaking = collector.matchmaking();
        let _membership = collector.membership();
    }

    #[test]
    fn test_cycle_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_cycle(
            &CycleOutcome::CompetitionOpened {
                competition_id: Uuid::new_v4(),
                criterion: MatchCriterion::Level(3),
                player_ids: vec!["a".into(), "b".into(), "c".into()],
            },
            Duration::from_millis(4),
        );
        collector.record_cycle(&CycleOutcome::NotEnoughPlayers(1), Duration::from_millis(1));
        collector.record_cycle_failure("close_expired", Duration::from_millis(2));

        let matchmaking = collector.matchmaking();
        assert_eq!(matchmaking.players_matched_total.get(), 3);
        assert_eq!(
            matchmaking
                .competitions_opened_total
                .with_label_values(&["level"])
                .get(),
            1
        );
        assert_eq!(
            matchmaking
                .cycles_total
                .with_label_values(&["not_enough_players"])
                .get(),
            1
        );
        assert_eq!(
            matchmaking
                .cycle_failures_total
                .with_label_values(&["close_expired"])
                .get(),
            1
        );
    }

    #[test]
    fn test_membership_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_join("accepted", Duration::from_millis(1));
        collector.record_join("already_waiting", Duration::from_millis(1));
        collector.record_score("accepted", Duration::from_millis(1));

        let membership = collector.membership();
        assert_eq!(membership.joins_total.with_label_values(&["accepted"]).get(), 1);
        assert_eq!(membership.scores_total.with_label_values(&["accepted"]).get(), 1);
    }

    #[test]
    fn test_health_status_updates() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.update_health_status(2);
        collector.update_component_health("store", true);
        collector.update_component_health("scheduler", false);
        assert_eq!(collector.service().health_status.get(), 2);
    }
}
