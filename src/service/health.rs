//! Health check endpoints and monitoring
//!
//! This module provides health check functionality for the leaderboard
//! service, including readiness and liveness checks.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value used by `leaderboard_health_status`
    pub fn as_gauge(self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.as_gauge() <= other.as_gauge() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Competition currently accepting scores, if any
    pub active_competition: Option<String>,
    /// Join requests accepted since start
    pub joins_accepted: u64,
    /// Join requests refused since start
    pub joins_rejected: u64,
    /// Score submissions applied since start
    pub scores_accepted: u64,
    /// Score submissions refused since start
    pub scores_rejected: u64,
    /// Seconds since the service started
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Self {
        let checks = vec![
            Self::check_service_running(&app_state).await,
            Self::check_store(&app_state).await,
            Self::check_scheduler(&app_state).await,
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));

        // Gather service statistics
        let stats = Self::gather_service_stats(&app_state).await;

        HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        }
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> HealthStatus {
        if app_state.is_running().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    /// Readiness check - the service is running and storage answers
    pub async fn readiness_check(app_state: Arc<AppState>) -> HealthStatus {
        if !app_state.is_running().await {
            return HealthStatus::Unhealthy;
        }

        let store = Self::check_store(&app_state).await.status;
        let scheduler = Self::check_scheduler(&app_state).await.status;
        store.worst(scheduler)
    }

    /// Check if service is running
    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Check that the store answers a cheap query
    async fn check_store(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match app_state.store().get_active_competition().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Store health check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Store query failed: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Check that the matchmaking loop is still alive
    async fn check_scheduler(app_state: &AppState) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if app_state.scheduler_running().await {
            (HealthStatus::Healthy, None)
        } else {
            // Joins and scores still work, nothing gets grouped
            (
                HealthStatus::Degraded,
                Some("Matchmaking scheduler is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "scheduler".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Gather current service statistics
    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let mut stats = ServiceStats {
            uptime_seconds: app_state.uptime().as_secs(),
            ..ServiceStats::default()
        };

        match app_state.membership_service().get_stats() {
            Ok(membership) => {
                stats.joins_accepted = membership.joins_accepted;
                stats.joins_rejected = membership.joins_rejected;
                stats.scores_accepted = membership.scores_accepted;
                stats.scores_rejected = membership.scores_rejected;
            }
            Err(e) => debug!("Failed to get membership stats for health check: {}", e),
        }

        match app_state.store().get_active_competition().await {
            Ok(active) => {
                stats.active_competition = active.map(|c| c.competition_id.to_string());
            }
            Err(e) => debug!("Failed to read active competition for health check: {}", e),
        }

        stats
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::storage::InMemoryStore;

    fn app_state() -> Arc<AppState> {
        Arc::new(
            AppState::with_store(AppConfig::default(), Arc::new(InMemoryStore::new()))
                .expect("Failed to build app state"),
        )
    }

    #[test]
    fn test_worst_status() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Unhealthy.worst(HealthStatus::Degraded),
            HealthStatus::Unhealthy
        );
        assert_eq!(HealthStatus::Healthy.as_gauge(), 2);
    }

    #[tokio::test]
    async fn test_not_running_is_unhealthy() {
        let state = app_state();
        assert_eq!(
            HealthCheck::liveness_check(state.clone()).await,
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthCheck::readiness_check(state.clone()).await,
            HealthStatus::Unhealthy
        );

        let health = HealthCheck::check(state).await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.checks.len(), 3);
        assert_eq!(health.service, "leaderboard-service");
        assert!(health.to_json().unwrap().contains("\"store\""));
    }
}
