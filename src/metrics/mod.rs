//! Metrics and monitoring for the leaderboard service
//!
//! This module provides Prometheus metrics collection and the HTTP server
//! that exposes health, readiness and metrics endpoints.

pub mod collector;
pub mod health;

pub use collector::{
    MatchmakingMetrics, MembershipMetrics, MetricsCollector, ServiceMetrics,
};
pub use health::{encode_metrics, HealthServer, HealthServerConfig};
