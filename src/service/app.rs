//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the store, the
//! membership service, the matchmaking scheduler and the HTTP server, and
//! owns their background tasks.

use crate::api;
use crate::competition::{LevelCountryMatcher, LifecycleManager, MatchmakingScheduler, SchedulerConfig};
use crate::config::AppConfig;
use crate::membership::MembershipService;
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector};
use crate::service::health::{HealthCheck, HealthStatus};
use crate::storage::{CompetitionStore, InMemoryStore, PgStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often uptime and health gauges are refreshed
const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(15);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Backing store shared by every component
    store: Arc<dyn CompetitionStore>,

    /// Player-facing operations
    membership_service: MembershipService,

    /// Periodic grouping of waiting players
    scheduler: Arc<MatchmakingScheduler>,

    /// Prometheus metrics
    metrics_collector: Arc<MetricsCollector>,

    /// Fired once on shutdown; every background task subscribes
    shutdown_tx: broadcast::Sender<()>,

    /// Matchmaking loop handle
    scheduler_task: Mutex<Option<JoinHandle<()>>>,

    /// HTTP server and metrics refresh handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: RwLock<bool>,

    started_at: Instant,
}

impl AppState {
    /// Initialize the application, connecting to Postgres when a database
    /// URL is configured and falling back to the in-memory store otherwise
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing leaderboard service");

        let store: Arc<dyn CompetitionStore> = match &config.database.url {
            Some(url) => {
                info!("Connecting to Postgres");
                let store = PgStore::connect(
                    url,
                    config.database.max_connections,
                    config.database.connect_retries,
                )
                .await
                .map_err(|e| ServiceError::Database {
                    message: format!("Failed to connect to database: {}", e),
                })?;
                Arc::new(store)
            }
            None => {
                warn!("No database configured, using the in-memory store");
                Arc::new(InMemoryStore::new())
            }
        };

        Self::with_store(config, store)
    }

    /// Build the application around an existing store
    pub fn with_store(
        config: AppConfig,
        store: Arc<dyn CompetitionStore>,
    ) -> Result<Self, ServiceError> {
        if config.matchmaking.batch_size < 2 {
            return Err(ServiceError::Configuration {
                message: format!(
                    "Matchmaking batch size must be at least 2, got {}",
                    config.matchmaking.batch_size
                ),
            });
        }

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let membership_service =
            MembershipService::with_metrics(store.clone(), metrics_collector.clone());

        let lifecycle = LifecycleManager::new(store.clone(), config.competition_duration());
        let scheduler = MatchmakingScheduler::new(
            store.clone(),
            lifecycle,
            Arc::new(LevelCountryMatcher::new()),
            SchedulerConfig {
                interval: config.matchmaking_interval(),
                batch_size: config.matchmaking.batch_size,
            },
        )
        .with_metrics(metrics_collector.clone());

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            "Configuration: service={}, http_port={}, interval={:?}, competition_duration={}s, batch_size={}",
            config.service.name,
            config.service.http_port,
            config.matchmaking_interval(),
            config.competition_duration().num_seconds(),
            config.matchmaking.batch_size
        );

        Ok(Self {
            config,
            store,
            membership_service,
            scheduler: Arc::new(scheduler),
            metrics_collector,
            shutdown_tx,
            scheduler_task: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            is_running: RwLock::new(false),
            started_at: Instant::now(),
        })
    }

    /// Start the matchmaking loop, the HTTP server and metrics refresh
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        {
            let mut running = self.is_running.write().await;
            if *running {
                return Err(ServiceError::Initialization {
                    message: "Service is already running".to_string(),
                });
            }
            *running = true;
        }

        info!("Starting leaderboard service");

        self.start_scheduler().await;
        self.start_http_server().await;
        self.start_background_tasks().await;

        info!("✅ Leaderboard service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown. An in-flight matchmaking cycle is allowed
    /// to finish within the configured shutdown timeout.
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of leaderboard service");

        // Mark as not running
        *self.is_running.write().await = false;

        if self.shutdown_tx.send(()).is_err() {
            debug!("No background task was listening for shutdown");
        }

        let timeout = self.config.shutdown_timeout();

        let scheduler_task = self.scheduler_task.lock().await.take();
        if let Some(mut handle) = scheduler_task {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => info!("✅ Matchmaking scheduler stopped"),
                Ok(Err(e)) => warn!("Matchmaking scheduler task failed: {}", e),
                Err(_) => {
                    warn!(
                        "Matchmaking scheduler did not stop within {:?}, aborting",
                        timeout
                    );
                    handle.abort();
                }
            }
        }

        self.stop_background_tasks(timeout).await;

        // Get final statistics
        let final_stats =
            self.membership_service
                .get_stats()
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;
        info!("Final service statistics: {:?}", final_stats);

        info!("✅ Leaderboard service shutdown completed");
        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Whether the matchmaking loop task is alive
    pub async fn scheduler_running(&self) -> bool {
        self.scheduler_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn store(&self) -> Arc<dyn CompetitionStore> {
        self.store.clone()
    }

    pub fn membership_service(&self) -> &MembershipService {
        &self.membership_service
    }

    pub fn scheduler(&self) -> Arc<MatchmakingScheduler> {
        self.scheduler.clone()
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    async fn start_scheduler(&self) {
        info!(
            "Starting matchmaking scheduler ({:?} interval)...",
            self.scheduler.config().interval
        );

        let scheduler = self.scheduler.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            scheduler.run(shutdown_rx).await;
        });

        *self.scheduler_task.lock().await = Some(handle);
    }

    async fn start_http_server(self: &Arc<Self>) {
        let port = self.config.service.http_port;
        info!("Starting HTTP server on port {}", port);

        let server = HealthServer::new(
            HealthServerConfig {
                port,
                host: "0.0.0.0".to_string(),
            },
            self.metrics_collector.clone(),
        )
        .with_app_state(self.clone())
        .with_routes(api::router(self.membership_service.clone()))
        .with_shutdown(self.shutdown_tx.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = server.start().await {
                error!("HTTP server failed: {}", e);
            } else {
                info!("HTTP server task completed");
            }
        });
        self.background_tasks.lock().await.push(handle);

        // Give the server a moment to start up
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    async fn start_background_tasks(self: &Arc<Self>) {
        info!(
            "Starting health metrics task ({}s interval)...",
            HEALTH_METRICS_INTERVAL.as_secs()
        );

        let app_state = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = interval.tick() => {}
                }

                let collector = app_state.metrics_collector();
                collector
                    .service()
                    .uptime_seconds
                    .set(app_state.uptime().as_secs() as i64);

                let health = HealthCheck::check(app_state.clone()).await;
                collector.update_health_status(health.status.as_gauge());
                for check in &health.checks {
                    collector.update_component_health(
                        &check.name,
                        check.status != HealthStatus::Unhealthy,
                    );
                }
                debug!("Health metrics refreshed: {}", health.status);
            }
            info!("Health metrics task stopped");
        });
        self.background_tasks.lock().await.push(handle);
    }

    async fn stop_background_tasks(&self, timeout: Duration) {
        let handles: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        info!("Stopping {} background tasks...", handles.len());

        for mut handle in handles {
            if tokio::time::timeout(timeout, &mut handle).await.is_err() {
                warn!("Background task did not stop within {:?}, aborting", timeout);
                handle.abort();
            }
        }

        info!("✅ Background tasks stopped");
    }
}
