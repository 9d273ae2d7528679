//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the store, the
//! rating engine, the matchmaking service and the metrics server together,
//! and owns the background tasks.

use crate::config::{AppConfig, EngineKind};
use crate::error::Result as MatchmakingResult;
use crate::matchmaking::MatchmakingService;
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::rating::{HttpRatingClient, RatingClient, WengLinEngine};
use crate::store::InMemoryStore;
use crate::types::{MatchId, RecalculationSummary, SeasonId};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Interval of the service metrics task
const SERVICE_METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Production application state
pub struct AppState {
    config: AppConfig,

    /// Backing store shared by every component
    store: Arc<InMemoryStore>,

    /// Queue, acceptance, active match and rating operations
    matchmaking: MatchmakingService,

    metrics: Arc<MetricsCollector>,

    /// Set while the health server runs; holds a reference back to this state
    metrics_service: Mutex<Option<MetricsService>>,

    /// Reconciliation loop, tracked separately for the health report
    scheduler_task: Mutex<Option<JoinHandle<()>>>,

    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    shutdown_tx: watch::Sender<bool>,

    is_running: Arc<RwLock<bool>>,

    started_at: Instant,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing mmr-matchmaker service");
        info!(
            "Configuration: service={}, rating_engine={}",
            config.service.name, config.rating.engine
        );

        let metrics = Arc::new(
            MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            })?,
        );

        let store = Arc::new(Self::initialize_store(&config)?);
        let client = Self::initialize_rating_client(&config)?;
        let matchmaking =
            MatchmakingService::from_config(&config, store.clone(), client, metrics.clone());

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            matchmaking,
            metrics,
            metrics_service: Mutex::new(None),
            scheduler_task: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            shutdown_tx,
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start the health server, the reconciliation scheduler and the
    /// service metrics task
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting mmr-matchmaker service");

        *self.is_running.write().await = true;
        self.shutdown_tx.send_replace(false);

        self.start_metrics_service().await?;
        self.start_scheduler().await;
        self.start_background_tasks().await;

        info!("✅ mmr-matchmaker service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of mmr-matchmaker service");

        *self.is_running.write().await = false;
        self.shutdown_tx.send_replace(true);

        self.stop_scheduler().await;

        if let Some(metrics_service) = self.metrics_service.lock().await.take() {
            info!("Stopping metrics service...");
            if let Err(e) = metrics_service.stop().await {
                warn!("Failed to stop metrics service: {}", e);
            } else {
                info!("✅ Metrics service stopped");
            }
        }

        self.stop_background_tasks().await;
        self.persist()?;

        let final_stats =
            self.matchmaking
                .stats()
                .await
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("✅ mmr-matchmaker service shutdown completed");

        Ok(())
    }

    /// Recalculate one season as a one-shot job and save the result
    pub async fn recalculate_season(
        &self,
        season_id: SeasonId,
        from_match_id: Option<MatchId>,
        shutdown: watch::Receiver<bool>,
    ) -> MatchmakingResult<RecalculationSummary> {
        let summary = self
            .matchmaking
            .recalculate_season_with_shutdown(season_id, from_match_id, shutdown)
            .await?;
        self.persist()?;
        Ok(summary)
    }

    /// Write the store to the configured data file, if any
    pub fn persist(&self) -> Result<(), ServiceError> {
        let Some(path) = &self.config.service.data_file else {
            return Ok(());
        };

        self.store
            .save(path)
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to save data file: {:#}", e),
            })?;
        info!("Saved store to {}", path.display());
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn matchmaking(&self) -> &MatchmakingService {
        &self.matchmaking
    }

    /// Backing store, for seeding players and seasons
    pub fn store(&self) -> Arc<InMemoryStore> {
        self.store.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Receiver that turns true when shutdown begins
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Whether the reconciliation loop is alive; `None` before `start`
    pub async fn scheduler_running(&self) -> Option<bool> {
        self.scheduler_task
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
    }

    fn initialize_store(config: &AppConfig) -> Result<InMemoryStore, ServiceError> {
        match &config.service.data_file {
            Some(path) if path.exists() => {
                InMemoryStore::load(path).map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to load data file: {:#}", e),
                })
            }
            Some(path) => {
                info!("Data file {} not found, starting empty", path.display());
                Ok(InMemoryStore::new())
            }
            None => Ok(InMemoryStore::new()),
        }
    }

    fn initialize_rating_client(
        config: &AppConfig,
    ) -> Result<Arc<dyn RatingClient>, ServiceError> {
        let client: Arc<dyn RatingClient> = match config.rating.engine {
            EngineKind::Local => Arc::new(
                WengLinEngine::new(config.rating.weng_lin.clone()).map_err(|e| {
                    ServiceError::Configuration {
                        message: format!("Invalid Weng-Lin parameters: {}", e),
                    }
                })?,
            ),
            EngineKind::Http => Arc::new(
                HttpRatingClient::new(
                    config.rating.base_url.clone(),
                    config.rating_request_timeout(),
                )
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create rating client: {}", e),
                })?,
            ),
        };

        info!("Using {} rating engine", client.name());
        Ok(client)
    }

    async fn start_metrics_service(self: &Arc<Self>) -> Result<(), ServiceError> {
        let port = self.config.service.health_port;
        info!("Starting metrics and health endpoints on port {}", port);

        let health_config = HealthServerConfig {
            port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, self.metrics.clone()).with_app_state(self.clone()),
        );
        let metrics_service = MetricsService::new(self.metrics.clone(), health_server);

        let task = {
            let metrics_service = metrics_service.clone();
            tokio::spawn(async move {
                if let Err(e) = metrics_service.start().await {
                    error!("Metrics service failed: {:#}", e);
                } else {
                    info!("Metrics service task completed");
                }
            })
        };

        *self.metrics_service.lock().await = Some(metrics_service);
        self.background_tasks.lock().await.push(task);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
        Ok(())
    }

    async fn start_scheduler(&self) {
        let scheduler = self.matchmaking.scheduler(
            self.config.busy_poll_interval(),
            self.config.idle_poll_interval(),
        );
        let handle = scheduler.spawn(self.shutdown_tx.subscribe());
        *self.scheduler_task.lock().await = Some(handle);
    }

    async fn stop_scheduler(&self) {
        let Some(handle) = self.scheduler_task.lock().await.take() else {
            return;
        };

        info!("Waiting for reconciliation scheduler to stop...");
        let abort = handle.abort_handle();
        match tokio::time::timeout(self.config.shutdown_timeout(), handle).await {
            Ok(Ok(())) => info!("✅ Reconciliation scheduler stopped"),
            Ok(Err(e)) => warn!("Reconciliation scheduler ended abnormally: {}", e),
            Err(_) => {
                warn!("Reconciliation scheduler did not stop in time, aborting");
                abort.abort();
            }
        }
    }

    /// Periodically refresh gauges and health metrics
    async fn start_background_tasks(&self) {
        info!(
            "Starting service metrics task ({}s interval)...",
            SERVICE_METRICS_INTERVAL.as_secs()
        );

        let task = {
            let matchmaking = self.matchmaking.clone();
            let metrics = self.metrics.clone();
            let is_running = self.is_running.clone();
            let started_at = self.started_at;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(SERVICE_METRICS_INTERVAL);
                info!("Service metrics task started");

                while *is_running.read().await {
                    interval.tick().await;

                    let uptime_seconds = started_at.elapsed().as_secs() as i64;
                    metrics.service().uptime_seconds.set(uptime_seconds);

                    match matchmaking.stats().await {
                        Ok(stats) => {
                            debug!(
                                "Updated service metrics - queued: {}, pending: {}, active: {}",
                                stats.players_in_queue, stats.pending_matches, stats.active_matches
                            );
                            metrics.update_health_status(2);
                            metrics.update_component_health("store", true);
                        }
                        Err(e) => {
                            warn!("Failed to gather matchmaking stats: {:#}", e);
                            metrics.update_health_status(0);
                            metrics.update_component_health("store", false);
                        }
                    }
                }

                info!("Service metrics task stopped");
            })
        };

        self.background_tasks.lock().await.push(task);
    }

    async fn stop_background_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        let task_count = tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for (i, task) in tasks.into_iter().enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        // Ephemeral port so tests do not collide
        config.service.health_port = 0;
        config.matchmaking.busy_poll_interval_ms = 10;
        config.matchmaking.idle_poll_interval_ms = 50;
        config
    }

    #[tokio::test]
    async fn test_new_uses_configured_engine() {
        let state = AppState::new(AppConfig::default()).await.unwrap();
        assert_eq!(state.matchmaking().pipeline().client_name(), "weng-lin");
        assert!(!state.is_running().await);
        assert_eq!(state.scheduler_running().await, None);

        let mut config = AppConfig::default();
        config.rating.engine = EngineKind::Http;
        let state = AppState::new(config).await.unwrap();
        assert_eq!(state.matchmaking().pipeline().client_name(), "http");
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let state = Arc::new(AppState::new(test_config()).await.unwrap());
        let mut shutdown = state.shutdown_signal();

        state.start().await.unwrap();
        assert!(state.is_running().await);
        assert_eq!(state.scheduler_running().await, Some(true));

        state.shutdown().await.unwrap();
        assert!(!state.is_running().await);
        assert!(*shutdown.borrow_and_update());
        assert_eq!(state.scheduler_running().await, None);
        assert!(state.metrics_service.lock().await.is_none());
    }
}
