//! Health check endpoints and monitoring
//!
//! Readiness and liveness probes plus a detailed component report for the
//! mmr-matchmaker service.

use crate::matchmaking::MatchmakingStats;
use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported as `mmr_matchmaker_health_status`
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
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Set when the component is not healthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Players eligible for the next match
    pub players_in_queue: usize,
    /// Pending matches waiting for acceptance
    pub pending_matches: usize,
    /// Matches in progress
    pub active_matches: usize,
    /// Rating engine in use
    pub rating_engine: String,
    pub uptime_info: String,
}

impl HealthCheck {
    /// Check every component and gather statistics
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let mut checks = Vec::new();

        // A stopped service is unhealthy regardless of its components
        let service_check = Self::check_service_running(&app_state).await;
        let mut overall_status = match service_check.status {
            HealthStatus::Healthy => HealthStatus::Healthy,
            _ => HealthStatus::Unhealthy,
        };
        checks.push(service_check);

        let (store_check, matchmaking_stats) = Self::check_store(&app_state).await;
        overall_status = overall_status.worst(store_check.status);
        checks.push(store_check);

        let scheduler_check = Self::check_scheduler(&app_state).await;
        overall_status = overall_status.worst(scheduler_check.status);
        checks.push(scheduler_check);

        let stats = Self::gather_service_stats(&app_state, matchmaking_stats);

        Ok(HealthCheck {
            status: overall_status,
            service: app_state.config().service.name.clone(),
            version: crate::VERSION.to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Liveness: the service has started and not shut down
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness: running, and the store answers queries
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        let (store_check, _) = Self::check_store(&app_state).await;
        Ok(store_check.status)
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();

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

    async fn check_store(app_state: &AppState) -> (ComponentCheck, Option<MatchmakingStats>) {
        let start = Instant::now();

        let (status, message, stats) = match app_state.matchmaking().stats().await {
            Ok(stats) => (HealthStatus::Healthy, None, Some(stats)),
            Err(e) => {
                error!("Store check failed: {:#}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Store query failed: {}", e)),
                    None,
                )
            }
        };

        let check = ComponentCheck {
            name: "store".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        (check, stats)
    }

    /// Degraded when the reconciliation loop has exited while running
    async fn check_scheduler(app_state: &AppState) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match app_state.scheduler_running().await {
            Some(true) => (HealthStatus::Healthy, None),
            Some(false) => (
                HealthStatus::Degraded,
                Some("Reconciliation scheduler has stopped".to_string()),
            ),
            None => (
                HealthStatus::Healthy,
                Some("Reconciliation scheduler not started".to_string()),
            ),
        };

        ComponentCheck {
            name: "scheduler".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn gather_service_stats(app_state: &AppState, stats: Option<MatchmakingStats>) -> ServiceStats {
        let stats = stats.unwrap_or_else(|| {
            debug!("No matchmaking stats available for health check");
            MatchmakingStats::default()
        });

        ServiceStats {
            players_in_queue: stats.players_in_queue,
            pending_matches: stats.pending_matches,
            active_matches: stats.active_matches,
            rating_engine: app_state.matchmaking().pipeline().client_name().to_string(),
            uptime_info: format!("Up {}s", app_state.uptime().as_secs()),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
