//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the mmr-matchmaker service
//! using Prometheus metrics.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue membership metrics
    queue_metrics: QueueMetrics,

    /// Pending and active match metrics
    match_metrics: MatchMetrics,

    /// Rating pipeline metrics
    rating_metrics: RatingMetrics,

    /// Reconciliation sweep metrics
    scheduler_metrics: SchedulerMetrics,
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

/// Queue membership metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Enqueue requests by outcome (queued, already_queued)
    pub enqueues_total: IntCounterVec,

    /// Dequeue requests by outcome (removed, not_queued)
    pub dequeues_total: IntCounterVec,

    /// Players currently eligible for grouping
    pub eligible_players: IntGauge,
}

/// Pending and active match metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Pending matches created by the quorum check
    pub pending_created_total: IntCounter,

    /// Pending matches accepted by all four players
    pub pending_accepted_total: IntCounter,

    /// Pending matches declined, by reason (declined, expired)
    pub pending_declined_total: IntCounterVec,

    /// Active matches started
    pub active_started_total: IntCounter,

    /// Active matches cancelled
    pub active_cancelled_total: IntCounter,

    /// Result submissions by status
    pub results_submitted_total: IntCounterVec,

    /// Active matches awaiting a result
    pub active_matches: IntGauge,
}

/// Rating pipeline metrics
#[derive(Clone)]
pub struct RatingMetrics {
    /// Rating engine calls by mode (match, batch) and status
    pub calculations_total: IntCounterVec,

    /// Rating engine call duration by mode
    pub calculation_duration: HistogramVec,

    /// Matches rated by season recalculation
    pub recalculated_matches_total: IntCounter,

    /// Recalculation batches abandoned without writes
    pub abandoned_batches_total: IntCounter,
}

/// Reconciliation sweep metrics
#[derive(Clone)]
pub struct SchedulerMetrics {
    /// Sweeps run
    pub sweeps_total: IntCounter,

    /// Pending matches expired by a sweep
    pub expired_matches_total: IntCounter,

    /// Sweep duration
    pub sweep_duration: Histogram,
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
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let rating_metrics = RatingMetrics::new(&registry)?;
        let scheduler_metrics = SchedulerMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            match_metrics,
            rating_metrics,
            scheduler_metrics,
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

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn rating(&self) -> &RatingMetrics {
        &self.rating_metrics
    }

    pub fn scheduler(&self) -> &SchedulerMetrics {
        &self.scheduler_metrics
    }

    /// Record an enqueue request
    pub fn record_enqueue(&self, queued: bool) {
        let outcome = if queued { "queued" } else { "already_queued" };
        self.queue_metrics
            .enqueues_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a dequeue request
    pub fn record_dequeue(&self, removed: bool) {
        let outcome = if removed { "removed" } else { "not_queued" };
        self.queue_metrics
            .dequeues_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn set_eligible_players(&self, count: usize) {
        self.queue_metrics.eligible_players.set(count as i64);
    }

    pub fn record_pending_created(&self) {
        self.match_metrics.pending_created_total.inc();
    }

    pub fn record_pending_accepted(&self) {
        self.match_metrics.pending_accepted_total.inc();
    }

    /// Record a pending match leaving the Pending state without acceptance
    pub fn record_pending_declined(&self, expired: bool) {
        let reason = if expired { "expired" } else { "declined" };
        self.match_metrics
            .pending_declined_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_active_started(&self) {
        self.match_metrics.active_started_total.inc();
        self.match_metrics.active_matches.inc();
    }

    pub fn record_active_cancelled(&self) {
        self.match_metrics.active_cancelled_total.inc();
        self.match_metrics.active_matches.dec();
    }

    /// Record a result submission; only successful ones close the match
    pub fn record_result_submitted(&self, success: bool) {
        let status = if success { "success" } else { "failed" };
        self.match_metrics
            .results_submitted_total
            .with_label_values(&[status])
            .inc();
        if success {
            self.match_metrics.active_matches.dec();
        }
    }

    pub fn set_active_matches(&self, count: usize) {
        self.match_metrics.active_matches.set(count as i64);
    }

    /// Record a rating engine call
    pub fn record_rating_calculation(&self, mode: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.rating_metrics
            .calculations_total
            .with_label_values(&[mode, status])
            .inc();

        self.rating_metrics
            .calculation_duration
            .with_label_values(&[mode])
            .observe(duration.as_secs_f64());
    }

    pub fn record_recalculated_matches(&self, count: usize) {
        self.rating_metrics
            .recalculated_matches_total
            .inc_by(count as u64);
    }

    pub fn record_abandoned_batch(&self) {
        self.rating_metrics.abandoned_batches_total.inc();
    }

    /// Record a completed sweep
    pub fn record_sweep(&self, expired: usize, duration: Duration) {
        self.scheduler_metrics.sweeps_total.inc();
        self.scheduler_metrics
            .expired_matches_total
            .inc_by(expired as u64);
        self.scheduler_metrics
            .sweep_duration
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

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("mmr_matchmaker_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "mmr_matchmaker_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("mmr_matchmaker_component_health", "Component health status"),
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

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let enqueues_total = IntCounterVec::new(
            Opts::new("mmr_matchmaker_enqueues_total", "Enqueue requests"),
            &["outcome"],
        )?;
        registry.register(Box::new(enqueues_total.clone()))?;

        let dequeues_total = IntCounterVec::new(
            Opts::new("mmr_matchmaker_dequeues_total", "Dequeue requests"),
            &["outcome"],
        )?;
        registry.register(Box::new(dequeues_total.clone()))?;

        let eligible_players = IntGauge::new(
            "mmr_matchmaker_eligible_players",
            "Players eligible for grouping",
        )?;
        registry.register(Box::new(eligible_players.clone()))?;

        Ok(Self {
            enqueues_total,
            dequeues_total,
            eligible_players,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let pending_created_total = IntCounter::new(
            "mmr_matchmaker_pending_matches_created_total",
            "Pending matches created",
        )?;
        registry.register(Box::new(pending_created_total.clone()))?;

        let pending_accepted_total = IntCounter::new(
            "mmr_matchmaker_pending_matches_accepted_total",
            "Pending matches accepted by all players",
        )?;
        registry.register(Box::new(pending_accepted_total.clone()))?;

        let pending_declined_total = IntCounterVec::new(
            Opts::new(
                "mmr_matchmaker_pending_matches_declined_total",
                "Pending matches declined",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(pending_declined_total.clone()))?;

        let active_started_total = IntCounter::new(
            "mmr_matchmaker_active_matches_started_total",
            "Active matches started",
        )?;
        registry.register(Box::new(active_started_total.clone()))?;

        let active_cancelled_total = IntCounter::new(
            "mmr_matchmaker_active_matches_cancelled_total",
            "Active matches cancelled",
        )?;
        registry.register(Box::new(active_cancelled_total.clone()))?;

        let results_submitted_total = IntCounterVec::new(
            Opts::new(
                "mmr_matchmaker_results_submitted_total",
                "Active match result submissions",
            ),
            &["status"],
        )?;
        registry.register(Box::new(results_submitted_total.clone()))?;

        let active_matches = IntGauge::new(
            "mmr_matchmaker_active_matches",
            "Active matches awaiting a result",
        )?;
        registry.register(Box::new(active_matches.clone()))?;

        Ok(Self {
            pending_created_total,
            pending_accepted_total,
            pending_declined_total,
            active_started_total,
            active_cancelled_total,
            results_submitted_total,
            active_matches,
        })
    }
}

impl RatingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let calculations_total = IntCounterVec::new(
            Opts::new(
                "mmr_matchmaker_rating_calculations_total",
                "Rating engine calls",
            ),
            &["mode", "status"],
        )?;
        registry.register(Box::new(calculations_total.clone()))?;

        let calculation_duration = HistogramVec::new(
            HistogramOpts::new(
                "mmr_matchmaker_rating_calculation_duration_seconds",
                "Rating engine call duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["mode"],
        )?;
        registry.register(Box::new(calculation_duration.clone()))?;

        let recalculated_matches_total = IntCounter::new(
            "mmr_matchmaker_recalculated_matches_total",
            "Matches rated by season recalculation",
        )?;
        registry.register(Box::new(recalculated_matches_total.clone()))?;

        let abandoned_batches_total = IntCounter::new(
            "mmr_matchmaker_abandoned_batches_total",
            "Recalculation batches abandoned",
        )?;
        registry.register(Box::new(abandoned_batches_total.clone()))?;

        Ok(Self {
            calculations_total,
            calculation_duration,
            recalculated_matches_total,
            abandoned_batches_total,
        })
    }
}

impl SchedulerMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let sweeps_total = IntCounter::new("mmr_matchmaker_sweeps_total", "Reconciliation sweeps")?;
        registry.register(Box::new(sweeps_total.clone()))?;

        let expired_matches_total = IntCounter::new(
            "mmr_matchmaker_expired_matches_total",
            "Pending matches expired by a sweep",
        )?;
        registry.register(Box::new(expired_matches_total.clone()))?;

        let sweep_duration = Histogram::with_opts(
            HistogramOpts::new(
                "mmr_matchmaker_sweep_duration_seconds",
                "Reconciliation sweep duration",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;
        registry.register(Box::new(sweep_duration.clone()))?;

        Ok(Self {
            sweeps_total,
            expired_matches_total,
            sweep_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        // Test that we can access all metric groups
        let _service = collector.service();
        let _queue = collector.queue();
        let _matches = collector.matches();
        let _rating = collector.rating();
        let _scheduler = collector.scheduler();
    }

    #[test]
    fn test_queue_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_enqueue(true);
        collector.record_enqueue(true);
        collector.record_enqueue(false);
        collector.record_dequeue(false);
        collector.set_eligible_players(3);

        let queue = collector.queue();
        assert_eq!(queue.enqueues_total.with_label_values(&["queued"]).get(), 2);
        assert_eq!(
            queue.enqueues_total.with_label_values(&["already_queued"]).get(),
            1
        );
        assert_eq!(queue.eligible_players.get(), 3);
    }

    #[test]
    fn test_match_lifecycle_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_pending_created();
        collector.record_pending_accepted();
        collector.record_active_started();
        collector.record_active_started();
        collector.record_result_submitted(false);
        assert_eq!(collector.matches().active_matches.get(), 2);

        collector.record_result_submitted(true);
        collector.record_active_cancelled();
        assert_eq!(collector.matches().active_matches.get(), 0);

        collector.record_pending_declined(true);
        assert_eq!(
            collector
                .matches()
                .pending_declined_total
                .with_label_values(&["expired"])
                .get(),
            1
        );
    }

    #[test]
    fn test_rating_and_sweep_recording() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.record_rating_calculation("batch", true, Duration::from_millis(3));
        collector.record_recalculated_matches(200);
        collector.record_abandoned_batch();
        collector.record_sweep(2, Duration::from_micros(50));

        assert_eq!(collector.rating().recalculated_matches_total.get(), 200);
        assert_eq!(collector.scheduler().expired_matches_total.get(), 2);
        assert_eq!(collector.scheduler().sweeps_total.get(), 1);
    }

    #[test]
    fn test_health_status_updates() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");

        collector.update_health_status(2); // Healthy
        collector.update_component_health("store", true);
        collector.update_component_health("rating_engine", false);
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        let duration = timer.elapsed();

        assert!(duration >= Duration::from_millis(10));

        let final_duration = timer.stop();
        assert!(final_duration >= Duration::from_millis(10));
    }
}
