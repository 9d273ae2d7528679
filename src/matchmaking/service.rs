//! Matchmaking service facade
//!
//! Single entry point for every player-facing and admin operation. The
//! transport layer authenticates the caller and passes the player id in.

use crate::config::AppConfig;
use crate::error::Result;
use crate::matchmaking::active::ActiveMatchManager;
use crate::matchmaking::pending::{PendingMatchLifecycle, SweepOutcome};
use crate::matchmaking::queue::QueueManager;
use crate::matchmaking::scheduler::ReconciliationScheduler;
use crate::metrics::MetricsCollector;
use crate::rating::{RatingClient, RatingPipeline};
use crate::store::Store;
use crate::types::{
    ActiveMatch, ActiveMatchId, Match, MatchId, PendingMatchId, PendingMatchStatus,
    PendingMatchView, PlayerId, QueueStatus, RecalculationSummary, SeasonId, SubmitMatchRequest,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Point-in-time counts for the stats endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchmakingStats {
    pub players_in_queue: usize,
    pub pending_matches: usize,
    pub active_matches: usize,
}

#[derive(Clone)]
pub struct MatchmakingService {
    store: Arc<dyn Store>,
    queue: QueueManager,
    lifecycle: PendingMatchLifecycle,
    active: ActiveMatchManager,
    pipeline: Arc<RatingPipeline>,
    metrics: Arc<MetricsCollector>,
}

impl MatchmakingService {
    pub fn new(
        store: Arc<dyn Store>,
        pipeline: Arc<RatingPipeline>,
        metrics: Arc<MetricsCollector>,
        acceptance_window: Duration,
    ) -> Self {
        let queue = QueueManager::new(store.clone(), metrics.clone())
            .with_acceptance_window(acceptance_window);
        let active = ActiveMatchManager::new(store.clone(), pipeline.clone(), metrics.clone());
        let lifecycle = PendingMatchLifecycle::new(
            store.clone(),
            queue.clone(),
            active.clone(),
            metrics.clone(),
        );

        Self {
            store,
            queue,
            lifecycle,
            active,
            pipeline,
            metrics,
        }
    }

    /// Build the service and its rating pipeline from configuration
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn Store>,
        client: Arc<dyn RatingClient>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let pipeline = RatingPipeline::new(store.clone(), client, metrics.clone())
            .with_batch_size(config.rating.batch_size)
            .with_duplicate_window(config.duplicate_window());

        Self::new(
            store,
            Arc::new(pipeline),
            metrics,
            config.acceptance_window(),
        )
    }

    /// Scheduler sweeping this service's pending matches
    pub fn scheduler(&self, busy: Duration, idle: Duration) -> ReconciliationScheduler {
        ReconciliationScheduler::new(self.lifecycle.clone(), self.metrics.clone())
            .with_intervals(busy, idle)
    }

    pub fn pipeline(&self) -> Arc<RatingPipeline> {
        self.pipeline.clone()
    }

    pub async fn enqueue(&self, player_id: PlayerId) -> Result<bool> {
        self.queue.enqueue(player_id).await
    }

    pub async fn dequeue(&self, player_id: PlayerId) -> Result<bool> {
        self.queue.dequeue(player_id).await
    }

    pub async fn queue_status(&self, player_id: PlayerId) -> Result<QueueStatus> {
        self.queue.queue_status(player_id).await
    }

    pub async fn pending_match_status(
        &self,
        match_id: PendingMatchId,
        player_id: PlayerId,
    ) -> Result<PendingMatchView> {
        self.lifecycle.status(match_id, player_id).await
    }

    pub async fn accept(
        &self,
        match_id: PendingMatchId,
        player_id: PlayerId,
    ) -> Result<PendingMatchView> {
        self.lifecycle.accept(match_id, player_id).await
    }

    pub async fn decline(&self, match_id: PendingMatchId, player_id: PlayerId) -> Result<()> {
        self.lifecycle.decline(match_id, player_id).await
    }

    /// Expire stale pending matches now
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        self.lifecycle.sweep().await
    }

    /// Expire pending matches as of `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        self.lifecycle.sweep_at(now).await
    }

    /// All active matches; not filtered by player
    pub async fn active_matches(&self) -> Result<Vec<ActiveMatch>> {
        self.active.list().await
    }

    pub async fn cancel_active_match(
        &self,
        match_id: ActiveMatchId,
        player_id: PlayerId,
    ) -> Result<()> {
        self.active.cancel(match_id, player_id).await
    }

    pub async fn submit_active_match_result(
        &self,
        match_id: ActiveMatchId,
        player_id: PlayerId,
        team_one_score: i32,
        team_two_score: i32,
    ) -> Result<Match> {
        self.active
            .submit_result(match_id, player_id, team_one_score, team_two_score)
            .await
    }

    /// Record a match directly, outside the queue
    pub async fn submit_match(
        &self,
        season_id: SeasonId,
        request: &SubmitMatchRequest,
    ) -> Result<Match> {
        self.pipeline.submit_match(season_id, request).await
    }

    pub async fn recalculate_season(
        &self,
        season_id: SeasonId,
        from_match_id: Option<MatchId>,
    ) -> Result<RecalculationSummary> {
        self.pipeline
            .recalculate_season(season_id, from_match_id)
            .await
    }

    pub async fn recalculate_season_with_shutdown(
        &self,
        season_id: SeasonId,
        from_match_id: Option<MatchId>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RecalculationSummary> {
        self.pipeline
            .recalculate_season_with_shutdown(season_id, from_match_id, shutdown)
            .await
    }

    pub async fn stats(&self) -> Result<MatchmakingStats> {
        let players_in_queue = self.store.eligible_queue().await?.len();
        let pending_matches = self
            .store
            .pending_matches_with_status(PendingMatchStatus::Pending)
            .await?
            .len();
        let active_matches = self.store.active_matches().await?.len();

        self.metrics.set_eligible_players(players_in_queue);
        self.metrics.set_active_matches(active_matches);

        Ok(MatchmakingStats {
            players_in_queue,
            pending_matches,
            active_matches,
        })
    }
}
