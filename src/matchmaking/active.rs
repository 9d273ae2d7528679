//! Active matches
//!
//! An active match is created when all four players accept a pending match.
//! It lives until it is cancelled or its result is submitted; cleanup removes
//! the pending match and the queue entries that formed it.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::rating::RatingPipeline;
use crate::store::{LockKey, Store, Write};
use crate::types::{
    ActiveMatch, ActiveMatchId, Match, PendingMatch, PendingMatchStatus, PlayerId, QueuedPlayer,
    SubmitMatchRequest, SubmittedTeam, TeamPair, MATCH_SIZE,
};
use crate::utils::{current_timestamp, generate_id};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{info, warn};

/// Promotion, cancellation and result submission of active matches
#[derive(Clone)]
pub struct ActiveMatchManager {
    store: Arc<dyn Store>,
    pipeline: Arc<RatingPipeline>,
    metrics: Arc<MetricsCollector>,
}

impl ActiveMatchManager {
    pub fn new(
        store: Arc<dyn Store>,
        pipeline: Arc<RatingPipeline>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            pipeline,
            metrics,
        }
    }

    /// Create the active match for a fully accepted pending match
    ///
    /// `queued` must be the match's four entries as they will be after
    /// `writes` are applied; the writes, the new active match and the
    /// accepted pending match are committed as one unit.
    pub async fn promote(
        &self,
        pending: &PendingMatch,
        queued: &[QueuedPlayer],
        mut writes: Vec<Write>,
    ) -> Result<ActiveMatch> {
        if queued.len() != MATCH_SIZE {
            return Err(MatchmakingError::inconsistency(format!(
                "Pending match {} has {} queued players",
                pending.id,
                queued.len()
            ))
            .into());
        }
        if let Some(entry) = queued.iter().find(|entry| !entry.has_accepted(pending.id)) {
            return Err(MatchmakingError::inconsistency(format!(
                "Queued player {} has not accepted pending match {}",
                entry.id, pending.id
            ))
            .into());
        }

        let players: Vec<PlayerId> = queued.iter().map(|entry| entry.player_id).collect();
        let (team_one, team_two) = random_teams(players);
        let now = current_timestamp();
        let active = ActiveMatch {
            id: generate_id(),
            created_at: now,
            team_one,
            team_two,
        };

        let mut accepted = pending.clone();
        accepted.status = PendingMatchStatus::Accepted;
        accepted.updated_at = now;
        accepted.active_match_id = Some(active.id);

        writes.push(Write::InsertActiveMatch(active.clone()));
        writes.push(Write::UpdatePendingMatch(accepted));
        self.store.apply(writes).await?;

        self.metrics.record_active_started();
        info!(
            "Pending match {} promoted to active match {}: {:?} vs {:?}",
            pending.id, active.id, active.team_one, active.team_two
        );
        Ok(active)
    }

    /// Every active match in the system, oldest first
    pub async fn list(&self) -> Result<Vec<ActiveMatch>> {
        self.store.active_matches().await
    }

    /// Cancel an active match without rating it
    pub async fn cancel(&self, match_id: ActiveMatchId, requester: PlayerId) -> Result<()> {
        let _guard = self.store.lock(LockKey::ActiveMatch(match_id)).await?;
        let active = self.participant_match(match_id, requester).await?;

        let writes = self.cleanup_writes(&active).await?;
        self.store.apply(writes).await?;

        self.metrics.record_active_cancelled();
        info!("Active match {} cancelled by player {}", match_id, requester);
        Ok(())
    }

    /// Submit the result of an active match to the current season
    ///
    /// The active match is only removed once the result is rated. On failure
    /// it stays in place so the submission can be retried.
    pub async fn submit_result(
        &self,
        match_id: ActiveMatchId,
        requester: PlayerId,
        team_one_score: i32,
        team_two_score: i32,
    ) -> Result<Match> {
        let _guard = self.store.lock(LockKey::ActiveMatch(match_id)).await?;
        let active = self.participant_match(match_id, requester).await?;

        let season = self
            .pipeline
            .seasons()
            .current_season(current_timestamp())
            .await?
            .ok_or_else(|| MatchmakingError::invalid_state("No current season"))?;

        let request = SubmitMatchRequest {
            team_one: SubmittedTeam::new(
                active.team_one.player_one,
                active.team_one.player_two,
                team_one_score,
            ),
            team_two: SubmittedTeam::new(
                active.team_two.player_one,
                active.team_two.player_two,
                team_two_score,
            ),
        };

        let submitted = match self.pipeline.submit_match(season.id, &request).await {
            Ok(submitted) => submitted,
            Err(e) => {
                self.metrics.record_result_submitted(false);
                warn!(
                    "Result submission for active match {} failed, keeping it for retry: {:#}",
                    match_id, e
                );
                return Err(e);
            }
        };

        let writes = self.cleanup_writes(&active).await?;
        self.store.apply(writes).await?;

        self.metrics.record_result_submitted(true);
        info!(
            "Active match {} completed as match {} in season {}",
            match_id, submitted.id, season.id
        );
        Ok(submitted)
    }

    async fn participant_match(
        &self,
        match_id: ActiveMatchId,
        requester: PlayerId,
    ) -> Result<ActiveMatch> {
        let active = self
            .store
            .active_match(match_id)
            .await?
            .ok_or_else(|| MatchmakingError::not_found("Active match", match_id))?;
        if !active.has_participant(requester) {
            return Err(MatchmakingError::unauthorized(format!(
                "player {} is not in active match {}",
                requester, match_id
            ))
            .into());
        }
        Ok(active)
    }

    /// Removes the active match with its pending match and queue entries
    async fn cleanup_writes(&self, active: &ActiveMatch) -> Result<Vec<Write>> {
        let mut writes = Vec::new();

        if let Some(pending) = self.store.pending_match_for_active(active.id).await? {
            for entry in self.store.queued_players(&pending.queued_player_ids).await? {
                writes.push(Write::DeleteQueuedPlayer(entry.id));
            }
            writes.push(Write::DeletePendingMatch(pending.id));
        } else {
            warn!("Active match {} has no pending match", active.id);
        }

        writes.push(Write::DeleteActiveMatch(active.id));
        Ok(writes)
    }
}

/// Shuffle four players into two teams of two
fn random_teams(mut players: Vec<PlayerId>) -> (TeamPair, TeamPair) {
    players.shuffle(&mut rand::thread_rng());
    (
        TeamPair::new(players[0], players[1]),
        TeamPair::new(players[2], players[3]),
    )
}
