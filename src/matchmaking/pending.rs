//! Pending match lifecycle
//!
//! A pending match moves from `Pending` to either `Accepted` (all four
//! players accepted, promoted to an active match) or `Declined` (one player
//! declined, or the acceptance window ran out). Both end states are final.

use crate::error::{MatchmakingError, Result};
use crate::matchmaking::active::ActiveMatchManager;
use crate::matchmaking::queue::QueueManager;
use crate::metrics::MetricsCollector;
use crate::store::{LockKey, Store, Write};
use crate::types::{
    PendingMatch, PendingMatchId, PendingMatchStatus, PendingMatchView, PlayerId, QueuedPlayer,
};
use crate::utils::current_timestamp;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// What a reconciliation sweep found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Pending matches seen, expired or not
    pub pending_seen: usize,
    /// Pending matches declined because their window ran out
    pub expired: usize,
}

impl SweepOutcome {
    /// Whether another sweep is likely to find work soon
    pub fn has_work(&self) -> bool {
        self.pending_seen > 0
    }
}

/// Acceptance, decline and expiry of pending matches
#[derive(Clone)]
pub struct PendingMatchLifecycle {
    store: Arc<dyn Store>,
    queue: QueueManager,
    active: ActiveMatchManager,
    metrics: Arc<MetricsCollector>,
}

impl PendingMatchLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        queue: QueueManager,
        active: ActiveMatchManager,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            queue,
            active,
            metrics,
        }
    }

    /// Current state of a pending match, visible only to its players
    pub async fn status(
        &self,
        match_id: PendingMatchId,
        requester: PlayerId,
    ) -> Result<PendingMatchView> {
        let (pending, _, _) = self.load_for_player(match_id, requester).await?;
        Ok(PendingMatchView::from(&pending))
    }

    /// Record a player's acceptance, promoting the match once all four accepted
    pub async fn accept(
        &self,
        match_id: PendingMatchId,
        requester: PlayerId,
    ) -> Result<PendingMatchView> {
        let _guard = self.store.lock(LockKey::PendingMatch(match_id)).await?;
        let (pending, mut queued, position) = self.load_for_player(match_id, requester).await?;
        ensure_pending(&pending)?;

        let mut writes = Vec::new();
        if !queued[position].has_accepted(match_id) {
            queued[position].last_accepted_match_id = Some(match_id);
            writes.push(Write::UpdateQueuedPlayer(queued[position].clone()));
            info!("Player {} accepted pending match {}", requester, match_id);
        } else {
            debug!("Player {} already accepted pending match {}", requester, match_id);
        }

        if !queued.iter().all(|entry| entry.has_accepted(match_id)) {
            if !writes.is_empty() {
                self.store.apply(writes).await?;
            }
            return Ok(PendingMatchView::from(&pending));
        }

        let active = self.active.promote(&pending, &queued, writes).await?;
        self.metrics.record_pending_accepted();

        let mut accepted = pending;
        accepted.status = PendingMatchStatus::Accepted;
        accepted.active_match_id = Some(active.id);
        Ok(PendingMatchView::from(&accepted))
    }

    /// Decline a pending match, dropping the requester from the queue
    ///
    /// The other three players become eligible again and are regrouped
    /// immediately when enough players are waiting.
    pub async fn decline(&self, match_id: PendingMatchId, requester: PlayerId) -> Result<()> {
        {
            let _guard = self.store.lock(LockKey::PendingMatch(match_id)).await?;
            let (mut pending, queued, position) =
                self.load_for_player(match_id, requester).await?;
            ensure_pending(&pending)?;

            pending.status = PendingMatchStatus::Declined;
            pending.updated_at = current_timestamp();
            self.store
                .apply(vec![
                    Write::DeleteQueuedPlayer(queued[position].id),
                    Write::UpdatePendingMatch(pending),
                ])
                .await?;

            self.metrics.record_pending_declined(false);
            info!("Player {} declined pending match {}", requester, match_id);
        }

        self.queue.quorum_check().await?;
        Ok(())
    }

    /// Expire pending matches whose acceptance window has passed
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        self.sweep_at(current_timestamp()).await
    }

    /// Expire pending matches as of `now`
    ///
    /// Players that did not accept lose their queue entry; players that
    /// accepted stay queued and eligible.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        self.sweep_inner(now, None).await
    }

    /// Expire stale pending matches, stopping between matches once
    /// `shutdown` turns true
    pub async fn sweep_with_shutdown(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<SweepOutcome> {
        self.sweep_inner(current_timestamp(), Some(shutdown)).await
    }

    pub async fn sweep_at_with_shutdown(
        &self,
        now: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<SweepOutcome> {
        self.sweep_inner(now, Some(shutdown)).await
    }

    async fn sweep_inner(
        &self,
        now: DateTime<Utc>,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<SweepOutcome> {
        let pending = self
            .store
            .pending_matches_with_status(PendingMatchStatus::Pending)
            .await?;
        let mut outcome = SweepOutcome {
            pending_seen: pending.len(),
            expired: 0,
        };

        for candidate in pending.iter().filter(|p| p.is_expired(now)) {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                debug!("Shutdown requested, stopping sweep early");
                break;
            }
            if self.expire(candidate.id, now).await? {
                outcome.expired += 1;
            }
        }

        if outcome.expired > 0 {
            info!("Expired {} pending matches", outcome.expired);
            self.queue.quorum_check().await?;
        }
        Ok(outcome)
    }

    /// Returns false when the match changed state before the lock was taken
    async fn expire(&self, match_id: PendingMatchId, now: DateTime<Utc>) -> Result<bool> {
        let _guard = self.store.lock(LockKey::PendingMatch(match_id)).await?;

        let Some(mut pending) = self.store.pending_match(match_id).await? else {
            return Ok(false);
        };
        if pending.status != PendingMatchStatus::Pending || !pending.is_expired(now) {
            return Ok(false);
        }

        let mut writes: Vec<Write> = self
            .store
            .queued_players(&pending.queued_player_ids)
            .await?
            .into_iter()
            .filter(|entry| !entry.has_accepted(match_id))
            .map(|entry| Write::DeleteQueuedPlayer(entry.id))
            .collect();
        let removed = writes.len();

        pending.status = PendingMatchStatus::Declined;
        pending.updated_at = now;
        writes.push(Write::UpdatePendingMatch(pending));
        self.store.apply(writes).await?;

        self.metrics.record_pending_declined(true);
        debug!(
            "Pending match {} expired, removed {} players that did not accept",
            match_id, removed
        );
        Ok(true)
    }

    /// Load a pending match and its entries, requiring the requester to be
    /// one of its players; returns the requester's position in the entries
    async fn load_for_player(
        &self,
        match_id: PendingMatchId,
        requester: PlayerId,
    ) -> Result<(PendingMatch, Vec<QueuedPlayer>, usize)> {
        let pending = self
            .store
            .pending_match(match_id)
            .await?
            .ok_or_else(|| MatchmakingError::not_found("Pending match", match_id))?;
        let queued = self
            .store
            .queued_players(&pending.queued_player_ids)
            .await?;
        let position = queued
            .iter()
            .position(|entry| entry.player_id == requester)
            .ok_or_else(|| {
                MatchmakingError::unauthorized(format!(
                    "player {} is not in pending match {}",
                    requester, match_id
                ))
            })?;

        Ok((pending, queued, position))
    }
}

fn ensure_pending(pending: &PendingMatch) -> Result<()> {
    if pending.status != PendingMatchStatus::Pending {
        return Err(MatchmakingError::invalid_state(format!(
            "Pending match {} is {}",
            pending.id, pending.status
        ))
        .into());
    }
    Ok(())
}
