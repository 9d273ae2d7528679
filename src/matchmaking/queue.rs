//! Matchmaking queue
//!
//! Players wait in the queue until four of them are eligible, at which point
//! the oldest four are grouped into a pending match.

use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::store::{LockKey, Store, Write};
use crate::types::{
    PendingMatch, PendingMatchStatus, PendingMatchView, PlayerId, QueueStatus, QueuedPlayer,
    MATCH_SIZE,
};
use crate::utils::{chrono_duration, current_timestamp, generate_id};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default time players have to accept a pending match
pub const DEFAULT_ACCEPTANCE_WINDOW: Duration = Duration::from_secs(30);

/// Queue membership and quorum detection
#[derive(Clone)]
pub struct QueueManager {
    store: Arc<dyn Store>,
    metrics: Arc<MetricsCollector>,
    acceptance_window: Duration,
}

impl QueueManager {
    pub fn new(store: Arc<dyn Store>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            store,
            metrics,
            acceptance_window: DEFAULT_ACCEPTANCE_WINDOW,
        }
    }

    pub fn with_acceptance_window(mut self, window: Duration) -> Self {
        self.acceptance_window = window;
        self
    }

    /// Add a player to the queue
    ///
    /// Returns `false` without changes when the player is already waiting in
    /// the queue or sits in a match that is still awaiting acceptance.
    pub async fn enqueue(&self, player_id: PlayerId) -> Result<bool> {
        let _guard = self.store.lock(LockKey::Queue).await?;

        if self.is_waiting(player_id).await? {
            debug!("Player {} is already queued", player_id);
            self.metrics.record_enqueue(false);
            return Ok(false);
        }

        let entry = QueuedPlayer::new(generate_id(), player_id, current_timestamp());
        self.store
            .apply(vec![Write::InsertQueuedPlayer(entry.clone())])
            .await?;
        self.metrics.record_enqueue(true);
        info!("Player {} joined the queue ({})", player_id, entry.id);

        self.form_matches().await?;
        Ok(true)
    }

    /// Remove a player's eligible queue entry; returns whether one was removed
    pub async fn dequeue(&self, player_id: PlayerId) -> Result<bool> {
        let _guard = self.store.lock(LockKey::Queue).await?;

        let mut writes = Vec::new();
        for entry in self.store.queued_players_for(player_id).await? {
            if self.entry_status(&entry).await?.map_or(true, |s| s.releases_players()) {
                writes.push(Write::DeleteQueuedPlayer(entry.id));
            }
        }

        let removed = !writes.is_empty();
        if removed {
            self.store.apply(writes).await?;
            info!("Player {} left the queue", player_id);
        } else {
            debug!("Player {} is not in the queue", player_id);
        }
        self.metrics.record_dequeue(removed);
        Ok(removed)
    }

    /// Player-facing view of the queue
    pub async fn queue_status(&self, player_id: PlayerId) -> Result<QueueStatus> {
        let eligible = self.store.eligible_queue().await?;
        let entries = self.store.queued_players_for(player_id).await?;
        // Rows held by a pending or accepted match still count
        let is_user_in_queue = !entries.is_empty();

        let mut assigned_pending_match = None;
        for entry in entries.iter().rev() {
            let Some(match_id) = entry.pending_match_id else {
                continue;
            };
            if let Some(pending) = self.store.pending_match(match_id).await? {
                if pending.status != PendingMatchStatus::Declined {
                    assigned_pending_match = Some(PendingMatchView::from(&pending));
                    break;
                }
            }
        }

        Ok(QueueStatus {
            players_in_queue: eligible.len(),
            is_user_in_queue,
            assigned_pending_match,
        })
    }

    /// Group eligible players into pending matches
    pub async fn quorum_check(&self) -> Result<Vec<PendingMatch>> {
        let _guard = self.store.lock(LockKey::Queue).await?;
        self.form_matches().await
    }

    /// Caller must hold the queue lock
    async fn form_matches(&self) -> Result<Vec<PendingMatch>> {
        let eligible = self.store.eligible_queue().await?;
        let mut created = Vec::new();

        for group in eligible.chunks_exact(MATCH_SIZE) {
            let now = current_timestamp();
            let pending = PendingMatch {
                id: generate_id(),
                created_at: now,
                updated_at: now,
                expires_at: now + chrono_duration(self.acceptance_window),
                status: PendingMatchStatus::Pending,
                queued_player_ids: group.iter().map(|entry| entry.id).collect(),
                active_match_id: None,
            };

            self.store
                .apply(vec![Write::InsertPendingMatch(pending.clone())])
                .await?;
            self.metrics.record_pending_created();
            info!(
                "Created pending match {} for players {:?}",
                pending.id,
                group.iter().map(|entry| entry.player_id).collect::<Vec<_>>()
            );
            created.push(pending);
        }

        self.metrics
            .set_eligible_players(eligible.len() - created.len() * MATCH_SIZE);
        Ok(created)
    }

    /// Whether the player has an eligible entry or one held by a match that
    /// is still awaiting acceptance
    async fn is_waiting(&self, player_id: PlayerId) -> Result<bool> {
        for entry in self.store.queued_players_for(player_id).await? {
            match self.entry_status(&entry).await? {
                None | Some(PendingMatchStatus::Pending) | Some(PendingMatchStatus::Declined) => {
                    return Ok(true)
                }
                Some(PendingMatchStatus::Accepted) => {}
            }
        }
        Ok(false)
    }

    /// Status of the match holding an entry, if any
    async fn entry_status(&self, entry: &QueuedPlayer) -> Result<Option<PendingMatchStatus>> {
        match entry.pending_match_id {
            Some(id) => Ok(self.store.pending_match(id).await?.map(|p| p.status)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn manager() -> (QueueManager, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        (QueueManager::new(store.clone(), metrics), store)
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let (queue, store) = manager();

        assert!(queue.enqueue(1).await.unwrap());
        assert!(!queue.enqueue(1).await.unwrap());

        assert_eq!(store.all_queued_players().unwrap().len(), 1);
        let status = queue.queue_status(1).await.unwrap();
        assert_eq!(status.players_in_queue, 1);
        assert!(status.is_user_in_queue);
        assert!(status.assigned_pending_match.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_removes_eligible_entry() {
        let (queue, store) = manager();

        queue.enqueue(1).await.unwrap();
        assert!(queue.dequeue(1).await.unwrap());
        assert!(!queue.dequeue(1).await.unwrap());
        assert!(store.all_queued_players().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fourth_player_forms_pending_match() {
        let (queue, store) = manager();

        for player in 1..=4 {
            queue.enqueue(player).await.unwrap();
        }

        let pending = store.all_pending_matches().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, PendingMatchStatus::Pending);
        assert_eq!(pending[0].queued_player_ids.len(), 4);
        let window = pending[0].expires_at - pending[0].created_at;
        assert_eq!(window.num_seconds(), 30);

        let status = queue.queue_status(2).await.unwrap();
        assert_eq!(status.players_in_queue, 0);
        assert!(status.is_user_in_queue);
        assert_eq!(
            status.assigned_pending_match.map(|view| view.id),
            Some(pending[0].id)
        );
    }

    #[tokio::test]
    async fn test_matched_player_cannot_requeue_or_dequeue() {
        let (queue, _store) = manager();

        for player in 1..=4 {
            queue.enqueue(player).await.unwrap();
        }

        assert!(!queue.enqueue(3).await.unwrap());
        assert!(!queue.dequeue(3).await.unwrap());
        assert!(queue.queue_status(3).await.unwrap().is_user_in_queue);
        assert!(!queue.queue_status(5).await.unwrap().is_user_in_queue);
    }

    #[tokio::test]
    async fn test_quorum_uses_oldest_players() {
        let (queue, store) = manager();

        for player in 1..=6 {
            queue.enqueue(player).await.unwrap();
        }

        let eligible: Vec<PlayerId> = store
            .eligible_queue()
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.player_id)
            .collect();
        assert_eq!(eligible, vec![5, 6]);
        assert!(queue.quorum_check().await.unwrap().is_empty());
    }
}
