//! Persistence interface for matchmaking and rating state
//!
//! The store is the only shared mutable resource. Callers serialize
//! check-and-mutate sections with [`Store::lock`] and commit multi-row
//! changes with [`Store::apply`], which is all-or-nothing.

pub mod memory;

pub use memory::{InMemoryStore, StoreSnapshot};

use crate::error::Result;
use crate::types::{
    ActiveMatch, ActiveMatchId, Match, MatchId, MmrCalculation, NewMatch, PendingMatch,
    PendingMatchId, PendingMatchStatus, PlayerHistory, PlayerId, QueuedPlayer, QueuedPlayerId,
    RatedHistory, Season, SeasonId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Resources guarded by exclusive locks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Eligible queue membership; held for enqueue, dequeue and quorum checks
    Queue,
    /// Acceptance state of one pending match
    PendingMatch(PendingMatchId),
    /// One active match, held while it is cancelled or submitted
    ActiveMatch(ActiveMatchId),
    /// Rating history writes
    Ratings,
}

/// Held exclusive lock; released on drop
pub struct LockGuard {
    _inner: Box<dyn Send + Sync>,
}

impl LockGuard {
    pub fn new<T: Send + Sync + 'static>(inner: T) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LockGuard")
    }
}

/// A single row mutation inside an atomic write unit
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    InsertQueuedPlayer(QueuedPlayer),
    UpdateQueuedPlayer(QueuedPlayer),
    DeleteQueuedPlayer(QueuedPlayerId),
    /// Inserts the match and links every referenced queue entry to it
    InsertPendingMatch(PendingMatch),
    UpdatePendingMatch(PendingMatch),
    DeletePendingMatch(PendingMatchId),
    InsertActiveMatch(ActiveMatch),
    DeleteActiveMatch(ActiveMatchId),
    InsertPlayerHistory(PlayerHistory),
    InsertMmrCalculation(MmrCalculation),
    /// Marks history and calculation rows of a season as deleted
    SoftDeleteRatings {
        season_id: SeasonId,
        from_match_id: Option<MatchId>,
        deleted_at: DateTime<Utc>,
    },
}

/// Transactional store over the matchmaking entities
#[async_trait]
pub trait Store: Send + Sync {
    /// Acquire an exclusive lock, waiting for the current holder
    async fn lock(&self, key: LockKey) -> Result<LockGuard>;

    /// Apply all writes atomically; on error none of them are visible
    async fn apply(&self, writes: Vec<Write>) -> Result<()>;

    async fn queued_player(&self, id: QueuedPlayerId) -> Result<Option<QueuedPlayer>>;

    /// Queue entries for the given ids, in the order requested
    async fn queued_players(&self, ids: &[QueuedPlayerId]) -> Result<Vec<QueuedPlayer>>;

    /// Every queue entry of a player, oldest first
    async fn queued_players_for(&self, player_id: PlayerId) -> Result<Vec<QueuedPlayer>>;

    /// Entries not held by a live pending match, oldest first
    async fn eligible_queue(&self) -> Result<Vec<QueuedPlayer>>;

    async fn pending_match(&self, id: PendingMatchId) -> Result<Option<PendingMatch>>;

    async fn pending_matches_with_status(
        &self,
        status: PendingMatchStatus,
    ) -> Result<Vec<PendingMatch>>;

    async fn pending_match_for_active(
        &self,
        active_match_id: ActiveMatchId,
    ) -> Result<Option<PendingMatch>>;

    async fn active_match(&self, id: ActiveMatchId) -> Result<Option<ActiveMatch>>;

    /// All active matches, oldest first
    async fn active_matches(&self) -> Result<Vec<ActiveMatch>>;

    /// The subset of ids that belong to registered players
    async fn existing_players(&self, ids: &[PlayerId]) -> Result<Vec<PlayerId>>;

    async fn seasons(&self) -> Result<Vec<Season>>;

    /// Persist a match with both teams and return it with its new id
    async fn insert_match(&self, new_match: NewMatch) -> Result<Match>;

    /// Non-deleted matches created at or after the given instant
    async fn matches_since(&self, since: DateTime<Utc>) -> Result<Vec<Match>>;

    /// Non-deleted matches of a season ordered by id ascending
    async fn season_matches(
        &self,
        season_id: SeasonId,
        from_match_id: Option<MatchId>,
    ) -> Result<Vec<Match>>;

    /// Latest non-deleted history row per player, by match recency
    async fn latest_histories(
        &self,
        player_ids: &[PlayerId],
    ) -> Result<HashMap<PlayerId, RatedHistory>>;

    /// Non-deleted history rows written for a match
    async fn match_histories(&self, match_id: MatchId) -> Result<Vec<PlayerHistory>>;

    /// Non-deleted delta record of a match
    async fn mmr_calculation(&self, match_id: MatchId) -> Result<Option<MmrCalculation>>;
}
