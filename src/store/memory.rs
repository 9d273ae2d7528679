//! In-memory store implementation
//!
//! Tables live behind a single `RwLock`. Write units are applied to a copy
//! of the tables and swapped in only when every write succeeded. Players,
//! seasons, matches and ratings can be loaded from and saved to a JSON
//! [`StoreSnapshot`]; queue and match-acceptance state is never persisted.

use crate::error::{MatchmakingError, Result};
use crate::store::{LockGuard, LockKey, Store, Write};
use crate::types::{
    ActiveMatch, ActiveMatchId, Match, MatchId, MmrCalculation, NewMatch, PendingMatch,
    PendingMatchId, PendingMatchStatus, Player, PlayerHistory, PlayerId, QueuedPlayer,
    QueuedPlayerId, RatedHistory, Season, SeasonId,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// Durable part of the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub players: Vec<Player>,
    pub seasons: Vec<Season>,
    pub matches: Vec<Match>,
    pub histories: Vec<PlayerHistory>,
    pub calculations: Vec<MmrCalculation>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    players: HashMap<PlayerId, Player>,
    seasons: Vec<Season>,
    /// Insertion order breaks ties between equal queue timestamps
    queued_players: Vec<QueuedPlayer>,
    pending_matches: HashMap<PendingMatchId, PendingMatch>,
    active_matches: HashMap<ActiveMatchId, ActiveMatch>,
    matches: Vec<Match>,
    next_match_id: MatchId,
    histories: Vec<PlayerHistory>,
    calculations: Vec<MmrCalculation>,
}

impl Tables {
    fn is_eligible(&self, entry: &QueuedPlayer) -> bool {
        match entry.pending_match_id {
            None => true,
            Some(id) => self
                .pending_matches
                .get(&id)
                .map_or(true, |pending| pending.status.releases_players()),
        }
    }

    fn queued_position(&self, id: QueuedPlayerId) -> Result<usize> {
        self.queued_players
            .iter()
            .position(|entry| entry.id == id)
            .ok_or_else(|| MatchmakingError::not_found("Queued player", id).into())
    }

    fn season_of(&self, match_id: MatchId) -> Option<SeasonId> {
        self.matches
            .iter()
            .find(|m| m.id == match_id)
            .map(|m| m.season_id)
    }

    /// Season of a match that has not been soft-deleted
    fn live_season_of(&self, match_id: MatchId) -> Option<SeasonId> {
        self.matches
            .iter()
            .find(|m| m.id == match_id && m.deleted_at.is_none())
            .map(|m| m.season_id)
    }

    fn in_scope(&self, match_id: MatchId, season_id: SeasonId, from: Option<MatchId>) -> bool {
        self.season_of(match_id) == Some(season_id) && from.map_or(true, |from| match_id >= from)
    }

    fn apply(&mut self, write: Write) -> Result<()> {
        match write {
            Write::InsertQueuedPlayer(entry) => {
                if self.queued_players.iter().any(|e| e.id == entry.id) {
                    return Err(MatchmakingError::inconsistency(format!(
                        "Queued player {} already exists",
                        entry.id
                    ))
                    .into());
                }
                self.queued_players.push(entry);
            }
            Write::UpdateQueuedPlayer(entry) => {
                let position = self.queued_position(entry.id)?;
                self.queued_players[position] = entry;
            }
            Write::DeleteQueuedPlayer(id) => {
                let position = self.queued_position(id)?;
                self.queued_players.remove(position);
            }
            Write::InsertPendingMatch(pending) => {
                if self.pending_matches.contains_key(&pending.id) {
                    return Err(MatchmakingError::inconsistency(format!(
                        "Pending match {} already exists",
                        pending.id
                    ))
                    .into());
                }
                for queued_id in &pending.queued_player_ids {
                    let position = self.queued_position(*queued_id)?;
                    if !self.is_eligible(&self.queued_players[position]) {
                        return Err(MatchmakingError::inconsistency(format!(
                            "Queued player {} is already held by a live pending match",
                            queued_id
                        ))
                        .into());
                    }
                    self.queued_players[position].pending_match_id = Some(pending.id);
                }
                self.pending_matches.insert(pending.id, pending);
            }
            Write::UpdatePendingMatch(pending) => {
                let slot = self
                    .pending_matches
                    .get_mut(&pending.id)
                    .ok_or_else(|| MatchmakingError::not_found("Pending match", pending.id))?;
                *slot = pending;
            }
            Write::DeletePendingMatch(id) => {
                self.pending_matches
                    .remove(&id)
                    .ok_or_else(|| MatchmakingError::not_found("Pending match", id))?;
            }
            Write::InsertActiveMatch(active) => {
                self.active_matches.insert(active.id, active);
            }
            Write::DeleteActiveMatch(id) => {
                self.active_matches
                    .remove(&id)
                    .ok_or_else(|| MatchmakingError::not_found("Active match", id))?;
            }
            Write::InsertPlayerHistory(history) => {
                if self.season_of(history.match_id).is_none() {
                    return Err(MatchmakingError::not_found("Match", history.match_id).into());
                }
                self.histories.push(history);
            }
            Write::InsertMmrCalculation(calculation) => {
                if self.season_of(calculation.match_id).is_none() {
                    return Err(MatchmakingError::not_found("Match", calculation.match_id).into());
                }
                self.calculations.push(calculation);
            }
            Write::SoftDeleteRatings {
                season_id,
                from_match_id,
                deleted_at,
            } => {
                let in_scope: Vec<bool> = self
                    .histories
                    .iter()
                    .map(|h| h.deleted_at.is_none() && self.in_scope(h.match_id, season_id, from_match_id))
                    .collect();
                for (history, hit) in self.histories.iter_mut().zip(in_scope) {
                    if hit {
                        history.deleted_at = Some(deleted_at);
                    }
                }

                let in_scope: Vec<bool> = self
                    .calculations
                    .iter()
                    .map(|c| c.deleted_at.is_none() && self.in_scope(c.match_id, season_id, from_match_id))
                    .collect();
                for (calculation, hit) in self.calculations.iter_mut().zip(in_scope) {
                    if hit {
                        calculation.deleted_at = Some(deleted_at);
                    }
                }
            }
        }
        Ok(())
    }
}

/// In-memory implementation of [`Store`]
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    locks: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding the rows of `snapshot`
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let next_match_id = snapshot.matches.iter().map(|m| m.id).max().unwrap_or(0);
        let tables = Tables {
            players: snapshot.players.into_iter().map(|p| (p.id, p)).collect(),
            seasons: snapshot.seasons,
            matches: snapshot.matches,
            next_match_id,
            histories: snapshot.histories,
            calculations: snapshot.calculations,
            ..Tables::default()
        };

        Self {
            tables: RwLock::new(tables),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Copy of the durable rows
    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        let tables = self.read_tables()?;
        let mut players: Vec<Player> = tables.players.values().cloned().collect();
        players.sort_by_key(|p| p.id);

        Ok(StoreSnapshot {
            players,
            seasons: tables.seasons.clone(),
            matches: tables.matches.clone(),
            histories: tables.histories.clone(),
            calculations: tables.calculations.clone(),
        })
    }

    /// Load a store from a JSON snapshot file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read data file {}", path.display()))?;
        let snapshot: StoreSnapshot = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse data file {}", path.display()))?;

        info!(
            "Loaded {} players, {} seasons and {} matches from {}",
            snapshot.players.len(),
            snapshot.seasons.len(),
            snapshot.matches.len(),
            path.display()
        );
        Ok(Self::from_snapshot(snapshot))
    }

    /// Write the durable rows to `path`, replacing it only once fully written
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot()?;
        let contents = serde_json::to_string_pretty(&snapshot)?;

        let staging = path.with_extension("tmp");
        std::fs::write(&staging, contents)
            .with_context(|| format!("Failed to write data file {}", staging.display()))?;
        std::fs::rename(&staging, path)
            .with_context(|| format!("Failed to replace data file {}", path.display()))?;

        debug!("Saved {} matches to {}", snapshot.matches.len(), path.display());
        Ok(())
    }

    fn read_tables(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire store read lock".to_string(),
                }
                .into()
            })
    }

    fn write_tables(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire store write lock".to_string(),
                }
                .into()
            })
    }

    /// Register a player
    pub fn add_player(&self, id: PlayerId, display_name: impl Into<String>) -> Result<()> {
        let mut tables = self.write_tables()?;
        tables.players.insert(
            id,
            Player {
                id,
                display_name: display_name.into(),
            },
        );
        Ok(())
    }

    /// Register a season
    pub fn add_season(&self, season: Season) -> Result<()> {
        let mut tables = self.write_tables()?;
        tables.seasons.retain(|s| s.id != season.id);
        tables.seasons.push(season);
        Ok(())
    }

    /// Soft-delete a match so it no longer takes part in rating
    pub fn delete_match(&self, match_id: MatchId, deleted_at: DateTime<Utc>) -> Result<()> {
        let mut tables = self.write_tables()?;
        let found = tables
            .matches
            .iter_mut()
            .find(|m| m.id == match_id)
            .ok_or_else(|| MatchmakingError::not_found("Match", match_id))?;
        found.deleted_at = Some(deleted_at);
        Ok(())
    }

    /// Every queue entry, including ones held by live pending matches
    pub fn all_queued_players(&self) -> Result<Vec<QueuedPlayer>> {
        Ok(self.read_tables()?.queued_players.clone())
    }

    pub fn all_pending_matches(&self) -> Result<Vec<PendingMatch>> {
        let tables = self.read_tables()?;
        let mut pending: Vec<PendingMatch> = tables.pending_matches.values().cloned().collect();
        pending.sort_by_key(|p| p.created_at);
        Ok(pending)
    }

    /// Every history row, including soft-deleted ones
    pub fn all_histories(&self) -> Result<Vec<PlayerHistory>> {
        Ok(self.read_tables()?.histories.clone())
    }

    /// Every calculation row, including soft-deleted ones
    pub fn all_calculations(&self) -> Result<Vec<MmrCalculation>> {
        Ok(self.read_tables()?.calculations.clone())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn lock(&self, key: LockKey) -> Result<LockGuard> {
        let mutex = {
            let mut locks = self.locks.lock().map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire lock table".to_string(),
            })?;
            // Drop entries nobody holds or waits on
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            locks.entry(key).or_default().clone()
        };

        let guard = mutex.lock_owned().await;
        debug!("Acquired store lock {:?}", key);
        Ok(LockGuard::new(guard))
    }

    async fn apply(&self, writes: Vec<Write>) -> Result<()> {
        let mut tables = self.write_tables()?;
        let mut staged = tables.clone();
        for write in writes {
            staged.apply(write)?;
        }
        *tables = staged;
        Ok(())
    }

    async fn queued_player(&self, id: QueuedPlayerId) -> Result<Option<QueuedPlayer>> {
        let tables = self.read_tables()?;
        Ok(tables.queued_players.iter().find(|e| e.id == id).cloned())
    }

    async fn queued_players(&self, ids: &[QueuedPlayerId]) -> Result<Vec<QueuedPlayer>> {
        let tables = self.read_tables()?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.queued_players.iter().find(|e| e.id == *id).cloned())
            .collect())
    }

    async fn queued_players_for(&self, player_id: PlayerId) -> Result<Vec<QueuedPlayer>> {
        let tables = self.read_tables()?;
        let mut entries: Vec<QueuedPlayer> = tables
            .queued_players
            .iter()
            .filter(|e| e.player_id == player_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.queued_at);
        Ok(entries)
    }

    async fn eligible_queue(&self) -> Result<Vec<QueuedPlayer>> {
        let tables = self.read_tables()?;
        let mut eligible: Vec<QueuedPlayer> = tables
            .queued_players
            .iter()
            .filter(|e| tables.is_eligible(e))
            .cloned()
            .collect();
        eligible.sort_by_key(|e| e.queued_at);
        Ok(eligible)
    }

    async fn pending_match(&self, id: PendingMatchId) -> Result<Option<PendingMatch>> {
        Ok(self.read_tables()?.pending_matches.get(&id).cloned())
    }

    async fn pending_matches_with_status(
        &self,
        status: PendingMatchStatus,
    ) -> Result<Vec<PendingMatch>> {
        let tables = self.read_tables()?;
        let mut pending: Vec<PendingMatch> = tables
            .pending_matches
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.created_at);
        Ok(pending)
    }

    async fn pending_match_for_active(
        &self,
        active_match_id: ActiveMatchId,
    ) -> Result<Option<PendingMatch>> {
        let tables = self.read_tables()?;
        Ok(tables
            .pending_matches
            .values()
            .find(|p| p.active_match_id == Some(active_match_id))
            .cloned())
    }

    async fn active_match(&self, id: ActiveMatchId) -> Result<Option<ActiveMatch>> {
        Ok(self.read_tables()?.active_matches.get(&id).cloned())
    }

    async fn active_matches(&self) -> Result<Vec<ActiveMatch>> {
        let tables = self.read_tables()?;
        let mut active: Vec<ActiveMatch> = tables.active_matches.values().cloned().collect();
        active.sort_by_key(|a| a.created_at);
        Ok(active)
    }

    async fn existing_players(&self, ids: &[PlayerId]) -> Result<Vec<PlayerId>> {
        let tables = self.read_tables()?;
        Ok(ids
            .iter()
            .copied()
            .filter(|id| tables.players.contains_key(id))
            .collect())
    }

    async fn seasons(&self) -> Result<Vec<Season>> {
        Ok(self.read_tables()?.seasons.clone())
    }

    async fn insert_match(&self, new_match: NewMatch) -> Result<Match> {
        let mut tables = self.write_tables()?;
        tables.next_match_id += 1;
        let created = Match {
            id: tables.next_match_id,
            season_id: new_match.season_id,
            team_one: new_match.team_one,
            team_two: new_match.team_two,
            created_at: new_match.created_at,
            deleted_at: None,
        };
        tables.matches.push(created.clone());
        Ok(created)
    }

    async fn matches_since(&self, since: DateTime<Utc>) -> Result<Vec<Match>> {
        let tables = self.read_tables()?;
        Ok(tables
            .matches
            .iter()
            .filter(|m| m.deleted_at.is_none() && m.created_at >= since)
            .cloned()
            .collect())
    }

    async fn season_matches(
        &self,
        season_id: SeasonId,
        from_match_id: Option<MatchId>,
    ) -> Result<Vec<Match>> {
        let tables = self.read_tables()?;
        // Ids are assigned ascending, so insertion order is id order
        Ok(tables
            .matches
            .iter()
            .filter(|m| {
                m.deleted_at.is_none()
                    && m.season_id == season_id
                    && from_match_id.map_or(true, |from| m.id >= from)
            })
            .cloned()
            .collect())
    }

    async fn latest_histories(
        &self,
        player_ids: &[PlayerId],
    ) -> Result<HashMap<PlayerId, RatedHistory>> {
        let tables = self.read_tables()?;
        let mut latest: HashMap<PlayerId, RatedHistory> = HashMap::new();

        for history in tables
            .histories
            .iter()
            .filter(|h| h.deleted_at.is_none() && player_ids.contains(&h.player_id))
        {
            // Rows of deleted matches no longer count
            let Some(season_id) = tables.live_season_of(history.match_id) else {
                continue;
            };
            let newer = latest
                .get(&history.player_id)
                .map_or(true, |current| history.match_id >= current.history.match_id);
            if newer {
                latest.insert(
                    history.player_id,
                    RatedHistory {
                        history: history.clone(),
                        season_id,
                    },
                );
            }
        }

        Ok(latest)
    }

    async fn match_histories(&self, match_id: MatchId) -> Result<Vec<PlayerHistory>> {
        let tables = self.read_tables()?;
        Ok(tables
            .histories
            .iter()
            .filter(|h| h.deleted_at.is_none() && h.match_id == match_id)
            .cloned()
            .collect())
    }

    async fn mmr_calculation(&self, match_id: MatchId) -> Result<Option<MmrCalculation>> {
        let tables = self.read_tables()?;
        Ok(tables
            .calculations
            .iter()
            .find(|c| c.deleted_at.is_none() && c.match_id == match_id)
            .cloned())
    }
}
