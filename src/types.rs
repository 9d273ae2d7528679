//! Core domain types for the matchmaking coordinator
//!
//! Entities reference each other by identifier only; relationships are
//! resolved through the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Player identifier (owned by the player registry)
pub type PlayerId = i64;

/// Season identifier
pub type SeasonId = i64;

/// Submitted match identifier, assigned by the store in ascending order
pub type MatchId = i64;

/// Queue entry identifier
pub type QueuedPlayerId = Uuid;

/// Pending match identifier
pub type PendingMatchId = Uuid;

/// Active match identifier
pub type ActiveMatchId = Uuid;

/// Number of players grouped into one match
pub const MATCH_SIZE: usize = 4;

/// A registered player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
}

/// A player's entry in the matchmaking queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedPlayer {
    pub id: QueuedPlayerId,
    pub player_id: PlayerId,
    pub queued_at: DateTime<Utc>,
    pub pending_match_id: Option<PendingMatchId>,
    pub last_accepted_match_id: Option<PendingMatchId>,
}

impl QueuedPlayer {
    pub fn new(id: QueuedPlayerId, player_id: PlayerId, queued_at: DateTime<Utc>) -> Self {
        Self {
            id,
            player_id,
            queued_at,
            pending_match_id: None,
            last_accepted_match_id: None,
        }
    }

    /// Whether this entry has accepted the given pending match
    pub fn has_accepted(&self, match_id: PendingMatchId) -> bool {
        self.last_accepted_match_id == Some(match_id)
    }
}

/// Lifecycle state of a pending match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingMatchStatus {
    Pending,
    Accepted,
    Declined,
}

impl PendingMatchStatus {
    /// Declined matches release their queued players back into the queue
    pub fn releases_players(self) -> bool {
        self == PendingMatchStatus::Declined
    }
}

impl std::fmt::Display for PendingMatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingMatchStatus::Pending => write!(f, "pending"),
            PendingMatchStatus::Accepted => write!(f, "accepted"),
            PendingMatchStatus::Declined => write!(f, "declined"),
        }
    }
}

/// A proposed grouping of four queued players awaiting unanimous acceptance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMatch {
    pub id: PendingMatchId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: PendingMatchStatus,
    /// Queue entries in the order they were grouped
    pub queued_player_ids: Vec<QueuedPlayerId>,
    pub active_match_id: Option<ActiveMatchId>,
}

impl PendingMatch {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Two players on the same side of an active match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamPair {
    pub player_one: PlayerId,
    pub player_two: PlayerId,
}

impl TeamPair {
    pub fn new(player_one: PlayerId, player_two: PlayerId) -> Self {
        Self {
            player_one,
            player_two,
        }
    }

    pub fn contains(&self, player_id: PlayerId) -> bool {
        self.player_one == player_id || self.player_two == player_id
    }

    pub fn players(&self) -> [PlayerId; 2] {
        [self.player_one, self.player_two]
    }
}

/// An accepted, in-progress match awaiting a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveMatch {
    pub id: ActiveMatchId,
    pub created_at: DateTime<Utc>,
    pub team_one: TeamPair,
    pub team_two: TeamPair,
}

impl ActiveMatch {
    pub fn has_participant(&self, player_id: PlayerId) -> bool {
        self.team_one.contains(player_id) || self.team_two.contains(player_id)
    }
}

/// A bounded rating period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub id: SeasonId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Season {
    /// Whether the season is running at the given instant
    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && self.ends_at.map_or(true, |ends_at| ends_at > now)
    }
}

/// One side of a submitted match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub player_one: PlayerId,
    pub player_two: PlayerId,
    pub score: u32,
    pub is_winner: bool,
}

impl Team {
    pub fn players(&self) -> [PlayerId; 2] {
        [self.player_one, self.player_two]
    }
}

/// A submitted match result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub season_id: SeasonId,
    pub team_one: Team,
    pub team_two: Team,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Match {
    pub fn players(&self) -> [PlayerId; 4] {
        [
            self.team_one.player_one,
            self.team_one.player_two,
            self.team_two.player_one,
            self.team_two.player_two,
        ]
    }
}

/// Match data before the store assigns an identifier
#[derive(Debug, Clone, PartialEq)]
pub struct NewMatch {
    pub season_id: SeasonId,
    pub team_one: Team,
    pub team_two: Team,
    pub created_at: DateTime<Utc>,
}

/// Rating snapshot of one player after one match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerHistory {
    pub player_id: PlayerId,
    pub match_id: MatchId,
    pub mu: f64,
    pub sigma: f64,
    pub mmr: i64,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PlayerHistory {
    pub fn new(player_id: PlayerId, match_id: MatchId, rating: &PlayerRatingResult) -> Self {
        Self {
            player_id,
            match_id,
            mu: rating.mu,
            sigma: rating.sigma,
            mmr: rating.mmr,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }
}

/// A player's latest history row together with the season of its match
#[derive(Debug, Clone, PartialEq)]
pub struct RatedHistory {
    pub history: PlayerHistory,
    pub season_id: SeasonId,
}

/// Per-match audit record of the four MMR deltas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmrCalculation {
    pub match_id: MatchId,
    pub team_one_player_one_delta: Option<i64>,
    pub team_one_player_two_delta: Option<i64>,
    pub team_two_player_one_delta: Option<i64>,
    pub team_two_player_two_delta: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

// Rating engine wire contract

/// Rating input for one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRatingInput {
    pub id: PlayerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sigma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_previous_season_rating: Option<bool>,
}

impl PlayerRatingInput {
    /// Input for a player with no rating history
    pub fn unrated(id: PlayerId) -> Self {
        Self {
            id,
            mu: None,
            sigma: None,
            is_previous_season_rating: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRatingRequest {
    pub score: u32,
    pub players: Vec<PlayerRatingInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRatingRequest {
    pub team1: TeamRatingRequest,
    pub team2: TeamRatingRequest,
}

impl MatchRatingRequest {
    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.team1
            .players
            .iter()
            .chain(self.team2.players.iter())
            .map(|p| p.id)
            .collect()
    }
}

/// Updated rating for one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRatingResult {
    pub id: PlayerId,
    pub mu: f64,
    pub sigma: f64,
    pub mmr: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRatingResult {
    pub score: u32,
    pub players: Vec<PlayerRatingResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRatingResponse {
    pub team1: TeamRatingResult,
    pub team2: TeamRatingResult,
}

impl MatchRatingResponse {
    /// Find a player's result on either team
    pub fn player(&self, player_id: PlayerId) -> Option<&PlayerRatingResult> {
        self.team1
            .players
            .iter()
            .chain(self.team2.players.iter())
            .find(|p| p.id == player_id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerRatingResult> {
        self.team1.players.iter().chain(self.team2.players.iter())
    }
}

// Operation requests and views

/// Direct match submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitMatchRequest {
    pub team_one: SubmittedTeam,
    pub team_two: SubmittedTeam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTeam {
    pub player_one: PlayerId,
    pub player_two: PlayerId,
    pub score: i32,
}

impl SubmittedTeam {
    pub fn new(player_one: PlayerId, player_two: PlayerId, score: i32) -> Self {
        Self {
            player_one,
            player_two,
            score,
        }
    }
}

/// Player-facing view of the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub players_in_queue: usize,
    pub is_user_in_queue: bool,
    pub assigned_pending_match: Option<PendingMatchView>,
}

/// Player-facing view of a pending match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMatchView {
    pub id: PendingMatchId,
    pub status: PendingMatchStatus,
    pub expires_at: DateTime<Utc>,
}

impl From<&PendingMatch> for PendingMatchView {
    fn from(pending: &PendingMatch) -> Self {
        Self {
            id: pending.id,
            status: pending.status,
            expires_at: pending.expires_at,
        }
    }
}

/// Result of a season recalculation job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecalculationSummary {
    pub matches: usize,
    pub batches: usize,
    pub abandoned_batches: usize,
    pub cancelled: bool,
}
