//! Test fixtures for integration testing

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use mmr_matchmaker::matchmaking::MatchmakingService;
use mmr_matchmaker::metrics::MetricsCollector;
use mmr_matchmaker::rating::ScriptedRatingClient;
use mmr_matchmaker::store::{InMemoryStore, Store};
use mmr_matchmaker::types::{
    ActiveMatch, PendingMatch, PendingMatchId, PendingMatchStatus, PlayerId, Season, SeasonId,
    SubmitMatchRequest, SubmittedTeam,
};
use mmr_matchmaker::utils::current_timestamp;
use std::sync::Arc;

/// Registered players in every test system
pub const PLAYER_COUNT: PlayerId = 12;

/// Season running now
pub const CURRENT_SEASON: SeasonId = 2;

/// Season that ended before the current one started
pub const PREVIOUS_SEASON: SeasonId = 1;

/// Complete system over an in-memory store with a scripted rating engine
pub struct TestSystem {
    pub store: Arc<InMemoryStore>,
    pub client: Arc<ScriptedRatingClient>,
    pub metrics: Arc<MetricsCollector>,
    pub service: MatchmakingService,
}

impl TestSystem {
    /// Players registered, a finished previous season and a running current one
    pub fn new() -> Self {
        Self::with_acceptance_window(std::time::Duration::from_secs(30))
    }

    pub fn with_acceptance_window(window: std::time::Duration) -> Self {
        let store = Arc::new(InMemoryStore::new());
        for id in 1..=PLAYER_COUNT {
            store.add_player(id, format!("player_{}", id)).unwrap();
        }

        let now = current_timestamp();
        store
            .add_season(season(
                PREVIOUS_SEASON,
                now - Duration::days(60),
                Some(now - Duration::days(30)),
            ))
            .unwrap();
        store
            .add_season(season(CURRENT_SEASON, now - Duration::days(1), None))
            .unwrap();

        let client = Arc::new(ScriptedRatingClient::new().unwrap());
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let pipeline = Arc::new(mmr_matchmaker::rating::RatingPipeline::new(
            store.clone(),
            client.clone(),
            metrics.clone(),
        ));
        let service = MatchmakingService::new(store.clone(), pipeline, metrics.clone(), window);

        Self {
            store,
            client,
            metrics,
            service,
        }
    }

    /// Enqueue players in order
    pub async fn enqueue_all(&self, players: impl IntoIterator<Item = PlayerId>) {
        for player in players {
            self.service.enqueue(player).await.unwrap();
        }
    }

    /// Pending matches still awaiting acceptance, oldest first
    pub fn live_pending_matches(&self) -> Vec<PendingMatch> {
        self.store
            .all_pending_matches()
            .unwrap()
            .into_iter()
            .filter(|p| p.status == PendingMatchStatus::Pending)
            .collect()
    }

    /// Player ids of a pending match, in grouping order
    pub async fn pending_players(&self, match_id: PendingMatchId) -> Vec<PlayerId> {
        let pending = self.store.pending_match(match_id).await.unwrap().unwrap();
        self.store
            .queued_players(&pending.queued_player_ids)
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.player_id)
            .collect()
    }

    /// Players eligible for the next match, sorted
    pub async fn eligible_players(&self) -> Vec<PlayerId> {
        let mut players: Vec<PlayerId> = self
            .store
            .eligible_queue()
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.player_id)
            .collect();
        players.sort_unstable();
        players
    }

    /// Queue four players and have all of them accept
    pub async fn start_active_match(&self, players: [PlayerId; 4]) -> ActiveMatch {
        self.enqueue_all(players).await;
        let match_id = self
            .live_pending_matches()
            .last()
            .map(|p| p.id)
            .expect("no pending match formed");

        for player in players {
            self.service.accept(match_id, player).await.unwrap();
        }

        let pending = self.store.pending_match(match_id).await.unwrap().unwrap();
        let active_id = pending.active_match_id.expect("match was not promoted");
        self.store.active_match(active_id).await.unwrap().unwrap()
    }
}

pub fn season(id: SeasonId, starts_at: DateTime<Utc>, ends_at: Option<DateTime<Utc>>) -> Season {
    Season {
        id,
        starts_at,
        ends_at,
        created_at: starts_at,
    }
}

pub fn submission(
    team_one: [PlayerId; 2],
    team_two: [PlayerId; 2],
    scores: (i32, i32),
) -> SubmitMatchRequest {
    SubmitMatchRequest {
        team_one: SubmittedTeam::new(team_one[0], team_one[1], scores.0),
        team_two: SubmittedTeam::new(team_two[0], team_two[1], scores.1),
    }
}
