//! Rating update pipeline
//!
//! Turns submitted matches into rating history. Each match produces one
//! [`PlayerHistory`] row per rated player and one [`MmrCalculation`] audit
//! row, written in a single store unit.
//!
//! A player's prior rating is their latest history row. Priors from the
//! match's own season are sent as-is and produce a real delta; priors from an
//! earlier season are sent as a previous-season rating and produce a delta of
//! zero.

use crate::error::{ErrorKind, MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::rating::client::RatingClient;
use crate::rating::season::SeasonResolver;
use crate::store::{LockKey, Store, Write};
use crate::types::{
    Match, MatchId, MatchRatingRequest, MatchRatingResponse, MmrCalculation, NewMatch, PlayerHistory,
    PlayerId, PlayerRatingInput, RatedHistory, RecalculationSummary, SeasonId, SubmitMatchRequest,
    SubmittedTeam, Team, TeamRatingRequest, MATCH_SIZE,
};
use crate::utils::{all_distinct, chrono_duration, current_timestamp};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Default number of matches rated per engine call during recalculation
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// Default window in which an identical submission is rejected
pub const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Result of rating one recalculation batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Nothing to rate
    Empty,
    /// Histories and calculations for every match were written
    Committed { matches: usize },
    /// The engine answered with the wrong number of results; nothing was written
    Abandoned,
}

/// A player's rating going into a match
#[derive(Debug, Clone)]
struct Prior {
    history: Option<PlayerHistory>,
    is_current_season: bool,
}

impl Prior {
    /// No history at all; rated from the engine defaults
    fn unrated() -> Self {
        Self {
            history: None,
            is_current_season: true,
        }
    }

    fn from_rated(rated: RatedHistory, season_id: SeasonId) -> Self {
        Self {
            is_current_season: rated.season_id == season_id,
            history: Some(rated.history),
        }
    }

    fn current(history: PlayerHistory) -> Self {
        Self {
            history: Some(history),
            is_current_season: true,
        }
    }

    fn input(&self, player_id: PlayerId) -> PlayerRatingInput {
        match &self.history {
            Some(history) => PlayerRatingInput {
                id: player_id,
                mu: Some(history.mu),
                sigma: Some(history.sigma),
                is_previous_season_rating: Some(!self.is_current_season),
            },
            None => PlayerRatingInput::unrated(player_id),
        }
    }
}

type Priors = HashMap<PlayerId, Prior>;

/// Rating pipeline over a store and a rating engine
pub struct RatingPipeline {
    store: Arc<dyn Store>,
    client: Arc<dyn RatingClient>,
    seasons: SeasonResolver,
    metrics: Arc<MetricsCollector>,
    batch_size: usize,
    duplicate_window: Duration,
}

impl RatingPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn RatingClient>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            seasons: SeasonResolver::new(store.clone()),
            store,
            client,
            metrics,
            batch_size: DEFAULT_BATCH_SIZE,
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_duplicate_window(mut self, window: Duration) -> Self {
        self.duplicate_window = window;
        self
    }

    pub fn seasons(&self) -> &SeasonResolver {
        &self.seasons
    }

    pub fn client_name(&self) -> &'static str {
        self.client.name()
    }

    /// Validate, persist and rate a match result
    ///
    /// The match row is durable before the engine is called. If rating fails
    /// the error is returned and the match stays without history rows.
    pub async fn submit_match(
        &self,
        season_id: SeasonId,
        request: &SubmitMatchRequest,
    ) -> Result<Match> {
        let team_one_score = validated_score(request.team_one.score)?;
        let team_two_score = validated_score(request.team_two.score)?;

        let player_ids = submitted_players(request);
        if !all_distinct(&player_ids) {
            return Err(MatchmakingError::invalid_argument("Players must be unique").into());
        }

        if self.is_duplicate(request).await? {
            debug!("Rejecting duplicate submission for players {:?}", player_ids);
            return Err(MatchmakingError::invalid_argument("Match already exists").into());
        }

        let existing = self.store.existing_players(&player_ids).await?;
        if existing.len() != MATCH_SIZE {
            return Err(MatchmakingError::invalid_argument("Not all players were found").into());
        }

        let created = self
            .store
            .insert_match(NewMatch {
                season_id,
                team_one: Team {
                    player_one: request.team_one.player_one,
                    player_two: request.team_one.player_two,
                    score: team_one_score,
                    is_winner: team_one_score > team_two_score,
                },
                team_two: Team {
                    player_one: request.team_two.player_one,
                    player_two: request.team_two.player_two,
                    score: team_two_score,
                    is_winner: team_two_score > team_one_score,
                },
                created_at: current_timestamp(),
            })
            .await?;

        info!(
            "Match {} recorded in season {} ({}:{})",
            created.id, season_id, team_one_score, team_two_score
        );

        self.calculate_match(&created).await?;
        Ok(created)
    }

    /// Rate a single stored match against the players' latest history
    pub async fn calculate_match(&self, rated_match: &Match) -> Result<MmrCalculation> {
        let _guard = self.store.lock(LockKey::Ratings).await?;

        let priors: Priors = self
            .store
            .latest_histories(&rated_match.players())
            .await?
            .into_iter()
            .map(|(id, rated)| (id, Prior::from_rated(rated, rated_match.season_id)))
            .collect();

        let request = rating_request(rated_match, &priors);
        let timer = self.metrics.start_timer();
        let response = match self.client.calculate_match(request).await {
            Ok(response) => {
                self.metrics
                    .record_rating_calculation("match", true, timer.stop());
                response
            }
            Err(e) => {
                self.metrics
                    .record_rating_calculation("match", false, timer.stop());
                error!(
                    critical = true,
                    match_id = rated_match.id,
                    "CRITICAL: Failed to calculate MMR for match {}: {:#}",
                    rated_match.id,
                    e
                );
                return Err(as_engine_failure(e));
            }
        };

        let (histories, calculation) = self.rating_records(rated_match, &response, &priors);
        let mut writes: Vec<Write> = histories
            .into_iter()
            .map(Write::InsertPlayerHistory)
            .collect();
        writes.push(Write::InsertMmrCalculation(calculation.clone()));
        self.store.apply(writes).await?;

        debug!("Rated match {}: {:?}", rated_match.id, calculation);
        Ok(calculation)
    }

    /// Recalculate a season from scratch, or from a given match onwards
    pub async fn recalculate_season(
        &self,
        season_id: SeasonId,
        from_match_id: Option<MatchId>,
    ) -> Result<RecalculationSummary> {
        let (_keep_open, shutdown) = watch::channel(false);
        self.recalculate_season_with_shutdown(season_id, from_match_id, shutdown)
            .await
    }

    /// Recalculate a season, stopping between batches once `shutdown` is set
    ///
    /// Only the latest season may be recalculated. Existing history and
    /// calculation rows in scope are soft-deleted first, then the season's
    /// matches are rated in id order, one engine call per batch.
    pub async fn recalculate_season_with_shutdown(
        &self,
        season_id: SeasonId,
        from_match_id: Option<MatchId>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RecalculationSummary> {
        let latest = self.seasons.latest_season().await?;
        if latest.map(|season| season.id) != Some(season_id) {
            return Err(MatchmakingError::invalid_state(
                "Only latest season can be recalculated",
            )
            .into());
        }

        info!(
            "Recalculating season {} from match {:?}",
            season_id, from_match_id
        );

        {
            let _guard = self.store.lock(LockKey::Ratings).await?;
            self.store
                .apply(vec![Write::SoftDeleteRatings {
                    season_id,
                    from_match_id,
                    deleted_at: current_timestamp(),
                }])
                .await?;
        }

        let matches = self.store.season_matches(season_id, from_match_id).await?;
        let mut summary = RecalculationSummary::default();

        for batch in matches.chunks(self.batch_size) {
            if *shutdown.borrow() {
                warn!(
                    "Recalculation of season {} cancelled after {} matches",
                    season_id, summary.matches
                );
                summary.cancelled = true;
                break;
            }

            summary.batches += 1;
            match self.calculate_batch(season_id, batch).await? {
                BatchOutcome::Committed { matches } => summary.matches += matches,
                BatchOutcome::Abandoned => summary.abandoned_batches += 1,
                BatchOutcome::Empty => {}
            }
        }

        info!(
            "Recalculated season {}: {} matches in {} batches ({} abandoned)",
            season_id, summary.matches, summary.batches, summary.abandoned_batches
        );
        Ok(summary)
    }

    /// Rate consecutive matches with one engine call
    ///
    /// Later matches see the ratings produced by earlier ones. A response
    /// count that does not match the request count abandons the batch.
    pub async fn calculate_batch(
        &self,
        season_id: SeasonId,
        matches: &[Match],
    ) -> Result<BatchOutcome> {
        if matches.is_empty() {
            info!("No matches to rate in batch");
            return Ok(BatchOutcome::Empty);
        }

        let _guard = self.store.lock(LockKey::Ratings).await?;

        let player_ids: Vec<PlayerId> = matches
            .iter()
            .flat_map(|m| m.players())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let mut priors: Priors = self
            .store
            .latest_histories(&player_ids)
            .await?
            .into_iter()
            .map(|(id, rated)| (id, Prior::from_rated(rated, season_id)))
            .collect();

        let requests: Vec<MatchRatingRequest> = matches
            .iter()
            .map(|m| rating_request(m, &priors))
            .collect();
        let expected = requests.len();

        let timer = self.metrics.start_timer();
        let responses = match self.client.calculate_batch(requests).await {
            Ok(responses) => {
                self.metrics
                    .record_rating_calculation("batch", true, timer.stop());
                responses
            }
            Err(e) => {
                self.metrics
                    .record_rating_calculation("batch", false, timer.stop());
                error!(
                    critical = true,
                    "CRITICAL: Failed to calculate MMR for batch of {} matches: {:#}", expected, e
                );
                return Err(as_engine_failure(e));
            }
        };

        if responses.len() != expected {
            error!(
                critical = true,
                "CRITICAL: Rating engine returned {} results for {} matches, abandoning batch",
                responses.len(),
                expected
            );
            self.metrics.record_abandoned_batch();
            return Ok(BatchOutcome::Abandoned);
        }

        let mut writes = Vec::with_capacity(expected * (MATCH_SIZE + 1));
        for (rated_match, response) in matches.iter().zip(&responses) {
            let (histories, calculation) = self.rating_records(rated_match, response, &priors);
            for history in &histories {
                priors.insert(history.player_id, Prior::current(history.clone()));
            }
            writes.extend(histories.into_iter().map(Write::InsertPlayerHistory));
            writes.push(Write::InsertMmrCalculation(calculation));
        }
        self.store.apply(writes).await?;

        self.metrics.record_recalculated_matches(expected);
        debug!("Committed rating batch of {} matches", expected);
        Ok(BatchOutcome::Committed { matches: expected })
    }

    async fn is_duplicate(&self, request: &SubmitMatchRequest) -> Result<bool> {
        let since = current_timestamp() - chrono_duration(self.duplicate_window);
        let recent = self.store.matches_since(since).await?;
        Ok(recent.iter().any(|m| is_same_result(m, request)))
    }

    /// History rows and the delta record for one rated match
    fn rating_records(
        &self,
        rated_match: &Match,
        response: &MatchRatingResponse,
        priors: &Priors,
    ) -> (Vec<PlayerHistory>, MmrCalculation) {
        let participants = rated_match.players();
        for result in response.players() {
            if !participants.contains(&result.id) {
                warn!(
                    "Rating engine returned unknown player {} for match {}",
                    result.id, rated_match.id
                );
            }
        }

        let histories = participants
            .iter()
            .filter_map(|&id| {
                response
                    .player(id)
                    .map(|result| PlayerHistory::new(id, rated_match.id, result))
            })
            .collect();

        let delta = |player_id: PlayerId| {
            let prior = priors.get(&player_id).cloned().unwrap_or_else(Prior::unrated);
            mmr_delta(rated_match.id, player_id, &prior, response)
        };
        let calculation = MmrCalculation {
            match_id: rated_match.id,
            team_one_player_one_delta: delta(rated_match.team_one.player_one),
            team_one_player_two_delta: delta(rated_match.team_one.player_two),
            team_two_player_one_delta: delta(rated_match.team_two.player_one),
            team_two_player_two_delta: delta(rated_match.team_two.player_two),
            created_at: current_timestamp(),
            deleted_at: None,
        };

        (histories, calculation)
    }
}

/// MMR change for one player; `None` when the engine left the player out
fn mmr_delta(
    match_id: MatchId,
    player_id: PlayerId,
    prior: &Prior,
    response: &MatchRatingResponse,
) -> Option<i64> {
    let Some(result) = response.player(player_id) else {
        error!(
            "Failed to find MMR for player {} in match {}",
            player_id, match_id
        );
        return None;
    };

    if !prior.is_current_season {
        return Some(0);
    }

    Some(prior.history.as_ref().map_or(0, |history| result.mmr - history.mmr))
}

fn rating_request(rated_match: &Match, priors: &Priors) -> MatchRatingRequest {
    let input = |player_id: PlayerId| {
        priors
            .get(&player_id)
            .map(|prior| prior.input(player_id))
            .unwrap_or_else(|| PlayerRatingInput::unrated(player_id))
    };
    let team = |team: &Team| TeamRatingRequest {
        score: team.score,
        players: vec![input(team.player_one), input(team.player_two)],
    };

    MatchRatingRequest {
        team1: team(&rated_match.team_one),
        team2: team(&rated_match.team_two),
    }
}

fn validated_score(score: i32) -> Result<u32> {
    u32::try_from(score)
        .map_err(|_| MatchmakingError::invalid_argument("Scores cannot be negative").into())
}

fn submitted_players(request: &SubmitMatchRequest) -> Vec<PlayerId> {
    vec![
        request.team_one.player_one,
        request.team_one.player_two,
        request.team_two.player_one,
        request.team_two.player_two,
    ]
}

/// Same pair of players with the same score, in either order within the team
fn same_side(team: &Team, submitted: &SubmittedTeam) -> bool {
    let mut stored = team.players();
    stored.sort_unstable();
    let mut incoming = [submitted.player_one, submitted.player_two];
    incoming.sort_unstable();

    stored == incoming && i64::from(team.score) == i64::from(submitted.score)
}

fn is_same_result(existing: &Match, request: &SubmitMatchRequest) -> bool {
    let as_submitted = same_side(&existing.team_one, &request.team_one)
        && same_side(&existing.team_two, &request.team_two);
    let mirrored = same_side(&existing.team_one, &request.team_two)
        && same_side(&existing.team_two, &request.team_one);
    as_submitted || mirrored
}

fn as_engine_failure(error: anyhow::Error) -> anyhow::Error {
    if ErrorKind::of(&error) == ErrorKind::ExternalServiceFailure {
        error
    } else {
        MatchmakingError::rating_engine(format!("{:#}", error)).into()
    }
}
