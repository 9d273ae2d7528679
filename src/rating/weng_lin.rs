//! Weng-Lin (OpenSkill) rating engine
//!
//! In-process implementation of the rating engine contract using the
//! Weng-Lin two-team algorithm from the skillratings crate.

use crate::config::rating::EngineConfig;
use crate::error::{MatchmakingError, Result};
use crate::rating::client::RatingClient;
use crate::types::{
    MatchRatingRequest, MatchRatingResponse, PlayerId, PlayerRatingInput, PlayerRatingResult,
    TeamRatingRequest, TeamRatingResult,
};
use crate::utils::all_distinct;
use async_trait::async_trait;
use skillratings::weng_lin::{weng_lin_two_teams, WengLinRating};
use skillratings::Outcomes;
use std::collections::HashMap;
use tracing::debug;

/// Ratings produced earlier in the same batch, keyed by player
type ChainedRatings = HashMap<PlayerId, WengLinRating>;

/// Weng-Lin rating engine
#[derive(Debug)]
pub struct WengLinEngine {
    config: EngineConfig,
}

impl WengLinEngine {
    /// Create a new engine after validating its configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Displayed MMR for a rating: the scaled conservative skill estimate
    pub fn mmr(&self, rating: &WengLinRating) -> i64 {
        (self.config.mmr_scale * (rating.rating - 3.0 * rating.uncertainty)).round() as i64
    }

    /// Starting rating for a player in a fresh season
    ///
    /// Keeps a fraction of the distance between the previous season's skill
    /// and the default, with the default uncertainty.
    pub fn carry_over(&self, previous_mu: f64) -> WengLinRating {
        let mut rating = self.config.default_rating();
        rating.rating += (previous_mu - rating.rating) / self.config.carry_over_divisor;
        rating
    }

    /// Resolve the rating a player enters the match with
    pub fn starting_rating(&self, input: &PlayerRatingInput) -> WengLinRating {
        match (input.mu, input.sigma) {
            (Some(mu), Some(_)) if input.is_previous_season_rating == Some(true) => {
                self.carry_over(mu)
            }
            (Some(mu), Some(sigma)) => WengLinRating {
                rating: mu,
                uncertainty: sigma,
            },
            _ => self.config.default_rating(),
        }
    }

    /// Rate one match, reading and updating ratings chained from earlier matches
    pub fn rate(
        &self,
        request: &MatchRatingRequest,
        chained: &mut ChainedRatings,
    ) -> Result<MatchRatingResponse> {
        validate_request(request)?;

        let team_one = self.team_ratings(&request.team1, chained);
        let team_two = self.team_ratings(&request.team2, chained);

        let outcome = match request.team1.score.cmp(&request.team2.score) {
            std::cmp::Ordering::Greater => Outcomes::WIN,
            std::cmp::Ordering::Less => Outcomes::LOSS,
            std::cmp::Ordering::Equal => Outcomes::DRAW,
        };

        let (new_one, new_two) =
            weng_lin_two_teams(&team_one, &team_two, &outcome, &self.config.weng_lin_config);

        let team1 = self.team_result(&request.team1, &new_one, chained);
        let team2 = self.team_result(&request.team2, &new_two, chained);

        debug!(
            "Rated match {:?} - {}:{}",
            request.player_ids(),
            request.team1.score,
            request.team2.score
        );

        Ok(MatchRatingResponse { team1, team2 })
    }

    fn team_ratings(&self, team: &TeamRatingRequest, chained: &ChainedRatings) -> Vec<WengLinRating> {
        team.players
            .iter()
            .map(|player| {
                chained
                    .get(&player.id)
                    .copied()
                    .unwrap_or_else(|| self.starting_rating(player))
            })
            .collect()
    }

    fn team_result(
        &self,
        team: &TeamRatingRequest,
        ratings: &[WengLinRating],
        chained: &mut ChainedRatings,
    ) -> TeamRatingResult {
        let players = team
            .players
            .iter()
            .zip(ratings)
            .map(|(player, rating)| {
                chained.insert(player.id, *rating);
                PlayerRatingResult {
                    id: player.id,
                    mu: rating.rating,
                    sigma: rating.uncertainty,
                    mmr: self.mmr(rating),
                }
            })
            .collect();

        TeamRatingResult {
            score: team.score,
            players,
        }
    }
}

fn validate_request(request: &MatchRatingRequest) -> Result<()> {
    if request.team1.players.len() != 2 || request.team2.players.len() != 2 {
        return Err(MatchmakingError::invalid_argument("Each team must have exactly 2 players").into());
    }

    if !all_distinct(&request.player_ids()) {
        return Err(MatchmakingError::invalid_argument(
            "There must be exactly 4 unique players across both teams",
        )
        .into());
    }

    Ok(())
}

#[async_trait]
impl RatingClient for WengLinEngine {
    async fn calculate_match(&self, request: MatchRatingRequest) -> Result<MatchRatingResponse> {
        self.rate(&request, &mut ChainedRatings::new())
    }

    async fn calculate_batch(
        &self,
        requests: Vec<MatchRatingRequest>,
    ) -> Result<Vec<MatchRatingResponse>> {
        let mut chained = ChainedRatings::new();
        requests
            .iter()
            .map(|request| self.rate(request, &mut chained))
            .collect()
    }

    fn name(&self) -> &'static str {
        "weng-lin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> WengLinEngine {
        WengLinEngine::new(EngineConfig::default()).unwrap()
    }

    fn rated(id: PlayerId, mu: f64, sigma: f64) -> PlayerRatingInput {
        PlayerRatingInput {
            id,
            mu: Some(mu),
            sigma: Some(sigma),
            is_previous_season_rating: Some(false),
        }
    }

    fn request(players: [PlayerRatingInput; 4], score1: u32, score2: u32) -> MatchRatingRequest {
        let [a, b, c, d] = players;
        MatchRatingRequest {
            team1: TeamRatingRequest {
                score: score1,
                players: vec![a, b],
            },
            team2: TeamRatingRequest {
                score: score2,
                players: vec![c, d],
            },
        }
    }

    #[test]
    fn test_previous_season_rating_lower_than_default() {
        let input = PlayerRatingInput {
            id: 1,
            mu: Some(19.0),
            sigma: Some(1.0),
            is_previous_season_rating: Some(true),
        };
        let rating = engine().starting_rating(&input);

        assert!((rating.rating - 23.0).abs() < 1e-9);
        assert_eq!(rating.uncertainty, 5.0);
    }

    #[test]
    fn test_previous_season_rating_higher_than_default() {
        let input = PlayerRatingInput {
            id: 1,
            mu: Some(31.0),
            sigma: Some(1.0),
            is_previous_season_rating: Some(true),
        };
        let rating = engine().starting_rating(&input);

        assert!((rating.rating - 27.0).abs() < 1e-9);
        assert_eq!(rating.uncertainty, 5.0);
    }

    #[test]
    fn test_current_rating_used_as_is() {
        let engine = engine();
        let rating = engine.starting_rating(&rated(1, 22.0, 2.0));
        assert_eq!(rating.rating, 22.0);
        assert_eq!(rating.uncertainty, 2.0);

        let mut input = rated(1, 22.0, 2.0);
        input.is_previous_season_rating = None;
        assert_eq!(engine.starting_rating(&input).rating, 22.0);

        // Partial ratings fall back to the default
        input.sigma = None;
        assert_eq!(engine.starting_rating(&input).rating, 25.0);
    }

    #[test]
    fn test_winners_gain_and_losers_drop() {
        let engine = engine();
        let req = request(
            [
                PlayerRatingInput::unrated(1),
                PlayerRatingInput::unrated(2),
                PlayerRatingInput::unrated(3),
                PlayerRatingInput::unrated(4),
            ],
            10,
            4,
        );

        let response = engine.rate(&req, &mut ChainedRatings::new()).unwrap();
        let baseline = engine.mmr(&engine.config().default_rating());

        assert_eq!(response.team1.score, 10);
        for player in &response.team1.players {
            assert!(player.mu > 25.0);
            assert!(player.mmr > baseline);
        }
        for player in &response.team2.players {
            assert!(player.mu < 25.0);
        }
    }

    #[test]
    fn test_draw_keeps_equal_teams_level() {
        let engine = engine();
        let req = request(
            [rated(1, 25.0, 5.0), rated(2, 25.0, 5.0), rated(3, 25.0, 5.0), rated(4, 25.0, 5.0)],
            5,
            5,
        );

        let response = engine.rate(&req, &mut ChainedRatings::new()).unwrap();
        for player in response.players() {
            assert!((player.mu - 25.0).abs() < 1e-6);
            assert!(player.sigma < 5.0);
        }
    }

    #[tokio::test]
    async fn test_batch_chains_ratings_between_matches() {
        let engine = engine();
        let first = request(
            [
                PlayerRatingInput::unrated(1),
                PlayerRatingInput::unrated(2),
                PlayerRatingInput::unrated(3),
                PlayerRatingInput::unrated(4),
            ],
            10,
            0,
        );
        // Second match repeats the stale inputs; the batch must ignore them
        let second = first.clone();

        let batch = engine
            .calculate_batch(vec![first.clone(), second])
            .await
            .unwrap();
        let single = engine.calculate_match(first).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], single);
        let p1_first = batch[0].player(1).unwrap().mu;
        let p1_second = batch[1].player(1).unwrap().mu;
        assert!(p1_second > p1_first);
    }

    #[tokio::test]
    async fn test_duplicate_players_rejected() {
        let engine = engine();
        let req = request(
            [
                PlayerRatingInput::unrated(1),
                PlayerRatingInput::unrated(2),
                PlayerRatingInput::unrated(1),
                PlayerRatingInput::unrated(4),
            ],
            10,
            0,
        );

        let err = engine.calculate_match(req).await.unwrap_err();
        assert_eq!(
            crate::error::ErrorKind::of(&err),
            crate::error::ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn test_mmr_display_value() {
        let engine = engine();
        let rating = WengLinRating {
            rating: 25.0,
            uncertainty: 5.0,
        };
        assert_eq!(engine.mmr(&rating), 1000);
    }
}
