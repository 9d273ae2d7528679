//! HTTP client for a remote rating service

use crate::error::{MatchmakingError, Result};
use crate::rating::client::RatingClient;
use crate::types::{MatchRatingRequest, MatchRatingResponse};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const MATCH_PATH: &str = "api/v1/mmr-calculation";
const BATCH_PATH: &str = "api/v1/mmr-calculation/batch";

pub struct HttpRatingClient {
    client: Client,
    base_url: String,
}

impl HttpRatingClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MatchmakingError::ConfigurationError {
                message: format!("Failed to build rating engine client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(url = %url, "Calling rating engine");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(MatchmakingError::rating_engine)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MatchmakingError::rating_engine(format!(
                "{} returned {}: {}",
                path, status, body
            ))
            .into());
        }

        let parsed = response
            .json::<R>()
            .await
            .map_err(|e| MatchmakingError::rating_engine(format!("invalid response body: {}", e)))?;
        Ok(parsed)
    }
}

#[async_trait]
impl RatingClient for HttpRatingClient {
    async fn calculate_match(&self, request: MatchRatingRequest) -> Result<MatchRatingResponse> {
        self.post(MATCH_PATH, &request).await
    }

    async fn calculate_batch(
        &self,
        requests: Vec<MatchRatingRequest>,
    ) -> Result<Vec<MatchRatingResponse>> {
        self.post(BATCH_PATH, &requests).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlayerRatingInput, TeamRatingRequest};

    #[test]
    fn test_urls_are_joined_once() {
        let client =
            HttpRatingClient::new("http://ratings:8080/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://ratings:8080");
        assert_eq!(
            client.url(BATCH_PATH),
            "http://ratings:8080/api/v1/mmr-calculation/batch"
        );
    }

    #[test]
    fn test_request_wire_format() {
        let request = MatchRatingRequest {
            team1: TeamRatingRequest {
                score: 10,
                players: vec![
                    PlayerRatingInput {
                        id: 1,
                        mu: Some(26.5),
                        sigma: Some(4.0),
                        is_previous_season_rating: Some(true),
                    },
                    PlayerRatingInput::unrated(2),
                ],
            },
            team2: TeamRatingRequest {
                score: 4,
                players: vec![PlayerRatingInput::unrated(3), PlayerRatingInput::unrated(4)],
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["team1"]["players"][0]["isPreviousSeasonRating"], true);
        assert!(json["team1"]["players"][1].get("mu").is_none());
        assert_eq!(json["team2"]["score"], 4);
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_external_failure() {
        let client =
            HttpRatingClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let request = MatchRatingRequest {
            team1: TeamRatingRequest {
                score: 1,
                players: vec![PlayerRatingInput::unrated(1), PlayerRatingInput::unrated(2)],
            },
            team2: TeamRatingRequest {
                score: 0,
                players: vec![PlayerRatingInput::unrated(3), PlayerRatingInput::unrated(4)],
            },
        };

        let err = client.calculate_match(request).await.unwrap_err();
        assert_eq!(
            crate::error::ErrorKind::of(&err),
            crate::error::ErrorKind::ExternalServiceFailure
        );
    }
}
