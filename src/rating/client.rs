//! Rating engine interface
//!
//! The pipeline treats the rating engine as a black box: it sends team
//! compositions with each player's current rating and receives updated
//! ratings plus the resulting MMR.

use crate::error::Result;
use crate::types::{MatchRatingRequest, MatchRatingResponse};
use async_trait::async_trait;

/// Trait for computing rating updates
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RatingClient: Send + Sync {
    /// Rate a single match
    async fn calculate_match(&self, request: MatchRatingRequest) -> Result<MatchRatingResponse>;

    /// Rate matches in order; a player's result in one request is the input
    /// of their next request in the same batch
    ///
    /// Implementations return one response per request, in request order.
    async fn calculate_batch(
        &self,
        requests: Vec<MatchRatingRequest>,
    ) -> Result<Vec<MatchRatingResponse>>;

    /// Short engine name for logs and health reports
    fn name(&self) -> &'static str;
}
