//! Scripted rating client for testing
//!
//! Delegates to the in-process engine and records every call. Failure
//! modes of a remote engine can be switched on per test.

use crate::config::rating::EngineConfig;
use crate::error::{MatchmakingError, Result};
use crate::rating::client::RatingClient;
use crate::rating::weng_lin::WengLinEngine;
use crate::types::{MatchRatingRequest, MatchRatingResponse, PlayerId};
use async_trait::async_trait;
use std::sync::{Mutex, RwLock};

/// Recorded rating client call
#[derive(Debug, Clone, PartialEq)]
pub enum RatingCall {
    Match(MatchRatingRequest),
    Batch(Vec<MatchRatingRequest>),
}

#[derive(Debug, Default, Clone)]
struct Script {
    failure: Option<String>,
    omitted_player: Option<PlayerId>,
    drop_last_batch_response: bool,
}

/// Rating client with injectable failures
#[derive(Debug)]
pub struct ScriptedRatingClient {
    engine: WengLinEngine,
    calls: Mutex<Vec<RatingCall>>,
    script: RwLock<Script>,
}

impl ScriptedRatingClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            engine: WengLinEngine::new(EngineConfig::default())?,
            calls: Mutex::new(Vec::new()),
            script: RwLock::new(Script::default()),
        })
    }

    /// Fail every call with a transport-style error until cleared
    pub fn fail_with(&self, reason: impl Into<String>) {
        if let Ok(mut script) = self.script.write() {
            script.failure = Some(reason.into());
        }
    }

    /// Leave a player out of every response
    pub fn omit_player(&self, player_id: PlayerId) {
        if let Ok(mut script) = self.script.write() {
            script.omitted_player = Some(player_id);
        }
    }

    /// Return one response fewer than requested for batch calls
    pub fn drop_last_batch_response(&self) {
        if let Ok(mut script) = self.script.write() {
            script.drop_last_batch_response = true;
        }
    }

    /// Restore normal behavior
    pub fn reset(&self) {
        if let Ok(mut script) = self.script.write() {
            *script = Script::default();
        }
    }

    /// Get all recorded calls (for testing)
    pub fn calls(&self) -> Vec<RatingCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }

    fn record(&self, call: RatingCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn current_script(&self) -> Script {
        self.script
            .read()
            .map(|script| script.clone())
            .unwrap_or_default()
    }

    fn scripted(&self, mut response: MatchRatingResponse, script: &Script) -> MatchRatingResponse {
        if let Some(omitted) = script.omitted_player {
            response.team1.players.retain(|p| p.id != omitted);
            response.team2.players.retain(|p| p.id != omitted);
        }
        response
    }
}

#[async_trait]
impl RatingClient for ScriptedRatingClient {
    async fn calculate_match(&self, request: MatchRatingRequest) -> Result<MatchRatingResponse> {
        self.record(RatingCall::Match(request.clone()));
        let script = self.current_script();
        if let Some(reason) = &script.failure {
            return Err(MatchmakingError::rating_engine(reason).into());
        }

        let response = self.engine.calculate_match(request).await?;
        Ok(self.scripted(response, &script))
    }

    async fn calculate_batch(
        &self,
        requests: Vec<MatchRatingRequest>,
    ) -> Result<Vec<MatchRatingResponse>> {
        self.record(RatingCall::Batch(requests.clone()));
        let script = self.current_script();
        if let Some(reason) = &script.failure {
            return Err(MatchmakingError::rating_engine(reason).into());
        }

        let mut responses: Vec<MatchRatingResponse> = self
            .engine
            .calculate_batch(requests)
            .await?
            .into_iter()
            .map(|response| self.scripted(response, &script))
            .collect();
        if script.drop_last_batch_response {
            responses.pop();
        }
        Ok(responses)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
