//! Season resolution

use crate::error::Result;
use crate::store::Store;
use crate::types::Season;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Resolves the current and latest seasons from the store
#[derive(Clone)]
pub struct SeasonResolver {
    store: Arc<dyn Store>,
}

impl SeasonResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The running season with the latest start, or the most recently
    /// created season when none is running
    pub async fn current_season(&self, now: DateTime<Utc>) -> Result<Option<Season>> {
        let seasons = self.store.seasons().await?;

        let running = seasons
            .iter()
            .filter(|season| season.is_running(now))
            .max_by_key(|season| (season.starts_at, season.id));
        if let Some(season) = running {
            return Ok(Some(season.clone()));
        }

        Ok(seasons
            .into_iter()
            .max_by_key(|season| (season.created_at, season.id)))
    }

    /// The season with the highest id
    pub async fn latest_season(&self) -> Result<Option<Season>> {
        Ok(self
            .store
            .seasons()
            .await?
            .into_iter()
            .max_by_key(|season| season.id))
    }
}
