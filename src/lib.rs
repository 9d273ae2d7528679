//! mmr-matchmaker - 2v2 matchmaking and skill rating
//!
//! This crate queues players, groups them four at a time into pending
//! matches that every player must accept, tracks the resulting active
//! matches, and rates submitted results with a Weng-Lin rating engine.

pub mod config;
pub mod error;
pub mod matchmaking;
pub mod metrics;
pub mod rating;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use matchmaking::{MatchmakingService, MatchmakingStats};
pub use rating::{RatingClient, RatingPipeline};
pub use store::{InMemoryStore, Store};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
