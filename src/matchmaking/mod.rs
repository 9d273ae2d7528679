//! Matchmaking state machine
//!
//! Queue entries are grouped into pending matches, pending matches are
//! accepted into active matches, and active match results are handed to the
//! rating pipeline. All state lives in the store and every check-and-mutate
//! section runs under a store lock.

pub mod active;
pub mod pending;
pub mod queue;
pub mod scheduler;
pub mod service;

// Re-export commonly used types
pub use active::ActiveMatchManager;
pub use pending::{PendingMatchLifecycle, SweepOutcome};
pub use queue::QueueManager;
pub use scheduler::ReconciliationScheduler;
pub use service::{MatchmakingService, MatchmakingStats};
