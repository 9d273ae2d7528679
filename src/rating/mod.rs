//! Skill rating for submitted matches
//!
//! The pipeline persists rating history through the store and delegates
//! the rating math to a [`RatingClient`]: the in-process Weng-Lin engine or
//! a remote rating service over HTTP.

pub mod client;
pub mod http;
pub mod mock;
pub mod pipeline;
pub mod season;
pub mod weng_lin;

pub use client::RatingClient;
pub use http::HttpRatingClient;
pub use mock::{RatingCall, ScriptedRatingClient};
pub use pipeline::{BatchOutcome, RatingPipeline};
pub use season::SeasonResolver;
pub use weng_lin::WengLinEngine;
