//! Integration tests for the mmr-matchmaker service
//!
//! These tests drive the whole system through the service facade:
//! - Queue to pending match to active match to rated result
//! - Expiry and decline of pending matches
//! - Rating deltas across seasons
//! - Season recalculation, including the one-shot job over a data file
//! - Submission validation and failure handling

mod fixtures;

use chrono::Duration;
use mmr_matchmaker::error::ErrorKind;
use mmr_matchmaker::rating::RatingCall;
use mmr_matchmaker::config::AppConfig;
use mmr_matchmaker::service::AppState;
use mmr_matchmaker::store::{InMemoryStore, Store};
use mmr_matchmaker::types::{Match, MmrCalculation, PendingMatchStatus, PlayerHistory, PlayerId};
use mmr_matchmaker::utils::{current_timestamp, generate_id};
use mmr_matchmaker::MatchmakingStats;

use fixtures::{submission, TestSystem, CURRENT_SEASON, PREVIOUS_SEASON};

/// Delta recorded for a player, keyed by their slot in the match
fn delta_for(calculation: &MmrCalculation, m: &Match, player: PlayerId) -> Option<i64> {
    if m.team_one.player_one == player {
        calculation.team_one_player_one_delta
    } else if m.team_one.player_two == player {
        calculation.team_one_player_two_delta
    } else if m.team_two.player_one == player {
        calculation.team_two_player_one_delta
    } else if m.team_two.player_two == player {
        calculation.team_two_player_two_delta
    } else {
        panic!("player {} did not play match {}", player, m.id)
    }
}

#[tokio::test]
async fn test_four_players_form_one_pending_match() {
    let system = TestSystem::new();

    system.enqueue_all([1, 2, 3]).await;
    assert!(system.live_pending_matches().is_empty());

    system.enqueue_all([4]).await;
    let pending = system.live_pending_matches();
    assert_eq!(pending.len(), 1);
    assert_eq!(system.pending_players(pending[0].id).await, vec![1, 2, 3, 4]);

    let status = system.service.queue_status(2).await.unwrap();
    assert_eq!(status.players_in_queue, 0);
    assert!(status.is_user_in_queue);
    assert_eq!(status.assigned_pending_match.unwrap().id, pending[0].id);

    // Re-enqueue while held by a live match changes nothing
    assert!(!system.service.enqueue(2).await.unwrap());
    assert_eq!(system.store.all_queued_players().unwrap().len(), 4);
}

#[tokio::test]
async fn test_expired_match_drops_players_that_did_not_accept() {
    let system = TestSystem::new();
    system.enqueue_all([1, 2, 3, 4]).await;
    let match_id = system.live_pending_matches()[0].id;

    for player in 1..=3 {
        system.service.accept(match_id, player).await.unwrap();
    }

    // Still inside the acceptance window
    let outcome = system.service.sweep().await.unwrap();
    assert_eq!(outcome.pending_seen, 1);
    assert_eq!(outcome.expired, 0);

    let later = current_timestamp() + Duration::seconds(31);
    let outcome = system.service.sweep_at(later).await.unwrap();
    assert_eq!(outcome.expired, 1);

    let view = system.service.pending_match_status(match_id, 1).await.unwrap();
    assert_eq!(view.status, PendingMatchStatus::Declined);
    assert_eq!(system.eligible_players().await, vec![1, 2, 3]);

    let status = system.service.queue_status(4).await.unwrap();
    assert!(!status.is_user_in_queue);
    assert!(status.assigned_pending_match.is_none());

    // The freed seat is filled by the next player in line
    system.enqueue_all([5]).await;
    let pending = system.live_pending_matches();
    assert_eq!(pending.len(), 1);
    assert_eq!(system.pending_players(pending[0].id).await, vec![1, 2, 3, 5]);
}

#[tokio::test]
async fn test_decline_regroups_remaining_players() {
    let system = TestSystem::new();
    system.enqueue_all([1, 2, 3, 4, 5]).await;
    let first = system.live_pending_matches()[0].id;

    system.service.decline(first, 3).await.unwrap();

    let pending = system.live_pending_matches();
    assert_eq!(pending.len(), 1);
    assert_ne!(pending[0].id, first);
    assert_eq!(system.pending_players(pending[0].id).await, vec![1, 2, 4, 5]);

    let err = system.service.accept(first, 1).await.unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::InvalidState);
}

#[tokio::test]
async fn test_full_match_workflow() {
    let system = TestSystem::new();
    let active = system.start_active_match([1, 2, 3, 4]).await;

    let mut players: Vec<PlayerId> = active
        .team_one
        .players()
        .into_iter()
        .chain(active.team_two.players())
        .collect();
    players.sort_unstable();
    assert_eq!(players, vec![1, 2, 3, 4]);

    assert_eq!(
        system.service.stats().await.unwrap(),
        MatchmakingStats {
            players_in_queue: 0,
            pending_matches: 0,
            active_matches: 1,
        }
    );

    // Accepted players cannot queue twice, but may queue for their next game
    assert!(system.service.enqueue(1).await.unwrap());
    assert!(system.service.dequeue(1).await.unwrap());

    let err = system
        .service
        .submit_active_match_result(active.id, 9, 10, 4)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::Unauthorized);

    let submitted = system
        .service
        .submit_active_match_result(active.id, 1, 10, 4)
        .await
        .unwrap();
    assert_eq!(submitted.season_id, CURRENT_SEASON);
    assert!(submitted.team_one.is_winner);
    assert!(!submitted.team_two.is_winner);

    assert!(system.service.active_matches().await.unwrap().is_empty());
    assert!(system.store.all_pending_matches().unwrap().is_empty());
    assert!(system.store.all_queued_players().unwrap().is_empty());

    let histories = system.store.match_histories(submitted.id).await.unwrap();
    assert_eq!(histories.len(), 4);
    assert!(system
        .store
        .mmr_calculation(submitted.id)
        .await
        .unwrap()
        .is_some());
    assert_eq!(system.client.call_count(), 1);
}

#[tokio::test]
async fn test_previous_season_players_get_zero_delta() {
    let system = TestSystem::new();
    system
        .service
        .submit_match(PREVIOUS_SEASON, &submission([1, 2], [5, 6], (7, 3)))
        .await
        .unwrap();

    let active = system.start_active_match([1, 2, 3, 4]).await;
    let submitted = system
        .service
        .submit_active_match_result(active.id, 3, 10, 4)
        .await
        .unwrap();

    let calculation = system
        .store
        .mmr_calculation(submitted.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delta_for(&calculation, &submitted, 1), Some(0));
    assert_eq!(delta_for(&calculation, &submitted, 2), Some(0));

    let histories = system.store.match_histories(submitted.id).await.unwrap();
    let mut rated: Vec<PlayerId> = histories.iter().map(|h| h.player_id).collect();
    rated.sort_unstable();
    assert_eq!(rated, vec![1, 2, 3, 4]);

    let latest = system.store.latest_histories(&[1, 2]).await.unwrap();
    assert!(latest.values().all(|rated| rated.season_id == CURRENT_SEASON));

    // The engine was told which ratings to carry over
    let Some(RatingCall::Match(request)) = system.client.calls().last().cloned() else {
        panic!("expected a single-match rating call");
    };
    for input in request.team1.players.iter().chain(request.team2.players.iter()) {
        let expected = match input.id {
            1 | 2 => Some(true),
            _ => None,
        };
        assert_eq!(input.is_previous_season_rating, expected, "player {}", input.id);
    }
}

#[tokio::test]
async fn test_current_season_delta_is_mmr_difference() {
    let system = TestSystem::new();
    let first = system
        .service
        .submit_match(CURRENT_SEASON, &submission([1, 2], [3, 4], (10, 4)))
        .await
        .unwrap();
    let second = system
        .service
        .submit_match(CURRENT_SEASON, &submission([1, 3], [2, 4], (6, 8)))
        .await
        .unwrap();

    let before = system.store.match_histories(first.id).await.unwrap();
    let after = system.store.match_histories(second.id).await.unwrap();
    let calculation = system
        .store
        .mmr_calculation(second.id)
        .await
        .unwrap()
        .unwrap();

    for player in 1..=4 {
        let old = before.iter().find(|h| h.player_id == player).unwrap().mmr;
        let new = after.iter().find(|h| h.player_id == player).unwrap().mmr;
        assert_eq!(delta_for(&calculation, &second, player), Some(new - old));
    }
}

#[tokio::test]
async fn test_rating_failure_keeps_active_match() {
    let system = TestSystem::new();
    let active = system.start_active_match([1, 2, 3, 4]).await;

    system.client.fail_with("connection refused");
    let err = system
        .service
        .submit_active_match_result(active.id, 2, 10, 4)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::ExternalServiceFailure);

    // The match row is durable, the active match is untouched
    assert_eq!(system.service.active_matches().await.unwrap().len(), 1);
    let matches = system
        .store
        .season_matches(CURRENT_SEASON, None)
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert!(system
        .store
        .match_histories(matches[0].id)
        .await
        .unwrap()
        .is_empty());

    // An identical retry is a duplicate; recalculation rates the stored match
    system.client.reset();
    let err = system
        .service
        .submit_active_match_result(active.id, 2, 10, 4)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::InvalidArgument);

    let summary = system
        .service
        .recalculate_season(CURRENT_SEASON, None)
        .await
        .unwrap();
    assert_eq!(summary.matches, 1);
    assert_eq!(
        system
            .store
            .match_histories(matches[0].id)
            .await
            .unwrap()
            .len(),
        4
    );

    system.service.cancel_active_match(active.id, 4).await.unwrap();
    assert!(system.service.active_matches().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_is_limited_to_participants() {
    let system = TestSystem::new();
    let active = system.start_active_match([5, 6, 7, 8]).await;

    let err = system
        .service
        .cancel_active_match(active.id, 1)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::Unauthorized);
    assert_eq!(ErrorKind::of(&err).status(), 404);

    let err = system
        .service
        .cancel_active_match(mmr_matchmaker::utils::generate_id(), 5)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::NotFound);

    system.service.cancel_active_match(active.id, 7).await.unwrap();
    assert!(system.service.active_matches().await.unwrap().is_empty());
    assert!(system.store.all_queued_players().unwrap().is_empty());
    assert!(system
        .store
        .season_matches(CURRENT_SEASON, None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_submission_validation() {
    let system = TestSystem::new();
    let service = &system.service;

    let cases = [
        submission([1, 2], [3, 4], (-1, 4)),
        submission([1, 2], [2, 4], (10, 4)),
        submission([1, 2], [3, 99], (10, 4)),
    ];
    for request in &cases {
        let err = service.submit_match(CURRENT_SEASON, request).await.unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::InvalidArgument, "{:?}", request);
    }

    service
        .submit_match(CURRENT_SEASON, &submission([1, 2], [3, 4], (10, 4)))
        .await
        .unwrap();

    // Same line-up with the sides swapped
    let err = service
        .submit_match(CURRENT_SEASON, &submission([4, 3], [2, 1], (4, 10)))
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::InvalidArgument);
    assert_eq!(err.to_string(), "Invalid argument: Match already exists");

    // A different score is a different match
    service
        .submit_match(CURRENT_SEASON, &submission([1, 2], [3, 4], (10, 5)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_tie_has_no_winner() {
    let system = TestSystem::new();
    let tied = system
        .service
        .submit_match(CURRENT_SEASON, &submission([1, 2], [3, 4], (5, 5)))
        .await
        .unwrap();

    assert!(!tied.team_one.is_winner);
    assert!(!tied.team_two.is_winner);
}

#[tokio::test]
async fn test_recalculation_is_idempotent() {
    let system = TestSystem::new();
    let line_ups = [
        ([1, 2], [3, 4], (10, 4)),
        ([1, 3], [2, 4], (3, 10)),
        ([5, 6], [1, 4], (8, 8)),
        ([2, 5], [3, 6], (10, 9)),
        ([1, 6], [2, 3], (0, 10)),
    ];
    let mut matches = Vec::new();
    for (team_one, team_two, scores) in line_ups {
        matches.push(
            system
                .service
                .submit_match(CURRENT_SEASON, &submission(team_one, team_two, scores))
                .await
                .unwrap(),
        );
    }

    let snapshot = |histories: Vec<PlayerHistory>| {
        let mut rows: Vec<(PlayerId, i64, f64)> = histories
            .into_iter()
            .map(|h| (h.player_id, h.mmr, h.mu))
            .collect();
        rows.sort_by_key(|row| row.0);
        rows
    };

    let mut original = Vec::new();
    for m in &matches {
        original.push(snapshot(system.store.match_histories(m.id).await.unwrap()));
    }

    for _ in 0..2 {
        let summary = system
            .service
            .recalculate_season(CURRENT_SEASON, None)
            .await
            .unwrap();
        assert_eq!(summary.matches, matches.len());
        assert_eq!(summary.abandoned_batches, 0);

        for (m, expected) in matches.iter().zip(&original) {
            let rows = snapshot(system.store.match_histories(m.id).await.unwrap());
            assert_eq!(rows.len(), expected.len());
            for (row, want) in rows.iter().zip(expected) {
                assert_eq!(row.0, want.0);
                assert_eq!(row.1, want.1, "mmr of player {} in match {}", row.0, m.id);
                assert!((row.2 - want.2).abs() < 1e-9);
            }
        }
    }

    // Partial recalculation only replaces the tail
    let summary = system
        .service
        .recalculate_season(CURRENT_SEASON, Some(matches[3].id))
        .await
        .unwrap();
    assert_eq!(summary.matches, 2);
    let live: usize = system
        .store
        .all_histories()
        .unwrap()
        .iter()
        .filter(|h| h.deleted_at.is_none())
        .count();
    assert_eq!(live, matches.len() * 4);
}

#[tokio::test]
async fn test_only_latest_season_can_be_recalculated() {
    let system = TestSystem::new();

    let err = system
        .service
        .recalculate_season(PREVIOUS_SEASON, None)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::InvalidState);
}

#[tokio::test]
async fn test_recalculation_job_rewrites_data_file() {
    let system = TestSystem::new();
    let line_ups = [
        ([1, 2], [3, 4], (10, 4)),
        ([1, 3], [2, 4], (6, 10)),
        ([5, 6], [7, 8], (10, 2)),
    ];
    let mut matches = Vec::new();
    for (team_one, team_two, scores) in line_ups {
        matches.push(
            system
                .service
                .submit_match(CURRENT_SEASON, &submission(team_one, team_two, scores))
                .await
                .unwrap(),
        );
    }
    let mut rated: Vec<(i64, PlayerId, i64)> = system
        .store
        .all_histories()
        .unwrap()
        .iter()
        .map(|h| (h.match_id, h.player_id, h.mmr))
        .collect();
    rated.sort_unstable();

    let path = std::env::temp_dir().join(format!("mmr-recalculation-{}.json", generate_id()));
    system.store.save(&path).unwrap();

    let mut config = AppConfig::default();
    config.service.data_file = Some(path.clone());
    let state = AppState::new(config).await.unwrap();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let summary = state
        .recalculate_season(CURRENT_SEASON, None, shutdown_rx)
        .await
        .unwrap();
    assert_eq!(summary.matches, matches.len());
    assert_eq!(summary.abandoned_batches, 0);
    assert!(!summary.cancelled);

    let saved = InMemoryStore::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let histories = saved.all_histories().unwrap();
    assert_eq!(histories.len(), matches.len() * 8);
    assert_eq!(
        histories.iter().filter(|h| h.deleted_at.is_some()).count(),
        matches.len() * 4
    );

    let mut recalculated: Vec<(i64, PlayerId, i64)> = histories
        .iter()
        .filter(|h| h.deleted_at.is_none())
        .map(|h| (h.match_id, h.player_id, h.mmr))
        .collect();
    recalculated.sort_unstable();
    assert_eq!(recalculated, rated);
    for m in &matches {
        assert!(saved.mmr_calculation(m.id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_recalculation_job_without_data_is_rejected() {
    let state = AppState::new(AppConfig::default()).await.unwrap();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let err = state
        .recalculate_season(CURRENT_SEASON, None, shutdown_rx)
        .await
        .unwrap_err();
    assert_eq!(ErrorKind::of(&err), ErrorKind::InvalidState);
}
