use std::time::Duration;

use bulk_annotator::{
    config::GovernorConfig,
    governor::{AdjustmentReason, ConcurrencyGovernor},
};

fn governor(initial: usize, min: usize, max: usize) -> ConcurrencyGovernor {
    ConcurrencyGovernor::new(GovernorConfig {
        initial_limit: initial,
        min_limit: min,
        max_limit: max,
        quiet_period_ms: 1_000,
        ..GovernorConfig::default()
    })
}

#[tokio::test(start_paused = true)]
async fn given_three_consecutive_rate_limits_when_recorded_then_limit_strictly_decreases() {
    let governor = governor(8, 1, 8);
    let mut limits = vec![governor.current_limit()];

    for _ in 0..3 {
        governor.record_rate_limit_error();
        limits.push(governor.current_limit());
    }

    assert_eq!(limits, vec![8, 4, 2, 1]);
    let snapshot = governor.snapshot();
    assert_eq!(snapshot.consecutive_rate_limit_errors, 3);
    assert_eq!(snapshot.adjustments.len(), 3);
    assert!(
        snapshot
            .adjustments
            .iter()
            .all(|event| event.reason == AdjustmentReason::RateLimited && event.to < event.from)
    );
}

#[tokio::test(start_paused = true)]
async fn given_limit_at_floor_when_rate_limited_again_then_limit_stays_at_min() {
    let governor = governor(3, 2, 8);

    for _ in 0..5 {
        governor.record_rate_limit_error();
        assert!(governor.current_limit() >= 2);
    }

    assert_eq!(governor.current_limit(), 2);
}

#[tokio::test(start_paused = true)]
async fn given_limit_at_floor_when_rate_limited_then_no_adjustment_is_reported() {
    let governor = governor(2, 2, 8);

    tokio::time::advance(Duration::from_millis(500)).await;
    governor.record_rate_limit_error();
    governor.record_rate_limit_error();

    let snapshot = governor.snapshot();
    assert_eq!(snapshot.current_limit, 2);
    assert_eq!(snapshot.last_adjustment_ms, 0);
    assert!(snapshot.adjustments.is_empty());
    assert_eq!(snapshot.total_rate_limit_errors, 2);
}

#[tokio::test(start_paused = true)]
async fn given_quiet_period_elapsed_when_successes_recorded_then_limit_grows_up_to_max_only() {
    let governor = governor(2, 1, 4);

    for _ in 0..20 {
        tokio::time::advance(Duration::from_millis(1_001)).await;
        governor.record_success();
        assert!(governor.current_limit() <= 4);
    }

    assert_eq!(governor.current_limit(), 4);
    assert!(
        governor
            .snapshot()
            .adjustments
            .iter()
            .all(|event| event.reason == AdjustmentReason::Recovered)
    );
}

#[tokio::test(start_paused = true)]
async fn given_recent_rate_limit_when_success_recorded_then_limit_does_not_grow() {
    let governor = governor(4, 1, 8);
    governor.record_rate_limit_error();
    assert_eq!(governor.current_limit(), 2);

    tokio::time::advance(Duration::from_millis(500)).await;
    governor.record_success();

    assert_eq!(governor.current_limit(), 2);
    assert_eq!(governor.snapshot().consecutive_rate_limit_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn given_limit_reached_when_acquiring_then_waiter_resumes_after_release() {
    let governor = governor(1, 1, 1);
    let first = governor.acquire().await;
    assert!(governor.try_acquire().is_none());

    let waiter = {
        let governor = governor.clone();
        tokio::spawn(async move {
            let _ticket = governor.acquire().await;
        })
    };
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    governor.release(first);
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should be admitted")
        .expect("waiter task should not panic");
    assert_eq!(governor.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn given_limit_lowered_below_in_flight_when_acquiring_then_new_tickets_wait() {
    let governor = governor(4, 1, 4);
    let tickets = vec![
        governor.acquire().await,
        governor.acquire().await,
        governor.acquire().await,
    ];

    governor.record_rate_limit_error();
    assert_eq!(governor.current_limit(), 2);
    assert_eq!(governor.in_flight(), 3);
    assert!(governor.try_acquire().is_none());

    drop(tickets);
    assert_eq!(governor.in_flight(), 0);
    let ticket = governor.try_acquire().expect("slot should be free");
    assert_eq!(governor.snapshot().peak_in_flight, 3);
    drop(ticket);
}

#[test]
fn given_inverted_limits_when_constructed_then_limits_are_clamped() {
    let governor = ConcurrencyGovernor::new(GovernorConfig {
        initial_limit: 50,
        min_limit: 0,
        max_limit: 6,
        ..GovernorConfig::default()
    });

    let snapshot = governor.snapshot();
    assert_eq!(snapshot.min_limit, 1);
    assert_eq!(snapshot.max_limit, 6);
    assert_eq!(snapshot.current_limit, 6);
}
