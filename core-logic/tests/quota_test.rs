use chrono::NaiveDate;
use engage_core::{ActionKind, DailyLimits, ManualClock, QuotaTracker};
use std::sync::Arc;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()))
}

#[test]
fn test_serialized_records_never_exceed_limit() {
    let tracker = QuotaTracker::new("alice", DailyLimits::uniform(5), clock());

    for _ in 0..20 {
        if tracker.can_perform(ActionKind::Follow) {
            tracker.record(ActionKind::Follow);
        }
        assert!(tracker.count(ActionKind::Follow) <= 5);
    }

    assert_eq!(tracker.count(ActionKind::Follow), 5);
    assert!(!tracker.can_perform(ActionKind::Follow));
    assert_eq!(tracker.remaining(ActionKind::Follow), Some(0));
}

#[tokio::test]
async fn test_concurrent_reservations_never_exceed_limit() {
    let tracker = Arc::new(QuotaTracker::new("alice", DailyLimits::uniform(7), clock()));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            match tracker.try_reserve(ActionKind::Like) {
                Some(reservation) => {
                    tokio::task::yield_now().await;
                    reservation.commit();
                    true
                }
                None => false,
            }
        }));
    }

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            granted += 1;
        }
    }

    assert_eq!(granted, 7);
    assert_eq!(tracker.count(ActionKind::Like), 7);
    assert!(!tracker.can_perform(ActionKind::Like));
}

#[test]
fn test_day_boundary_resets_counters() {
    let clock = clock();
    let tracker = QuotaTracker::new("alice", DailyLimits::uniform(3), clock.clone());

    for _ in 0..3 {
        tracker.record(ActionKind::Dm);
    }
    tracker.record(ActionKind::Comment);
    assert!(!tracker.can_perform(ActionKind::Dm));

    clock.advance_days(1);

    assert!(tracker.can_perform(ActionKind::Dm));
    assert_eq!(tracker.count(ActionKind::Dm), 0);
    assert_eq!(tracker.count(ActionKind::Comment), 0);
}

#[test]
fn test_dropped_reservation_releases_slot() {
    let tracker = Arc::new(QuotaTracker::new("alice", DailyLimits::uniform(1), clock()));

    let reservation = tracker.try_reserve(ActionKind::Follow).unwrap();
    assert!(!tracker.can_perform(ActionKind::Follow));
    assert!(tracker.try_reserve(ActionKind::Follow).is_none());

    drop(reservation);

    assert!(tracker.can_perform(ActionKind::Follow));
    assert_eq!(tracker.count(ActionKind::Follow), 0);
}

#[test]
fn test_unlimited_kinds() {
    let tracker = Arc::new(QuotaTracker::new("alice", DailyLimits::uniform(0), clock()));

    assert!(!tracker.can_perform(ActionKind::Follow));
    assert!(tracker.can_perform(ActionKind::StoryView));
    assert!(tracker.can_perform(ActionKind::Scrape));
    assert_eq!(tracker.remaining(ActionKind::Scrape), None);
    assert!(tracker.try_reserve(ActionKind::StoryView).is_some());
}
