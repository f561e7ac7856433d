//! # Daily Quota Tracking
//!
//! Per-identity, per-kind counters that reset the first time they are touched
//! on a new calendar day. All mutation goes through one mutex per identity,
//! so check-and-reserve is atomic with respect to concurrent workers.
//!
//! Workers in a dispatch use [`QuotaTracker::try_reserve`]: a reservation
//! holds a slot while the remote call is in flight and is either committed
//! (counted) or dropped (released).

use crate::config::DailyLimits;
use crate::types::ActionKind;
use crate::utils::lock_unpoisoned;
use chrono::{Local, NaiveDate};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Source of the current calendar day.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn today(&self) -> NaiveDate;
}

/// Local wall-clock date.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    day: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day: Mutex::new(day),
        }
    }

    pub fn set(&self, day: NaiveDate) {
        *lock_unpoisoned(&self.day) = day;
    }

    pub fn advance_days(&self, days: u64) {
        let mut day = lock_unpoisoned(&self.day);
        if let Some(next) = day.checked_add_days(chrono::Days::new(days)) {
            *day = next;
        }
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        *lock_unpoisoned(&self.day)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Counter {
    count_today: u32,
    in_flight: u32,
}

#[derive(Debug)]
struct QuotaState {
    day_key: NaiveDate,
    counters: HashMap<ActionKind, Counter>,
}

impl QuotaState {
    /// Reset day counters when the day key is stale. In-flight reservations
    /// survive the rollover and count against the new day once committed.
    fn reconcile(&mut self, today: NaiveDate) {
        if self.day_key != today {
            for counter in self.counters.values_mut() {
                counter.count_today = 0;
            }
            self.day_key = today;
        }
    }

    fn counter(&mut self, kind: ActionKind) -> &mut Counter {
        self.counters.entry(kind).or_default()
    }
}

#[derive(Debug)]
pub struct QuotaTracker {
    handle: String,
    limits: DailyLimits,
    clock: Arc<dyn Clock>,
    state: Mutex<QuotaState>,
}

impl QuotaTracker {
    pub fn new(handle: impl Into<String>, limits: DailyLimits, clock: Arc<dyn Clock>) -> Self {
        let day_key = clock.today();
        Self {
            handle: handle.into(),
            limits,
            clock,
            state: Mutex::new(QuotaState {
                day_key,
                counters: HashMap::new(),
            }),
        }
    }

    pub fn with_system_clock(handle: impl Into<String>, limits: DailyLimits) -> Self {
        Self::new(handle, limits, Arc::new(SystemClock))
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn limits(&self) -> &DailyLimits {
        &self.limits
    }

    /// True when another `kind` action fits under today's limit.
    pub fn can_perform(&self, kind: ActionKind) -> bool {
        let Some(limit) = self.limits.limit(kind) else {
            return true;
        };
        let mut state = lock_unpoisoned(&self.state);
        state.reconcile(self.clock.today());
        let counter = state.counter(kind);
        counter.count_today + counter.in_flight < limit
    }

    /// Count one confirmed action.
    pub fn record(&self, kind: ActionKind) {
        if self.limits.limit(kind).is_none() {
            return;
        }
        let mut state = lock_unpoisoned(&self.state);
        state.reconcile(self.clock.today());
        let counter = state.counter(kind);
        counter.count_today = counter.count_today.saturating_add(1);
    }

    /// Actions recorded today.
    pub fn count(&self, kind: ActionKind) -> u32 {
        let mut state = lock_unpoisoned(&self.state);
        state.reconcile(self.clock.today());
        state.counter(kind).count_today
    }

    /// Units still available today, net of in-flight reservations.
    /// `None` for unlimited kinds.
    pub fn remaining(&self, kind: ActionKind) -> Option<u32> {
        let limit = self.limits.limit(kind)?;
        let mut state = lock_unpoisoned(&self.state);
        state.reconcile(self.clock.today());
        let counter = state.counter(kind);
        Some(limit.saturating_sub(counter.count_today + counter.in_flight))
    }

    /// Atomically check the limit and hold one unit for an in-flight action.
    pub fn try_reserve(self: &Arc<Self>, kind: ActionKind) -> Option<QuotaReservation> {
        if let Some(limit) = self.limits.limit(kind) {
            let mut state = lock_unpoisoned(&self.state);
            state.reconcile(self.clock.today());
            let counter = state.counter(kind);
            if counter.count_today + counter.in_flight >= limit {
                return None;
            }
            counter.in_flight += 1;
        }
        Some(QuotaReservation {
            tracker: Arc::clone(self),
            kind,
            active: true,
        })
    }

    fn settle(&self, kind: ActionKind, commit: bool) {
        if self.limits.limit(kind).is_none() {
            return;
        }
        let mut state = lock_unpoisoned(&self.state);
        state.reconcile(self.clock.today());
        let counter = state.counter(kind);
        counter.in_flight = counter.in_flight.saturating_sub(1);
        if commit {
            counter.count_today = counter.count_today.saturating_add(1);
        }
    }
}

/// One held quota unit. Dropping it without [`commit`](Self::commit) gives the unit back.
#[derive(Debug)]
pub struct QuotaReservation {
    tracker: Arc<QuotaTracker>,
    kind: ActionKind,
    active: bool,
}

impl QuotaReservation {
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// The action happened: count it.
    pub fn commit(mut self) {
        self.active = false;
        self.tracker.settle(self.kind, true);
    }
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        if self.active {
            self.tracker.settle(self.kind, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_record_until_limit() {
        let tracker = QuotaTracker::new("alice", DailyLimits::uniform(2), Arc::new(ManualClock::new(day(1))));
        assert!(tracker.can_perform(ActionKind::Like));
        tracker.record(ActionKind::Like);
        tracker.record(ActionKind::Like);
        assert!(!tracker.can_perform(ActionKind::Like));
        assert!(tracker.can_perform(ActionKind::Comment));
        assert_eq!(tracker.remaining(ActionKind::Like), Some(0));
    }

    #[test]
    fn test_unlimited_kinds() {
        let tracker = QuotaTracker::new("alice", DailyLimits::uniform(0), Arc::new(ManualClock::new(day(1))));
        assert!(!tracker.can_perform(ActionKind::Follow));
        assert!(tracker.can_perform(ActionKind::StoryView));
        assert!(tracker.can_perform(ActionKind::Scrape));
        assert_eq!(tracker.remaining(ActionKind::Scrape), None);
    }

    #[test]
    fn test_reservation_release_and_commit() {
        let tracker = Arc::new(QuotaTracker::new(
            "alice",
            DailyLimits::uniform(1),
            Arc::new(ManualClock::new(day(1))),
        ));
        let held = tracker.try_reserve(ActionKind::Dm).unwrap();
        assert!(tracker.try_reserve(ActionKind::Dm).is_none());
        drop(held);
        assert_eq!(tracker.count(ActionKind::Dm), 0);

        tracker.try_reserve(ActionKind::Dm).unwrap().commit();
        assert_eq!(tracker.count(ActionKind::Dm), 1);
        assert!(tracker.try_reserve(ActionKind::Dm).is_none());
    }

    #[test]
    fn test_day_rollover_resets_counts() {
        let clock = Arc::new(ManualClock::new(day(1)));
        let tracker = QuotaTracker::new("alice", DailyLimits::uniform(1), clock.clone());
        tracker.record(ActionKind::Follow);
        assert!(!tracker.can_perform(ActionKind::Follow));
        clock.advance_days(1);
        assert!(tracker.can_perform(ActionKind::Follow));
        assert_eq!(tracker.count(ActionKind::Follow), 0);
    }
}
