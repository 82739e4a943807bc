//! Per-identity check-in cooldown gate.
//!
//! Converts a stream of matches for one identity into at most one
//! accepted check-in per cooldown window, so a student standing in
//! front of a camera does not generate an attendance row per frame.
//!
//! There is no explicit "in cooldown" state: the gate stores only the
//! last accepted check-in timestamp per identity and derives the
//! decision from `now - last`. Entries are created lazily on the first
//! accepted check-in and never deleted — the map is bounded by the
//! number of enrolled identities.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Default minimum time between two accepted check-ins per identity.
pub const DEFAULT_COOLDOWN_SECS: i64 = 30;

/// Outcome of a check-in attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckinDecision {
    /// First check-in, or the cooldown window has elapsed.
    Accepted,
    /// The identity checked in within the window; deduplicated.
    Suppressed,
}

/// Shared, concurrently accessed cooldown state.
///
/// `try_checkin` is an atomic check-and-set under one mutex: two
/// racing calls for the same identity at the same instant cannot both
/// observe "no cooldown". Owned explicitly and injected into every
/// caller path (request handlers, polling loops) so all of them share
/// one authoritative map.
pub struct CooldownGate {
    window: Duration,
    last_checkin: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_checkin: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_window() -> Self {
        Self::new(Duration::seconds(DEFAULT_COOLDOWN_SECS))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Attempt a check-in for `student_id` at `now`.
    ///
    /// Accepts iff the identity has no recorded check-in or the window
    /// has fully elapsed (`now - last >= window`); accepting stamps
    /// `now` in the same critical section.
    pub fn try_checkin(&self, student_id: &str, now: DateTime<Utc>) -> CheckinDecision {
        let mut map = self.last_checkin.lock().unwrap();
        match map.get(student_id) {
            Some(last) if now.signed_duration_since(*last) < self.window => {
                CheckinDecision::Suppressed
            }
            _ => {
                map.insert(student_id.to_string(), now);
                CheckinDecision::Accepted
            }
        }
    }

    /// Last accepted check-in for an identity, if any.
    pub fn last_checkin(&self, student_id: &str) -> Option<DateTime<Utc>> {
        self.last_checkin.lock().unwrap().get(student_id).copied()
    }

    /// Undo an accepted check-in whose attendance write failed, so the
    /// caller can re-capture and retry without waiting out the window.
    ///
    /// Compare-and-remove: only clears the entry if it still carries
    /// the timestamp stamped by the failed attempt, leaving any newer
    /// accept from a racing call untouched.
    pub fn revert(&self, student_id: &str, stamped_at: DateTime<Utc>) {
        let mut map = self.last_checkin.lock().unwrap();
        if map.get(student_id) == Some(&stamped_at) {
            map.remove(student_id);
        }
    }
}
