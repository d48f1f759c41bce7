//! Streak Calculator: pure state transitions for user and relationship
//! streaks.
//!
//! Nothing here performs I/O or fails. Every function takes the current state
//! and "now" and returns the next state; persistence is the engine's job.

use crate::streak::{EventKind, RelationshipStreak, StreakStatus, UserStreak, GRACE_PERIOD_DAYS};
use crate::time::{add_days, days_between};
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Points for the first app activity of a UTC day, before the multiplier.
pub const DAILY_CHECK_IN_POINTS: i64 = 5;

/// Every this many consecutive days the user multiplier grows.
const MULTIPLIER_STEP_DAYS: i32 = 5;

/// How much the multiplier grows at each step.
const MULTIPLIER_INCREMENT: f64 = 0.1;

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Tunable parameters of the relationship transition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakRules {
    pub grace_period_days: i64,
}

impl Default for StreakRules {
    fn default() -> Self {
        Self {
            grace_period_days: GRACE_PERIOD_DAYS,
        }
    }
}

// ---------------------------------------------------------------------------
// Relationship streaks
// ---------------------------------------------------------------------------

/// Apply a contact event at `now` to a relationship streak.
///
/// A contact older than the last recorded one is treated as a same-day repeat
/// so dates never move backwards.
pub fn apply_contact(
    current: &RelationshipStreak,
    now: Timestamp,
    rules: &StreakRules,
) -> RelationshipStreak {
    let mut next = current.clone();
    let frequency = i64::from(current.contact_frequency_days);

    let contact_at = match current.last_contact_date {
        Some(last) if last > now => last,
        _ => now,
    };

    match current.last_contact_date.map(|last| days_between(last, now)) {
        Some(gap) if gap <= frequency + rules.grace_period_days => {
            if gap >= 1 {
                next.current_streak += 1;
            }
        }
        // First contact ever, or the window lapsed: start over.
        _ => next.current_streak = 1,
    }

    next.longest_streak = next.longest_streak.max(next.current_streak);
    next.status = StreakStatus::Active;
    schedule_from(&mut next, contact_at, rules);
    next
}

/// Daily sweep transition: move a streak to AT_RISK once its due date has
/// passed and to BROKEN once its grace period is over.
///
/// Idempotent: sweeping the output again with the same `now` is a no-op.
pub fn apply_sweep(current: &RelationshipStreak, now: Timestamp) -> RelationshipStreak {
    let mut next = current.clone();
    let (Some(due), Some(grace_end)) = (current.next_contact_due_date, current.grace_period_ends)
    else {
        return next;
    };

    if now > grace_end {
        next.status = StreakStatus::Broken;
        next.current_streak = 0;
    } else if now > due {
        next.status = StreakStatus::AtRisk;
    } else {
        next.status = StreakStatus::Active;
    }
    next
}

/// Change a relationship's cadence, rescheduling due and grace dates from the
/// last contact when there is one.
///
/// The caller validates `contact_frequency_days` first.
pub fn apply_frequency(
    current: &RelationshipStreak,
    contact_frequency_days: i32,
    rules: &StreakRules,
) -> RelationshipStreak {
    let mut next = current.clone();
    next.contact_frequency_days = contact_frequency_days;
    if let Some(last) = current.last_contact_date {
        schedule_from(&mut next, last, rules);
    }
    next
}

/// Push a streak's grace deadline out by `days` (recovery item effect).
pub fn extend_grace(current: &RelationshipStreak, days: i64) -> RelationshipStreak {
    let mut next = current.clone();
    next.grace_period_ends = current.grace_period_ends.map(|end| add_days(end, days));
    next
}

fn schedule_from(streak: &mut RelationshipStreak, contact_at: Timestamp, rules: &StreakRules) {
    let due = add_days(contact_at, i64::from(streak.contact_frequency_days));
    streak.last_contact_date = Some(contact_at);
    streak.next_contact_due_date = Some(due);
    streak.grace_period_ends = Some(add_days(due, rules.grace_period_days));
}

// ---------------------------------------------------------------------------
// User streaks
// ---------------------------------------------------------------------------

/// Result of applying app activity to a user streak.
#[derive(Debug, Clone, PartialEq)]
pub struct UserActivity {
    pub streak: UserStreak,
    /// `true` when this was the first activity of its UTC day.
    pub new_day: bool,
}

/// Apply app activity at `now` to a user streak.
///
/// Point totals and levels are untouched; they move only through point
/// increments in the store.
pub fn apply_user_activity(current: &UserStreak, now: Timestamp) -> UserActivity {
    let mut next = current.clone();
    let gap = current.last_activity_date.map(|last| days_between(last, now));

    let new_day = match gap {
        Some(1) => {
            next.current_streak_days += 1;
            if next.current_streak_days % MULTIPLIER_STEP_DAYS == 0 {
                next.multiplier = round_tenths(next.multiplier + MULTIPLIER_INCREMENT);
            }
            true
        }
        Some(days) if days <= 0 => false,
        _ => {
            next.current_streak_days = 1;
            next.multiplier = 1.0;
            true
        }
    };

    next.longest_streak_days = next.longest_streak_days.max(next.current_streak_days);
    next.last_activity_date = match current.last_activity_date {
        Some(last) if last > now => Some(last),
        _ => Some(now),
    };

    UserActivity {
        streak: next,
        new_day,
    }
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Points
// ---------------------------------------------------------------------------

/// Base points for an event kind before streak scaling.
pub fn base_points(kind: EventKind) -> i64 {
    match kind {
        EventKind::Message => 15,
        EventKind::Call => 20,
        EventKind::Meeting => 30,
        EventKind::Other => 10,
        EventKind::CheckIn => DAILY_CHECK_IN_POINTS,
    }
}

/// Points for a contact event given the relationship streak it produced.
pub fn contact_points(kind: EventKind, current_streak: i32) -> i64 {
    let scale_tenths = if current_streak >= 10 {
        15
    } else if current_streak >= 5 {
        12
    } else {
        10
    };
    base_points(kind) * scale_tenths / 10
}

/// Points for app activity: only the first activity of a day earns any.
pub fn check_in_points(activity: &UserActivity) -> i64 {
    if !activity.new_day {
        return 0;
    }
    let multiplier_tenths = (activity.streak.multiplier * 10.0).round() as i64;
    DAILY_CHECK_IN_POINTS * multiplier_tenths / 10
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap()
    }

    fn days(n: i64) -> Timestamp {
        t0() + Duration::days(n)
    }

    fn rel(frequency: i32) -> RelationshipStreak {
        RelationshipStreak::new(1, 10, frequency).unwrap()
    }

    fn contacted(streak: i32, longest: i32, at: Timestamp, frequency: i32) -> RelationshipStreak {
        let mut s = rel(frequency);
        s.current_streak = streak;
        s.longest_streak = longest;
        schedule_from(&mut s, at, &StreakRules::default());
        s
    }

    // -----------------------------------------------------------------------
    // Contact transitions
    // -----------------------------------------------------------------------

    #[test]
    fn first_contact_starts_streak_at_one() {
        let next = apply_contact(&rel(7), t0(), &StreakRules::default());
        assert_eq!(next.current_streak, 1);
        assert_eq!(next.longest_streak, 1);
        assert_eq!(next.status, StreakStatus::Active);
        assert_eq!(next.last_contact_date, Some(t0()));
        assert_eq!(next.next_contact_due_date, Some(days(7)));
        assert_eq!(next.grace_period_ends, Some(days(9)));
    }

    #[test]
    fn contact_within_window_increments() {
        let s = contacted(6, 6, t0(), 7);
        let next = apply_contact(&s, days(7), &StreakRules::default());
        assert_eq!(next.current_streak, 7);
        assert_eq!(next.longest_streak, 7);
    }

    #[test]
    fn contact_on_last_grace_day_still_counts() {
        let s = contacted(4, 4, t0(), 7);
        let next = apply_contact(&s, days(9), &StreakRules::default());
        assert_eq!(next.current_streak, 5);
    }

    #[test]
    fn contact_after_grace_resets_to_one() {
        let s = contacted(40, 40, t0(), 7);
        let next = apply_contact(&s, days(10), &StreakRules::default());
        assert_eq!(next.current_streak, 1);
        assert_eq!(next.longest_streak, 40);
        assert_eq!(next.status, StreakStatus::Active);
    }

    #[test]
    fn same_day_contact_keeps_count_but_reschedules() {
        let s = contacted(3, 5, t0(), 7);
        let later = t0() + Duration::hours(5);
        let next = apply_contact(&s, later, &StreakRules::default());
        assert_eq!(next.current_streak, 3);
        assert_eq!(next.last_contact_date, Some(later));
        assert_eq!(next.next_contact_due_date, Some(later + Duration::days(7)));
    }

    #[test]
    fn older_contact_does_not_move_dates_backwards() {
        let s = contacted(3, 3, t0(), 7);
        let next = apply_contact(&s, t0() - Duration::days(2), &StreakRules::default());
        assert_eq!(next.current_streak, 3);
        assert_eq!(next.last_contact_date, Some(t0()));
    }

    #[test]
    fn broken_streak_restarts_on_contact() {
        let s = apply_sweep(&contacted(8, 8, t0(), 7), days(10));
        assert_eq!(s.current_streak, 0);
        let next = apply_contact(&s, days(11), &StreakRules::default());
        assert_eq!(next.current_streak, 1);
        assert_eq!(next.status, StreakStatus::Active);
    }

    #[test]
    fn longest_never_below_current_over_a_sequence() {
        let rules = StreakRules::default();
        let gaps = [0, 1, 3, 7, 9, 10, 1, 1, 0, 12, 2, 8, 1];
        let mut s = rel(7);
        let mut now = t0();
        for gap in gaps {
            now += Duration::days(gap);
            s = apply_contact(&s, now, &rules);
            assert!(s.longest_streak >= s.current_streak);
            s = apply_sweep(&s, now + Duration::days(4));
            assert!(s.longest_streak >= s.current_streak);
        }
    }

    // -----------------------------------------------------------------------
    // Sweep
    // -----------------------------------------------------------------------

    #[test]
    fn sweep_ten_days_after_contact_breaks() {
        let s = contacted(5, 5, t0(), 7);
        let next = apply_sweep(&s, days(10));
        assert_eq!(next.status, StreakStatus::Broken);
        assert_eq!(next.current_streak, 0);
        assert_eq!(next.longest_streak, 5);
    }

    #[test]
    fn sweep_eight_days_after_contact_is_at_risk() {
        let s = contacted(5, 5, t0(), 7);
        let next = apply_sweep(&s, days(8));
        assert_eq!(next.status, StreakStatus::AtRisk);
        assert_eq!(next.current_streak, 5);
    }

    #[test]
    fn sweep_before_due_is_active() {
        let s = contacted(5, 5, t0(), 7);
        assert_eq!(apply_sweep(&s, days(3)).status, StreakStatus::Active);
    }

    #[test]
    fn sweep_is_idempotent() {
        let s = contacted(5, 5, t0(), 7);
        for now in [days(3), days(8), days(10)] {
            let once = apply_sweep(&s, now);
            let twice = apply_sweep(&once, now);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn sweep_without_contact_is_noop() {
        let s = rel(7);
        assert_eq!(apply_sweep(&s, days(30)), s);
    }

    #[test]
    fn extending_grace_delays_break() {
        let s = extend_grace(&contacted(5, 5, t0(), 7), 3);
        assert_eq!(s.grace_period_ends, Some(days(12)));
        assert_eq!(apply_sweep(&s, days(10)).status, StreakStatus::AtRisk);
    }

    #[test]
    fn changing_frequency_reschedules() {
        let s = contacted(5, 5, t0(), 7);
        let next = apply_frequency(&s, 14, &StreakRules::default());
        assert_eq!(next.next_contact_due_date, Some(days(14)));
        assert_eq!(next.grace_period_ends, Some(days(16)));
    }

    // -----------------------------------------------------------------------
    // User streaks
    // -----------------------------------------------------------------------

    fn user_at(day_count: i32, multiplier: f64, last: Timestamp) -> UserStreak {
        let mut u = UserStreak::new(1);
        u.current_streak_days = day_count;
        u.longest_streak_days = day_count;
        u.multiplier = multiplier;
        u.last_activity_date = Some(last);
        u
    }

    #[test]
    fn first_activity_starts_at_one() {
        let out = apply_user_activity(&UserStreak::new(1), t0());
        assert!(out.new_day);
        assert_eq!(out.streak.current_streak_days, 1);
        assert_eq!(out.streak.longest_streak_days, 1);
    }

    #[test]
    fn day_twenty_five_bumps_multiplier() {
        let out = apply_user_activity(&user_at(24, 1.4, t0()), days(1));
        assert_eq!(out.streak.current_streak_days, 25);
        assert!((out.streak.multiplier - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn non_step_day_keeps_multiplier() {
        let out = apply_user_activity(&user_at(22, 1.4, t0()), days(1));
        assert_eq!(out.streak.current_streak_days, 23);
        assert!((out.streak.multiplier - 1.4).abs() < f64::EPSILON);
    }

    #[test]
    fn same_day_activity_is_not_counted() {
        let out = apply_user_activity(&user_at(4, 1.0, t0()), t0() + Duration::hours(3));
        assert!(!out.new_day);
        assert_eq!(out.streak.current_streak_days, 4);
        assert_eq!(out.streak.last_activity_date, Some(t0() + Duration::hours(3)));
    }

    #[test]
    fn missed_day_resets_streak_and_multiplier() {
        let out = apply_user_activity(&user_at(12, 1.2, t0()), days(2));
        assert_eq!(out.streak.current_streak_days, 1);
        assert_eq!(out.streak.longest_streak_days, 12);
        assert!((out.streak.multiplier - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn multiplier_does_not_drift() {
        let mut u = UserStreak::new(1);
        let mut now = t0();
        for _ in 0..50 {
            u = apply_user_activity(&u, now).streak;
            now += Duration::days(1);
        }
        assert_eq!(u.current_streak_days, 50);
        assert_eq!(u.multiplier, 2.0);
    }

    // -----------------------------------------------------------------------
    // Points
    // -----------------------------------------------------------------------

    #[test]
    fn contact_points_by_kind() {
        assert_eq!(contact_points(EventKind::Message, 1), 15);
        assert_eq!(contact_points(EventKind::Call, 1), 20);
        assert_eq!(contact_points(EventKind::Meeting, 1), 30);
        assert_eq!(contact_points(EventKind::Other, 1), 10);
    }

    #[test]
    fn contact_points_scale_with_streak() {
        assert_eq!(contact_points(EventKind::Message, 4), 15);
        assert_eq!(contact_points(EventKind::Message, 5), 18);
        assert_eq!(contact_points(EventKind::Message, 10), 22);
        assert_eq!(contact_points(EventKind::Meeting, 10), 45);
    }

    #[test]
    fn check_in_points_only_once_per_day() {
        let first = apply_user_activity(&user_at(8, 1.5, t0()), days(1));
        assert_eq!(check_in_points(&first), 7);
        let again = apply_user_activity(&first.streak, days(1) + Duration::hours(1));
        assert_eq!(check_in_points(&again), 0);
    }
}
