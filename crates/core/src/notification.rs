//! Notification Scheduler Adapter: decides which streak notifications to ask
//! for and when.
//!
//! Everything here is pure. Rendering text, delivering requests and
//! recording history belong to the engine; this module only turns streak
//! state, preferences and past deliveries into [`NotificationPlan`]s.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::milestone::StreakMilestone;
use crate::streak::{RelationshipStreak, StreakStatus};
use crate::time::hours_until;
use crate::types::{DbId, EventId, Timestamp};

/// Last delivery time per dedupe key.
pub type NotificationHistory = HashMap<String, Timestamp>;

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

/// A daily window (UTC) in which nothing should fire. `start > end` wraps
/// past midnight; `start == end` is an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    /// Move `at` to the end of the quiet window if it falls inside it.
    pub fn defer(&self, at: Timestamp) -> Timestamp {
        let time = at.time();
        if !self.contains(time) {
            return at;
        }
        let date = at.date_naive();
        let end_date = if self.start > self.end && time >= self.start {
            date + Duration::days(1)
        } else {
            date
        };
        end_date.and_time(self.end).and_utc()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    pub weekday: Weekday,
    pub at: NaiveTime,
}

/// Per-user notification preferences relevant to streaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub enabled: bool,
    /// Warn about an at-risk streak once it is this close to breaking.
    pub at_risk_threshold_hours: i64,
    /// Minimum gap between two at-risk warnings for the same relationship.
    pub cooldown_hours: i64,
    pub daily_reminder_at: Option<NaiveTime>,
    pub weekly_summary: Option<WeeklySchedule>,
    pub quiet_hours: Option<QuietHours>,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            at_risk_threshold_hours: 24,
            cooldown_hours: 24,
            daily_reminder_at: None,
            weekly_summary: None,
            quiet_hours: None,
        }
    }
}

impl NotificationPreferences {
    fn adjust(&self, at: Timestamp) -> Timestamp {
        match &self.quiet_hours {
            Some(quiet) => quiet.defer(at),
            None => at,
        }
    }
}

// ---------------------------------------------------------------------------
// Plans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AtRisk,
    MilestoneAchieved,
    DailyReminder,
    WeeklySummary,
    SyncFailure,
}

/// A decision to ask for one notification, before any text is rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPlan {
    pub kind: NotificationKind,
    pub relationship_id: Option<DbId>,
    pub current_streak: i32,
    pub hours_until_break: Option<i64>,
    pub threshold_days: Option<i32>,
    pub trigger_at: Timestamp,
    pub dedupe_key: String,
}

impl NotificationPlan {
    fn new(kind: NotificationKind, trigger_at: Timestamp, dedupe_key: String) -> Self {
        Self {
            kind,
            relationship_id: None,
            current_streak: 0,
            hours_until_break: None,
            threshold_days: None,
            trigger_at,
            dedupe_key,
        }
    }
}

/// A rendered notification ready for the delivery service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub trigger_at: Timestamp,
    pub dedupe_key: String,
}

pub fn at_risk_key(relationship_id: DbId) -> String {
    format!("at_risk:{relationship_id}")
}

fn sent_within(history: &NotificationHistory, key: &str, now: Timestamp, hours: i64) -> bool {
    history
        .get(key)
        .is_some_and(|sent| now - *sent < Duration::hours(hours))
}

/// At-risk relationships close enough to breaking to warn about, most urgent
/// first, skipping any warned about within the cooldown window.
pub fn at_risk_plans(
    streaks: &[RelationshipStreak],
    prefs: &NotificationPreferences,
    history: &NotificationHistory,
    now: Timestamp,
) -> Vec<NotificationPlan> {
    let mut plans: Vec<NotificationPlan> = streaks
        .iter()
        .filter(|s| s.status == StreakStatus::AtRisk)
        .filter_map(|s| {
            let hours = hours_until(now, s.grace_period_ends?);
            if hours < 0 || hours > prefs.at_risk_threshold_hours {
                return None;
            }
            let key = at_risk_key(s.relationship_id);
            if sent_within(history, &key, now, prefs.cooldown_hours) {
                return None;
            }
            let mut plan = NotificationPlan::new(NotificationKind::AtRisk, prefs.adjust(now), key);
            plan.relationship_id = Some(s.relationship_id);
            plan.current_streak = s.current_streak;
            plan.hours_until_break = Some(hours);
            Some(plan)
        })
        .collect();

    plans.sort_by_key(|p| (p.hours_until_break, p.relationship_id));
    plans
}

/// Next daily reminder at or after `now`, pushed past quiet hours.
pub fn next_daily_reminder(prefs: &NotificationPreferences, now: Timestamp) -> Option<Timestamp> {
    let at = prefs.daily_reminder_at?;
    let mut candidate = now.date_naive().and_time(at).and_utc();
    if candidate <= now {
        candidate += Duration::days(1);
    }
    Some(prefs.adjust(candidate))
}

/// Next weekly summary at or after `now`, pushed past quiet hours.
pub fn next_weekly_summary(prefs: &NotificationPreferences, now: Timestamp) -> Option<Timestamp> {
    let schedule = prefs.weekly_summary?;
    let today = now.date_naive();
    let ahead = (i64::from(schedule.weekday.num_days_from_monday())
        - i64::from(today.weekday().num_days_from_monday()))
    .rem_euclid(7);
    let mut candidate = (today + Duration::days(ahead)).and_time(schedule.at).and_utc();
    if candidate <= now {
        candidate += Duration::weeks(1);
    }
    Some(prefs.adjust(candidate))
}

/// Every notification that should be requested now: at-risk warnings plus
/// the upcoming daily reminder and weekly summary when not yet scheduled.
pub fn plan_notifications(
    streaks: &[RelationshipStreak],
    prefs: &NotificationPreferences,
    history: &NotificationHistory,
    now: Timestamp,
) -> Vec<NotificationPlan> {
    if !prefs.enabled {
        return Vec::new();
    }

    let mut plans = at_risk_plans(streaks, prefs, history, now);

    if let Some(at) = next_daily_reminder(prefs, now) {
        let key = format!("daily_reminder:{}", at.date_naive());
        if !history.contains_key(&key) {
            plans.push(NotificationPlan::new(NotificationKind::DailyReminder, at, key));
        }
    }

    if let Some(at) = next_weekly_summary(prefs, now) {
        let key = format!("weekly_summary:{}", at.date_naive());
        if !history.contains_key(&key) {
            plans.push(NotificationPlan::new(NotificationKind::WeeklySummary, at, key));
        }
    }

    plans
}

/// Celebrate a newly reached milestone.
pub fn milestone_plan(
    milestone: &StreakMilestone,
    prefs: &NotificationPreferences,
    now: Timestamp,
) -> NotificationPlan {
    let mut plan = NotificationPlan::new(
        NotificationKind::MilestoneAchieved,
        prefs.adjust(now),
        milestone_key(milestone.id),
    );
    plan.relationship_id = milestone.relationship_id;
    plan.current_streak = milestone.threshold_days;
    plan.threshold_days = Some(milestone.threshold_days);
    plan
}

pub fn milestone_key(milestone_id: DbId) -> String {
    format!("milestone:{milestone_id}")
}

pub fn sync_failure_key(event_id: EventId) -> String {
    format!("sync_failure:{event_id}")
}

/// Tell the user an offline change was dropped after replay gave up on it.
///
/// Ignores `enabled`: a lost change is reported even when streak reminders
/// are switched off.
pub fn sync_failure_plan(
    event_id: EventId,
    prefs: &NotificationPreferences,
    now: Timestamp,
) -> NotificationPlan {
    NotificationPlan::new(
        NotificationKind::SyncFailure,
        prefs.adjust(now),
        sync_failure_key(event_id),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn at(d: u32, h: u32, m: u32) -> Timestamp {
        // 2026-06-01 is a Monday.
        Utc.with_ymd_and_hms(2026, 6, d, h, m, 0).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn at_risk(relationship_id: DbId, grace_end: Timestamp) -> RelationshipStreak {
        let mut s = RelationshipStreak::new(1, relationship_id, 7).unwrap();
        s.current_streak = 4;
        s.status = StreakStatus::AtRisk;
        s.last_contact_date = Some(grace_end - Duration::days(9));
        s.next_contact_due_date = Some(grace_end - Duration::days(2));
        s.grace_period_ends = Some(grace_end);
        s
    }

    // -----------------------------------------------------------------------
    // Quiet hours
    // -----------------------------------------------------------------------

    #[test]
    fn quiet_hours_wrapping_midnight() {
        let q = QuietHours {
            start: hm(22, 0),
            end: hm(7, 0),
        };
        assert!(q.contains(hm(23, 30)));
        assert!(q.contains(hm(3, 0)));
        assert!(!q.contains(hm(7, 0)));
        assert!(!q.contains(hm(12, 0)));
    }

    #[test]
    fn quiet_hours_same_day_window() {
        let q = QuietHours {
            start: hm(13, 0),
            end: hm(14, 0),
        };
        assert!(q.contains(hm(13, 30)));
        assert!(!q.contains(hm(14, 0)));
        assert_eq!(q.defer(at(1, 13, 15)), at(1, 14, 0));
    }

    #[test]
    fn defer_late_evening_moves_to_next_morning() {
        let q = QuietHours {
            start: hm(22, 0),
            end: hm(7, 0),
        };
        assert_eq!(q.defer(at(1, 23, 0)), at(2, 7, 0));
        assert_eq!(q.defer(at(2, 2, 0)), at(2, 7, 0));
        assert_eq!(q.defer(at(2, 9, 0)), at(2, 9, 0));
    }

    #[test]
    fn empty_quiet_window_never_defers() {
        let q = QuietHours {
            start: hm(8, 0),
            end: hm(8, 0),
        };
        assert!(!q.contains(hm(8, 0)));
    }

    // -----------------------------------------------------------------------
    // At-risk selection
    // -----------------------------------------------------------------------

    #[test]
    fn selects_at_risk_within_threshold() {
        let now = at(10, 12, 0);
        let streaks = vec![
            at_risk(1, now + Duration::hours(10)),
            at_risk(2, now + Duration::hours(40)),
        ];
        let plans = at_risk_plans(&streaks, &NotificationPreferences::default(), &HashMap::new(), now);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].relationship_id, Some(1));
        assert_eq!(plans[0].hours_until_break, Some(10));
        assert_eq!(plans[0].dedupe_key, "at_risk:1");
    }

    #[test]
    fn ignores_active_and_broken() {
        let now = at(10, 12, 0);
        let mut active = at_risk(1, now + Duration::hours(5));
        active.status = StreakStatus::Active;
        let mut broken = at_risk(2, now + Duration::hours(5));
        broken.status = StreakStatus::Broken;
        let plans = at_risk_plans(
            &[active, broken],
            &NotificationPreferences::default(),
            &HashMap::new(),
            now,
        );
        assert!(plans.is_empty());
    }

    #[test]
    fn skips_streaks_already_past_grace() {
        let now = at(10, 12, 0);
        let plans = at_risk_plans(
            &[at_risk(1, now - Duration::hours(2))],
            &NotificationPreferences::default(),
            &HashMap::new(),
            now,
        );
        assert!(plans.is_empty());
    }

    #[test]
    fn cooldown_suppresses_repeat_warning() {
        let now = at(10, 12, 0);
        let streaks = vec![at_risk(1, now + Duration::hours(10))];
        let prefs = NotificationPreferences::default();

        let mut history = HashMap::new();
        history.insert(at_risk_key(1), now - Duration::hours(3));
        assert!(at_risk_plans(&streaks, &prefs, &history, now).is_empty());

        history.insert(at_risk_key(1), now - Duration::hours(30));
        assert_eq!(at_risk_plans(&streaks, &prefs, &history, now).len(), 1);
    }

    #[test]
    fn most_urgent_first() {
        let now = at(10, 12, 0);
        let streaks = vec![
            at_risk(1, now + Duration::hours(20)),
            at_risk(2, now + Duration::hours(2)),
        ];
        let plans = at_risk_plans(&streaks, &NotificationPreferences::default(), &HashMap::new(), now);
        let order: Vec<_> = plans.iter().map(|p| p.relationship_id).collect();
        assert_eq!(order, vec![Some(2), Some(1)]);
    }

    #[test]
    fn at_risk_trigger_respects_quiet_hours() {
        let now = at(10, 23, 0);
        let prefs = NotificationPreferences {
            quiet_hours: Some(QuietHours {
                start: hm(22, 0),
                end: hm(7, 0),
            }),
            ..Default::default()
        };
        let plans = at_risk_plans(
            &[at_risk(1, now + Duration::hours(20))],
            &prefs,
            &HashMap::new(),
            now,
        );
        assert_eq!(plans[0].trigger_at, at(11, 7, 0));
    }

    // -----------------------------------------------------------------------
    // Reminders
    // -----------------------------------------------------------------------

    #[test]
    fn daily_reminder_later_today_or_tomorrow() {
        let prefs = NotificationPreferences {
            daily_reminder_at: Some(hm(18, 0)),
            ..Default::default()
        };
        assert_eq!(next_daily_reminder(&prefs, at(3, 9, 0)), Some(at(3, 18, 0)));
        assert_eq!(next_daily_reminder(&prefs, at(3, 19, 0)), Some(at(4, 18, 0)));
    }

    #[test]
    fn daily_reminder_inside_quiet_hours_is_deferred() {
        let prefs = NotificationPreferences {
            daily_reminder_at: Some(hm(23, 0)),
            quiet_hours: Some(QuietHours {
                start: hm(22, 0),
                end: hm(7, 0),
            }),
            ..Default::default()
        };
        assert_eq!(next_daily_reminder(&prefs, at(3, 9, 0)), Some(at(4, 7, 0)));
    }

    #[test]
    fn weekly_summary_next_matching_weekday() {
        let prefs = NotificationPreferences {
            weekly_summary: Some(WeeklySchedule {
                weekday: Weekday::Sun,
                at: hm(10, 0),
            }),
            ..Default::default()
        };
        // Wednesday 3rd -> Sunday 7th.
        assert_eq!(next_weekly_summary(&prefs, at(3, 9, 0)), Some(at(7, 10, 0)));
        // Sunday after the slot -> following Sunday.
        assert_eq!(next_weekly_summary(&prefs, at(7, 11, 0)), Some(at(14, 10, 0)));
    }

    #[test]
    fn plan_skips_reminders_already_scheduled() {
        let now = at(3, 9, 0);
        let prefs = NotificationPreferences {
            daily_reminder_at: Some(hm(18, 0)),
            ..Default::default()
        };
        let plans = plan_notifications(&[], &prefs, &HashMap::new(), now);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].kind, NotificationKind::DailyReminder);

        let mut history = HashMap::new();
        history.insert(plans[0].dedupe_key.clone(), now);
        assert!(plan_notifications(&[], &prefs, &history, now).is_empty());
    }

    #[test]
    fn disabled_preferences_plan_nothing() {
        let now = at(10, 12, 0);
        let prefs = NotificationPreferences {
            enabled: false,
            daily_reminder_at: Some(hm(18, 0)),
            ..Default::default()
        };
        let plans = plan_notifications(&[at_risk(1, now + Duration::hours(3))], &prefs, &HashMap::new(), now);
        assert!(plans.is_empty());
    }

    #[test]
    fn sync_failure_ignores_disabled_flag_but_not_quiet_hours() {
        let prefs = NotificationPreferences {
            enabled: false,
            quiet_hours: Some(QuietHours {
                start: hm(22, 0),
                end: hm(7, 0),
            }),
            ..Default::default()
        };
        let event_id = crate::types::new_event_id();
        let plan = sync_failure_plan(event_id, &prefs, at(4, 23, 30));
        assert_eq!(plan.kind, NotificationKind::SyncFailure);
        assert_eq!(plan.trigger_at, at(5, 7, 0));
        assert_eq!(plan.dedupe_key, format!("sync_failure:{event_id}"));
    }
}
