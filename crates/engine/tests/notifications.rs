//! Notification dispatch: at-risk warnings, milestones and sync failures.

mod common;

use std::sync::atomic::Ordering;

use chrono::NaiveTime;
use common::{at, relationship, Harness, FRIEND, USER};
use tether_core::notification::{NotificationKind, NotificationPreferences, QuietHours};
use tether_core::streak::{EventKind, StreakStatus};

fn at_risk_harness_seed() -> tether_core::streak::RelationshipStreak {
    let mut streak = relationship(FRIEND, 4, at(1, 12));
    streak.status = StreakStatus::AtRisk;
    streak
}

// ---------------------------------------------------------------------------
// Test: at-risk warning is sent once per cooldown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn at_risk_warning_respects_cooldown() {
    let h = Harness::new();
    h.store.seed_relationship_streak(at_risk_harness_seed()).await;
    let prefs = NotificationPreferences::default();

    let first = h
        .engine
        .dispatch_notifications(USER, &prefs, at(10, 0))
        .await
        .unwrap();
    let second = h
        .engine
        .dispatch_notifications(USER, &prefs, at(10, 1))
        .await
        .unwrap();

    assert_eq!(first.scheduled.len(), 1);
    assert_eq!(first.scheduled[0].0, "at_risk:10");
    assert!(second.scheduled.is_empty());
    let requests = h.delivery.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, NotificationKind::AtRisk);
    assert_eq!(requests[0].title, "Your streak with Sam is at risk");
    assert!(requests[0].body.contains("ends in 12 hours"));
}

#[tokio::test]
async fn quiet_hours_defer_the_warning() {
    let h = Harness::new();
    h.store.seed_relationship_streak(at_risk_harness_seed()).await;
    let prefs = NotificationPreferences {
        quiet_hours: Some(QuietHours {
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        }),
        ..Default::default()
    };

    h.engine
        .dispatch_notifications(USER, &prefs, at(10, 1))
        .await
        .unwrap();

    let requests = h.delivery.requests.lock().await;
    assert_eq!(requests[0].trigger_at, at(10, 7));
}

#[tokio::test]
async fn disabled_preferences_send_no_streak_notifications() {
    let h = Harness::new();
    h.store.seed_relationship_streak(at_risk_harness_seed()).await;
    let prefs = NotificationPreferences {
        enabled: false,
        ..Default::default()
    };

    let report = h
        .engine
        .dispatch_notifications(USER, &prefs, at(10, 0))
        .await
        .unwrap();

    assert!(report.scheduled.is_empty());
}

#[tokio::test]
async fn refused_delivery_is_retried_next_round() {
    let h = Harness::new();
    h.store.seed_relationship_streak(at_risk_harness_seed()).await;
    let prefs = NotificationPreferences::default();
    h.delivery.refuse.store(true, Ordering::SeqCst);

    let refused = h
        .engine
        .dispatch_notifications(USER, &prefs, at(10, 0))
        .await
        .unwrap();
    h.delivery.refuse.store(false, Ordering::SeqCst);
    let retried = h
        .engine
        .dispatch_notifications(USER, &prefs, at(10, 1))
        .await
        .unwrap();

    assert_eq!(refused.failed, 1);
    assert_eq!(retried.scheduled.len(), 1);
}

// ---------------------------------------------------------------------------
// Test: milestones are announced once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_milestone_is_announced_once() {
    let h = Harness::new();
    h.store
        .seed_relationship_streak(relationship(FRIEND, 6, at(1, 12)))
        .await;
    h.engine
        .record_contact_event(USER, FRIEND, EventKind::Message, at(3, 12))
        .await
        .unwrap();
    let prefs = NotificationPreferences::default();

    h.engine
        .dispatch_notifications(USER, &prefs, at(3, 13))
        .await
        .unwrap();
    let again = h
        .engine
        .dispatch_notifications(USER, &prefs, at(3, 14))
        .await
        .unwrap();

    assert!(again.scheduled.is_empty());
    let requests = h.delivery.requests.lock().await;
    let milestones: Vec<_> = requests
        .iter()
        .filter(|r| r.kind == NotificationKind::MilestoneAchieved)
        .collect();
    assert_eq!(milestones.len(), 1);
    assert_eq!(milestones[0].title, "7-day streak!");
    assert_eq!(
        milestones[0].body,
        "You've kept in touch with Sam 7 times in a row."
    );
}

// ---------------------------------------------------------------------------
// Test: dropped offline events are reported even with reminders off
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sync_failure_is_notified_and_cleared() {
    let h = Harness::new();
    h.go_offline();
    h.engine.record_user_activity(USER, at(2, 9)).await.unwrap();
    h.go_online();
    h.store.fail_next(3);
    h.engine.sync_pending().await.unwrap();
    assert_eq!(h.engine.sync_failures(USER).await.unwrap().len(), 1);
    let prefs = NotificationPreferences {
        enabled: false,
        ..Default::default()
    };

    let report = h
        .engine
        .dispatch_notifications(USER, &prefs, at(2, 10))
        .await
        .unwrap();

    assert_eq!(report.scheduled.len(), 1);
    assert!(report.scheduled[0].0.starts_with("sync_failure:"));
    assert!(h.engine.sync_failures(USER).await.unwrap().is_empty());
    let requests = h.delivery.requests.lock().await;
    assert_eq!(requests[0].kind, NotificationKind::SyncFailure);
}
