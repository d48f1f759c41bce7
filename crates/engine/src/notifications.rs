//! Notification dispatch: renders scheduler decisions into requests and
//! hands them to the delivery service.

use std::sync::Arc;

use tether_core::collaborators::{DeliveryHandle, NotificationDelivery, RelationshipDirectory};
use tether_core::notification::{NotificationKind, NotificationPlan, NotificationRequest};

/// Outcome of one dispatch round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Dedupe key and delivery handle of every request accepted.
    pub scheduled: Vec<(String, DeliveryHandle)>,
    /// Requests the delivery service refused or could not take.
    pub failed: usize,
}

/// Collaborators needed to turn plans into delivered notifications.
#[derive(Clone)]
pub struct NotificationDispatcher {
    directory: Arc<dyn RelationshipDirectory>,
    delivery: Arc<dyn NotificationDelivery>,
}

impl NotificationDispatcher {
    pub fn new(
        directory: Arc<dyn RelationshipDirectory>,
        delivery: Arc<dyn NotificationDelivery>,
    ) -> Self {
        Self {
            directory,
            delivery,
        }
    }

    /// Render and schedule each plan. Delivery failures are logged and
    /// counted, never propagated.
    pub async fn dispatch(&self, plans: &[NotificationPlan]) -> DispatchReport {
        let mut report = DispatchReport::default();
        for plan in plans {
            let name = match plan.relationship_id {
                Some(id) => self.directory.display_name(id).await,
                None => None,
            };
            let request = render(plan, name.as_deref());
            match self.delivery.schedule(&request).await {
                Ok(handle) => report.scheduled.push((plan.dedupe_key.clone(), handle)),
                Err(e) => {
                    tracing::warn!(
                        dedupe_key = %plan.dedupe_key,
                        error = %e,
                        "Notification delivery failed",
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Produce user-facing text for a plan.
pub fn render(plan: &NotificationPlan, name: Option<&str>) -> NotificationRequest {
    let who = name.unwrap_or("your contact");
    let (title, body) = match plan.kind {
        NotificationKind::AtRisk => (
            format!("Your streak with {who} is at risk"),
            format!(
                "Your {}-contact streak ends in {} hours. Reach out to keep it going.",
                plan.current_streak,
                plan.hours_until_break.unwrap_or(0)
            ),
        ),
        NotificationKind::MilestoneAchieved => {
            let days = plan.threshold_days.unwrap_or(plan.current_streak);
            let body = match plan.relationship_id {
                Some(_) => format!("You've kept in touch with {who} {days} times in a row."),
                None => format!("You've checked in {days} days in a row."),
            };
            (format!("{days}-day streak!"), body)
        }
        NotificationKind::DailyReminder => (
            "Time to check in".to_string(),
            "Open the app to keep your daily streak alive.".to_string(),
        ),
        NotificationKind::WeeklySummary => (
            "Your week in streaks".to_string(),
            "See how your relationships did this week.".to_string(),
        ),
        NotificationKind::SyncFailure => (
            "Some activity couldn't be saved".to_string(),
            "A change made while offline could not be synced. Please log it again.".to_string(),
        ),
    };

    NotificationRequest {
        kind: plan.kind,
        title,
        body,
        trigger_at: plan.trigger_at,
        dedupe_key: plan.dedupe_key.clone(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn plan(kind: NotificationKind, relationship_id: Option<i64>) -> NotificationPlan {
        NotificationPlan {
            kind,
            relationship_id,
            current_streak: 4,
            hours_until_break: Some(6),
            threshold_days: Some(7),
            trigger_at: Utc::now(),
            dedupe_key: "key".into(),
        }
    }

    #[test]
    fn at_risk_text_names_the_contact() {
        let request = render(&plan(NotificationKind::AtRisk, Some(3)), Some("Sam"));
        assert_eq!(request.title, "Your streak with Sam is at risk");
        assert!(request.body.contains("4-contact streak ends in 6 hours"));
        assert_eq!(request.dedupe_key, "key");
    }

    #[test]
    fn unknown_contact_falls_back_to_generic_name() {
        let request = render(&plan(NotificationKind::AtRisk, Some(3)), None);
        assert_eq!(request.title, "Your streak with your contact is at risk");
    }

    #[test]
    fn user_milestone_text() {
        let request = render(&plan(NotificationKind::MilestoneAchieved, None), None);
        assert_eq!(request.title, "7-day streak!");
        assert_eq!(request.body, "You've checked in 7 days in a row.");
    }
}
