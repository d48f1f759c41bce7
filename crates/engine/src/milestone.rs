//! Milestone Evaluator: records the milestone a new streak length earned,
//! exactly once per streak and threshold.

use std::sync::Arc;

use tether_core::error::StreakError;
use tether_core::milestone::{next_unrecorded, MilestoneScope, NewMilestone, StreakMilestone};
use tether_core::store::StoreError;
use tether_core::types::{DbId, Timestamp};

use crate::remote::RemoteClient;

pub struct MilestoneEvaluator {
    remote: Arc<RemoteClient>,
}

impl MilestoneEvaluator {
    pub fn new(remote: Arc<RemoteClient>) -> Self {
        Self { remote }
    }

    /// Record the highest unrecorded milestone at or below `streak_length`.
    ///
    /// Returns `Ok(None)` when nothing new was reached or when a concurrent
    /// writer (or an earlier attempt whose response was lost) recorded the
    /// same milestone first; the unique constraint on the store decides, the
    /// pre-check only saves a write. A new milestone is stored together with
    /// a badge reward recording the achievement; its configured reward is
    /// paid on claim.
    pub async fn evaluate(
        &self,
        user_id: DbId,
        scope: MilestoneScope,
        streak_length: i32,
        now: Timestamp,
    ) -> Result<Option<StreakMilestone>, StreakError> {
        if streak_length <= 0 {
            return Ok(None);
        }

        let store = self.remote.store();
        let recorded: Vec<i32> = self
            .remote
            .run(|| store.list_milestones(user_id, scope.relationship_id()))
            .await?
            .iter()
            .map(|m| m.threshold_days)
            .collect();

        let Some(reward) = next_unrecorded(streak_length, &recorded) else {
            return Ok(None);
        };

        let new_milestone = NewMilestone::new(user_id, scope, reward, now);
        let badge = new_milestone.badge();
        let milestone = match self
            .remote
            .run(|| store.record_milestone(&new_milestone, &badge))
            .await
        {
            Ok(milestone) => milestone,
            Err(StoreError::Duplicate) => {
                tracing::debug!(
                    user_id,
                    milestone_type = %new_milestone.milestone_type,
                    "Milestone already recorded",
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            user_id,
            relationship_id = milestone.relationship_id,
            milestone_id = milestone.id,
            threshold_days = milestone.threshold_days,
            "Milestone achieved",
        );
        Ok(Some(milestone))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tether_core::retry::RetryPolicy;

    use assert_matches::assert_matches;
    use tether_core::reward::RewardKind;

    use super::*;
    use crate::memory::{InMemoryRemoteStore, WriteOp};

    fn setup() -> (Arc<InMemoryRemoteStore>, MilestoneEvaluator) {
        let store = Arc::new(InMemoryRemoteStore::new());
        let remote = Arc::new(RemoteClient::new(
            store.clone(),
            Duration::from_secs(1),
            RetryPolicy::no_retry(),
        ));
        (store, MilestoneEvaluator::new(remote))
    }

    #[tokio::test]
    async fn records_once_per_threshold() {
        let (store, evaluator) = setup();
        let now = Utc::now();
        let scope = MilestoneScope::Relationship(5);

        let first = evaluator.evaluate(1, scope, 7, now).await.unwrap();
        assert_eq!(first.map(|m| m.threshold_days), Some(7));

        let again = evaluator.evaluate(1, scope, 7, now).await.unwrap();
        assert_eq!(again.map(|m| m.threshold_days), Some(3));

        let third = evaluator.evaluate(1, scope, 7, now).await.unwrap();
        assert!(third.is_none());

        assert_eq!(store.milestones().await.len(), 2);
    }

    #[tokio::test]
    async fn user_and_relationship_milestones_are_separate() {
        let (store, evaluator) = setup();
        let now = Utc::now();

        evaluator
            .evaluate(1, MilestoneScope::User, 3, now)
            .await
            .unwrap();
        evaluator
            .evaluate(1, MilestoneScope::Relationship(9), 3, now)
            .await
            .unwrap();

        let types: Vec<String> = store
            .milestones()
            .await
            .into_iter()
            .map(|m| m.milestone_type)
            .collect();
        assert_eq!(types, vec!["user_streak_3", "relationship_streak_3"]);
    }

    #[tokio::test]
    async fn new_milestone_issues_badge() {
        let (store, evaluator) = setup();
        evaluator
            .evaluate(2, MilestoneScope::User, 14, Utc::now())
            .await
            .unwrap();

        let rewards = store.rewards().await;
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].kind, RewardKind::Badge);
        assert_eq!(rewards[0].value, "user_streak_14");
    }

    #[tokio::test]
    async fn short_streak_records_nothing() {
        let (store, evaluator) = setup();
        let result = evaluator
            .evaluate(1, MilestoneScope::User, 2, Utc::now())
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn failed_record_writes_neither_milestone_nor_badge() {
        let (store, evaluator) = setup();
        store.refuse_next(WriteOp::RecordMilestone).await;

        let result = evaluator
            .evaluate(1, MilestoneScope::User, 7, Utc::now())
            .await;
        assert_matches!(result, Err(StreakError::Unreachable(_)));
        assert!(store.milestones().await.is_empty());
        assert!(store.rewards().await.is_empty());

        let retried = evaluator
            .evaluate(1, MilestoneScope::User, 7, Utc::now())
            .await
            .unwrap();
        assert_eq!(retried.map(|m| m.threshold_days), Some(7));
        assert_eq!(store.rewards().await.len(), 1);
    }
}
