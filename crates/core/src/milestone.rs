//! Milestone thresholds, the reward attached to each, and selection of the
//! milestone a new streak length has earned.

use serde::{Deserialize, Serialize};

use crate::reward::{
    NewReward, RewardGrant, RewardKind, FEATURE_STREAK_FREEZE, FEATURE_STREAK_SAVER,
};
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Reward issued when a milestone is claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MilestoneReward {
    pub threshold_days: i32,
    pub reward_kind: RewardKind,
    pub reward_value: &'static str,
    pub reward_amount: i64,
}

const fn points(threshold_days: i32, amount: i64) -> MilestoneReward {
    MilestoneReward {
        threshold_days,
        reward_kind: RewardKind::Points,
        reward_value: "points",
        reward_amount: amount,
    }
}

const fn feature(threshold_days: i32, value: &'static str) -> MilestoneReward {
    MilestoneReward {
        threshold_days,
        reward_kind: RewardKind::Feature,
        reward_value: value,
        reward_amount: 1,
    }
}

const fn badge(threshold_days: i32, value: &'static str) -> MilestoneReward {
    MilestoneReward {
        threshold_days,
        reward_kind: RewardKind::Badge,
        reward_value: value,
        reward_amount: 1,
    }
}

/// Configured milestones in ascending threshold order.
pub const MILESTONES: [MilestoneReward; 8] = [
    points(3, 50),
    points(7, 100),
    feature(14, FEATURE_STREAK_FREEZE),
    points(30, 500),
    feature(60, FEATURE_STREAK_SAVER),
    points(90, 1000),
    badge(180, "streak_180"),
    badge(365, "streak_365"),
];

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Which streak a milestone belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MilestoneScope {
    User,
    Relationship(DbId),
}

impl MilestoneScope {
    pub fn relationship_id(self) -> Option<DbId> {
        match self {
            MilestoneScope::User => None,
            MilestoneScope::Relationship(id) => Some(id),
        }
    }

    pub fn from_relationship(relationship_id: Option<DbId>) -> Self {
        relationship_id.map_or(MilestoneScope::User, MilestoneScope::Relationship)
    }
}

/// Storage key distinguishing user and relationship milestones at a threshold.
pub fn milestone_type(scope: MilestoneScope, threshold_days: i32) -> String {
    match scope {
        MilestoneScope::User => format!("user_streak_{threshold_days}"),
        MilestoneScope::Relationship(_) => format!("relationship_streak_{threshold_days}"),
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// A milestone reached by a user or relationship streak.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakMilestone {
    pub id: DbId,
    pub user_id: DbId,
    pub relationship_id: Option<DbId>,
    pub milestone_type: String,
    pub threshold_days: i32,
    pub reward_kind: RewardKind,
    pub reward_value: String,
    pub reward_amount: i64,
    pub claimed: bool,
    pub achieved_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
}

impl StreakMilestone {
    /// The configured reward paid when this milestone is claimed. Keyed by
    /// milestone, so a milestone pays out at most once.
    pub fn payout(&self, claimed_at: Timestamp) -> RewardGrant {
        RewardGrant::new(
            format!("claim:{}", self.id),
            NewReward {
                user_id: self.user_id,
                kind: self.reward_kind,
                value: self.reward_value.clone(),
                amount: self.reward_amount,
                awarded_at: claimed_at,
            },
        )
    }
}

/// Insert payload for a [`StreakMilestone`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMilestone {
    pub user_id: DbId,
    pub relationship_id: Option<DbId>,
    pub milestone_type: String,
    pub threshold_days: i32,
    pub reward_kind: RewardKind,
    pub reward_value: String,
    pub reward_amount: i64,
    pub achieved_at: Timestamp,
}

impl NewMilestone {
    pub fn new(
        user_id: DbId,
        scope: MilestoneScope,
        reward: &MilestoneReward,
        achieved_at: Timestamp,
    ) -> Self {
        Self {
            user_id,
            relationship_id: scope.relationship_id(),
            milestone_type: milestone_type(scope, reward.threshold_days),
            threshold_days: reward.threshold_days,
            reward_kind: reward.reward_kind,
            reward_value: reward.reward_value.to_string(),
            reward_amount: reward.reward_amount,
            achieved_at,
        }
    }

    /// The badge recording this achievement, keyed like the milestone's own
    /// uniqueness constraint.
    pub fn badge(&self) -> RewardGrant {
        let key = match self.relationship_id {
            Some(id) => format!("badge:{id}:{}", self.milestone_type),
            None => format!("badge:{}", self.milestone_type),
        };
        RewardGrant::new(
            key,
            NewReward {
                user_id: self.user_id,
                kind: RewardKind::Badge,
                value: self.milestone_type.clone(),
                amount: 1,
                awarded_at: self.achieved_at,
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// The highest configured milestone at or below `streak_length` whose
/// threshold is not in `recorded`.
pub fn next_unrecorded(streak_length: i32, recorded: &[i32]) -> Option<&'static MilestoneReward> {
    MILESTONES
        .iter()
        .rev()
        .filter(|m| m.threshold_days <= streak_length)
        .find(|m| !recorded.contains(&m.threshold_days))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_are_ascending() {
        let thresholds: Vec<i32> = MILESTONES.iter().map(|m| m.threshold_days).collect();
        assert_eq!(thresholds, vec![3, 7, 14, 30, 60, 90, 180, 365]);
    }

    #[test]
    fn below_first_threshold_has_none() {
        assert!(next_unrecorded(2, &[]).is_none());
    }

    #[test]
    fn picks_highest_threshold_reached() {
        let m = next_unrecorded(8, &[]).unwrap();
        assert_eq!(m.threshold_days, 7);
        assert_eq!(m.reward_kind, RewardKind::Points);
        assert_eq!(m.reward_amount, 100);
    }

    #[test]
    fn skips_recorded_thresholds() {
        assert!(next_unrecorded(7, &[3, 7]).is_none());
        assert_eq!(next_unrecorded(7, &[7]).unwrap().threshold_days, 3);
        assert_eq!(next_unrecorded(15, &[3, 7]).unwrap().threshold_days, 14);
    }

    #[test]
    fn milestone_types_differ_by_scope() {
        assert_eq!(milestone_type(MilestoneScope::User, 7), "user_streak_7");
        assert_eq!(
            milestone_type(MilestoneScope::Relationship(4), 7),
            "relationship_streak_7"
        );
    }

    #[test]
    fn new_milestone_copies_reward() {
        let reward = next_unrecorded(14, &[]).unwrap();
        let m = NewMilestone::new(1, MilestoneScope::Relationship(3), reward, chrono::Utc::now());
        assert_eq!(m.relationship_id, Some(3));
        assert_eq!(m.reward_kind, RewardKind::Feature);
        assert_eq!(m.reward_value, FEATURE_STREAK_FREEZE);
    }

    #[test]
    fn badge_keys_follow_milestone_scope() {
        let reward = next_unrecorded(7, &[]).unwrap();
        let now = chrono::Utc::now();
        let user = NewMilestone::new(1, MilestoneScope::User, reward, now).badge();
        let rel = NewMilestone::new(1, MilestoneScope::Relationship(3), reward, now).badge();
        assert_eq!(user.grant_key, "badge:user_streak_7");
        assert_eq!(rel.grant_key, "badge:3:relationship_streak_7");
        assert_eq!(rel.reward.kind, RewardKind::Badge);
        assert_eq!(rel.reward.value, "relationship_streak_7");
    }
}
