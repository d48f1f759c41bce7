//! Reward and recovery-item entities.

use serde::{Deserialize, Serialize};

use crate::time::add_days;
use crate::types::{DbId, Timestamp};

/// Feature reward value that grants a streak freeze.
pub const FEATURE_STREAK_FREEZE: &str = "streak_freeze";

/// Feature reward value that grants a streak saver.
pub const FEATURE_STREAK_SAVER: &str = "streak_saver";

/// Days a streak saver stays usable after it is first granted.
pub const SAVER_EXPIRY_DAYS: i64 = 30;

// ---------------------------------------------------------------------------
// Rewards
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardKind {
    Points,
    Feature,
    Badge,
}

impl RewardKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RewardKind::Points => "points",
            RewardKind::Feature => "feature",
            RewardKind::Badge => "badge",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "points" => Some(RewardKind::Points),
            "feature" => Some(RewardKind::Feature),
            "badge" => Some(RewardKind::Badge),
            _ => None,
        }
    }
}

/// A reward awarded to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserReward {
    pub id: DbId,
    pub user_id: DbId,
    pub kind: RewardKind,
    /// `"points"`, a feature name such as [`FEATURE_STREAK_FREEZE`], or a
    /// badge name.
    pub value: String,
    pub amount: i64,
    pub awarded_at: Timestamp,
    pub redeemed: bool,
    pub redeemed_at: Option<Timestamp>,
}

/// Insert payload for a [`UserReward`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReward {
    pub user_id: DbId,
    pub kind: RewardKind,
    pub value: String,
    pub amount: i64,
    pub awarded_at: Timestamp,
}

/// What a reward changes besides its own row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardEffect {
    /// Badges and unrecognised features are recorded only.
    Record,
    /// Added to the user's point total; the store recomputes the level.
    Points(i64),
    /// Added to the user's stock of `kind`, creating the row if absent. An
    /// existing row keeps its `expires_at`.
    RecoveryItems {
        kind: RecoveryKind,
        quantity: i32,
        premium_only: bool,
        expires_at: Option<Timestamp>,
    },
}

/// A reward together with its effect, applied at most once per
/// `(user_id, grant_key)`.
///
/// Stores write the row and the effect in one transaction. Granting a key
/// that already exists returns the stored reward and changes nothing, so a
/// write retried after a lost response cannot pay twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardGrant {
    pub grant_key: String,
    pub reward: NewReward,
    pub effect: RewardEffect,
}

impl RewardGrant {
    /// Derive the effect from the reward: points add to the total,
    /// `streak_freeze` / `streak_saver` features add a recovery item (savers
    /// expiring), everything else is recorded only.
    pub fn new(grant_key: impl Into<String>, reward: NewReward) -> Self {
        let effect = match reward.kind {
            RewardKind::Points => RewardEffect::Points(reward.amount),
            RewardKind::Feature => match RecoveryKind::from_feature(&reward.value) {
                Some(kind) => RewardEffect::RecoveryItems {
                    kind,
                    quantity: i32::try_from(reward.amount).unwrap_or(i32::MAX),
                    premium_only: kind.is_premium(),
                    expires_at: kind
                        .expiry_days()
                        .map(|days| add_days(reward.awarded_at, days)),
                },
                None => RewardEffect::Record,
            },
            RewardKind::Badge => RewardEffect::Record,
        };
        Self {
            grant_key: grant_key.into(),
            reward,
            effect,
        }
    }

    pub fn user_id(&self) -> DbId {
        self.reward.user_id
    }
}

// ---------------------------------------------------------------------------
// Recovery items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryKind {
    Freeze,
    Saver,
}

impl RecoveryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryKind::Freeze => "FREEZE",
            RecoveryKind::Saver => "SAVER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FREEZE" => Some(RecoveryKind::Freeze),
            "SAVER" => Some(RecoveryKind::Saver),
            _ => None,
        }
    }

    /// The recovery item granted by a feature reward value, if any.
    pub fn from_feature(value: &str) -> Option<Self> {
        match value {
            FEATURE_STREAK_FREEZE => Some(RecoveryKind::Freeze),
            FEATURE_STREAK_SAVER => Some(RecoveryKind::Saver),
            _ => None,
        }
    }

    /// Savers are premium and expire; freezes are free and never expire.
    pub fn is_premium(self) -> bool {
        matches!(self, RecoveryKind::Saver)
    }

    pub fn expiry_days(self) -> Option<i64> {
        match self {
            RecoveryKind::Freeze => None,
            RecoveryKind::Saver => Some(SAVER_EXPIRY_DAYS),
        }
    }
}

/// Stock of one kind of consumable recovery item held by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRecoveryItem {
    pub id: DbId,
    pub user_id: DbId,
    pub kind: RecoveryKind,
    pub quantity: i32,
    pub premium_only: bool,
    pub expires_at: Option<Timestamp>,
}

impl StreakRecoveryItem {
    /// Whether at least one unit can be consumed at `now`.
    pub fn is_available(&self, now: Timestamp) -> bool {
        self.quantity > 0 && !self.is_expired(now)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn item(quantity: i32, expires_at: Option<Timestamp>) -> StreakRecoveryItem {
        StreakRecoveryItem {
            id: 1,
            user_id: 1,
            kind: RecoveryKind::Saver,
            quantity,
            premium_only: true,
            expires_at,
        }
    }

    #[test]
    fn feature_values_map_to_recovery_kinds() {
        assert_eq!(
            RecoveryKind::from_feature(FEATURE_STREAK_FREEZE),
            Some(RecoveryKind::Freeze)
        );
        assert_eq!(
            RecoveryKind::from_feature(FEATURE_STREAK_SAVER),
            Some(RecoveryKind::Saver)
        );
        assert_eq!(RecoveryKind::from_feature("dark_mode"), None);
    }

    #[test]
    fn empty_item_is_unavailable() {
        assert!(!item(0, None).is_available(Utc::now()));
    }

    #[test]
    fn expired_item_is_unavailable() {
        let now = Utc::now();
        assert!(!item(2, Some(now - Duration::hours(1))).is_available(now));
        assert!(item(2, Some(now + Duration::hours(1))).is_available(now));
    }

    fn reward(kind: RewardKind, value: &str, amount: i64) -> NewReward {
        NewReward {
            user_id: 1,
            kind,
            value: value.to_string(),
            amount,
            awarded_at: Utc::now(),
        }
    }

    #[test]
    fn points_grant_adds_points() {
        let grant = RewardGrant::new("claim:1", reward(RewardKind::Points, "points", 100));
        assert_eq!(grant.effect, RewardEffect::Points(100));
        assert_eq!(grant.user_id(), 1);
    }

    #[test]
    fn saver_grant_expires_after_thirty_days() {
        let saver = reward(RewardKind::Feature, FEATURE_STREAK_SAVER, 1);
        let awarded_at = saver.awarded_at;
        let grant = RewardGrant::new("claim:2", saver);
        assert_eq!(
            grant.effect,
            RewardEffect::RecoveryItems {
                kind: RecoveryKind::Saver,
                quantity: 1,
                premium_only: true,
                expires_at: Some(awarded_at + Duration::days(30)),
            }
        );
    }

    #[test]
    fn badges_and_unknown_features_are_recorded_only() {
        let badge = RewardGrant::new("badge:x", reward(RewardKind::Badge, "user_streak_7", 1));
        assert_eq!(badge.effect, RewardEffect::Record);
        let other = RewardGrant::new("claim:3", reward(RewardKind::Feature, "dark_mode", 1));
        assert_eq!(other.effect, RewardEffect::Record);
    }

    #[test]
    fn only_savers_expire() {
        assert_eq!(RecoveryKind::Freeze.expiry_days(), None);
        assert_eq!(RecoveryKind::Saver.expiry_days(), Some(30));
    }
}
