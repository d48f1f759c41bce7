//! Translation between storage rows and domain entities.
//!
//! This is the only place that knows how enum columns are spelled and which
//! bookkeeping columns (`id`, `created_at`, `archived_at`, ...) the domain
//! ignores. A row that does not translate is reported as
//! [`MappingError`] rather than silently defaulted.

use tether_core::milestone::StreakMilestone;
use tether_core::reward::{RecoveryKind, RewardKind, StreakRecoveryItem, UserReward};
use tether_core::store::StoreError;
use tether_core::streak::{
    EventKind, RelationshipStreak, StreakEvent, StreakStatus, UserStreak,
};

use crate::models::milestone::StreakMilestoneRow;
use crate::models::reward::{RecoveryItemRow, UserRewardRow};
use crate::models::streak::{RelationshipStreakRow, StreakEventRow, UserStreakRow};

/// A stored value the domain does not recognise.
#[derive(Debug, thiserror::Error)]
#[error("Unrecognised {column} value '{value}' in {table}")]
pub struct MappingError {
    pub table: &'static str,
    pub column: &'static str,
    pub value: String,
}

impl MappingError {
    fn new(table: &'static str, column: &'static str, value: &str) -> Self {
        Self {
            table,
            column,
            value: value.to_string(),
        }
    }
}

impl From<MappingError> for StoreError {
    fn from(err: MappingError) -> Self {
        StoreError::Rejected(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Streaks
// ---------------------------------------------------------------------------

impl From<UserStreakRow> for UserStreak {
    fn from(row: UserStreakRow) -> Self {
        UserStreak {
            user_id: row.user_id,
            current_streak_days: row.current_streak_days,
            longest_streak_days: row.longest_streak_days,
            multiplier: row.multiplier,
            total_points: row.total_points,
            level: row.level,
            points_to_next_level: row.points_to_next_level,
            last_activity_date: row.last_activity_date,
            version: row.version,
        }
    }
}

impl TryFrom<RelationshipStreakRow> for RelationshipStreak {
    type Error = MappingError;

    fn try_from(row: RelationshipStreakRow) -> Result<Self, Self::Error> {
        let status = StreakStatus::parse(&row.status)
            .ok_or_else(|| MappingError::new("relationship_streaks", "status", &row.status))?;
        Ok(RelationshipStreak {
            user_id: row.user_id,
            relationship_id: row.relationship_id,
            current_streak: row.current_streak,
            longest_streak: row.longest_streak,
            last_contact_date: row.last_contact_date,
            next_contact_due_date: row.next_contact_due_date,
            grace_period_ends: row.grace_period_ends,
            status,
            contact_frequency_days: row.contact_frequency_days,
            version: row.version,
        })
    }
}

impl TryFrom<StreakEventRow> for StreakEvent {
    type Error = MappingError;

    fn try_from(row: StreakEventRow) -> Result<Self, Self::Error> {
        let kind = EventKind::parse(&row.kind)
            .ok_or_else(|| MappingError::new("streak_events", "kind", &row.kind))?;
        Ok(StreakEvent {
            event_id: row.event_id,
            user_id: row.user_id,
            relationship_id: row.relationship_id,
            kind,
            occurred_at: row.occurred_at,
            points_earned: row.points_earned,
        })
    }
}

// ---------------------------------------------------------------------------
// Milestones and rewards
// ---------------------------------------------------------------------------

impl TryFrom<StreakMilestoneRow> for StreakMilestone {
    type Error = MappingError;

    fn try_from(row: StreakMilestoneRow) -> Result<Self, Self::Error> {
        let reward_kind = RewardKind::parse(&row.reward_kind).ok_or_else(|| {
            MappingError::new("streak_milestones", "reward_kind", &row.reward_kind)
        })?;
        Ok(StreakMilestone {
            id: row.id,
            user_id: row.user_id,
            relationship_id: row.relationship_id,
            milestone_type: row.milestone_type,
            threshold_days: row.threshold_days,
            reward_kind,
            reward_value: row.reward_value,
            reward_amount: row.reward_amount,
            claimed: row.claimed,
            achieved_at: row.achieved_at,
            claimed_at: row.claimed_at,
        })
    }
}

impl TryFrom<UserRewardRow> for UserReward {
    type Error = MappingError;

    fn try_from(row: UserRewardRow) -> Result<Self, Self::Error> {
        let kind = RewardKind::parse(&row.kind)
            .ok_or_else(|| MappingError::new("user_rewards", "kind", &row.kind))?;
        Ok(UserReward {
            id: row.id,
            user_id: row.user_id,
            kind,
            value: row.value,
            amount: row.amount,
            awarded_at: row.awarded_at,
            redeemed: row.redeemed,
            redeemed_at: row.redeemed_at,
        })
    }
}

impl TryFrom<RecoveryItemRow> for StreakRecoveryItem {
    type Error = MappingError;

    fn try_from(row: RecoveryItemRow) -> Result<Self, Self::Error> {
        let kind = RecoveryKind::parse(&row.kind)
            .ok_or_else(|| MappingError::new("streak_recovery_items", "kind", &row.kind))?;
        Ok(StreakRecoveryItem {
            id: row.id,
            user_id: row.user_id,
            kind,
            quantity: row.quantity,
            premium_only: row.premium_only,
            expires_at: row.expires_at,
        })
    }
}

/// Translate a list of rows, failing on the first unrecognised one.
pub fn map_rows<R, T>(rows: Vec<R>) -> Result<Vec<T>, MappingError>
where
    T: TryFrom<R, Error = MappingError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Classify a sqlx error for the engine.
///
/// - Unique violations (SQLSTATE `23505`) become [`StoreError::Duplicate`].
/// - Serialization failures (`40001`) become [`StoreError::Conflict`].
/// - Connection-level failures become [`StoreError::Unreachable`].
pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23505") => StoreError::Duplicate,
            Some("40001") => StoreError::Conflict,
            _ => StoreError::Rejected(db_err.to_string()),
        },
        sqlx::Error::Io(e) => StoreError::Unreachable(e.to_string()),
        sqlx::Error::Tls(e) => StoreError::Unreachable(e.to_string()),
        sqlx::Error::PoolTimedOut => StoreError::Unreachable("connection pool timed out".into()),
        sqlx::Error::PoolClosed => StoreError::Unreachable("connection pool closed".into()),
        other => StoreError::Rejected(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;

    use super::*;

    fn relationship_row(status: &str) -> RelationshipStreakRow {
        let now = Utc::now();
        RelationshipStreakRow {
            id: 1,
            user_id: 2,
            relationship_id: 3,
            current_streak: 4,
            longest_streak: 6,
            last_contact_date: Some(now),
            next_contact_due_date: None,
            grace_period_ends: None,
            status: status.to_string(),
            contact_frequency_days: 7,
            version: 5,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn relationship_row_maps_status() {
        let streak = RelationshipStreak::try_from(relationship_row("AT_RISK")).unwrap();
        assert_eq!(streak.status, StreakStatus::AtRisk);
        assert_eq!(streak.relationship_id, 3);
        assert_eq!(streak.version, 5);
    }

    #[test]
    fn unknown_status_is_a_mapping_error() {
        let err = RelationshipStreak::try_from(relationship_row("PAUSED")).unwrap_err();
        assert_eq!(err.column, "status");
        assert_matches!(StoreError::from(err), StoreError::Rejected(_));
    }

    #[test]
    fn map_rows_stops_at_first_bad_row() {
        let rows = vec![relationship_row("ACTIVE"), relationship_row("nope")];
        let result: Result<Vec<RelationshipStreak>, _> = map_rows(rows);
        assert!(result.is_err());
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert_eq!(map_sqlx_error(sqlx::Error::RowNotFound), StoreError::NotFound);
    }

    #[test]
    fn pool_timeout_is_unreachable() {
        assert_matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            StoreError::Unreachable(_)
        );
    }
}
