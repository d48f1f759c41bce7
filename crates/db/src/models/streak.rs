//! Streak and event rows.

use sqlx::FromRow;
use tether_core::types::{DbId, EventId, Timestamp};

/// A row from the `user_streaks` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserStreakRow {
    pub id: DbId,
    pub user_id: DbId,
    pub current_streak_days: i32,
    pub longest_streak_days: i32,
    pub multiplier: f64,
    pub total_points: i64,
    pub level: i32,
    pub points_to_next_level: i64,
    pub last_activity_date: Option<Timestamp>,
    pub version: i64,
    pub archived_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `relationship_streaks` table.
#[derive(Debug, Clone, FromRow)]
pub struct RelationshipStreakRow {
    pub id: DbId,
    pub user_id: DbId,
    pub relationship_id: DbId,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_contact_date: Option<Timestamp>,
    pub next_contact_due_date: Option<Timestamp>,
    pub grace_period_ends: Option<Timestamp>,
    pub status: String,
    pub contact_frequency_days: i32,
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `streak_events` table.
#[derive(Debug, Clone, FromRow)]
pub struct StreakEventRow {
    pub id: DbId,
    pub event_id: EventId,
    pub user_id: DbId,
    pub relationship_id: Option<DbId>,
    pub kind: String,
    pub occurred_at: Timestamp,
    pub points_earned: i64,
    pub created_at: Timestamp,
}
