//! Reward and recovery item rows.

use sqlx::FromRow;
use tether_core::types::{DbId, Timestamp};

/// A row from the `user_rewards` table.
#[derive(Debug, Clone, FromRow)]
pub struct UserRewardRow {
    pub id: DbId,
    pub user_id: DbId,
    pub kind: String,
    pub value: String,
    pub amount: i64,
    pub awarded_at: Timestamp,
    pub redeemed: bool,
    pub redeemed_at: Option<Timestamp>,
    pub grant_key: String,
}

/// A row from the `streak_recovery_items` table.
#[derive(Debug, Clone, FromRow)]
pub struct RecoveryItemRow {
    pub id: DbId,
    pub user_id: DbId,
    pub kind: String,
    pub quantity: i32,
    pub premium_only: bool,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
