//! Milestone rows.

use sqlx::FromRow;
use tether_core::types::{DbId, EventId, Timestamp};

/// A row from the `streak_milestones` table.
#[derive(Debug, Clone, FromRow)]
pub struct StreakMilestoneRow {
    pub id: DbId,
    pub user_id: DbId,
    pub relationship_id: Option<DbId>,
    pub milestone_type: String,
    pub threshold_days: i32,
    pub reward_kind: String,
    pub reward_value: String,
    pub reward_amount: i64,
    pub claimed: bool,
    pub achieved_at: Timestamp,
    pub claimed_at: Option<Timestamp>,
    /// Claim that flipped `claimed`; repeating it is not a second claim.
    pub claim_id: Option<EventId>,
    pub created_at: Timestamp,
}
