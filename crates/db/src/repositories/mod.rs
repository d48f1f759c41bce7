//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods that
//! accept any Postgres executor as the first argument, so the same query runs
//! against the pool or inside a transaction (`&mut *tx`).

pub mod milestone_repo;
pub mod recovery_item_repo;
pub mod relationship_streak_repo;
pub mod reward_repo;
pub mod streak_event_repo;
pub mod user_streak_repo;

pub use milestone_repo::MilestoneRepo;
pub use recovery_item_repo::RecoveryItemRepo;
pub use relationship_streak_repo::RelationshipStreakRepo;
pub use reward_repo::RewardRepo;
pub use streak_event_repo::StreakEventRepo;
pub use user_streak_repo::UserStreakRepo;
