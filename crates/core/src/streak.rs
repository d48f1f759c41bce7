//! Streak entities: the user-level streak, per-relationship streaks, and the
//! append-only events that drive them.

use serde::{Deserialize, Serialize};

use crate::error::StreakError;
use crate::levels;
use crate::types::{DbId, EventId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Days after a due date during which a relationship streak is at risk but
/// not yet broken.
pub const GRACE_PERIOD_DAYS: i64 = 2;

/// Cadence assigned to a relationship that was never explicitly configured.
pub const DEFAULT_CONTACT_FREQUENCY_DAYS: i32 = 7;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Health of a relationship streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreakStatus {
    Active,
    AtRisk,
    Broken,
}

impl StreakStatus {
    /// Storage representation, matching the `relationship_streaks.status`
    /// check constraint.
    pub fn as_str(self) -> &'static str {
        match self {
            StreakStatus::Active => "ACTIVE",
            StreakStatus::AtRisk => "AT_RISK",
            StreakStatus::Broken => "BROKEN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(StreakStatus::Active),
            "AT_RISK" => Some(StreakStatus::AtRisk),
            "BROKEN" => Some(StreakStatus::Broken),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// What kind of interaction a streak event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    Call,
    Meeting,
    Other,
    /// Opening the app; advances only the user-level streak.
    CheckIn,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Call => "call",
            EventKind::Meeting => "meeting",
            EventKind::Other => "other",
            EventKind::CheckIn => "check_in",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "message" => Some(EventKind::Message),
            "call" => Some(EventKind::Call),
            "meeting" => Some(EventKind::Meeting),
            "other" => Some(EventKind::Other),
            "check_in" => Some(EventKind::CheckIn),
            _ => None,
        }
    }

    /// Whether this kind counts as contact with a relationship.
    pub fn is_contact(self) -> bool {
        !matches!(self, EventKind::CheckIn)
    }
}

// ---------------------------------------------------------------------------
// UserStreak
// ---------------------------------------------------------------------------

/// App-activity streak for a single user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStreak {
    pub user_id: DbId,
    pub current_streak_days: i32,
    pub longest_streak_days: i32,
    pub multiplier: f64,
    pub total_points: i64,
    pub level: i32,
    pub points_to_next_level: i64,
    pub last_activity_date: Option<Timestamp>,
    /// Optimistic-concurrency version; `0` means the row does not exist yet.
    pub version: i64,
}

impl UserStreak {
    /// A fresh streak for a user with no recorded activity.
    pub fn new(user_id: DbId) -> Self {
        let progress = levels::level_for_points(0);
        Self {
            user_id,
            current_streak_days: 0,
            longest_streak_days: 0,
            multiplier: 1.0,
            total_points: 0,
            level: progress.level,
            points_to_next_level: progress.points_to_next_level,
            last_activity_date: None,
            version: 0,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }
}

// ---------------------------------------------------------------------------
// RelationshipStreak
// ---------------------------------------------------------------------------

/// Contact streak between a user and one of their tracked relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipStreak {
    pub user_id: DbId,
    pub relationship_id: DbId,
    pub current_streak: i32,
    pub longest_streak: i32,
    pub last_contact_date: Option<Timestamp>,
    pub next_contact_due_date: Option<Timestamp>,
    pub grace_period_ends: Option<Timestamp>,
    pub status: StreakStatus,
    pub contact_frequency_days: i32,
    /// Optimistic-concurrency version; `0` means the row does not exist yet.
    pub version: i64,
}

impl RelationshipStreak {
    /// A fresh streak with no recorded contact.
    ///
    /// Rejects a non-positive cadence with [`StreakError::InvalidState`].
    pub fn new(
        user_id: DbId,
        relationship_id: DbId,
        contact_frequency_days: i32,
    ) -> Result<Self, StreakError> {
        validate_frequency(contact_frequency_days)?;
        Ok(Self {
            user_id,
            relationship_id,
            current_streak: 0,
            longest_streak: 0,
            last_contact_date: None,
            next_contact_due_date: None,
            grace_period_ends: None,
            status: StreakStatus::Active,
            contact_frequency_days,
            version: 0,
        })
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }
}

/// Validate a contact cadence before it is written anywhere.
pub fn validate_frequency(contact_frequency_days: i32) -> Result<(), StreakError> {
    if contact_frequency_days > 0 {
        Ok(())
    } else {
        Err(StreakError::InvalidState(format!(
            "contact frequency must be positive, got {contact_frequency_days}"
        )))
    }
}

// ---------------------------------------------------------------------------
// StreakEvent
// ---------------------------------------------------------------------------

/// An immutable, append-only record of a streak-affecting action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakEvent {
    pub event_id: EventId,
    pub user_id: DbId,
    pub relationship_id: Option<DbId>,
    pub kind: EventKind,
    pub occurred_at: Timestamp,
    pub points_earned: i64,
}
