/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Client-generated identifier for a streak event (UUIDv7, time-ordered).
pub type EventId = uuid::Uuid;

/// Generate a fresh, time-ordered event identifier.
pub fn new_event_id() -> EventId {
    uuid::Uuid::now_v7()
}
