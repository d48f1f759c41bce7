//! Domain model and pure rules for relationship streaks.
//!
//! This crate has no internal dependencies and performs no I/O of its own:
//! - [`streak`], [`reward`], [`milestone`]: the entities
//! - [`calculator`]: streak state transitions and point rules
//! - [`levels`]: the point-driven level curve
//! - [`notification`]: which notifications to request and when
//! - [`store`], [`collaborators`]: traits for the services around the engine
//! - [`retry`]: the shared backoff policy

pub mod calculator;
pub mod collaborators;
pub mod error;
pub mod levels;
pub mod milestone;
pub mod notification;
pub mod retry;
pub mod reward;
pub mod store;
pub mod streak;
pub mod time;
pub mod types;
