//! Tether streak engine.
//!
//! Orchestrates the pure rules in `tether-core` against a remote store and a
//! local cache:
//!
//! - [`StreakEngine`]: records activity and contact, sweeps streaks,
//!   claims milestones, spends recovery items and reports stats.
//! - [`OfflineEventQueue`]: persisted FIFO of operations recorded while the
//!   remote store is unreachable, replayed on reconnect.
//! - [`MilestoneEvaluator`] and [`RewardLedger`]: idempotent milestone
//!   recording and reward issuance.
//! - [`NoticeBus`]: in-process publish/subscribe for UI-facing notices.
//! - [`tasks`]: the reconnect sync loop and the daily sweep loop.

pub mod bus;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod ledger;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod milestone;
pub mod notifications;
pub mod queue;
pub mod remote;
pub mod tasks;

pub use bus::{EngineNotice, NoticeBus};
pub use cache::{FileCache, LocalCache, MemoryCache};
pub use config::EngineConfig;
pub use connectivity::ConnectivityState;
pub use engine::{Projection, StreakEngine};
pub use ledger::RewardLedger;
#[cfg(any(test, feature = "test-support"))]
pub use memory::InMemoryRemoteStore;
pub use milestone::MilestoneEvaluator;
pub use notifications::NotificationDispatcher;
pub use queue::OfflineEventQueue;
