//! In-process notice bus backed by a `tokio::sync::broadcast` channel.
//!
//! The UI subscribes to [`EngineNotice`]s to celebrate milestones and to
//! surface sync failures. Share the bus via the engine; it is cheap to
//! subscribe any number of times.

use serde::{Deserialize, Serialize};
use tether_core::milestone::StreakMilestone;
use tether_core::types::{DbId, EventId};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// EngineNotice
// ---------------------------------------------------------------------------

/// Something the engine did that a subscriber may want to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineNotice {
    MilestoneAchieved {
        user_id: DbId,
        milestone: StreakMilestone,
    },
    /// An event could not reach the remote store and waits in the offline
    /// queue.
    EventQueued {
        user_id: DbId,
        event_id: EventId,
        queue_len: usize,
    },
    SyncCompleted {
        replayed: usize,
        failed: usize,
    },
    /// A queued event was dropped without being applied.
    SyncFailed {
        user_id: DbId,
        event_id: EventId,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// NoticeBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out bus for [`EngineNotice`]s.
///
/// When the buffer is full the oldest notices are dropped and slow
/// receivers observe `RecvError::Lagged`.
pub struct NoticeBus {
    sender: broadcast::Sender<EngineNotice>,
}

impl NoticeBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a notice to all current subscribers. Without subscribers the
    /// notice is dropped.
    pub fn publish(&self, notice: EngineNotice) {
        let _ = self.sender.send(notice);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotice> {
        self.sender.subscribe()
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_notices() {
        let bus = NoticeBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(EngineNotice::SyncCompleted {
            replayed: 3,
            failed: 1,
        });

        for rx in [&mut rx1, &mut rx2] {
            let notice = rx.recv().await.expect("subscriber should receive");
            assert_eq!(
                notice,
                EngineNotice::SyncCompleted {
                    replayed: 3,
                    failed: 1
                }
            );
        }
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = NoticeBus::default();
        bus.publish(EngineNotice::SyncCompleted {
            replayed: 0,
            failed: 0,
        });
    }

    #[test]
    fn notices_serialize_with_type_tag() {
        let json = serde_json::to_value(EngineNotice::SyncCompleted {
            replayed: 2,
            failed: 0,
        })
        .unwrap();
        assert_eq!(json["type"], "sync_completed");
        assert_eq!(json["replayed"], 2);
    }
}
