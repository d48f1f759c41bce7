//! Interfaces to services the streak engine consumes but does not own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::notification::NotificationRequest;
use crate::types::DbId;

/// Resolves relationship ids to display names for notification text.
#[async_trait]
pub trait RelationshipDirectory: Send + Sync {
    async fn display_name(&self, relationship_id: DbId) -> Option<String>;
}

/// Opaque handle returned by the delivery service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryHandle(pub String);

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Notification delivery unavailable: {0}")]
    Unavailable(String),

    #[error("Notification rejected: {0}")]
    Rejected(String),
}

/// Schedules rendered notifications on the device or push service.
#[async_trait]
pub trait NotificationDelivery: Send + Sync {
    async fn schedule(&self, request: &NotificationRequest)
        -> Result<DeliveryHandle, DeliveryError>;
}

/// Reports network reachability.
///
/// `subscribe` yields a receiver whose value flips to `true` on reconnect.
pub trait ConnectivitySignal: Send + Sync {
    fn is_online(&self) -> bool;

    fn subscribe(&self) -> watch::Receiver<bool>;
}
