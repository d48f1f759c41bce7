//! Remote store client: every call bounded by a timeout and retried under one
//! policy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tether_core::retry::{retry, RetryPolicy};
use tether_core::store::{RemoteStore, StoreError};

/// Wraps a [`RemoteStore`] with a per-call timeout and a retry policy.
///
/// Only transport failures (`Unreachable`, `Timeout`) are retried here.
/// Version conflicts go back to the engine, which reloads and re-applies.
///
/// A timeout does not mean the store did nothing: the write may have
/// committed and only the response been lost. Writes passed to [`run`]
/// must therefore be keyed or version-conditional (see
/// [`RemoteStore`]), never bare increments.
///
/// [`run`]: RemoteClient::run
pub struct RemoteClient {
    store: Arc<dyn RemoteStore>,
    timeout: Duration,
    policy: RetryPolicy,
}

impl RemoteClient {
    pub fn new(store: Arc<dyn RemoteStore>, timeout: Duration, policy: RetryPolicy) -> Self {
        Self {
            store,
            timeout,
            policy,
        }
    }

    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }

    /// Run `op` with the client's timeout, retrying transport failures.
    ///
    /// `op` is called once per attempt and must build a fresh future each
    /// time, e.g. `client.run(|| client.store().load_user_streak(id))`.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.timeout;
        retry(&self.policy, is_transport_failure, || {
            let call = op();
            async move {
                tokio::time::timeout(timeout, call)
                    .await
                    .unwrap_or(Err(StoreError::Timeout))
            }
        })
        .await
        .map_err(|failure| {
            if failure.attempts > 1 {
                tracing::debug!(
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Remote call failed after retries",
                );
            }
            failure.error
        })
    }
}

fn is_transport_failure(err: &StoreError) -> bool {
    matches!(err, StoreError::Unreachable(_) | StoreError::Timeout)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use assert_matches::assert_matches;
    use chrono::Utc;
    use tether_core::store::EventCommit;
    use tether_core::streak::{EventKind, StreakEvent, UserStreak};
    use tether_core::types::new_event_id;

    use super::*;
    use crate::memory::{InMemoryRemoteStore, WriteOp};

    fn client(store: Arc<InMemoryRemoteStore>, attempts: u32) -> RemoteClient {
        RemoteClient::new(
            store,
            Duration::from_millis(50),
            RetryPolicy {
                max_attempts: attempts,
                initial_delay: Duration::from_millis(1),
                jitter: 0.0,
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let store = Arc::new(InMemoryRemoteStore::new());
        store.set_latency(Duration::from_secs(1));
        let client = client(store, 1);

        let result = client.run(|| client.store().load_user_streak(1)).await;
        assert_matches!(result, Err(StoreError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried() {
        let store = Arc::new(InMemoryRemoteStore::new());
        store.fail_next(1);
        let client = client(store, 2);

        let result = client.run(|| client.store().load_user_streak(1)).await;
        assert_matches!(result, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn write_retried_after_lost_response_is_not_reapplied() {
        let store = Arc::new(InMemoryRemoteStore::new());
        store.lose_next_response(WriteOp::CommitEvent).await;
        let client = client(store.clone(), 2);

        let commit = EventCommit {
            event: StreakEvent {
                event_id: new_event_id(),
                user_id: 1,
                relationship_id: None,
                kind: EventKind::CheckIn,
                occurred_at: Utc::now(),
                points_earned: 10,
            },
            user: UserStreak::new(1),
            relationship: None,
        };
        let result = client.run(|| client.store().commit_event(&commit)).await;

        assert_matches!(result, Err(StoreError::Duplicate));
        assert_eq!(store.events().await.len(), 1);
        let user = store.load_user_streak(1).await.unwrap().unwrap();
        assert_eq!(user.total_points, 10);
    }

    #[tokio::test]
    async fn conflicts_are_not_retried() {
        let store = Arc::new(InMemoryRemoteStore::new());
        let client = client(store, 3);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = client
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(StoreError::Conflict) }
            })
            .await;

        assert_matches!(result, Err(StoreError::Conflict));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
