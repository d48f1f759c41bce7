//! In-memory [`RemoteStore`] for tests, built with the `test-support` feature.
//!
//! Enforces the same constraints as the Postgres schema: unique event ids,
//! unique milestones per streak and type, unique grant keys, claim ids and
//! recovery use ids, version-checked updates and non-negative recovery stock.
//! Reachability, latency, transient failures and lost write responses can be
//! injected to exercise the engine's offline and retry paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tether_core::levels;
use tether_core::milestone::{NewMilestone, StreakMilestone};
use tether_core::reward::{RecoveryKind, RewardEffect, RewardGrant, StreakRecoveryItem, UserReward};
use tether_core::store::{
    ClaimResult, CommittedEvent, EventCommit, MilestoneClaim, RecoverySpend, RemoteStore,
    SpendResult, StoreError,
};
use tether_core::streak::{RelationshipStreak, StreakEvent, UserStreak};
use tether_core::types::{DbId, EventId, Timestamp};
use tokio::sync::Mutex;

/// Store writes that faults can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    CommitEvent,
    SaveRelationshipStreak,
    RecordMilestone,
    ClaimMilestone,
    GrantReward,
    MarkRewardRedeemed,
    SpendRecoveryItem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteFault {
    /// Fail with `Unreachable` before writing anything.
    Refuse,
    /// Write, then answer with `Timeout` as if the response was lost.
    LoseResponse,
}

#[derive(Default)]
struct State {
    next_id: DbId,
    users: HashMap<DbId, UserStreak>,
    relationships: HashMap<(DbId, DbId), RelationshipStreak>,
    events: Vec<StreakEvent>,
    milestones: Vec<StreakMilestone>,
    claim_ids: HashMap<DbId, EventId>,
    rewards: Vec<UserReward>,
    grant_keys: HashMap<(DbId, String), DbId>,
    recovery_items: Vec<StreakRecoveryItem>,
    recovery_uses: HashSet<EventId>,
    faults: Vec<(WriteOp, WriteFault)>,
}

impl State {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn take_fault(&mut self, op: WriteOp, fault: WriteFault) -> bool {
        match self.faults.iter().position(|f| *f == (op, fault)) {
            Some(pos) => {
                self.faults.remove(pos);
                true
            }
            None => false,
        }
    }

    fn refuse(&mut self, op: WriteOp) -> Result<(), StoreError> {
        if self.take_fault(op, WriteFault::Refuse) {
            return Err(StoreError::Unreachable(format!("injected {op:?} failure")));
        }
        Ok(())
    }

    /// Answer a completed write, unless its response is due to be lost.
    fn respond<T>(&mut self, op: WriteOp, value: T) -> Result<T, StoreError> {
        if self.take_fault(op, WriteFault::LoseResponse) {
            return Err(StoreError::Timeout);
        }
        Ok(value)
    }

    fn add_points(&mut self, user_id: DbId, delta: i64) -> UserStreak {
        let user = self
            .users
            .entry(user_id)
            .or_insert_with(|| UserStreak {
                version: 1,
                ..UserStreak::new(user_id)
            });
        user.total_points += delta;
        let progress = levels::level_for_points(user.total_points);
        user.level = progress.level;
        user.points_to_next_level = progress.points_to_next_level;
        user.clone()
    }

    fn add_recovery_items(
        &mut self,
        user_id: DbId,
        kind: RecoveryKind,
        quantity: i32,
        premium_only: bool,
        expires_at: Option<Timestamp>,
    ) -> StreakRecoveryItem {
        if let Some(item) = self
            .recovery_items
            .iter_mut()
            .find(|i| i.user_id == user_id && i.kind == kind)
        {
            item.quantity += quantity;
            return item.clone();
        }
        let item = StreakRecoveryItem {
            id: self.next_id(),
            user_id,
            kind,
            quantity,
            premium_only,
            expires_at,
        };
        self.recovery_items.push(item.clone());
        item
    }

    /// Record `grant` and apply its effect, or return the reward already
    /// stored under its key.
    fn grant(&mut self, grant: &RewardGrant) -> UserReward {
        let key = (grant.user_id(), grant.grant_key.clone());
        if let Some(existing) = self
            .grant_keys
            .get(&key)
            .and_then(|id| self.rewards.iter().find(|r| r.id == *id))
        {
            return existing.clone();
        }

        let reward = UserReward {
            id: self.next_id(),
            user_id: grant.reward.user_id,
            kind: grant.reward.kind,
            value: grant.reward.value.clone(),
            amount: grant.reward.amount,
            awarded_at: grant.reward.awarded_at,
            redeemed: false,
            redeemed_at: None,
        };
        self.rewards.push(reward.clone());
        self.grant_keys.insert(key, reward.id);

        match &grant.effect {
            RewardEffect::Record => {}
            RewardEffect::Points(delta) => {
                self.add_points(reward.user_id, *delta);
            }
            RewardEffect::RecoveryItems {
                kind,
                quantity,
                premium_only,
                expires_at,
            } => {
                self.add_recovery_items(reward.user_id, *kind, *quantity, *premium_only, *expires_at);
            }
        }
        reward
    }
}

/// Write the streak fields of `incoming` over `stored`, keeping stored points
/// and level, or fail if the versions disagree.
fn checked_user_write(
    stored: Option<&UserStreak>,
    incoming: &UserStreak,
) -> Result<UserStreak, StoreError> {
    match stored {
        None if !incoming.is_persisted() => Ok(UserStreak {
            total_points: 0,
            level: 1,
            points_to_next_level: levels::next_level_cost(1),
            version: 1,
            ..incoming.clone()
        }),
        Some(current) if incoming.is_persisted() && current.version == incoming.version => {
            Ok(UserStreak {
                total_points: current.total_points,
                level: current.level,
                points_to_next_level: current.points_to_next_level,
                version: current.version + 1,
                ..incoming.clone()
            })
        }
        _ => Err(StoreError::Conflict),
    }
}

fn checked_relationship_write(
    stored: Option<&RelationshipStreak>,
    incoming: &RelationshipStreak,
) -> Result<RelationshipStreak, StoreError> {
    match stored {
        None if !incoming.is_persisted() => Ok(RelationshipStreak {
            version: 1,
            ..incoming.clone()
        }),
        Some(current) if incoming.is_persisted() && current.version == incoming.version => {
            Ok(RelationshipStreak {
                version: current.version + 1,
                ..incoming.clone()
            })
        }
        _ => Err(StoreError::Conflict),
    }
}

pub struct InMemoryRemoteStore {
    state: Mutex<State>,
    online: AtomicBool,
    fail_next: AtomicUsize,
    latency_ms: AtomicU64,
    calls: AtomicUsize,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            online: AtomicBool::new(true),
            fail_next: AtomicUsize::new(0),
            latency_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- fault injection ---------------------------------------------------

    /// While offline every call fails with [`StoreError::Unreachable`].
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Fail the next `count` calls with [`StoreError::Unreachable`].
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `latency` before answering.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Fail the next `op` with [`StoreError::Unreachable`] without writing.
    pub async fn refuse_next(&self, op: WriteOp) {
        self.state.lock().await.faults.push((op, WriteFault::Refuse));
    }

    /// Apply the next `op`, then answer [`StoreError::Timeout`] as though the
    /// response never arrived.
    pub async fn lose_next_response(&self, op: WriteOp) {
        self.state
            .lock()
            .await
            .faults
            .push((op, WriteFault::LoseResponse));
    }

    /// Number of calls received, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("remote store offline".into()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unreachable("injected failure".into()));
        }
        Ok(())
    }

    // -- seeding and inspection --------------------------------------------

    /// Store a streak as-is, bypassing version checks.
    pub async fn seed_user_streak(&self, streak: UserStreak) {
        let mut state = self.state.lock().await;
        let version = streak.version.max(1);
        state.users.insert(streak.user_id, UserStreak { version, ..streak });
    }

    /// Store a relationship streak as-is, bypassing version checks.
    pub async fn seed_relationship_streak(&self, streak: RelationshipStreak) {
        let mut state = self.state.lock().await;
        let version = streak.version.max(1);
        state.relationships.insert(
            (streak.user_id, streak.relationship_id),
            RelationshipStreak { version, ..streak },
        );
    }

    /// Add recovery stock directly, without a reward row.
    pub async fn seed_recovery_items(
        &self,
        user_id: DbId,
        kind: RecoveryKind,
        quantity: i32,
        premium_only: bool,
        expires_at: Option<Timestamp>,
    ) -> StreakRecoveryItem {
        self.state
            .lock()
            .await
            .add_recovery_items(user_id, kind, quantity, premium_only, expires_at)
    }

    pub async fn events(&self) -> Vec<StreakEvent> {
        self.state.lock().await.events.clone()
    }

    pub async fn milestones(&self) -> Vec<StreakMilestone> {
        self.state.lock().await.milestones.clone()
    }

    pub async fn rewards(&self) -> Vec<UserReward> {
        self.state.lock().await.rewards.clone()
    }

    pub async fn recovery_items(&self) -> Vec<StreakRecoveryItem> {
        self.state.lock().await.recovery_items.clone()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn load_user_streak(&self, user_id: DbId) -> Result<Option<UserStreak>, StoreError> {
        self.gate().await?;
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn load_relationship_streak(
        &self,
        user_id: DbId,
        relationship_id: DbId,
    ) -> Result<Option<RelationshipStreak>, StoreError> {
        self.gate().await?;
        let state = self.state.lock().await;
        Ok(state.relationships.get(&(user_id, relationship_id)).cloned())
    }

    async fn list_relationship_streaks(
        &self,
        user_id: DbId,
    ) -> Result<Vec<RelationshipStreak>, StoreError> {
        self.gate().await?;
        let state = self.state.lock().await;
        let mut streaks: Vec<_> = state
            .relationships
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        streaks.sort_by_key(|s| s.relationship_id);
        Ok(streaks)
    }

    async fn save_relationship_streak(
        &self,
        streak: &RelationshipStreak,
    ) -> Result<RelationshipStreak, StoreError> {
        self.gate().await?;
        let mut state = self.state.lock().await;
        state.refuse(WriteOp::SaveRelationshipStreak)?;
        let key = (streak.user_id, streak.relationship_id);
        let written = checked_relationship_write(state.relationships.get(&key), streak)?;
        state.relationships.insert(key, written.clone());
        state.respond(WriteOp::SaveRelationshipStreak, written)
    }

    async fn commit_event(&self, commit: &EventCommit) -> Result<CommittedEvent, StoreError> {
        self.gate().await?;
        let mut state = self.state.lock().await;
        state.refuse(WriteOp::CommitEvent)?;

        if state
            .events
            .iter()
            .any(|e| e.event_id == commit.event.event_id)
        {
            return Err(StoreError::Duplicate);
        }

        // Validate everything before writing anything.
        let user = checked_user_write(state.users.get(&commit.user.user_id), &commit.user)?;
        let relationship = match &commit.relationship {
            Some(incoming) => {
                let key = (incoming.user_id, incoming.relationship_id);
                Some(checked_relationship_write(
                    state.relationships.get(&key),
                    incoming,
                )?)
            }
            None => None,
        };

        state.events.push(commit.event.clone());
        state.users.insert(user.user_id, user);
        if let Some(rel) = &relationship {
            state
                .relationships
                .insert((rel.user_id, rel.relationship_id), rel.clone());
        }
        let user = state.add_points(commit.event.user_id, commit.event.points_earned);

        state.respond(WriteOp::CommitEvent, CommittedEvent { user, relationship })
    }

    async fn list_users_with_relationships(&self) -> Result<Vec<DbId>, StoreError> {
        self.gate().await?;
        let state = self.state.lock().await;
        let mut users: Vec<DbId> = state.relationships.keys().map(|(user, _)| *user).collect();
        users.sort_unstable();
        users.dedup();
        Ok(users)
    }

    async fn list_events(
        &self,
        user_id: DbId,
        relationship_id: Option<DbId>,
    ) -> Result<Vec<StreakEvent>, StoreError> {
        self.gate().await?;
        let state = self.state.lock().await;
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .filter(|e| relationship_id.is_none() || e.relationship_id == relationship_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }

    async fn list_milestones(
        &self,
        user_id: DbId,
        relationship_id: Option<DbId>,
    ) -> Result<Vec<StreakMilestone>, StoreError> {
        self.gate().await?;
        let state = self.state.lock().await;
        Ok(state
            .milestones
            .iter()
            .filter(|m| m.user_id == user_id && m.relationship_id == relationship_id)
            .cloned()
            .collect())
    }

    async fn list_unclaimed_milestones(
        &self,
        user_id: DbId,
    ) -> Result<Vec<StreakMilestone>, StoreError> {
        self.gate().await?;
        let state = self.state.lock().await;
        Ok(state
            .milestones
            .iter()
            .filter(|m| m.user_id == user_id && !m.claimed)
            .cloned()
            .collect())
    }

    async fn get_milestone(
        &self,
        user_id: DbId,
        milestone_id: DbId,
    ) -> Result<Option<StreakMilestone>, StoreError> {
        self.gate().await?;
        let state = self.state.lock().await;
        Ok(state
            .milestones
            .iter()
            .find(|m| m.id == milestone_id && m.user_id == user_id)
            .cloned())
    }

    async fn record_milestone(
        &self,
        milestone: &NewMilestone,
        badge: &RewardGrant,
    ) -> Result<StreakMilestone, StoreError> {
        self.gate().await?;
        let mut state = self.state.lock().await;
        state.refuse(WriteOp::RecordMilestone)?;
        let exists = state.milestones.iter().any(|m| {
            m.user_id == milestone.user_id
                && m.relationship_id == milestone.relationship_id
                && m.milestone_type == milestone.milestone_type
        });
        if exists {
            return Err(StoreError::Duplicate);
        }
        let stored = StreakMilestone {
            id: state.next_id(),
            user_id: milestone.user_id,
            relationship_id: milestone.relationship_id,
            milestone_type: milestone.milestone_type.clone(),
            threshold_days: milestone.threshold_days,
            reward_kind: milestone.reward_kind,
            reward_value: milestone.reward_value.clone(),
            reward_amount: milestone.reward_amount,
            claimed: false,
            achieved_at: milestone.achieved_at,
            claimed_at: None,
        };
        state.milestones.push(stored.clone());
        state.grant(badge);
        state.respond(WriteOp::RecordMilestone, stored)
    }

    async fn claim_milestone(&self, claim: &MilestoneClaim) -> Result<ClaimResult, StoreError> {
        self.gate().await?;
        let mut state = self.state.lock().await;
        state.refuse(WriteOp::ClaimMilestone)?;

        let index = state
            .milestones
            .iter()
            .position(|m| m.id == claim.milestone_id && m.user_id == claim.user_id)
            .ok_or(StoreError::NotFound)?;
        if state.milestones[index].claimed {
            if state.claim_ids.get(&claim.milestone_id) != Some(&claim.claim_id) {
                return Ok(ClaimResult::AlreadyClaimed);
            }
        } else {
            state.milestones[index].claimed = true;
            state.milestones[index].claimed_at = Some(claim.claimed_at);
        }
        let milestone = state.milestones[index].clone();

        state.claim_ids.insert(claim.milestone_id, claim.claim_id);
        let reward = state.grant(&claim.payout);
        state.respond(WriteOp::ClaimMilestone, ClaimResult::Claimed { milestone, reward })
    }

    async fn grant_reward(&self, grant: &RewardGrant) -> Result<UserReward, StoreError> {
        self.gate().await?;
        let mut state = self.state.lock().await;
        state.refuse(WriteOp::GrantReward)?;
        let reward = state.grant(grant);
        state.respond(WriteOp::GrantReward, reward)
    }

    async fn list_rewards(&self, user_id: DbId) -> Result<Vec<UserReward>, StoreError> {
        self.gate().await?;
        let state = self.state.lock().await;
        let mut rewards: Vec<_> = state
            .rewards
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rewards.sort_by(|a, b| b.awarded_at.cmp(&a.awarded_at).then(b.id.cmp(&a.id)));
        Ok(rewards)
    }

    async fn mark_reward_redeemed(
        &self,
        user_id: DbId,
        reward_id: DbId,
        redeemed_at: Timestamp,
    ) -> Result<bool, StoreError> {
        self.gate().await?;
        let mut state = self.state.lock().await;
        state.refuse(WriteOp::MarkRewardRedeemed)?;
        let flipped = match state
            .rewards
            .iter_mut()
            .find(|r| r.id == reward_id && r.user_id == user_id && !r.redeemed)
        {
            Some(r) => {
                r.redeemed = true;
                r.redeemed_at = Some(redeemed_at);
                true
            }
            None => false,
        };
        state.respond(WriteOp::MarkRewardRedeemed, flipped)
    }

    async fn list_recovery_items(
        &self,
        user_id: DbId,
    ) -> Result<Vec<StreakRecoveryItem>, StoreError> {
        self.gate().await?;
        let state = self.state.lock().await;
        Ok(state
            .recovery_items
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_recovery_item(
        &self,
        user_id: DbId,
        item_id: DbId,
    ) -> Result<Option<StreakRecoveryItem>, StoreError> {
        self.gate().await?;
        let state = self.state.lock().await;
        Ok(state
            .recovery_items
            .iter()
            .find(|i| i.id == item_id && i.user_id == user_id)
            .cloned())
    }

    async fn spend_recovery_item(&self, spend: &RecoverySpend) -> Result<SpendResult, StoreError> {
        self.gate().await?;
        let mut state = self.state.lock().await;
        state.refuse(WriteOp::SpendRecoveryItem)?;

        let key = (spend.extended.user_id, spend.extended.relationship_id);
        if state.recovery_uses.contains(&spend.use_id) {
            let stored = state
                .relationships
                .get(&key)
                .cloned()
                .ok_or(StoreError::NotFound)?;
            return state.respond(WriteOp::SpendRecoveryItem, SpendResult::Spent(stored));
        }

        let Some(index) = state.recovery_items.iter().position(|i| {
            i.id == spend.item_id && i.user_id == spend.user_id && i.quantity > 0
        }) else {
            return Ok(SpendResult::OutOfStock);
        };
        // Spends only ever update an existing row.
        let stored = state
            .relationships
            .get(&key)
            .ok_or(StoreError::Conflict)?;
        let written = checked_relationship_write(Some(stored), &spend.extended)?;

        state.recovery_items[index].quantity -= 1;
        state.recovery_uses.insert(spend.use_id);
        state.relationships.insert(key, written.clone());
        state.respond(WriteOp::SpendRecoveryItem, SpendResult::Spent(written))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Utc;
    use tether_core::milestone::{next_unrecorded, MilestoneScope};
    use tether_core::reward::{NewReward, RewardKind};
    use tether_core::streak::EventKind;
    use tether_core::types::new_event_id;

    use super::*;

    fn check_in(user: UserStreak, points: i64) -> EventCommit {
        EventCommit {
            event: StreakEvent {
                event_id: new_event_id(),
                user_id: user.user_id,
                relationship_id: None,
                kind: EventKind::CheckIn,
                occurred_at: Utc::now(),
                points_earned: points,
            },
            user,
            relationship: None,
        }
    }

    fn points_grant(user_id: DbId, key: &str, amount: i64) -> RewardGrant {
        RewardGrant::new(
            key,
            NewReward {
                user_id,
                kind: RewardKind::Points,
                value: "points".into(),
                amount,
                awarded_at: Utc::now(),
            },
        )
    }

    async fn recorded_milestone(store: &InMemoryRemoteStore, user_id: DbId) -> StreakMilestone {
        let reward = next_unrecorded(7, &[]).unwrap();
        let new = NewMilestone::new(user_id, MilestoneScope::User, reward, Utc::now());
        store.record_milestone(&new, &new.badge()).await.unwrap()
    }

    #[tokio::test]
    async fn commit_rejects_stale_version_without_writing() {
        let store = InMemoryRemoteStore::new();
        let first = store.commit_event(&check_in(UserStreak::new(1), 5)).await.unwrap();
        assert_eq!(first.user.version, 1);

        // A second writer that still believes the row does not exist.
        let stale = check_in(UserStreak::new(1), 5);
        assert_matches!(store.commit_event(&stale).await, Err(StoreError::Conflict));
        assert_eq!(store.events().await.len(), 1);
    }

    #[tokio::test]
    async fn offline_store_is_unreachable() {
        let store = InMemoryRemoteStore::new();
        store.set_online(false);
        assert_matches!(
            store.load_user_streak(1).await,
            Err(StoreError::Unreachable(_))
        );
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let store = InMemoryRemoteStore::new();
        store.fail_next(2);
        assert!(store.load_user_streak(1).await.is_err());
        assert!(store.load_user_streak(1).await.is_err());
        assert!(store.load_user_streak(1).await.is_ok());
    }

    #[tokio::test]
    async fn repeated_grant_key_pays_once() {
        let store = InMemoryRemoteStore::new();
        let first = store.grant_reward(&points_grant(4, "claim:1", 150)).await.unwrap();
        let again = store.grant_reward(&points_grant(4, "claim:1", 150)).await.unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(store.rewards().await.len(), 1);

        let user = store.load_user_streak(4).await.unwrap().unwrap();
        assert_eq!(user.total_points, 150);
        assert_eq!(user.level, 2);
        assert_eq!(user.points_to_next_level, 200);
    }

    #[tokio::test]
    async fn lost_response_still_writes() {
        let store = InMemoryRemoteStore::new();
        store.lose_next_response(WriteOp::GrantReward).await;
        assert_matches!(
            store.grant_reward(&points_grant(4, "claim:1", 50)).await,
            Err(StoreError::Timeout)
        );
        store.grant_reward(&points_grant(4, "claim:1", 50)).await.unwrap();

        let user = store.load_user_streak(4).await.unwrap().unwrap();
        assert_eq!(user.total_points, 50);
    }

    #[tokio::test]
    async fn refused_write_changes_nothing() {
        let store = InMemoryRemoteStore::new();
        store.refuse_next(WriteOp::CommitEvent).await;
        assert_matches!(
            store.commit_event(&check_in(UserStreak::new(1), 5)).await,
            Err(StoreError::Unreachable(_))
        );
        assert!(store.events().await.is_empty());
    }

    #[tokio::test]
    async fn claim_is_repeatable_only_by_the_same_claim_id() {
        let store = InMemoryRemoteStore::new();
        let milestone = recorded_milestone(&store, 1).await;
        let now = Utc::now();
        let claim = MilestoneClaim {
            user_id: 1,
            milestone_id: milestone.id,
            claim_id: new_event_id(),
            claimed_at: now,
            payout: milestone.payout(now),
        };

        let first = store.claim_milestone(&claim).await.unwrap();
        let repeat = store.claim_milestone(&claim).await.unwrap();
        assert_eq!(first, repeat);
        assert_matches!(first, ClaimResult::Claimed { reward, .. } if reward.amount == 100);

        let other = MilestoneClaim {
            claim_id: new_event_id(),
            ..claim
        };
        assert_eq!(
            store.claim_milestone(&other).await.unwrap(),
            ClaimResult::AlreadyClaimed
        );

        // Badge plus one payout.
        assert_eq!(store.rewards().await.len(), 2);
        let user = store.load_user_streak(1).await.unwrap().unwrap();
        assert_eq!(user.total_points, 100);
    }

    #[tokio::test]
    async fn spend_is_keyed_by_use_id() {
        let store = InMemoryRemoteStore::new();
        let now = Utc::now();
        let rel = RelationshipStreak {
            grace_period_ends: Some(now),
            ..RelationshipStreak::new(1, 9, 7).unwrap()
        };
        store.seed_relationship_streak(rel).await;
        let item = store
            .seed_recovery_items(1, RecoveryKind::Freeze, 2, false, None)
            .await;
        let stored = store.load_relationship_streak(1, 9).await.unwrap().unwrap();

        let spend = RecoverySpend {
            user_id: 1,
            item_id: item.id,
            use_id: new_event_id(),
            used_at: now,
            extended: RelationshipStreak {
                grace_period_ends: Some(now + chrono::Duration::days(3)),
                ..stored
            },
        };
        let first = store.spend_recovery_item(&spend).await.unwrap();
        let repeat = store.spend_recovery_item(&spend).await.unwrap();
        assert_eq!(first, repeat);
        assert_eq!(store.recovery_items().await[0].quantity, 1);

        // A new use against the stale version loses the race and spends nothing.
        let stale = RecoverySpend {
            use_id: new_event_id(),
            ..spend
        };
        assert_matches!(
            store.spend_recovery_item(&stale).await,
            Err(StoreError::Conflict)
        );
        assert_eq!(store.recovery_items().await[0].quantity, 1);
    }
}
