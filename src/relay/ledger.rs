use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

use crate::db::{DatabaseError, PlanType, User, UserStore};

/// True iff the user holds a premium subscription that has not lapsed.
/// Expiry is never swept proactively, so the raw `is_premium` flag can be
/// stale; every premium gate must go through this predicate.
pub fn is_active_premium(user: &User, now: DateTime<Utc>) -> bool {
    user.is_premium
        && user
            .subscription_end
            .map(|end| end > now)
            .unwrap_or(false)
}

/// Owns premium status and expiry for every user. State lives in memory,
/// loaded from the store at startup; mutations are written back
/// asynchronously and never block or roll back a decision.
pub struct SubscriptionLedger {
    store: Arc<dyn UserStore>,
    users: Mutex<HashMap<i64, User>>,
}

impl SubscriptionLedger {
    pub async fn load(store: Arc<dyn UserStore>) -> Result<Arc<Self>, DatabaseError> {
        let users = store
            .load_users()
            .await?
            .into_iter()
            .map(|u| (u.user_id, u))
            .collect();
        Ok(Arc::new(Self {
            store,
            users: Mutex::new(users),
        }))
    }

    /// Idempotent by user id; creates a free-plan user on first contact.
    pub fn get_or_create(
        &self,
        user_id: i64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> User {
        let (user, created) = {
            let mut users = self.users.lock();
            match users.get(&user_id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let user = User::new(user_id, username.map(str::to_string), now);
                    users.insert(user_id, user.clone());
                    (user, true)
                }
            }
        };
        if created {
            self.persist(user.clone());
        }
        user
    }

    pub fn get(&self, user_id: i64) -> Option<User> {
        self.users.lock().get(&user_id).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().len()
    }

    /// Grants premium until `now + plan duration`. A repeat activation
    /// before expiry overwrites the end date rather than extending it.
    pub fn activate(&self, user_id: i64, plan: PlanType, now: DateTime<Utc>) {
        let user = {
            let mut users = self.users.lock();
            let user = users
                .entry(user_id)
                .or_insert_with(|| User::new(user_id, None, now));
            user.is_premium = true;
            user.subscription_end = Some(now + plan.duration());
            user.clone()
        };
        self.persist(user);
    }

    /// Runs `f` against the user's row inside the ledger's critical
    /// section. `f` returns the result plus whether it mutated the row;
    /// only mutations are flushed. Returns `None` for unknown users.
    pub(crate) fn with_user_mut<R>(
        &self,
        user_id: i64,
        f: impl FnOnce(&mut User) -> (R, bool),
    ) -> Option<R> {
        let (result, changed) = {
            let mut users = self.users.lock();
            let user = users.get_mut(&user_id)?;
            let (result, changed) = f(user);
            (result, changed.then(|| user.clone()))
        };
        if let Some(user) = changed {
            self.persist(user);
        }
        Some(result)
    }

    fn persist(&self, user: User) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(err) = store.upsert_user(&user).await {
                warn!("failed to persist user {}: {}", user.user_id, err);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{is_active_premium, SubscriptionLedger};
    use crate::db::memory::MemoryStore;
    use crate::db::{PlanType, User};

    fn at(day: u32, hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = MemoryStore::new();
        let ledger = SubscriptionLedger::load(store).await.expect("load");

        let first = ledger.get_or_create(42, Some("alice"), at(1, 0));
        let second = ledger.get_or_create(42, Some("renamed"), at(2, 0));

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.username.as_deref(), Some("alice"));
        assert_eq!(ledger.user_count(), 1);
    }

    #[tokio::test]
    async fn monthly_activation_covers_29_but_not_31_days() {
        let store = MemoryStore::new();
        let ledger = SubscriptionLedger::load(store).await.expect("load");

        let t0 = at(1, 0);
        ledger.get_or_create(42, None, t0);
        ledger.activate(42, PlanType::Monthly, t0);

        let user = ledger.get(42).expect("user exists");
        assert!(is_active_premium(&user, t0 + Duration::days(29)));
        assert!(!is_active_premium(&user, t0 + Duration::days(31)));
    }

    #[tokio::test]
    async fn reactivation_resets_rather_than_stacks() {
        let store = MemoryStore::new();
        let ledger = SubscriptionLedger::load(store).await.expect("load");

        let t0 = at(1, 0);
        ledger.activate(42, PlanType::Monthly, t0);
        let t1 = t0 + Duration::days(1);
        ledger.activate(42, PlanType::Monthly, t1);

        let user = ledger.get(42).expect("user exists");
        assert_eq!(user.subscription_end, Some(t1 + Duration::days(30)));
    }

    #[test]
    fn stale_premium_flag_without_end_date_is_not_active() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let mut user = User::new(7, None, now);
        user.is_premium = true;
        assert!(!is_active_premium(&user, now));
    }

    #[tokio::test]
    async fn write_failure_does_not_roll_back_activation() {
        let store = MemoryStore::new();
        let ledger = SubscriptionLedger::load(store.clone()).await.expect("load");
        *store.fail_writes.lock() = true;

        let t0 = at(1, 0);
        ledger.activate(42, PlanType::Monthly, t0);

        let user = ledger.get(42).expect("user exists in memory");
        assert!(is_active_premium(&user, t0 + Duration::days(1)));
        // The flush was rejected, so the store never saw the row.
        tokio::task::yield_now().await;
        assert!(store.user(42).is_none());
    }

    #[tokio::test]
    async fn loads_existing_users_from_store() {
        let store = MemoryStore::new();
        let now = at(1, 0);
        let mut user = User::new(9, Some("bob".to_string()), now);
        user.is_premium = true;
        user.subscription_end = Some(now + Duration::days(30));
        crate::db::UserStore::upsert_user(store.as_ref(), &user)
            .await
            .expect("seed user");

        let ledger = SubscriptionLedger::load(store).await.expect("load");
        let loaded = ledger.get(9).expect("user loaded");
        assert!(is_active_premium(&loaded, now));
    }
}
