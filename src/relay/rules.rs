use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;

use crate::db::{DatabaseError, ForwardingRule, RuleStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("rule not found")]
    NotFound,
    #[error("rule belongs to another user")]
    NotOwner,
}

struct RegistryInner {
    rules: HashMap<i64, ForwardingRule>,
    // All rule ids ever created for a source chat; activity is checked on
    // read so deactivation never has to rewrite the index.
    by_source: HashMap<i64, Vec<i64>>,
    next_id: i64,
}

/// The set of forwarding rules, all revisions included (deactivated rules
/// are kept for their counters). Plan limits are the caller's concern;
/// the registry is a plain store.
pub struct RuleRegistry {
    store: Arc<dyn RuleStore>,
    inner: Mutex<RegistryInner>,
}

impl RuleRegistry {
    pub async fn load(store: Arc<dyn RuleStore>) -> Result<Arc<Self>, DatabaseError> {
        let mut rules = HashMap::new();
        let mut by_source: HashMap<i64, Vec<i64>> = HashMap::new();
        let mut next_id = 1;

        for rule in store.load_rules().await? {
            next_id = next_id.max(rule.id + 1);
            by_source.entry(rule.source_chat_id).or_default().push(rule.id);
            rules.insert(rule.id, rule);
        }

        Ok(Arc::new(Self {
            store,
            inner: Mutex::new(RegistryInner {
                rules,
                by_source,
                next_id,
            }),
        }))
    }

    pub fn create(
        &self,
        owner_user_id: i64,
        source_chat_id: i64,
        source_chat_title: &str,
        dest_chat_id: i64,
        dest_chat_title: &str,
        now: DateTime<Utc>,
    ) -> ForwardingRule {
        let rule = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;

            let rule = ForwardingRule {
                id,
                user_id: owner_user_id,
                source_chat_id,
                source_chat_title: source_chat_title.to_string(),
                dest_chat_id,
                dest_chat_title: dest_chat_title.to_string(),
                is_active: true,
                messages_forwarded: 0,
                created_at: now,
            };
            inner.by_source.entry(source_chat_id).or_default().push(id);
            inner.rules.insert(id, rule.clone());
            rule
        };
        self.persist(rule.clone());
        rule
    }

    pub fn get(&self, rule_id: i64) -> Option<ForwardingRule> {
        self.inner.lock().rules.get(&rule_id).cloned()
    }

    pub fn list_active_by_owner(&self, owner_user_id: i64) -> Vec<ForwardingRule> {
        self.inner
            .lock()
            .rules
            .values()
            .filter(|r| r.is_active && r.user_id == owner_user_id)
            .cloned()
            .collect()
    }

    /// Hot path: resolved through the source-chat index, not a full scan.
    pub fn list_active_by_source(&self, source_chat_id: i64) -> Vec<ForwardingRule> {
        let inner = self.inner.lock();
        let Some(ids) = inner.by_source.get(&source_chat_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.rules.get(id))
            .filter(|r| r.is_active)
            .cloned()
            .collect()
    }

    pub fn count_active(&self) -> usize {
        self.inner.lock().rules.values().filter(|r| r.is_active).count()
    }

    /// Soft-deletes the rule, only for its owner. Counters survive.
    pub fn deactivate(
        &self,
        rule_id: i64,
        requesting_user_id: i64,
    ) -> Result<(), RegistryError> {
        let rule = {
            let mut inner = self.inner.lock();
            let rule = inner.rules.get_mut(&rule_id).ok_or(RegistryError::NotFound)?;
            if rule.user_id != requesting_user_id {
                return Err(RegistryError::NotOwner);
            }
            rule.is_active = false;
            rule.clone()
        };
        self.persist(rule);
        Ok(())
    }

    /// Called only after the provider confirmed a successful relay.
    pub fn record_forward(&self, rule_id: i64) {
        let rule = {
            let mut inner = self.inner.lock();
            let Some(rule) = inner.rules.get_mut(&rule_id) else {
                return;
            };
            rule.messages_forwarded += 1;
            rule.clone()
        };
        self.persist(rule);
    }

    fn persist(&self, rule: ForwardingRule) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(err) = store.upsert_rule(&rule).await {
                warn!("failed to persist rule {}: {}", rule.id, err);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::{RegistryError, RuleRegistry};
    use crate::db::memory::MemoryStore;
    use crate::db::{ForwardingRule, RuleStore};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    async fn registry() -> Arc<RuleRegistry> {
        RuleRegistry::load(MemoryStore::new()).await.expect("load")
    }

    #[tokio::test]
    async fn create_assigns_monotonic_ids() {
        let registry = registry().await;
        let a = registry.create(1, -100, "A", -200, "B", now());
        let b = registry.create(1, -101, "C", -201, "D", now());
        assert!(b.id > a.id);
        assert!(a.is_active);
        assert_eq!(a.messages_forwarded, 0);
    }

    #[tokio::test]
    async fn source_lookup_returns_only_active_rules() {
        let registry = registry().await;
        let a = registry.create(1, -100, "A", -200, "B", now());
        let b = registry.create(2, -100, "A", -300, "C", now());
        registry.create(3, -999, "X", -400, "Y", now());

        registry.deactivate(b.id, 2).expect("owner deactivates");

        let matched = registry.list_active_by_source(-100);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, a.id);
        assert!(registry.list_active_by_source(-555).is_empty());
    }

    #[tokio::test]
    async fn deactivate_enforces_ownership() {
        let registry = registry().await;
        let rule = registry.create(1, -100, "A", -200, "B", now());

        assert_eq!(
            registry.deactivate(rule.id, 2),
            Err(RegistryError::NotOwner)
        );
        assert!(registry.get(rule.id).unwrap().is_active);

        assert_eq!(registry.deactivate(9999, 1), Err(RegistryError::NotFound));

        registry.deactivate(rule.id, 1).expect("owner may deactivate");
        let rule = registry.get(rule.id).unwrap();
        assert!(!rule.is_active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_record_forward_loses_no_increments() {
        let registry = registry().await;
        let rule = registry.create(1, -100, "A", -200, "B", now());

        let mut handles = Vec::new();
        for _ in 0..64 {
            let registry = registry.clone();
            let rule_id = rule.id;
            handles.push(tokio::spawn(async move {
                registry.record_forward(rule_id);
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(registry.get(rule.id).unwrap().messages_forwarded, 64);
    }

    #[tokio::test]
    async fn ids_continue_after_reload() {
        let store = MemoryStore::new();
        let seeded = ForwardingRule {
            id: 7,
            user_id: 1,
            source_chat_id: -100,
            source_chat_title: "A".to_string(),
            dest_chat_id: -200,
            dest_chat_title: "B".to_string(),
            is_active: true,
            messages_forwarded: 3,
            created_at: now(),
        };
        RuleStore::upsert_rule(store.as_ref(), &seeded)
            .await
            .expect("seed");

        let registry = RuleRegistry::load(store).await.expect("load");
        let fresh = registry.create(1, -101, "C", -201, "D", now());
        assert_eq!(fresh.id, 8);
        assert_eq!(registry.get(7).unwrap().messages_forwarded, 3);
    }
}
