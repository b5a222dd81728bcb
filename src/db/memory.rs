//! In-memory store backends for unit tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::models::{ForwardingRule, Transaction, User};
use super::{DatabaseError, RuleStore, TransactionStore, UserStore};

#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<i64, User>>,
    rules: Mutex<HashMap<i64, ForwardingRule>>,
    transactions: Mutex<HashMap<String, Transaction>>,
    pub fail_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn check_write(&self) -> Result<(), DatabaseError> {
        if *self.fail_writes.lock() {
            Err(DatabaseError::Query("simulated write failure".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn user(&self, user_id: i64) -> Option<User> {
        self.users.lock().get(&user_id).cloned()
    }

    pub fn rule(&self, id: i64) -> Option<ForwardingRule> {
        self.rules.lock().get(&id).cloned()
    }

    pub fn transaction(&self, reference: &str) -> Option<Transaction> {
        self.transactions.lock().get(reference).cloned()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn load_users(&self) -> Result<Vec<User>, DatabaseError> {
        Ok(self.users.lock().values().cloned().collect())
    }

    async fn upsert_user(&self, user: &User) -> Result<(), DatabaseError> {
        self.check_write()?;
        self.users.lock().insert(user.user_id, user.clone());
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn load_rules(&self) -> Result<Vec<ForwardingRule>, DatabaseError> {
        let mut rules: Vec<_> = self.rules.lock().values().cloned().collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn upsert_rule(&self, rule: &ForwardingRule) -> Result<(), DatabaseError> {
        self.check_write()?;
        self.rules.lock().insert(rule.id, rule.clone());
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn load_transactions(&self) -> Result<Vec<Transaction>, DatabaseError> {
        Ok(self.transactions.lock().values().cloned().collect())
    }

    async fn upsert_transaction(&self, transaction: &Transaction) -> Result<(), DatabaseError> {
        self.check_write()?;
        self.transactions
            .lock()
            .insert(transaction.reference.clone(), transaction.clone());
        Ok(())
    }
}
