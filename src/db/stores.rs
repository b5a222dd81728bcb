use async_trait::async_trait;

use super::models::{ForwardingRule, Transaction, User};
use super::DatabaseError;

/// Stores back the in-memory registries: the whole table is loaded once at
/// startup and individual rows are written back on mutation.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn load_users(&self) -> Result<Vec<User>, DatabaseError>;
    async fn upsert_user(&self, user: &User) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn load_rules(&self) -> Result<Vec<ForwardingRule>, DatabaseError>;
    async fn upsert_rule(&self, rule: &ForwardingRule) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn load_transactions(&self) -> Result<Vec<Transaction>, DatabaseError>;
    async fn upsert_transaction(&self, transaction: &Transaction) -> Result<(), DatabaseError>;
}
