use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::manager::Pool;
use crate::db::schema::{forwarding_rules, transactions, users};

use super::{
    models::{ForwardingRule, PlanType, Transaction, TransactionStatus, User},
    DatabaseError,
};

fn parse_plan(value: &str) -> Result<PlanType, DatabaseError> {
    PlanType::parse(value)
        .ok_or_else(|| DatabaseError::Query(format!("unknown plan type: {}", value)))
}

fn parse_status(value: &str) -> Result<TransactionStatus, DatabaseError> {
    TransactionStatus::parse(value)
        .ok_or_else(|| DatabaseError::Query(format!("unknown transaction status: {}", value)))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
struct DbUser {
    user_id: i64,
    username: Option<String>,
    is_premium: bool,
    subscription_end: Option<DateTime<Utc>>,
    daily_messages: i32,
    last_reset: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<DbUser> for User {
    fn from(value: DbUser) -> Self {
        Self {
            user_id: value.user_id,
            username: value.username,
            is_premium: value.is_premium,
            subscription_end: value.subscription_end,
            daily_messages: value.daily_messages,
            last_reset: value.last_reset,
            created_at: value.created_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    user_id: i64,
    username: Option<&'a str>,
    is_premium: bool,
    subscription_end: Option<&'a DateTime<Utc>>,
    daily_messages: i32,
    last_reset: &'a DateTime<Utc>,
    created_at: &'a DateTime<Utc>,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
#[diesel(treat_none_as_null = true)]
struct UpdateUser<'a> {
    username: Option<&'a str>,
    is_premium: bool,
    subscription_end: Option<&'a DateTime<Utc>>,
    daily_messages: i32,
    last_reset: &'a DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = forwarding_rules)]
struct DbForwardingRule {
    id: i64,
    user_id: i64,
    source_chat_id: i64,
    source_chat_title: String,
    dest_chat_id: i64,
    dest_chat_title: String,
    is_active: bool,
    messages_forwarded: i64,
    created_at: DateTime<Utc>,
}

impl From<DbForwardingRule> for ForwardingRule {
    fn from(value: DbForwardingRule) -> Self {
        Self {
            id: value.id,
            user_id: value.user_id,
            source_chat_id: value.source_chat_id,
            source_chat_title: value.source_chat_title,
            dest_chat_id: value.dest_chat_id,
            dest_chat_title: value.dest_chat_title,
            is_active: value.is_active,
            messages_forwarded: value.messages_forwarded,
            created_at: value.created_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = forwarding_rules)]
struct NewForwardingRule<'a> {
    id: i64,
    user_id: i64,
    source_chat_id: i64,
    source_chat_title: &'a str,
    dest_chat_id: i64,
    dest_chat_title: &'a str,
    is_active: bool,
    messages_forwarded: i64,
    created_at: &'a DateTime<Utc>,
}

#[derive(AsChangeset)]
#[diesel(table_name = forwarding_rules)]
struct UpdateForwardingRule<'a> {
    source_chat_title: &'a str,
    dest_chat_title: &'a str,
    is_active: bool,
    messages_forwarded: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = transactions)]
struct DbTransaction {
    reference: String,
    user_id: i64,
    amount: i64,
    plan: String,
    status: String,
    created_at: DateTime<Utc>,
    payment_date: Option<DateTime<Utc>>,
}

impl DbTransaction {
    fn to_transaction(&self) -> Result<Transaction, DatabaseError> {
        Ok(Transaction {
            reference: self.reference.clone(),
            user_id: self.user_id,
            amount: self.amount,
            plan: parse_plan(&self.plan)?,
            status: parse_status(&self.status)?,
            created_at: self.created_at,
            payment_date: self.payment_date,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = transactions)]
struct NewTransaction<'a> {
    reference: &'a str,
    user_id: i64,
    amount: i64,
    plan: &'a str,
    status: &'a str,
    created_at: &'a DateTime<Utc>,
    payment_date: Option<&'a DateTime<Utc>>,
}

#[derive(AsChangeset)]
#[diesel(table_name = transactions)]
#[diesel(treat_none_as_null = true)]
struct UpdateTransaction<'a> {
    status: &'a str,
    payment_date: Option<&'a DateTime<Utc>>,
}

pub struct PostgresUserStore {
    pool: Pool,
}

impl PostgresUserStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::UserStore for PostgresUserStore {
    async fn load_users(&self) -> Result<Vec<User>, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            let results = users::table
                .select(DbUser::as_select())
                .load::<DbUser>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(results.into_iter().map(User::from).collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert_user(&self, user: &User) -> Result<(), DatabaseError> {
        let user = user.clone();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let existing = users::table
                .filter(users::user_id.eq(user.user_id))
                .select(DbUser::as_select())
                .first::<DbUser>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if existing.is_some() {
                let changes = UpdateUser {
                    username: user.username.as_deref(),
                    is_premium: user.is_premium,
                    subscription_end: user.subscription_end.as_ref(),
                    daily_messages: user.daily_messages,
                    last_reset: &user.last_reset,
                };
                diesel::update(users::table.filter(users::user_id.eq(user.user_id)))
                    .set(changes)
                    .execute(&mut conn)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::Query(e.to_string()))
            } else {
                let new_user = NewUser {
                    user_id: user.user_id,
                    username: user.username.as_deref(),
                    is_premium: user.is_premium,
                    subscription_end: user.subscription_end.as_ref(),
                    daily_messages: user.daily_messages,
                    last_reset: &user.last_reset,
                    created_at: &user.created_at,
                };
                diesel::insert_into(users::table)
                    .values(&new_user)
                    .execute(&mut conn)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::Query(e.to_string()))
            }
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

pub struct PostgresRuleStore {
    pool: Pool,
}

impl PostgresRuleStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::RuleStore for PostgresRuleStore {
    async fn load_rules(&self) -> Result<Vec<ForwardingRule>, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            let results = forwarding_rules::table
                .order(forwarding_rules::id.asc())
                .select(DbForwardingRule::as_select())
                .load::<DbForwardingRule>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            Ok(results.into_iter().map(ForwardingRule::from).collect())
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert_rule(&self, rule: &ForwardingRule) -> Result<(), DatabaseError> {
        let rule = rule.clone();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let existing = forwarding_rules::table
                .filter(forwarding_rules::id.eq(rule.id))
                .select(DbForwardingRule::as_select())
                .first::<DbForwardingRule>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if existing.is_some() {
                let changes = UpdateForwardingRule {
                    source_chat_title: &rule.source_chat_title,
                    dest_chat_title: &rule.dest_chat_title,
                    is_active: rule.is_active,
                    messages_forwarded: rule.messages_forwarded,
                };
                diesel::update(forwarding_rules::table.filter(forwarding_rules::id.eq(rule.id)))
                    .set(changes)
                    .execute(&mut conn)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::Query(e.to_string()))
            } else {
                let new_rule = NewForwardingRule {
                    id: rule.id,
                    user_id: rule.user_id,
                    source_chat_id: rule.source_chat_id,
                    source_chat_title: &rule.source_chat_title,
                    dest_chat_id: rule.dest_chat_id,
                    dest_chat_title: &rule.dest_chat_title,
                    is_active: rule.is_active,
                    messages_forwarded: rule.messages_forwarded,
                    created_at: &rule.created_at,
                };
                diesel::insert_into(forwarding_rules::table)
                    .values(&new_rule)
                    .execute(&mut conn)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::Query(e.to_string()))
            }
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}

pub struct PostgresTransactionStore {
    pool: Pool,
}

impl PostgresTransactionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::TransactionStore for PostgresTransactionStore {
    async fn load_transactions(&self) -> Result<Vec<Transaction>, DatabaseError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            let results = transactions::table
                .select(DbTransaction::as_select())
                .load::<DbTransaction>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            results.iter().map(DbTransaction::to_transaction).collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert_transaction(&self, transaction: &Transaction) -> Result<(), DatabaseError> {
        let transaction = transaction.clone();
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let existing = transactions::table
                .filter(transactions::reference.eq(&transaction.reference))
                .select(DbTransaction::as_select())
                .first::<DbTransaction>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if existing.is_some() {
                let changes = UpdateTransaction {
                    status: transaction.status.as_str(),
                    payment_date: transaction.payment_date.as_ref(),
                };
                diesel::update(
                    transactions::table
                        .filter(transactions::reference.eq(&transaction.reference)),
                )
                .set(changes)
                .execute(&mut conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
            } else {
                let new_transaction = NewTransaction {
                    reference: &transaction.reference,
                    user_id: transaction.user_id,
                    amount: transaction.amount,
                    plan: transaction.plan.as_str(),
                    status: transaction.status.as_str(),
                    created_at: &transaction.created_at,
                    payment_date: transaction.payment_date.as_ref(),
                };
                diesel::insert_into(transactions::table)
                    .values(&new_transaction)
                    .execute(&mut conn)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::Query(e.to_string()))
            }
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }
}
