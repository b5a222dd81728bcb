use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use std::sync::Arc;

use crate::db::schema_sqlite::{forwarding_rules, transactions, users};

use super::{
    models::{ForwardingRule, PlanType, Transaction, TransactionStatus, User},
    DatabaseError,
};

// SQLite has no native timestamp type; store RFC 3339 text.
fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

fn parse_plan(value: &str) -> Result<PlanType, DatabaseError> {
    PlanType::parse(value)
        .ok_or_else(|| DatabaseError::Query(format!("unknown plan type: {}", value)))
}

fn parse_status(value: &str) -> Result<TransactionStatus, DatabaseError> {
    TransactionStatus::parse(value)
        .ok_or_else(|| DatabaseError::Query(format!("unknown transaction status: {}", value)))
}

fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
struct DbUser {
    user_id: i64,
    username: Option<String>,
    is_premium: bool,
    subscription_end: Option<String>,
    daily_messages: i32,
    last_reset: String,
    created_at: String,
}

impl DbUser {
    fn to_user(&self) -> Result<User, DatabaseError> {
        Ok(User {
            user_id: self.user_id,
            username: self.username.clone(),
            is_premium: self.is_premium,
            subscription_end: self
                .subscription_end
                .as_deref()
                .map(string_to_datetime)
                .transpose()?,
            daily_messages: self.daily_messages,
            last_reset: string_to_datetime(&self.last_reset)?,
            created_at: string_to_datetime(&self.created_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUser<'a> {
    user_id: i64,
    username: Option<&'a str>,
    is_premium: bool,
    subscription_end: Option<String>,
    daily_messages: i32,
    last_reset: String,
    created_at: String,
}

#[derive(AsChangeset)]
#[diesel(table_name = users)]
#[diesel(treat_none_as_null = true)]
struct UpdateUser<'a> {
    username: Option<&'a str>,
    is_premium: bool,
    subscription_end: Option<String>,
    daily_messages: i32,
    last_reset: String,
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
    created_at: String,
}

impl DbForwardingRule {
    fn to_rule(&self) -> Result<ForwardingRule, DatabaseError> {
        Ok(ForwardingRule {
            id: self.id,
            user_id: self.user_id,
            source_chat_id: self.source_chat_id,
            source_chat_title: self.source_chat_title.clone(),
            dest_chat_id: self.dest_chat_id,
            dest_chat_title: self.dest_chat_title.clone(),
            is_active: self.is_active,
            messages_forwarded: self.messages_forwarded,
            created_at: string_to_datetime(&self.created_at)?,
        })
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
    created_at: String,
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
    created_at: String,
    payment_date: Option<String>,
}

impl DbTransaction {
    fn to_transaction(&self) -> Result<Transaction, DatabaseError> {
        Ok(Transaction {
            reference: self.reference.clone(),
            user_id: self.user_id,
            amount: self.amount,
            plan: parse_plan(&self.plan)?,
            status: parse_status(&self.status)?,
            created_at: string_to_datetime(&self.created_at)?,
            payment_date: self
                .payment_date
                .as_deref()
                .map(string_to_datetime)
                .transpose()?,
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
    created_at: String,
    payment_date: Option<String>,
}

#[derive(AsChangeset)]
#[diesel(table_name = transactions)]
#[diesel(treat_none_as_null = true)]
struct UpdateTransaction<'a> {
    status: &'a str,
    payment_date: Option<String>,
}

pub struct SqliteUserStore {
    db_path: Arc<String>,
}

impl SqliteUserStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::UserStore for SqliteUserStore {
    async fn load_users(&self) -> Result<Vec<User>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let results = users::table
                .select(DbUser::as_select())
                .load::<DbUser>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            results.iter().map(DbUser::to_user).collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert_user(&self, user: &User) -> Result<(), DatabaseError> {
        let user = user.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;

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
                    subscription_end: user.subscription_end.as_ref().map(datetime_to_string),
                    daily_messages: user.daily_messages,
                    last_reset: datetime_to_string(&user.last_reset),
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
                    subscription_end: user.subscription_end.as_ref().map(datetime_to_string),
                    daily_messages: user.daily_messages,
                    last_reset: datetime_to_string(&user.last_reset),
                    created_at: datetime_to_string(&user.created_at),
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

pub struct SqliteRuleStore {
    db_path: Arc<String>,
}

impl SqliteRuleStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::RuleStore for SqliteRuleStore {
    async fn load_rules(&self) -> Result<Vec<ForwardingRule>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
            let results = forwarding_rules::table
                .order(forwarding_rules::id.asc())
                .select(DbForwardingRule::as_select())
                .load::<DbForwardingRule>(&mut conn)
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            results.iter().map(DbForwardingRule::to_rule).collect()
        })
        .await
        .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
    }

    async fn upsert_rule(&self, rule: &ForwardingRule) -> Result<(), DatabaseError> {
        let rule = rule.clone();
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;

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
                    created_at: datetime_to_string(&rule.created_at),
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

pub struct SqliteTransactionStore {
    db_path: Arc<String>,
}

impl SqliteTransactionStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::TransactionStore for SqliteTransactionStore {
    async fn load_transactions(&self) -> Result<Vec<Transaction>, DatabaseError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;
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
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = establish_connection(&db_path)?;

            let existing = transactions::table
                .filter(transactions::reference.eq(&transaction.reference))
                .select(DbTransaction::as_select())
                .first::<DbTransaction>(&mut conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?;

            if existing.is_some() {
                let changes = UpdateTransaction {
                    status: transaction.status.as_str(),
                    payment_date: transaction.payment_date.as_ref().map(datetime_to_string),
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
                    created_at: datetime_to_string(&transaction.created_at),
                    payment_date: transaction.payment_date.as_ref().map(datetime_to_string),
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
