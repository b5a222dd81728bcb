use crate::config::{DatabaseConfig as ConfigDatabaseConfig, DbType as ConfigDbType};
use crate::db::{DatabaseError, RuleStore, TransactionStore, UserStore};
use std::sync::Arc;

#[cfg(feature = "postgres")]
use crate::db::postgres::{PostgresRuleStore, PostgresTransactionStore, PostgresUserStore};
#[cfg(feature = "postgres")]
use diesel::pg::PgConnection;
#[cfg(feature = "postgres")]
use diesel::r2d2::{self, ConnectionManager};
#[cfg(feature = "postgres")]
use diesel::RunQueryDsl;

#[cfg(feature = "postgres")]
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

#[cfg(feature = "sqlite")]
use crate::db::sqlite::{SqliteRuleStore, SqliteTransactionStore, SqliteUserStore};
#[cfg(feature = "sqlite")]
use diesel::sqlite::SqliteConnection;
#[cfg(feature = "sqlite")]
use diesel::Connection;

#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "postgres")]
    postgres_pool: Option<Pool>,
    #[cfg(feature = "sqlite")]
    sqlite_path: Option<String>,
    user_store: Arc<dyn UserStore>,
    rule_store: Arc<dyn RuleStore>,
    transaction_store: Arc<dyn TransactionStore>,
    db_type: DbType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
}

impl From<ConfigDbType> for DbType {
    fn from(value: ConfigDbType) -> Self {
        match value {
            ConfigDbType::Postgres => DbType::Postgres,
            ConfigDbType::Sqlite => DbType::Sqlite,
        }
    }
}

impl DatabaseManager {
    pub async fn new(config: &ConfigDatabaseConfig) -> Result<Self, DatabaseError> {
        let db_type = DbType::from(config.db_type());

        match db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let connection_string = config.connection_string();
                let max_connections = config.max_connections();
                let min_connections = config.min_connections();

                let manager = ConnectionManager::<PgConnection>::new(connection_string);

                let builder = r2d2::Pool::builder()
                    .max_size(max_connections.unwrap_or(10))
                    .min_idle(Some(min_connections.unwrap_or(1)));

                let pool = builder
                    .build(manager)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;

                let user_store = Arc::new(PostgresUserStore::new(pool.clone()));
                let rule_store = Arc::new(PostgresRuleStore::new(pool.clone()));
                let transaction_store = Arc::new(PostgresTransactionStore::new(pool.clone()));

                Ok(Self {
                    postgres_pool: Some(pool),
                    #[cfg(feature = "sqlite")]
                    sqlite_path: None,
                    user_store,
                    rule_store,
                    transaction_store,
                    db_type,
                })
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = config.sqlite_path().ok_or_else(|| {
                    DatabaseError::Connection("missing sqlite path".to_string())
                })?;
                let path_arc = Arc::new(path.clone());

                let user_store = Arc::new(SqliteUserStore::new(path_arc.clone()));
                let rule_store = Arc::new(SqliteRuleStore::new(path_arc.clone()));
                let transaction_store = Arc::new(SqliteTransactionStore::new(path_arc));

                Ok(Self {
                    #[cfg(feature = "postgres")]
                    postgres_pool: None,
                    sqlite_path: Some(path),
                    user_store,
                    rule_store,
                    transaction_store,
                    db_type,
                })
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Connection(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Connection(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        match self.db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let pool = self.postgres_pool.as_ref().ok_or_else(|| {
                    DatabaseError::Migration("postgres pool not initialized".to_string())
                })?;
                Self::migrate_postgres(pool).await
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = self.sqlite_path.as_ref().ok_or_else(|| {
                    DatabaseError::Migration("sqlite path not initialized".to_string())
                })?;
                Self::migrate_sqlite(path).await
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Migration(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Migration(
                "SQLite feature not enabled".to_string(),
            )),
        }
    }

    #[cfg(feature = "postgres")]
    async fn migrate_postgres(pool: &Pool) -> Result<(), DatabaseError> {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    user_id BIGINT PRIMARY KEY,
                    username TEXT,
                    is_premium BOOLEAN NOT NULL DEFAULT FALSE,
                    subscription_end TIMESTAMP WITH TIME ZONE,
                    daily_messages INTEGER NOT NULL DEFAULT 0,
                    last_reset TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS forwarding_rules (
                    id BIGINT PRIMARY KEY,
                    user_id BIGINT NOT NULL,
                    source_chat_id BIGINT NOT NULL,
                    source_chat_title TEXT NOT NULL,
                    dest_chat_id BIGINT NOT NULL,
                    dest_chat_title TEXT NOT NULL,
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    messages_forwarded BIGINT NOT NULL DEFAULT 0,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS transactions (
                    reference TEXT PRIMARY KEY,
                    user_id BIGINT NOT NULL,
                    amount BIGINT NOT NULL,
                    plan TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    payment_date TIMESTAMP WITH TIME ZONE
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_forwarding_rules_source_chat ON forwarding_rules(source_chat_id)",
                "CREATE INDEX IF NOT EXISTS idx_forwarding_rules_user ON forwarding_rules(user_id)",
                "CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    #[cfg(feature = "sqlite")]
    async fn migrate_sqlite(path: &str) -> Result<(), DatabaseError> {
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = SqliteConnection::establish(&path)
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    user_id INTEGER PRIMARY KEY,
                    username TEXT,
                    is_premium INTEGER NOT NULL DEFAULT 0,
                    subscription_end TEXT,
                    daily_messages INTEGER NOT NULL DEFAULT 0,
                    last_reset TEXT NOT NULL DEFAULT (datetime('now')),
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS forwarding_rules (
                    id INTEGER PRIMARY KEY,
                    user_id INTEGER NOT NULL,
                    source_chat_id INTEGER NOT NULL,
                    source_chat_title TEXT NOT NULL,
                    dest_chat_id INTEGER NOT NULL,
                    dest_chat_title TEXT NOT NULL,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    messages_forwarded INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS transactions (
                    reference TEXT PRIMARY KEY,
                    user_id INTEGER NOT NULL,
                    amount INTEGER NOT NULL,
                    plan TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    payment_date TEXT
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_forwarding_rules_source_chat ON forwarding_rules(source_chat_id)",
                "CREATE INDEX IF NOT EXISTS idx_forwarding_rules_user ON forwarding_rules(user_id)",
                "CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    pub fn user_store(&self) -> Arc<dyn UserStore> {
        self.user_store.clone()
    }

    pub fn rule_store(&self) -> Arc<dyn RuleStore> {
        self.rule_store.clone()
    }

    pub fn transaction_store(&self) -> Arc<dyn TransactionStore> {
        self.transaction_store.clone()
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use chrono::{TimeZone, Utc};
    use tempfile::NamedTempFile;

    use super::DatabaseManager;
    use crate::config::DatabaseConfig;
    use crate::db::{ForwardingRule, PlanType, Transaction, TransactionStatus, User};

    async fn manager_for(path: &str) -> DatabaseManager {
        let config = DatabaseConfig {
            url: None,
            conn_string: None,
            filename: Some(path.to_string()),
            max_connections: Some(1),
            min_connections: Some(1),
        };
        let manager = DatabaseManager::new(&config).await.expect("db manager");
        manager.migrate().await.expect("migrate");
        manager
    }

    #[tokio::test]
    async fn sqlite_user_roundtrip_survives_reopen() {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let db_path = file.path().to_string_lossy().to_string();

        let manager = manager_for(&db_path).await;

        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut user = User::new(42, Some("alice".to_string()), now);
        manager
            .user_store()
            .upsert_user(&user)
            .await
            .expect("insert user");

        user.is_premium = true;
        user.subscription_end = Some(now + chrono::Duration::days(30));
        user.daily_messages = 7;
        manager
            .user_store()
            .upsert_user(&user)
            .await
            .expect("update user");

        let reopened = manager_for(&db_path).await;
        let users = reopened.user_store().load_users().await.expect("load");
        assert_eq!(users.len(), 1);
        assert!(users[0].is_premium);
        assert_eq!(users[0].daily_messages, 7);
        assert_eq!(users[0].subscription_end, user.subscription_end);
    }

    #[tokio::test]
    async fn sqlite_rule_upsert_preserves_counter() {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let db_path = file.path().to_string_lossy().to_string();

        let manager = manager_for(&db_path).await;

        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut rule = ForwardingRule {
            id: 1,
            user_id: 42,
            source_chat_id: -1001,
            source_chat_title: "News".to_string(),
            dest_chat_id: -1002,
            dest_chat_title: "Mirror".to_string(),
            is_active: true,
            messages_forwarded: 0,
            created_at: now,
        };
        manager.rule_store().upsert_rule(&rule).await.expect("insert");

        rule.messages_forwarded = 12;
        rule.is_active = false;
        manager.rule_store().upsert_rule(&rule).await.expect("update");

        let rules = manager.rule_store().load_rules().await.expect("load");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].messages_forwarded, 12);
        assert!(!rules[0].is_active);
    }

    #[tokio::test]
    async fn sqlite_transaction_status_transition_persists() {
        let file = NamedTempFile::new().expect("temp sqlite file");
        let db_path = file.path().to_string_lossy().to_string();

        let manager = manager_for(&db_path).await;

        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut tx = Transaction {
            reference: "SUBM_42_1740830400".to_string(),
            user_id: 42,
            amount: 150_000,
            plan: PlanType::Monthly,
            status: TransactionStatus::Pending,
            created_at: now,
            payment_date: None,
        };
        manager
            .transaction_store()
            .upsert_transaction(&tx)
            .await
            .expect("insert");

        tx.status = TransactionStatus::Succeeded;
        tx.payment_date = Some(now + chrono::Duration::minutes(5));
        manager
            .transaction_store()
            .upsert_transaction(&tx)
            .await
            .expect("update");

        let txs = manager
            .transaction_store()
            .load_transactions()
            .await
            .expect("load");
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].status, TransactionStatus::Succeeded);
        assert_eq!(txs[0].payment_date, tx.payment_date);
    }
}
