use super::ConfigError;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bot: BotConfig,
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(alias = "bot_token")]
    pub token: SecretString,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Long-poll wait passed to getUpdates, in seconds.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// Hard timeout for any single Bot API request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    pub secret_key: SecretString,
    #[serde(default = "default_paystack_url")]
    pub base_url: String,
    /// Where the gateway redirects the payer after checkout.
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Price of the monthly plan in minor currency units (kobo).
    #[serde(default = "default_monthly_price")]
    pub monthly: PlanPricing,
    /// Price of the daily plan in minor currency units (kobo).
    #[serde(default = "default_daily_price")]
    pub daily: PlanPricing,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PlanPricing {
    pub amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_free_daily_messages")]
    pub free_daily_messages: u32,
    #[serde(default = "default_free_active_rules")]
    pub free_active_rules: usize,
    #[serde(default = "default_command_limit")]
    pub command_limit: u32,
    #[serde(default = "default_command_window_secs")]
    pub command_window_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            free_daily_messages: default_free_daily_messages(),
            free_active_rules: default_free_active_rules(),
            command_limit: default_command_limit(),
            command_window_secs: default_command_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub conn_string: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub min_connections: Option<u32>,
}

impl DatabaseConfig {
    pub fn db_type(&self) -> DbType {
        let url = self.connection_string();
        if url.starts_with("sqlite://") {
            DbType::Sqlite
        } else {
            DbType::Postgres
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            url.clone()
        } else if let Some(ref conn) = self.conn_string {
            conn.clone()
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            String::new()
        }
    }

    pub fn sqlite_path(&self) -> Option<String> {
        if let DbType::Sqlite = self.db_type() {
            let url = self.connection_string();
            Some(url.strip_prefix("sqlite://").unwrap_or(&url).to_string())
        } else {
            None
        }
    }

    pub fn max_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres => self.max_connections,
            DbType::Sqlite => Some(1),
        }
    }

    pub fn min_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres => self.min_connections,
            DbType::Sqlite => Some(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_file(config_path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        use secrecy::ExposeSecret;

        if self.bot.token.expose_secret().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "bot.token cannot be empty".to_string(),
            ));
        }

        if self.payments.secret_key.expose_secret().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "payments.secret_key cannot be empty".to_string(),
            ));
        }

        if url::Url::parse(&self.bot.api_url).is_err() {
            return Err(ConfigError::InvalidConfig(
                "bot.api_url is not a valid URL".to_string(),
            ));
        }

        if url::Url::parse(&self.payments.base_url).is_err() {
            return Err(ConfigError::InvalidConfig(
                "payments.base_url is not a valid URL".to_string(),
            ));
        }

        if let Some(callback) = &self.payments.callback_url {
            if url::Url::parse(callback).is_err() {
                return Err(ConfigError::InvalidConfig(
                    "payments.callback_url is not a valid URL".to_string(),
                ));
            }
        }

        if self.database.connection_string().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "database connection string cannot be empty".to_string(),
            ));
        }

        if self.web.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "web.port must be between 1 and 65535".to_string(),
            ));
        }

        if self.payments.monthly.amount <= 0 || self.payments.daily.amount <= 0 {
            return Err(ConfigError::InvalidConfig(
                "plan amounts must be positive minor currency units".to_string(),
            ));
        }

        if self.limits.command_window_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "limits.command_window_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("FORWARDER_BOT_TOKEN") {
            self.bot.token = SecretString::from(value);
        }
        if let Ok(value) = std::env::var("FORWARDER_PAYSTACK_SECRET_KEY") {
            self.payments.secret_key = SecretString::from(value);
        }
        if let Ok(value) = std::env::var("DATABASE_URL") {
            self.database.url = Some(value);
        }
    }
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_request_timeout() -> u64 {
    10
}

fn default_paystack_url() -> String {
    "https://api.paystack.co".to_string()
}

fn default_monthly_price() -> PlanPricing {
    PlanPricing { amount: 150_000 }
}

fn default_daily_price() -> PlanPricing {
    PlanPricing { amount: 10_000 }
}

fn default_free_daily_messages() -> u32 {
    50
}

fn default_free_active_rules() -> usize {
    1
}

fn default_command_limit() -> u32 {
    10
}

fn default_command_window_secs() -> u64 {
    60
}

fn default_port() -> u16 {
    9080
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
