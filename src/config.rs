pub use self::parser::{
    BotConfig, Config, DatabaseConfig, DbType, LimitsConfig, LoggingConfig, PaymentsConfig,
    PlanPricing, WebConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
