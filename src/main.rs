#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

mod cli;
mod commands;
mod config;
mod db;
mod payments;
mod relay;
mod telegram;
mod utils;
mod web;

use config::Config;
use web::WebServer;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let config = Arc::new(Config::load_from_file(&args.config)?);
    utils::logging::init_tracing(&config.logging);
    info!("telegram forwarder bot starting up");

    let db_manager = Arc::new(db::DatabaseManager::new(&config.database).await?);
    db_manager.migrate().await?;

    let ledger = relay::SubscriptionLedger::load(db_manager.user_store()).await?;
    let registry = relay::RuleRegistry::load(db_manager.rule_store()).await?;
    info!(
        "loaded {} users and {} active rules",
        ledger.user_count(),
        registry.count_active()
    );

    let telegram = Arc::new(telegram::TelegramClient::new(config.clone()).await?);
    let paystack = Arc::new(payments::PaystackClient::new(config.clone())?);

    let quota = Arc::new(relay::QuotaTracker::new(
        ledger.clone(),
        config.limits.clone(),
    ));
    let flow = payments::PaymentFlow::load(
        paystack,
        db_manager.transaction_store(),
        ledger.clone(),
        &config.payments,
    )
    .await?;

    let core = relay::RelayCore::new(telegram.clone(), quota.clone(), registry.clone());
    let handler = commands::CommandHandler::new(
        telegram.clone(),
        ledger.clone(),
        quota,
        registry.clone(),
        flow.clone(),
        config.limits.clone(),
    );

    let web_server = WebServer::new(config.clone(), ledger, registry, flow).await?;
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start().await {
            error!("web server error: {}", e);
        }
    });

    let relay_handle = tokio::spawn(relay::run_polling(telegram, core, handler));

    tokio::select! {
        _ = web_handle => {},
        _ = relay_handle => {},
    }

    info!("telegram forwarder bot shutting down");
    Ok(())
}
