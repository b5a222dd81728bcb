use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use once_cell::sync::OnceCell;
use salvo::prelude::*;
use tracing::info;

use crate::config::Config;
use crate::payments::PaymentFlow;
use crate::relay::{RuleRegistry, SubscriptionLedger};

pub mod handlers;

use self::handlers::{get_status, health_check, payment_callback, payment_webhook};

#[derive(Clone)]
pub struct WebState {
    pub ledger: Arc<SubscriptionLedger>,
    pub registry: Arc<RuleRegistry>,
    pub payments: Arc<PaymentFlow>,
    pub started_at: Instant,
}

static WEB_STATE: OnceCell<WebState> = OnceCell::new();

pub fn web_state() -> &'static WebState {
    WEB_STATE
        .get()
        .expect("web state is not initialized before handler execution")
}

pub fn create_router() -> Router {
    Router::new()
        .push(Router::with_path("health").get(health_check))
        .push(Router::with_path("status").get(get_status))
        .push(
            Router::with_path("payments")
                .push(Router::with_path("callback").get(payment_callback))
                .push(Router::with_path("webhook").post(payment_webhook)),
        )
}

#[derive(Clone)]
pub struct WebServer {
    config: Arc<Config>,
}

impl WebServer {
    pub async fn new(
        config: Arc<Config>,
        ledger: Arc<SubscriptionLedger>,
        registry: Arc<RuleRegistry>,
        payments: Arc<PaymentFlow>,
    ) -> Result<Self> {
        let _ = WEB_STATE.set(WebState {
            ledger,
            registry,
            payments,
            started_at: Instant::now(),
        });

        Ok(Self { config })
    }

    pub async fn start(&self) -> Result<()> {
        let bind_addr = format!("{}:{}", self.config.web.bind_address, self.config.web.port);
        info!("Starting web server on {}", bind_addr);

        let acceptor = TcpListener::new(bind_addr).bind().await;
        Server::new(acceptor).serve(create_router()).await;

        Ok(())
    }
}
