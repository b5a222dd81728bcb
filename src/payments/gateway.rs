use async_trait::async_trait;
use thiserror::Error;

use crate::db::PlanType;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment gateway transport error: {0}")]
    Transport(String),
    #[error("payment gateway rejected the request: {0}")]
    Rejected(String),
}

/// A checkout session issued by the gateway.
#[derive(Debug, Clone)]
pub struct Checkout {
    pub checkout_url: String,
    pub reference: String,
}

/// Gateway-reported settlement state for a reference. `payer_user_id`
/// comes from the checkout metadata the gateway echoes back and is the
/// only payer identity the verification path trusts.
#[derive(Debug, Clone)]
pub struct SettlementStatus {
    pub settled: bool,
    pub payer_user_id: Option<i64>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a checkout session; returns the hosted payment URL.
    /// Amounts are minor currency units.
    async fn create_checkout(
        &self,
        email: &str,
        amount: i64,
        reference: &str,
        user_id: i64,
        plan: PlanType,
    ) -> Result<String, GatewayError>;

    async fn transaction_status(&self, reference: &str)
        -> Result<SettlementStatus, GatewayError>;
}
