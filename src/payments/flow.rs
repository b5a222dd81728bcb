use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::PaymentsConfig;
use crate::db::{DatabaseError, PlanType, Transaction, TransactionStatus, TransactionStore};
use crate::relay::SubscriptionLedger;

use super::gateway::{Checkout, GatewayError, PaymentGateway};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("no transaction with this reference")]
    UnknownReference,
    #[error("payment has not settled yet")]
    NotSettled,
    #[error("payment belongs to a different user")]
    IdentityMismatch,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Drives a transaction from issued checkout to settled subscription.
/// There is no failed state: a checkout that never settles stays
/// `Pending`, and the payer simply re-runs verification after paying.
pub struct PaymentFlow {
    gateway: Arc<dyn PaymentGateway>,
    store: Arc<dyn TransactionStore>,
    ledger: Arc<SubscriptionLedger>,
    transactions: Mutex<HashMap<String, Transaction>>,
    monthly_amount: i64,
    daily_amount: i64,
}

impl PaymentFlow {
    pub async fn load(
        gateway: Arc<dyn PaymentGateway>,
        store: Arc<dyn TransactionStore>,
        ledger: Arc<SubscriptionLedger>,
        payments: &PaymentsConfig,
    ) -> Result<Arc<Self>, DatabaseError> {
        let transactions = store
            .load_transactions()
            .await?
            .into_iter()
            .map(|t| (t.reference.clone(), t))
            .collect();
        Ok(Arc::new(Self {
            gateway,
            store,
            ledger,
            transactions: Mutex::new(transactions),
            monthly_amount: payments.monthly.amount,
            daily_amount: payments.daily.amount,
        }))
    }

    pub fn plan_amount(&self, plan: PlanType) -> i64 {
        match plan {
            PlanType::Monthly => self.monthly_amount,
            PlanType::Daily => self.daily_amount,
        }
    }

    pub fn transaction(&self, reference: &str) -> Option<Transaction> {
        self.transactions.lock().get(reference).cloned()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.lock().len()
    }

    /// Creates a checkout session. The reference embeds plan, user and
    /// timestamp, which keeps it unique without a central sequence. On
    /// gateway failure nothing is recorded.
    pub async fn issue(
        &self,
        user_id: i64,
        email: &str,
        plan: PlanType,
        now: DateTime<Utc>,
    ) -> Result<Checkout, PaymentError> {
        let reference = format!("{}_{}_{}", plan.reference_prefix(), user_id, now.timestamp());
        let amount = self.plan_amount(plan);

        let checkout_url = self
            .gateway
            .create_checkout(email, amount, &reference, user_id, plan)
            .await?;

        let transaction = Transaction {
            reference: reference.clone(),
            user_id,
            amount,
            plan,
            status: TransactionStatus::Pending,
            created_at: now,
            payment_date: None,
        };
        self.transactions
            .lock()
            .insert(reference.clone(), transaction.clone());
        self.persist(transaction);

        info!(
            "payment checkout issued user={} plan={} reference={}",
            user_id, plan, reference
        );
        Ok(Checkout {
            checkout_url,
            reference,
        })
    }

    /// Pull-based verification invoked by the payer. Fails unless the
    /// gateway reports settlement and attributes the payment to the
    /// requesting user. Re-verifying a settled transaction is a no-op
    /// success and never re-extends the subscription.
    pub async fn verify(
        &self,
        reference: &str,
        requesting_user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<PlanType, VerificationError> {
        self.settle(reference, Some(requesting_user_id), now).await
    }

    /// Push-based variant for gateway webhooks: there is no requester, so
    /// the payer identity is bound to the transaction's owner instead.
    pub async fn confirm_settled(
        &self,
        reference: &str,
        now: DateTime<Utc>,
    ) -> Result<PlanType, VerificationError> {
        self.settle(reference, None, now).await
    }

    async fn settle(
        &self,
        reference: &str,
        requester: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<PlanType, VerificationError> {
        let snapshot = self
            .transaction(reference)
            .ok_or(VerificationError::UnknownReference)?;

        if let Some(requester) = requester {
            if snapshot.user_id != requester {
                return Err(VerificationError::IdentityMismatch);
            }
        }

        if snapshot.status == TransactionStatus::Succeeded {
            return Ok(snapshot.plan);
        }

        let status = self.gateway.transaction_status(reference).await?;
        if !status.settled {
            return Err(VerificationError::NotSettled);
        }
        let expected_payer = requester.unwrap_or(snapshot.user_id);
        if status.payer_user_id != Some(expected_payer) {
            return Err(VerificationError::IdentityMismatch);
        }

        // Conditional transition: only the call that flips Pending ->
        // Succeeded activates the subscription, even under a race between
        // a manual verify and the webhook.
        let transitioned = {
            let mut transactions = self.transactions.lock();
            let Some(transaction) = transactions.get_mut(reference) else {
                return Err(VerificationError::UnknownReference);
            };
            if transaction.status == TransactionStatus::Succeeded {
                None
            } else {
                transaction.status = TransactionStatus::Succeeded;
                transaction.payment_date = Some(now);
                Some(transaction.clone())
            }
        };

        if let Some(transaction) = transitioned {
            self.persist(transaction.clone());
            self.ledger
                .activate(transaction.user_id, transaction.plan, now);
            info!(
                "payment settled user={} plan={} reference={}",
                transaction.user_id, transaction.plan, reference
            );
        }
        Ok(snapshot.plan)
    }

    fn persist(&self, transaction: Transaction) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(err) = store.upsert_transaction(&transaction).await {
                warn!(
                    "failed to persist transaction {}: {}",
                    transaction.reference, err
                );
            }
        });
    }
}
