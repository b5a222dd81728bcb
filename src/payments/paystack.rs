use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::Config;
use crate::db::PlanType;

use super::gateway::{GatewayError, PaymentGateway, SettlementStatus};

/// Paystack REST client. Secret key is sent as a bearer token; all calls
/// share the same bounded timeout as the messaging transport.
pub struct PaystackClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: secrecy::SecretString,
    callback_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaystackEnvelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    status: String,
    metadata: Option<VerifyMetadata>,
}

#[derive(Debug, Deserialize)]
struct VerifyMetadata {
    // Paystack may echo metadata numbers back as strings.
    user_id: Option<serde_json::Value>,
}

fn metadata_user_id(metadata: Option<&VerifyMetadata>) -> Option<i64> {
    let value = metadata?.user_id.as_ref()?;
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl PaystackClient {
    pub fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.bot.request_timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.payments.base_url.trim_end_matches('/').to_string(),
            secret_key: config.payments.secret_key.clone(),
            callback_url: config.payments.callback_url.clone(),
        })
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.secret_key.expose_secret())
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    async fn create_checkout(
        &self,
        email: &str,
        amount: i64,
        reference: &str,
        user_id: i64,
        plan: PlanType,
    ) -> Result<String, GatewayError> {
        let url = format!("{}/transaction/initialize", self.base_url);
        let mut body = json!({
            "email": email,
            "amount": amount,
            "reference": reference,
            "metadata": {
                "user_id": user_id,
                "plan": plan.as_str(),
            },
        });
        if let Some(callback) = &self.callback_url {
            body["callback_url"] = json!(callback);
        }

        let response = self
            .http
            .post(&url)
            .header("Authorization", self.bearer())
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let envelope: PaystackEnvelope<InitializeData> = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !envelope.status {
            return Err(GatewayError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "initialize declined".to_string()),
            ));
        }
        let data = envelope
            .data
            .ok_or_else(|| GatewayError::Rejected("missing initialize payload".to_string()))?;
        debug!("paystack checkout created reference={}", reference);
        Ok(data.authorization_url)
    }

    async fn transaction_status(
        &self,
        reference: &str,
    ) -> Result<SettlementStatus, GatewayError> {
        let url = format!("{}/transaction/verify/{}", self.base_url, reference);
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.bearer())
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let envelope: PaystackEnvelope<VerifyData> = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !envelope.status {
            return Err(GatewayError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "verify declined".to_string()),
            ));
        }
        let data = envelope
            .data
            .ok_or_else(|| GatewayError::Rejected("missing verify payload".to_string()))?;

        Ok(SettlementStatus {
            settled: data.status == "success",
            payer_user_id: metadata_user_id(data.metadata.as_ref()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{metadata_user_id, VerifyMetadata};

    #[test]
    fn metadata_user_id_accepts_numbers_and_strings() {
        let numeric = VerifyMetadata {
            user_id: Some(serde_json::json!(42)),
        };
        let stringy = VerifyMetadata {
            user_id: Some(serde_json::json!("42")),
        };
        let junk = VerifyMetadata {
            user_id: Some(serde_json::json!({"nested": true})),
        };
        assert_eq!(metadata_user_id(Some(&numeric)), Some(42));
        assert_eq!(metadata_user_id(Some(&stringy)), Some(42));
        assert_eq!(metadata_user_id(Some(&junk)), None);
        assert_eq!(metadata_user_id(None), None);
    }
}
