use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A bot user. Subscription fields are owned by the subscription ledger,
/// quota fields by the quota tracker; both share the user row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub is_premium: bool,
    pub subscription_end: Option<DateTime<Utc>>,
    pub daily_messages: i32,
    /// Start of the rolling 24h quota window `daily_messages` counts against.
    pub last_reset: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(user_id: i64, username: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            username,
            is_premium: false,
            subscription_end: None,
            daily_messages: 0,
            last_reset: now,
            created_at: now,
        }
    }
}

/// A source-chat to destination-chat relaying directive. Soft-deleted via
/// `is_active`; rows are never removed so forwarding counters survive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub id: i64,
    pub user_id: i64,
    pub source_chat_id: i64,
    pub source_chat_title: String,
    pub dest_chat_id: i64,
    pub dest_chat_title: String,
    pub is_active: bool,
    pub messages_forwarded: i64,
    pub created_at: DateTime<Utc>,
}

/// A payment checkout attempt, keyed by its gateway-visible reference.
/// There is no failed state: an unconfirmed payment stays `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub reference: String,
    pub user_id: i64,
    pub amount: i64,
    pub plan: PlanType,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub payment_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Monthly,
    Daily,
}

impl PlanType {
    pub fn duration(&self) -> Duration {
        match self {
            PlanType::Monthly => Duration::days(30),
            PlanType::Daily => Duration::days(1),
        }
    }

    pub fn reference_prefix(&self) -> &'static str {
        match self {
            PlanType::Monthly => "SUBM",
            PlanType::Daily => "SUBD",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Monthly => "monthly",
            PlanType::Daily => "daily",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "monthly" => Some(PlanType::Monthly),
            "daily" => Some(PlanType::Daily),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Succeeded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Succeeded => "succeeded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TransactionStatus::Pending),
            // Rows written by early revisions used the gateway's word.
            "succeeded" | "success" => Some(TransactionStatus::Succeeded),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PlanType, TransactionStatus};

    #[test]
    fn plan_type_round_trips_through_strings() {
        for plan in [PlanType::Monthly, PlanType::Daily] {
            assert_eq!(PlanType::parse(plan.as_str()), Some(plan));
        }
        assert_eq!(PlanType::parse("weekly"), None);
    }

    #[test]
    fn plan_durations_match_billing_periods() {
        assert_eq!(PlanType::Monthly.duration(), chrono::Duration::days(30));
        assert_eq!(PlanType::Daily.duration(), chrono::Duration::days(1));
    }

    #[test]
    fn legacy_success_status_still_parses() {
        assert_eq!(
            TransactionStatus::parse("success"),
            Some(TransactionStatus::Succeeded)
        );
    }
}
