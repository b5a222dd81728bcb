use async_trait::async_trait;
use thiserror::Error;

/// Whether retrying a failed provider call can succeed without external
/// remediation. Permanent failures (bot kicked, chat deleted) are surfaced
/// to the rule owner; transient ones are only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ProviderErrorKind::Permanent
    }
}

#[derive(Debug, Clone)]
pub struct ChatInfo {
    pub id: i64,
    pub title: String,
    pub kind: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    Owner,
    Admin,
    Member,
    NotMember,
}

impl MembershipStatus {
    pub fn is_admin(&self) -> bool {
        matches!(self, MembershipStatus::Owner | MembershipStatus::Admin)
    }
}

/// The messaging transport as seen by the dispatcher and the command layer.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Resolves a chat from an `@handle` or a numeric id (negative for
    /// groups and channels).
    async fn get_chat_info(&self, identifier: &str) -> Result<ChatInfo, ProviderError>;
    async fn bot_membership(&self, chat_id: i64) -> Result<MembershipStatus, ProviderError>;
    /// Copies one message into the destination chat.
    async fn relay_message(
        &self,
        source_chat_id: i64,
        message_id: i64,
        dest_chat_id: i64,
    ) -> Result<(), ProviderError>;
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ProviderError>;
    /// Sends a text with one inline button per `(label, callback data)` pair.
    async fn send_menu(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[(String, String)],
    ) -> Result<(), ProviderError>;
}

// The single place that decides permanent vs transient, so the dispatcher
// never branches on error message text.
const PERMANENT_MARKERS: &[&str] = &[
    "chat not found",
    "bot was kicked",
    "bot was blocked",
    "user is deactivated",
    "not enough rights",
    "have no rights",
    "chat_write_forbidden",
];

pub fn classify_api_error(error_code: Option<i64>, description: &str) -> ProviderErrorKind {
    let description = description.to_ascii_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| description.contains(m)) {
        return ProviderErrorKind::Permanent;
    }
    match error_code {
        Some(403) => ProviderErrorKind::Permanent,
        _ => ProviderErrorKind::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_api_error, ProviderErrorKind};

    #[test]
    fn kicked_bot_is_permanent() {
        assert_eq!(
            classify_api_error(Some(403), "Forbidden: bot was kicked from the channel chat"),
            ProviderErrorKind::Permanent
        );
    }

    #[test]
    fn missing_chat_is_permanent_regardless_of_code() {
        assert_eq!(
            classify_api_error(Some(400), "Bad Request: chat not found"),
            ProviderErrorKind::Permanent
        );
    }

    #[test]
    fn rate_limit_is_transient() {
        assert_eq!(
            classify_api_error(Some(429), "Too Many Requests: retry after 5"),
            ProviderErrorKind::Transient
        );
    }

    #[test]
    fn server_errors_are_transient() {
        assert_eq!(
            classify_api_error(Some(502), "Bad Gateway"),
            ProviderErrorKind::Transient
        );
    }
}
