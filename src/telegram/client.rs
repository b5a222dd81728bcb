use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use crate::config::Config;

use super::provider::{
    classify_api_error, ChatInfo, ChatProvider, MembershipStatus, ProviderError,
};
use super::types::{ApiResponse, BotIdentity, Chat, ChatMember, Update};

/// Telegram Bot API client over HTTPS. Every call is bounded by the
/// configured request timeout; only getUpdates long-polls past it.
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    poll_timeout_secs: u64,
    bot_id: i64,
    bot_username: Option<String>,
}

fn map_transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::transient(format!("telegram transport error: {}", err))
}

impl TelegramClient {
    pub async fn new(config: Arc<Config>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.bot.request_timeout_secs))
            .build()?;

        let base_url = format!(
            "{}/bot{}",
            config.bot.api_url.trim_end_matches('/'),
            config.bot.token.expose_secret()
        );

        let mut client = Self {
            http,
            base_url,
            poll_timeout_secs: config.bot.poll_timeout_secs,
            bot_id: 0,
            bot_username: None,
        };

        let me: BotIdentity = client.call("getMe", json!({})).await?;
        client.bot_id = me.id;
        client.bot_username = me.username;
        info!(
            "telegram client ready as @{}",
            client.bot_username.as_deref().unwrap_or("unknown")
        );
        Ok(client)
    }

    pub fn bot_id(&self) -> i64 {
        self.bot_id
    }

    pub fn bot_username(&self) -> Option<&str> {
        self.bot_username.as_deref()
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}", self.base_url, method);
        let mut request = self.http.post(&url).json(&params);
        if method == "getUpdates" {
            // Long poll needs headroom over the server-side wait.
            request = request.timeout(Duration::from_secs(self.poll_timeout_secs + 10));
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let api: ApiResponse<T> = response.json().await.map_err(map_transport_error)?;

        if api.ok {
            api.result
                .ok_or_else(|| ProviderError::transient(format!("{}: empty result", method)))
        } else {
            let description = api
                .description
                .unwrap_or_else(|| "unknown telegram error".to_string());
            debug!(
                "telegram api error method={} code={:?} description={}",
                method, api.error_code, description
            );
            Err(ProviderError {
                kind: classify_api_error(api.error_code, &description),
                message: format!("{} failed: {}", method, description),
            })
        }
    }

    /// One long-poll round; returns the updates after `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ProviderError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message", "channel_post", "callback_query"],
            }),
        )
        .await
    }

    pub async fn answer_callback_query(&self, callback_id: &str) -> Result<(), ProviderError> {
        let _: bool = self
            .call("answerCallbackQuery", json!({ "callback_query_id": callback_id }))
            .await?;
        Ok(())
    }

    fn chat_param(identifier: &str) -> serde_json::Value {
        match identifier.parse::<i64>() {
            Ok(id) => json!(id),
            Err(_) => json!(identifier),
        }
    }
}

#[async_trait]
impl ChatProvider for TelegramClient {
    async fn get_chat_info(&self, identifier: &str) -> Result<ChatInfo, ProviderError> {
        let chat: Chat = self
            .call("getChat", json!({ "chat_id": Self::chat_param(identifier) }))
            .await?;
        Ok(ChatInfo {
            id: chat.id,
            title: chat.display_title(),
            kind: chat.kind,
        })
    }

    async fn bot_membership(&self, chat_id: i64) -> Result<MembershipStatus, ProviderError> {
        let member: ChatMember = self
            .call(
                "getChatMember",
                json!({ "chat_id": chat_id, "user_id": self.bot_id }),
            )
            .await?;
        Ok(match member.status.as_str() {
            "creator" => MembershipStatus::Owner,
            "administrator" => MembershipStatus::Admin,
            "member" | "restricted" => MembershipStatus::Member,
            _ => MembershipStatus::NotMember,
        })
    }

    async fn relay_message(
        &self,
        source_chat_id: i64,
        message_id: i64,
        dest_chat_id: i64,
    ) -> Result<(), ProviderError> {
        let _: serde_json::Value = self
            .call(
                "copyMessage",
                json!({
                    "chat_id": dest_chat_id,
                    "from_chat_id": source_chat_id,
                    "message_id": message_id,
                }),
            )
            .await?;
        Ok(())
    }

    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ProviderError> {
        let _: serde_json::Value = self
            .call("sendMessage", json!({ "chat_id": chat_id, "text": text }))
            .await?;
        Ok(())
    }

    async fn send_menu(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[(String, String)],
    ) -> Result<(), ProviderError> {
        let keyboard: Vec<_> = buttons
            .iter()
            .map(|(label, data)| json!([{ "text": label, "callback_data": data }]))
            .collect();
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": text,
                    "reply_markup": { "inline_keyboard": keyboard },
                }),
            )
            .await?;
        Ok(())
    }
}
