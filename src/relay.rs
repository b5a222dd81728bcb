pub use self::ledger::{is_active_premium, SubscriptionLedger};
pub use self::quota::{GateOutcome, QuotaTracker};
pub use self::rules::{RegistryError, RuleRegistry};

pub mod ledger;
pub mod quota;
pub mod rules;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::commands::CommandHandler;
use crate::telegram::{ChatProvider, TelegramClient};

const POLL_ERROR_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5);

/// Fans an inbound message out to every matching forwarding rule. Each
/// rule is handled in isolation: one owner's exhausted quota or dead
/// destination never affects another owner's delivery.
pub struct RelayCore {
    provider: Arc<dyn ChatProvider>,
    quota: Arc<QuotaTracker>,
    registry: Arc<RuleRegistry>,
}

impl RelayCore {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        quota: Arc<QuotaTracker>,
        registry: Arc<RuleRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            quota,
            registry,
        })
    }

    pub async fn dispatch_inbound(
        &self,
        source_chat_id: i64,
        message_id: i64,
        now: DateTime<Utc>,
    ) {
        for rule in self.registry.list_active_by_source(source_chat_id) {
            match self.quota.try_consume_message_quota(rule.user_id, now) {
                GateOutcome::Allowed => {}
                GateOutcome::DeniedNotify => {
                    let notice = format!(
                        "Daily limit of {} forwarded messages reached. \
                         Forwarding resumes after the reset, or upgrade with /subscribe.",
                        self.quota.daily_limit()
                    );
                    self.notify_owner(rule.user_id, &notice).await;
                    continue;
                }
                GateOutcome::Denied => continue,
            }

            match self
                .provider
                .relay_message(source_chat_id, message_id, rule.dest_chat_id)
                .await
            {
                Ok(()) => self.registry.record_forward(rule.id),
                Err(err) if err.is_permanent() => {
                    warn!(
                        "rule {} permanently failing ({} -> {}): {}",
                        rule.id, rule.source_chat_title, rule.dest_chat_title, err
                    );
                    let notice = format!(
                        "Forwarding \"{}\" -> \"{}\" failed: {}. \
                         Check the bot's access, or remove the rule with /myforwards.",
                        rule.source_chat_title, rule.dest_chat_title, err
                    );
                    self.notify_owner(rule.user_id, &notice).await;
                }
                Err(err) => {
                    debug!(
                        "rule {} transient delivery failure, message {} dropped: {}",
                        rule.id, message_id, err
                    );
                }
            }
        }
    }

    // Owner notices are best effort; a user who blocked the bot simply
    // stops receiving them.
    async fn notify_owner(&self, user_id: i64, text: &str) {
        if let Err(err) = self.provider.send_text(user_id, text).await {
            debug!("could not notify user {}: {}", user_id, err);
        }
    }
}

/// The long-poll loop: pulls updates, routes group and channel traffic to
/// the dispatcher and private traffic to the command layer. Poll errors
/// back off and retry; the loop itself never exits.
pub async fn run_polling(
    client: Arc<TelegramClient>,
    core: Arc<RelayCore>,
    commands: Arc<CommandHandler>,
) {
    info!("relay loop started");
    let mut offset = 0i64;

    loop {
        let updates = match client.get_updates(offset).await {
            Ok(updates) => updates,
            Err(err) => {
                error!("getUpdates failed: {}", err);
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let now = Utc::now();

            if let Some(post) = update.channel_post {
                core.dispatch_inbound(post.chat.id, post.message_id, now).await;
            }
            if let Some(message) = update.message {
                if message.chat.is_private() {
                    commands.handle_message(&message, now).await;
                } else {
                    core.dispatch_inbound(message.chat.id, message.message_id, now)
                        .await;
                }
            }
            if let Some(callback) = update.callback_query {
                if let Err(err) = client.answer_callback_query(&callback.id).await {
                    debug!("answerCallbackQuery failed: {}", err);
                }
                commands.handle_callback(&callback, now).await;
            }
        }
    }
}
