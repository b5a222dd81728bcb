pub use self::wizard::{PendingSource, RuleWizard, WizardStep};

pub mod wizard;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::LimitsConfig;
use crate::db::PlanType;
use crate::payments::{PaymentFlow, VerificationError};
use crate::relay::{
    is_active_premium, GateOutcome, QuotaTracker, RegistryError, RuleRegistry, SubscriptionLedger,
};
use crate::telegram::{CallbackQuery, ChatProvider, Message};

/// Everything a user can ask the bot to do in a private chat. Unrecognized
/// input stays `Text` so an active wizard can consume it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    AddForward,
    MyForwards,
    DeleteForward(Option<i64>),
    Subscribe,
    Pay(Option<PlanType>),
    Verify(Option<String>),
    Cancel,
    Text(String),
}

pub fn parse_text(text: &str) -> Command {
    let text = text.trim();
    if !text.starts_with('/') {
        return Command::Text(text.to_string());
    }

    let mut parts = text.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());
    // "/cmd@BotName" addresses a specific bot; the suffix is noise here.
    let name = head
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "addforward" => Command::AddForward,
        "myforwards" => Command::MyForwards,
        "deleteforward" => Command::DeleteForward(arg.and_then(|a| a.parse().ok())),
        "subscribe" => Command::Subscribe,
        "pay" => Command::Pay(arg.and_then(PlanType::parse)),
        "verify" => Command::Verify(arg.map(str::to_string)),
        "cancel" => Command::Cancel,
        _ => Command::Text(text.to_string()),
    }
}

/// Inline-button payloads reuse the command vocabulary.
pub fn parse_callback(data: &str) -> Option<Command> {
    match data.split_once(':') {
        Some(("pay", plan)) => Some(Command::Pay(PlanType::parse(plan))),
        Some(("delete", id)) => Some(Command::DeleteForward(id.parse().ok())),
        None if data == "subscribe" => Some(Command::Subscribe),
        _ => None,
    }
}

// "@handle" or a raw chat id (negative for groups and channels).
static CHAT_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(@[A-Za-z][A-Za-z0-9_]{4,31}|-?\d{1,20})$").expect("valid regex"));

const HELP_TEXT: &str = "I copy messages between chats you configure.\n\n\
/addforward - set up a new forwarding rule\n\
/myforwards - list your active rules\n\
/deleteforward <id> - remove a rule\n\
/subscribe - see plans and your current status\n\
/pay monthly|daily - start a premium checkout\n\
/verify <reference> - confirm a payment\n\
/cancel - abort the current setup";

pub struct CommandHandler {
    provider: Arc<dyn ChatProvider>,
    ledger: Arc<SubscriptionLedger>,
    quota: Arc<QuotaTracker>,
    registry: Arc<RuleRegistry>,
    payments: Arc<PaymentFlow>,
    wizard: RuleWizard,
    limits: LimitsConfig,
}

impl CommandHandler {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        ledger: Arc<SubscriptionLedger>,
        quota: Arc<QuotaTracker>,
        registry: Arc<RuleRegistry>,
        payments: Arc<PaymentFlow>,
        limits: LimitsConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            ledger,
            quota,
            registry,
            payments,
            wizard: RuleWizard::default(),
            limits,
        })
    }

    pub async fn handle_message(&self, message: &Message, now: DateTime<Utc>) {
        let Some(from) = &message.from else { return };

        self.ledger
            .get_or_create(from.id, from.username.as_deref(), now);
        if !self.gate_command(from.id, message.chat.id, now).await {
            return;
        }

        // A forwarded message is the easiest way to point the wizard at a
        // chat the user can't name.
        let origin_chat = message
            .forward_origin
            .as_ref()
            .and_then(|origin| origin.chat.as_ref());
        if let (Some(origin), Some(step)) = (origin_chat, self.wizard.step(from.id)) {
            self.wizard_input(from.id, message.chat.id, step, &origin.id.to_string(), now)
                .await;
            return;
        }

        let Some(text) = &message.text else { return };
        self.dispatch(from.id, message.chat.id, parse_text(text), now)
            .await;
    }

    pub async fn handle_callback(&self, callback: &CallbackQuery, now: DateTime<Utc>) {
        let chat_id = callback
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(callback.from.id);

        self.ledger
            .get_or_create(callback.from.id, callback.from.username.as_deref(), now);
        if !self.gate_command(callback.from.id, chat_id, now).await {
            return;
        }
        let Some(command) = callback.data.as_deref().and_then(parse_callback) else {
            debug!("unknown callback payload: {:?}", callback.data);
            return;
        };
        self.dispatch(callback.from.id, chat_id, command, now).await;
    }

    async fn gate_command(&self, user_id: i64, chat_id: i64, now: DateTime<Utc>) -> bool {
        match self.quota.check_command_rate(user_id, now) {
            GateOutcome::Allowed => true,
            GateOutcome::DeniedNotify => {
                self.reply(chat_id, "Too many commands. Give it a minute and try again.")
                    .await;
                false
            }
            GateOutcome::Denied => false,
        }
    }

    async fn dispatch(&self, user_id: i64, chat_id: i64, command: Command, now: DateTime<Utc>) {
        match command {
            Command::Start | Command::Help => self.reply(chat_id, HELP_TEXT).await,
            Command::Cancel => {
                let text = if self.wizard.cancel(user_id) {
                    "Setup cancelled."
                } else {
                    "Nothing to cancel."
                };
                self.reply(chat_id, text).await;
            }
            Command::AddForward => self.start_wizard(user_id, chat_id, now).await,
            Command::Text(input) => match self.wizard.step(user_id) {
                Some(step) => {
                    self.wizard_input(user_id, chat_id, step, &input, now).await
                }
                None => self.reply(chat_id, "I didn't get that. See /help.").await,
            },
            Command::MyForwards => self.list_rules(user_id, chat_id).await,
            Command::DeleteForward(None) => {
                self.reply(chat_id, "Usage: /deleteforward <id> (ids are in /myforwards).")
                    .await
            }
            Command::DeleteForward(Some(rule_id)) => {
                self.delete_rule(user_id, chat_id, rule_id).await
            }
            Command::Subscribe => self.show_subscription(user_id, chat_id, now).await,
            Command::Pay(None) => {
                self.reply(chat_id, "Usage: /pay monthly or /pay daily.").await
            }
            Command::Pay(Some(plan)) => self.start_checkout(user_id, chat_id, plan, now).await,
            Command::Verify(None) => {
                self.reply(chat_id, "Usage: /verify <reference> from your checkout message.")
                    .await
            }
            Command::Verify(Some(reference)) => {
                self.verify_payment(user_id, chat_id, &reference, now).await
            }
        }
    }

    async fn start_wizard(&self, user_id: i64, chat_id: i64, now: DateTime<Utc>) {
        let premium = self
            .ledger
            .get(user_id)
            .map(|u| is_active_premium(&u, now))
            .unwrap_or(false);
        let active = self.registry.list_active_by_owner(user_id).len();
        if !premium && active >= self.limits.free_active_rules {
            let text = format!(
                "The free plan allows {} active rule(s) and you already have {}. \
                 Upgrade with /subscribe or remove one with /deleteforward.",
                self.limits.free_active_rules, active
            );
            self.reply(chat_id, &text).await;
            return;
        }

        self.wizard.begin(user_id);
        self.reply(
            chat_id,
            "Which chat should I forward FROM? Send its @handle or chat id, \
             or forward me any message from it. The bot must already be in \
             that chat. /cancel to abort.",
        )
        .await;
    }

    async fn wizard_input(
        &self,
        user_id: i64,
        chat_id: i64,
        step: WizardStep,
        input: &str,
        now: DateTime<Utc>,
    ) {
        if !CHAT_IDENTIFIER.is_match(input) {
            self.reply(
                chat_id,
                "That doesn't look like a chat. Send an @handle or a numeric chat id, \
                 or /cancel.",
            )
            .await;
            return;
        }

        let info = match self.provider.get_chat_info(input).await {
            Ok(info) => info,
            Err(err) => {
                debug!("wizard chat lookup failed for {}: {}", input, err);
                self.reply(
                    chat_id,
                    "I can't see that chat. Add the bot to it first, then try again.",
                )
                .await;
                return;
            }
        };
        let membership = match self.provider.bot_membership(info.id).await {
            Ok(membership) => membership,
            Err(err) => {
                debug!("wizard membership check failed for {}: {}", info.id, err);
                self.reply(
                    chat_id,
                    "I can't see that chat. Add the bot to it first, then try again.",
                )
                .await;
                return;
            }
        };
        if membership == crate::telegram::MembershipStatus::NotMember {
            let text = format!("The bot is not a member of \"{}\". Add it and retry.", info.title);
            self.reply(chat_id, &text).await;
            return;
        }
        if info.kind == "channel" && !membership.is_admin() {
            let text = format!(
                "The bot must be an administrator of the channel \"{}\".",
                info.title
            );
            self.reply(chat_id, &text).await;
            return;
        }

        match step {
            WizardStep::AwaitingSource => {
                self.wizard.await_destination(
                    user_id,
                    PendingSource {
                        chat_id: info.id,
                        title: info.title.clone(),
                    },
                );
                let text = format!(
                    "Forwarding from \"{}\". Now send the chat to forward TO.",
                    info.title
                );
                self.reply(chat_id, &text).await;
            }
            WizardStep::AwaitingDestination(source) => {
                if info.id == source.chat_id {
                    self.reply(chat_id, "Source and destination must be different chats.")
                        .await;
                    return;
                }
                let rule = self.registry.create(
                    user_id,
                    source.chat_id,
                    &source.title,
                    info.id,
                    &info.title,
                    now,
                );
                self.wizard.finish(user_id);
                let text = format!(
                    "Done. Rule #{}: \"{}\" -> \"{}\". Remove it anytime with /deleteforward {}.",
                    rule.id, rule.source_chat_title, rule.dest_chat_title, rule.id
                );
                self.reply(chat_id, &text).await;
            }
        }
    }

    async fn list_rules(&self, user_id: i64, chat_id: i64) {
        let rules = self.registry.list_active_by_owner(user_id);
        if rules.is_empty() {
            self.reply(chat_id, "No active rules. Create one with /addforward.")
                .await;
            return;
        }
        let mut text = String::from("Your forwarding rules:\n");
        for rule in rules {
            text.push_str(&format!(
                "#{}: \"{}\" -> \"{}\" ({} forwarded)\n",
                rule.id, rule.source_chat_title, rule.dest_chat_title, rule.messages_forwarded
            ));
        }
        self.reply(chat_id, text.trim_end()).await;
    }

    async fn delete_rule(&self, user_id: i64, chat_id: i64, rule_id: i64) {
        let text = match self.registry.deactivate(rule_id, user_id) {
            Ok(()) => format!("Rule #{} removed.", rule_id),
            Err(RegistryError::NotFound) => format!("There is no rule #{}.", rule_id),
            Err(RegistryError::NotOwner) => {
                format!("Rule #{} belongs to someone else.", rule_id)
            }
        };
        self.reply(chat_id, &text).await;
    }

    async fn show_subscription(&self, user_id: i64, chat_id: i64, now: DateTime<Utc>) {
        let status = match self.ledger.get(user_id) {
            Some(user) if is_active_premium(&user, now) => {
                let end = user
                    .subscription_end
                    .map(|e| e.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_default();
                format!("You are premium until {}. Forwarding is unmetered.", end)
            }
            Some(user) => format!(
                "Free plan: {} of {} messages used in the current window, {} active rule(s) allowed.",
                user.daily_messages,
                self.quota.daily_limit(),
                self.limits.free_active_rules
            ),
            None => "Free plan.".to_string(),
        };

        let monthly = self.payments.plan_amount(PlanType::Monthly) / 100;
        let daily = self.payments.plan_amount(PlanType::Daily) / 100;
        let buttons = vec![
            (format!("Monthly (NGN {})", monthly), "pay:monthly".to_string()),
            (format!("Daily (NGN {})", daily), "pay:daily".to_string()),
        ];
        let text = format!("{}\n\nUpgrade to premium:", status);
        if let Err(err) = self.provider.send_menu(chat_id, &text, &buttons).await {
            debug!("could not send plan menu to {}: {}", chat_id, err);
        }
    }

    async fn start_checkout(
        &self,
        user_id: i64,
        chat_id: i64,
        plan: PlanType,
        now: DateTime<Utc>,
    ) {
        // The gateway insists on an email address; the bot only knows
        // Telegram ids, so checkout gets a synthetic one.
        let email = format!("user{}@telegram-forwarder.local", user_id);
        match self.payments.issue(user_id, &email, plan, now).await {
            Ok(checkout) => {
                let text = format!(
                    "Pay for the {} plan here:\n{}\n\nAfter paying, run /verify {}",
                    plan, checkout.checkout_url, checkout.reference
                );
                self.reply(chat_id, &text).await;
            }
            Err(err) => {
                warn!("checkout failed for user {}: {}", user_id, err);
                self.reply(chat_id, "Could not start the checkout. Try again in a bit.")
                    .await;
            }
        }
    }

    async fn verify_payment(
        &self,
        user_id: i64,
        chat_id: i64,
        reference: &str,
        now: DateTime<Utc>,
    ) {
        let text = match self.payments.verify(reference, user_id, now).await {
            Ok(plan) => {
                let end = self
                    .ledger
                    .get(user_id)
                    .and_then(|u| u.subscription_end)
                    .map(|e| e.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_default();
                format!("Payment confirmed. {} plan active until {}.", plan, end)
            }
            Err(VerificationError::UnknownReference) => {
                "No payment with that reference. Check the /verify message from your checkout."
                    .to_string()
            }
            Err(VerificationError::NotSettled) => {
                "That payment hasn't settled yet. Finish the checkout and try again.".to_string()
            }
            Err(VerificationError::IdentityMismatch) => {
                "That payment doesn't belong to this account.".to_string()
            }
            Err(VerificationError::Gateway(err)) => {
                warn!("verification failed for {}: {}", reference, err);
                "Verification is temporarily unavailable. Try again shortly.".to_string()
            }
        };
        self.reply(chat_id, &text).await;
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(err) = self.provider.send_text(chat_id, text).await {
            debug!("could not reply to {}: {}", chat_id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use secrecy::SecretString;

    use super::{parse_callback, parse_text, Command, CommandHandler};
    use crate::config::{LimitsConfig, PaymentsConfig, PlanPricing};
    use crate::db::memory::MemoryStore;
    use crate::db::PlanType;
    use crate::payments::{
        GatewayError, PaymentFlow, PaymentGateway, SettlementStatus,
    };
    use crate::relay::{QuotaTracker, RuleRegistry, SubscriptionLedger};
    use crate::telegram::{
        Chat, ChatInfo, ChatProvider, MembershipStatus, Message, ProviderError, TgUser,
    };

    #[derive(Default)]
    struct MockProvider {
        chats: Mutex<HashMap<String, ChatInfo>>,
        memberships: Mutex<HashMap<i64, MembershipStatus>>,
        texts: Mutex<Vec<(i64, String)>>,
        menus: Mutex<Vec<(i64, String, Vec<(String, String)>)>>,
    }

    impl MockProvider {
        fn add_chat(&self, identifier: &str, id: i64, title: &str, kind: &str, membership: MembershipStatus) {
            self.chats.lock().insert(
                identifier.to_string(),
                ChatInfo {
                    id,
                    title: title.to_string(),
                    kind: kind.to_string(),
                },
            );
            self.memberships.lock().insert(id, membership);
        }

        fn texts_for(&self, chat_id: i64) -> Vec<String> {
            self.texts
                .lock()
                .iter()
                .filter(|(id, _)| *id == chat_id)
                .map(|(_, t)| t.clone())
                .collect()
        }

        fn last_text(&self, chat_id: i64) -> String {
            self.texts_for(chat_id).last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl ChatProvider for MockProvider {
        async fn get_chat_info(&self, identifier: &str) -> Result<ChatInfo, ProviderError> {
            self.chats
                .lock()
                .get(identifier)
                .cloned()
                .ok_or_else(|| ProviderError::permanent("getChat failed: chat not found"))
        }

        async fn bot_membership(&self, chat_id: i64) -> Result<MembershipStatus, ProviderError> {
            Ok(self
                .memberships
                .lock()
                .get(&chat_id)
                .copied()
                .unwrap_or(MembershipStatus::NotMember))
        }

        async fn relay_message(
            &self,
            _source_chat_id: i64,
            _message_id: i64,
            _dest_chat_id: i64,
        ) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ProviderError> {
            self.texts.lock().push((chat_id, text.to_string()));
            Ok(())
        }

        async fn send_menu(
            &self,
            chat_id: i64,
            text: &str,
            buttons: &[(String, String)],
        ) -> Result<(), ProviderError> {
            self.menus
                .lock()
                .push((chat_id, text.to_string(), buttons.to_vec()));
            Ok(())
        }
    }

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn create_checkout(
            &self,
            _email: &str,
            _amount: i64,
            reference: &str,
            _user_id: i64,
            _plan: PlanType,
        ) -> Result<String, GatewayError> {
            Ok(format!("https://checkout.example/{}", reference))
        }

        async fn transaction_status(
            &self,
            _reference: &str,
        ) -> Result<SettlementStatus, GatewayError> {
            Ok(SettlementStatus {
                settled: false,
                payer_user_id: None,
            })
        }
    }

    struct Fixture {
        provider: Arc<MockProvider>,
        ledger: Arc<SubscriptionLedger>,
        registry: Arc<RuleRegistry>,
        payments: Arc<PaymentFlow>,
        handler: Arc<CommandHandler>,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let provider = Arc::new(MockProvider::default());
        let ledger = SubscriptionLedger::load(store.clone()).await.expect("ledger");
        let quota = Arc::new(QuotaTracker::new(ledger.clone(), LimitsConfig::default()));
        let registry = RuleRegistry::load(store.clone()).await.expect("registry");
        let payments_config = PaymentsConfig {
            secret_key: SecretString::from("sk_test"),
            base_url: "https://api.paystack.co".to_string(),
            callback_url: None,
            monthly: PlanPricing { amount: 150_000 },
            daily: PlanPricing { amount: 10_000 },
        };
        let payments = PaymentFlow::load(
            Arc::new(MockGateway),
            store,
            ledger.clone(),
            &payments_config,
        )
        .await
        .expect("flow");
        let handler = CommandHandler::new(
            provider.clone(),
            ledger.clone(),
            quota,
            registry.clone(),
            payments.clone(),
            LimitsConfig::default(),
        );
        Fixture {
            provider,
            ledger,
            registry,
            payments,
            handler,
        }
    }

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    fn private_message(user_id: i64, text: &str) -> Message {
        Message {
            message_id: 1,
            from: Some(TgUser {
                id: user_id,
                username: Some("alice".to_string()),
                first_name: None,
            }),
            chat: Chat {
                id: user_id,
                kind: "private".to_string(),
                title: None,
                username: None,
                first_name: Some("Alice".to_string()),
            },
            text: Some(text.to_string()),
            forward_origin: None,
        }
    }

    fn forwarded_message(user_id: i64, origin: Chat) -> Message {
        let mut message = private_message(user_id, "");
        message.text = None;
        message.forward_origin = Some(crate::telegram::types::ForwardOrigin {
            kind: "channel".to_string(),
            chat: Some(origin),
        });
        message
    }

    async fn send(f: &Fixture, user_id: i64, text: &str) {
        f.handler
            .handle_message(&private_message(user_id, text), t0())
            .await;
    }

    #[test]
    fn text_commands_parse() {
        assert_eq!(parse_text("/start"), Command::Start);
        assert_eq!(parse_text("/help@ForwarderBot"), Command::Help);
        assert_eq!(parse_text("/deleteforward 3"), Command::DeleteForward(Some(3)));
        assert_eq!(parse_text("/deleteforward"), Command::DeleteForward(None));
        assert_eq!(parse_text("/pay monthly"), Command::Pay(Some(PlanType::Monthly)));
        assert_eq!(parse_text("/pay weekly"), Command::Pay(None));
        assert_eq!(
            parse_text("/verify SUBM_1_2"),
            Command::Verify(Some("SUBM_1_2".to_string()))
        );
        assert_eq!(parse_text("hello"), Command::Text("hello".to_string()));
    }

    #[test]
    fn callback_payloads_parse() {
        assert_eq!(
            parse_callback("pay:daily"),
            Some(Command::Pay(Some(PlanType::Daily)))
        );
        assert_eq!(
            parse_callback("delete:5"),
            Some(Command::DeleteForward(Some(5)))
        );
        assert_eq!(parse_callback("subscribe"), Some(Command::Subscribe));
        assert_eq!(parse_callback("nonsense"), None);
    }

    #[tokio::test]
    async fn wizard_creates_rule_end_to_end() {
        let f = fixture().await;
        f.provider
            .add_chat("@news", -100, "News", "channel", MembershipStatus::Admin);
        f.provider
            .add_chat("@mygroup", -200, "My Group", "supergroup", MembershipStatus::Member);

        send(&f, 42, "/addforward").await;
        send(&f, 42, "@news").await;
        send(&f, 42, "@mygroup").await;

        let rules = f.registry.list_active_by_owner(42);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].source_chat_id, -100);
        assert_eq!(rules[0].dest_chat_id, -200);
        assert_eq!(rules[0].source_chat_title, "News");
        assert!(f.provider.last_text(42).contains("Done. Rule #"));
    }

    #[tokio::test]
    async fn free_plan_rule_limit_blocks_second_rule() {
        let f = fixture().await;
        f.ledger.get_or_create(42, None, t0());
        f.registry.create(42, -100, "News", -200, "Group", t0());

        send(&f, 42, "/addforward").await;
        assert!(f.provider.last_text(42).contains("/subscribe"));

        // No wizard was started, so chat-looking input is not consumed.
        send(&f, 42, "@another").await;
        assert!(f.provider.last_text(42).contains("/help"));
        assert_eq!(f.registry.list_active_by_owner(42).len(), 1);
    }

    #[tokio::test]
    async fn premium_user_may_hold_several_rules() {
        let f = fixture().await;
        f.ledger.get_or_create(42, None, t0());
        f.ledger.activate(42, PlanType::Monthly, t0());
        f.registry.create(42, -100, "News", -200, "Group", t0());
        f.provider
            .add_chat("@extra", -300, "Extra", "supergroup", MembershipStatus::Member);
        f.provider
            .add_chat("@sink", -400, "Sink", "supergroup", MembershipStatus::Member);

        send(&f, 42, "/addforward").await;
        assert!(f.provider.last_text(42).contains("FROM"));
        send(&f, 42, "@extra").await;
        send(&f, 42, "@sink").await;
        assert_eq!(f.registry.list_active_by_owner(42).len(), 2);
    }

    #[tokio::test]
    async fn wizard_accepts_a_forwarded_message_as_source() {
        let f = fixture().await;
        f.provider
            .add_chat("-1001234", -1001234, "News", "channel", MembershipStatus::Admin);
        f.provider
            .add_chat("@sink", -400, "Sink", "supergroup", MembershipStatus::Member);

        send(&f, 42, "/addforward").await;
        let origin = Chat {
            id: -1001234,
            kind: "channel".to_string(),
            title: Some("News".to_string()),
            username: None,
            first_name: None,
        };
        f.handler
            .handle_message(&forwarded_message(42, origin), t0())
            .await;
        send(&f, 42, "@sink").await;

        let rules = f.registry.list_active_by_owner(42);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].source_chat_id, -1001234);
    }

    #[tokio::test]
    async fn wizard_rejects_malformed_identifier_and_keeps_waiting() {
        let f = fixture().await;
        f.provider
            .add_chat("@news", -100, "News", "channel", MembershipStatus::Admin);
        f.provider
            .add_chat("@sink", -400, "Sink", "supergroup", MembershipStatus::Member);

        send(&f, 42, "/addforward").await;
        send(&f, 42, "not a chat!!").await;
        assert!(f.provider.last_text(42).contains("doesn't look like a chat"));

        send(&f, 42, "@news").await;
        send(&f, 42, "@sink").await;
        assert_eq!(f.registry.list_active_by_owner(42).len(), 1);
    }

    #[tokio::test]
    async fn wizard_requires_channel_admin() {
        let f = fixture().await;
        f.provider
            .add_chat("@news", -100, "News", "channel", MembershipStatus::Member);

        send(&f, 42, "/addforward").await;
        send(&f, 42, "@news").await;
        assert!(f.provider.last_text(42).contains("administrator"));
        assert!(f.registry.list_active_by_owner(42).is_empty());
    }

    #[tokio::test]
    async fn wizard_rejects_same_source_and_destination() {
        let f = fixture().await;
        f.provider
            .add_chat("@news", -100, "News", "supergroup", MembershipStatus::Member);

        send(&f, 42, "/addforward").await;
        send(&f, 42, "@news").await;
        send(&f, 42, "@news").await;
        assert!(f.provider.last_text(42).contains("must be different"));
        assert!(f.registry.list_active_by_owner(42).is_empty());
    }

    #[tokio::test]
    async fn cancel_discards_wizard_state() {
        let f = fixture().await;
        f.provider
            .add_chat("@news", -100, "News", "channel", MembershipStatus::Admin);

        send(&f, 42, "/addforward").await;
        send(&f, 42, "/cancel").await;
        assert_eq!(f.provider.last_text(42), "Setup cancelled.");

        send(&f, 42, "@news").await;
        assert!(f.provider.last_text(42).contains("/help"));
        assert!(f.registry.list_active_by_owner(42).is_empty());
    }

    #[tokio::test]
    async fn deleteforward_rejects_foreign_rules() {
        let f = fixture().await;
        let rule = f.registry.create(7, -100, "News", -200, "Group", t0());

        send(&f, 42, &format!("/deleteforward {}", rule.id)).await;
        assert!(f.provider.last_text(42).contains("someone else"));
        assert!(f.registry.get(rule.id).unwrap().is_active);

        send(&f, 7, &format!("/deleteforward {}", rule.id)).await;
        assert!(!f.registry.get(rule.id).unwrap().is_active);
    }

    #[tokio::test]
    async fn pay_issues_checkout_with_verify_hint() {
        let f = fixture().await;
        send(&f, 42, "/pay monthly").await;

        let reply = f.provider.last_text(42);
        assert!(reply.contains("https://checkout.example/SUBM_42_"));
        assert!(reply.contains("/verify SUBM_42_"));
        assert_eq!(f.payments.transaction_count(), 1);
    }

    #[tokio::test]
    async fn verify_reports_unknown_reference() {
        let f = fixture().await;
        send(&f, 42, "/verify SUBM_42_123").await;
        assert!(f.provider.last_text(42).contains("No payment"));
    }

    #[tokio::test]
    async fn subscribe_offers_plan_buttons() {
        let f = fixture().await;
        send(&f, 42, "/subscribe").await;

        let menus = f.provider.menus.lock().clone();
        assert_eq!(menus.len(), 1);
        let (_, text, buttons) = &menus[0];
        assert!(text.contains("Free plan"));
        assert!(buttons.iter().any(|(_, data)| data == "pay:monthly"));
        assert!(buttons.iter().any(|(_, data)| data == "pay:daily"));
    }

    #[tokio::test]
    async fn command_flood_gets_one_notice_then_silence() {
        let f = fixture().await;
        for _ in 0..13 {
            send(&f, 42, "/help").await;
        }
        let replies = f.provider.texts_for(42);
        // 10 helps, one slow-down notice, then nothing.
        assert_eq!(replies.len(), 11);
        assert!(replies[10].contains("Too many commands"));
    }
}
