pub use self::client::TelegramClient;
pub use self::provider::{
    classify_api_error, ChatInfo, ChatProvider, MembershipStatus, ProviderError, ProviderErrorKind,
};
pub use self::types::{CallbackQuery, Chat, ChatMember, ForwardOrigin, Message, TgUser, Update};

mod client;
pub mod provider;
pub mod types;
