diesel::table! {
    users (user_id) {
        user_id -> BigInt,
        username -> Nullable<Text>,
        is_premium -> Bool,
        subscription_end -> Nullable<Text>,
        daily_messages -> Integer,
        last_reset -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    forwarding_rules (id) {
        id -> BigInt,
        user_id -> BigInt,
        source_chat_id -> BigInt,
        source_chat_title -> Text,
        dest_chat_id -> BigInt,
        dest_chat_title -> Text,
        is_active -> Bool,
        messages_forwarded -> BigInt,
        created_at -> Text,
    }
}

diesel::table! {
    transactions (reference) {
        reference -> Text,
        user_id -> BigInt,
        amount -> BigInt,
        plan -> Text,
        status -> Text,
        created_at -> Text,
        payment_date -> Nullable<Text>,
    }
}
