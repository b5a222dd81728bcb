diesel::table! {
    users (user_id) {
        user_id -> BigInt,
        username -> Nullable<Text>,
        is_premium -> Bool,
        subscription_end -> Nullable<Timestamptz>,
        daily_messages -> Integer,
        last_reset -> Timestamptz,
        created_at -> Timestamptz,
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
        created_at -> Timestamptz,
    }
}

diesel::table! {
    transactions (reference) {
        reference -> Text,
        user_id -> BigInt,
        amount -> BigInt,
        plan -> Text,
        status -> Text,
        created_at -> Timestamptz,
        payment_date -> Nullable<Timestamptz>,
    }
}
