// Segue schema - conversation routing tables for Diesel ORM

diesel::table! {
    schema_versions (id) {
        id -> Integer,
        version -> Text,
        name -> Text,
        features -> Text,
        introduced_at -> Text,
    }
}

diesel::table! {
    cards (id) {
        id -> Text,
        card_data -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    conversations (id) {
        id -> Integer,
        phone -> Text,
        card_id -> Nullable<Text>,
        state -> Text,
        rep_user_id -> Nullable<Text>,
        environment_id -> Nullable<Text>,
        history -> Text,
        last_outbound_at -> Nullable<Text>,
        last_inbound_at -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    message_events (id) {
        id -> Integer,
        phone -> Text,
        environment_id -> Text,
        rep_id -> Nullable<Text>,
        campaign_id -> Nullable<Text>,
        direction -> Text,
        confirmation_id -> Nullable<Text>,
        state -> Nullable<Text>,
        body -> Text,
        sent_at -> Text,
    }
}

diesel::table! {
    handoff_events (id) {
        id -> Integer,
        card_id -> Text,
        from_rep -> Nullable<Text>,
        to_rep -> Nullable<Text>,
        reason -> Text,
        state_before -> Nullable<Text>,
        state_after -> Nullable<Text>,
        assigned_by -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    card_assignments (id) {
        id -> Integer,
        card_id -> Text,
        user_id -> Text,
        status -> Text,
        assigned_by -> Text,
        assigned_at -> Text,
        notes -> Nullable<Text>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    cards,
    conversations,
    message_events,
    handoff_events,
    card_assignments,
);
