diesel::table! {
    users (id) {
        id -> Uuid,
        username -> Text,
        email -> Text,
        password_hash -> Text,
        role -> Text,
        group_name -> Nullable<Text>,
        phone -> Nullable<Text>,
        is_active -> Bool,
        manager_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    properties (id) {
        id -> Uuid,
        name -> Text,
        address -> Text,
        property_type -> Text,
        status -> Text,
        subscription_plan -> Text,
        has_attachments -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    rooms (id) {
        id -> Uuid,
        property_id -> Uuid,
        name -> Text,
        room_type -> Text,
        floor -> Int4,
        status -> Text,
        capacity -> Int4,
        amenities -> Array<Text>,
        last_cleaned -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    user_properties (id) {
        id -> Uuid,
        user_id -> Uuid,
        property_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    property_managers (id) {
        id -> Uuid,
        user_id -> Uuid,
        property_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    tickets (id) {
        id -> Uuid,
        title -> Text,
        description -> Text,
        status -> Text,
        priority -> Text,
        category -> Text,
        subcategory -> Nullable<Text>,
        user_id -> Uuid,
        property_id -> Uuid,
        room_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    tasks (id) {
        id -> Uuid,
        title -> Text,
        description -> Text,
        status -> Text,
        priority -> Text,
        due_date -> Nullable<Timestamptz>,
        property_id -> Uuid,
        assigned_to_id -> Nullable<Uuid>,
        created_by_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    task_assignments (id) {
        id -> Uuid,
        task_id -> Uuid,
        ticket_id -> Uuid,
        user_id -> Uuid,
        status -> Text,
        is_service_request -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    service_requests (id) {
        id -> Uuid,
        room_id -> Uuid,
        property_id -> Uuid,
        request_group -> Text,
        request_type -> Text,
        priority -> Text,
        quantity -> Int4,
        guest_name -> Nullable<Text>,
        notes -> Nullable<Text>,
        status -> Text,
        created_by_id -> Uuid,
        assigned_task_id -> Nullable<Uuid>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    history (id) {
        id -> Uuid,
        entity_type -> Text,
        entity_id -> Uuid,
        action -> Text,
        field -> Nullable<Text>,
        old_value -> Nullable<Text>,
        new_value -> Nullable<Text>,
        user_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    password_resets (id) {
        id -> Uuid,
        user_id -> Uuid,
        token -> Text,
        expires_at -> Timestamptz,
        used -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    system_settings (id) {
        id -> Int4,
        email_enabled -> Bool,
        smtp_host -> Text,
        smtp_port -> Int4,
        smtp_username -> Text,
        smtp_password -> Text,
        smtp_from -> Text,
        sms_enabled -> Bool,
        sms_api_url -> Text,
        sms_api_key -> Text,
        sms_from -> Text,
        attachments_enabled -> Bool,
        daily_reports_enabled -> Bool,
        report_hour -> Int4,
        report_minute -> Int4,
        report_timezone -> Text,
        report_last_fire -> Nullable<Timestamptz>,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    users,
    properties,
    rooms,
    user_properties,
    property_managers,
    tickets,
    tasks,
    task_assignments,
    service_requests,
    history,
    password_resets,
    system_settings,
);
