diesel::table! {
    users (id) {
        id -> Uuid,
        full_name -> Varchar,
        email -> Varchar,
        role -> SmallInt,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    service_requests (id) {
        id -> Uuid,
        title -> Varchar,
        description -> Text,
        category -> SmallInt,
        priority -> SmallInt,
        status -> SmallInt,
        created_by -> Uuid,
        assigned_to -> Nullable<Uuid>,
        version -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    service_request_history (id) {
        id -> Uuid,
        service_request_id -> Uuid,
        action -> Varchar,
        old_status -> Nullable<SmallInt>,
        new_status -> Nullable<SmallInt>,
        changed_by -> Uuid,
        details -> Jsonb,
        timestamp -> Timestamptz,
    }
}

diesel::table! {
    sla_definitions (id) {
        id -> Uuid,
        category -> Nullable<SmallInt>,
        priority -> SmallInt,
        response_time_hours -> Int4,
        resolution_time_hours -> Int4,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sla_metrics (id) {
        id -> Uuid,
        service_request_id -> Uuid,
        sla_definition_id -> Nullable<Uuid>,
        status_changed_at -> Timestamptz,
        status -> SmallInt,
        first_response_at -> Nullable<Timestamptz>,
        response_sla_met -> Nullable<Bool>,
        response_breach_at -> Nullable<Timestamptz>,
        resolution_target_at -> Nullable<Timestamptz>,
        resolution_sla_met -> Nullable<Bool>,
        resolution_breach_at -> Nullable<Timestamptz>,
        time_in_status_minutes -> Int4,
        total_time_minutes -> Int4,
        is_breached -> Bool,
        breach_type -> Nullable<SmallInt>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    sla_exemptions (id) {
        id -> Uuid,
        service_request_id -> Uuid,
        reason -> Varchar,
        exemption_type -> SmallInt,
        start_at -> Timestamptz,
        end_at -> Nullable<Timestamptz>,
        granted_by -> Uuid,
        approved -> Bool,
        approved_by -> Nullable<Uuid>,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(service_request_history -> service_requests (service_request_id));
diesel::joinable!(sla_metrics -> service_requests (service_request_id));
diesel::joinable!(sla_exemptions -> service_requests (service_request_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    service_requests,
    service_request_history,
    sla_definitions,
    sla_metrics,
    sla_exemptions,
);
