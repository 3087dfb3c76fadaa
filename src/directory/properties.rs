//! Property CRUD and the manager<->property join. Deletion only cascades to
//! rooms once no tickets, tasks, or service requests remain.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::access::{self, Identity};
use crate::notify::NotificationEvent;
use crate::shared::enums::{PropertyStatus, SubscriptionPlan};
use crate::shared::error::ApiError;
use crate::shared::models::{Property, PropertyManager, User};
use crate::shared::schema::{
    properties, property_managers, rooms, service_requests, tasks, tickets, users,
};
use crate::shared::state::AppState;
use crate::shared::utils::get_conn;

#[derive(Debug, Deserialize)]
pub struct CreatePropertyRequest {
    pub name: String,
    pub address: String,
    pub property_type: String,
    pub subscription_plan: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePropertyRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub property_type: Option<String>,
    pub status: Option<String>,
    pub subscription_plan: Option<String>,
    pub has_attachments: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ManagerLinkRequest {
    pub user_id: Uuid,
}

async fn list_properties(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<Property>>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    let mut query = properties::table.order(properties::name.asc()).into_boxed();
    if let Some(ids) = scope.id_vec() {
        query = query.filter(properties::id.eq_any(ids));
    }
    Ok(Json(query.load(&mut conn)?))
}

async fn get_property(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Property>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    if !scope.allows(id) {
        return Err(ApiError::forbidden("property is outside your scope"));
    }
    let property: Property = properties::table
        .filter(properties::id.eq(id))
        .first(&mut conn)?;
    Ok(Json(property))
}

async fn create_property(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<CreatePropertyRequest>,
) -> Result<(StatusCode, Json<Property>), ApiError> {
    access::require(identity.is_super_admin(), "create properties")?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("name is required"));
    }
    let plan = payload
        .subscription_plan
        .as_deref()
        .map(|p| p.parse::<SubscriptionPlan>().map_err(ApiError::Validation))
        .transpose()?
        .unwrap_or(SubscriptionPlan::Basic);

    let now = Utc::now();
    let property = Property {
        id: Uuid::new_v4(),
        name: payload.name.trim().to_string(),
        address: payload.address,
        property_type: payload.property_type,
        status: PropertyStatus::Active,
        subscription_plan: plan,
        has_attachments: false,
        created_at: now,
        updated_at: now,
    };
    let mut conn = get_conn(&state.conn)?;
    diesel::insert_into(properties::table)
        .values(&property)
        .execute(&mut conn)?;
    Ok((StatusCode::CREATED, Json(property)))
}

async fn update_property(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdatePropertyRequest>,
) -> Result<Json<Property>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_mutate_property(&identity, &scope, id),
        "modify this property",
    )?;
    let before: Property = properties::table
        .filter(properties::id.eq(id))
        .first(&mut conn)?;

    let status = patch
        .status
        .as_deref()
        .map(|s| s.parse::<PropertyStatus>().map_err(ApiError::Validation))
        .transpose()?
        .unwrap_or(before.status);
    let plan = patch
        .subscription_plan
        .as_deref()
        .map(|p| p.parse::<SubscriptionPlan>().map_err(ApiError::Validation))
        .transpose()?
        .unwrap_or(before.subscription_plan);

    let mut after = before.clone();
    after.status = status;
    after.subscription_plan = plan;
    if let Some(name) = patch.name {
        after.name = name;
    }
    if let Some(address) = patch.address {
        after.address = address;
    }
    if let Some(property_type) = patch.property_type {
        after.property_type = property_type;
    }
    if let Some(has_attachments) = patch.has_attachments {
        after.has_attachments = has_attachments;
    }
    after.updated_at = Utc::now();

    diesel::update(properties::table.filter(properties::id.eq(id)))
        .set(&after)
        .execute(&mut conn)?;

    if after.status != before.status {
        state
            .notifier
            .dispatch(NotificationEvent::PropertyStatusChanged {
                property_id: id,
                status: after.status,
            });
    }
    Ok(Json(after))
}

async fn delete_property(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    access::require(identity.is_super_admin(), "delete properties")?;
    let mut conn = get_conn(&state.conn)?;

    let open_tickets: i64 = tickets::table
        .filter(tickets::property_id.eq(id))
        .count()
        .get_result(&mut conn)?;
    let open_tasks: i64 = tasks::table
        .filter(tasks::property_id.eq(id))
        .count()
        .get_result(&mut conn)?;
    let open_requests: i64 = service_requests::table
        .filter(service_requests::property_id.eq(id))
        .count()
        .get_result(&mut conn)?;
    if open_tickets + open_tasks + open_requests > 0 {
        return Err(ApiError::Conflict(
            "property still has tickets, tasks, or service requests".to_string(),
        ));
    }

    conn.transaction::<_, ApiError, _>(|conn| {
        diesel::delete(rooms::table.filter(rooms::property_id.eq(id))).execute(conn)?;
        diesel::delete(property_managers::table.filter(property_managers::property_id.eq(id)))
            .execute(conn)?;
        diesel::delete(
            crate::shared::schema::user_properties::table
                .filter(crate::shared::schema::user_properties::property_id.eq(id)),
        )
        .execute(conn)?;
        diesel::delete(properties::table.filter(properties::id.eq(id))).execute(conn)?;
        Ok(())
    })?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

async fn assign_manager(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<ManagerLinkRequest>,
) -> Result<(StatusCode, Json<PropertyManager>), ApiError> {
    access::require(access::can_manage_users(&identity), "assign managers")?;
    let mut conn = get_conn(&state.conn)?;
    let user: User = users::table
        .filter(users::id.eq(payload.user_id))
        .first(&mut conn)?;
    if !matches!(
        user.role,
        crate::shared::enums::Role::Manager
            | crate::shared::enums::Role::GeneralManager
            | crate::shared::enums::Role::SuperAdmin
    ) {
        return Err(ApiError::validation(
            "only manager accounts can be property managers",
        ));
    }

    let row = PropertyManager {
        id: Uuid::new_v4(),
        user_id: user.id,
        property_id: id,
        created_at: Utc::now(),
    };
    diesel::insert_into(property_managers::table)
        .values(&row)
        .execute(&mut conn)?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn unassign_manager(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    access::require(access::can_manage_users(&identity), "unassign managers")?;
    let mut conn = get_conn(&state.conn)?;
    diesel::delete(
        property_managers::table
            .filter(property_managers::property_id.eq(id))
            .filter(property_managers::user_id.eq(user_id)),
    )
    .execute(&mut conn)?;
    Ok(Json(serde_json::json!({ "unassigned": user_id })))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/properties", get(list_properties).post(create_property))
        .route(
            "/properties/:id",
            get(get_property)
                .patch(update_property)
                .delete(delete_property),
        )
        .route("/properties/:id/managers", post(assign_manager))
        .route(
            "/properties/:id/managers/:user_id",
            delete(unassign_manager),
        )
}
