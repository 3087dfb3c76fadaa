//! User administration and the user<->property join. Role changes keep the
//! property_managers join consistent: promotion to a manager role backfills
//! a row per assigned property, demotion removes them all.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::access::{self, Identity};
use crate::auth::hash_password;
use crate::history;
use crate::notify::NotificationEvent;
use crate::shared::enums::Role;
use crate::shared::error::ApiError;
use crate::shared::models::{PropertyManager, User, UserProperty};
use crate::shared::schema::{properties, property_managers, user_properties, users};
use crate::shared::state::AppState;
use crate::shared::utils::{double_option, get_conn};

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub group: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub role: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub group: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub manager_id: Option<Option<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct PropertyLinkRequest {
    pub property_id: Uuid,
}

fn parse_role(raw: &str) -> Result<Role, ApiError> {
    raw.parse().map_err(ApiError::Validation)
}

fn is_manager_role(role: Role) -> bool {
    matches!(role, Role::Manager | Role::GeneralManager)
}

async fn list_users(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<User>>, ApiError> {
    if !identity.is_super_admin() && !identity.is_manager() {
        return Err(ApiError::forbidden("user listing is manager-only"));
    }
    let mut conn = get_conn(&state.conn)?;
    if identity.is_super_admin() {
        let all: Vec<User> = users::table.order(users::username.asc()).load(&mut conn)?;
        return Ok(Json(all));
    }
    // Managers see the staff of their own properties.
    let scope = access::scope_for(&mut conn, &identity)?;
    let property_ids = scope.id_vec().unwrap_or_default();
    let mut staff: Vec<User> = user_properties::table
        .inner_join(users::table.on(users::id.eq(user_properties::user_id)))
        .filter(user_properties::property_id.eq_any(&property_ids))
        .select(users::all_columns)
        .distinct()
        .order(users::username.asc())
        .load(&mut conn)?;
    if !staff.iter().any(|u| u.id == identity.user_id) {
        if let Some(me) = users::table
            .filter(users::id.eq(identity.user_id))
            .first::<User>(&mut conn)
            .optional()?
        {
            staff.push(me);
        }
    }
    Ok(Json(staff))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, ApiError> {
    if !access::can_manage_users(&identity) && identity.user_id != id {
        return Err(ApiError::forbidden("cannot read other user accounts"));
    }
    let mut conn = get_conn(&state.conn)?;
    let user: User = users::table.filter(users::id.eq(id)).first(&mut conn)?;
    Ok(Json(user))
}

async fn create_user(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    access::require(access::can_manage_users(&identity), "create users")?;
    if payload.username.trim().is_empty() || payload.email.trim().is_empty() {
        return Err(ApiError::validation("username and email are required"));
    }
    if payload.password.len() < 8 {
        return Err(ApiError::validation("password must be at least 8 characters"));
    }
    let role = parse_role(&payload.role)?;

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        username: payload.username.trim().to_string(),
        email: payload.email.trim().to_lowercase(),
        password_hash: hash_password(&payload.password)?,
        role,
        group_name: payload.group,
        phone: payload.phone,
        is_active: true,
        manager_id: None,
        created_at: now,
        updated_at: now,
    };

    let mut conn = get_conn(&state.conn)?;
    diesel::insert_into(users::table).values(&user).execute(&mut conn)?;
    state.notifier.dispatch(NotificationEvent::UserManaged {
        user_id: user.id,
        changes: vec![history::change("account", "", "created")],
    });
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    access::require(access::can_manage_users(&identity), "modify users")?;
    let mut conn = get_conn(&state.conn)?;
    let before: User = users::table.filter(users::id.eq(id)).first(&mut conn)?;

    let role = patch
        .role
        .as_deref()
        .map(parse_role)
        .transpose()?
        .unwrap_or(before.role);

    let mut after = before.clone();
    after.role = role;
    if let Some(email) = patch.email {
        after.email = email.trim().to_lowercase();
    }
    if let Some(group) = patch.group {
        after.group_name = group;
    }
    if let Some(phone) = patch.phone {
        after.phone = phone;
    }
    if let Some(is_active) = patch.is_active {
        after.is_active = is_active;
    }
    if let Some(manager_id) = patch.manager_id {
        after.manager_id = manager_id;
    }
    after.updated_at = Utc::now();

    conn.transaction::<_, ApiError, _>(|conn| {
        diesel::update(users::table.filter(users::id.eq(id)))
            .set(&after)
            .execute(conn)?;
        if is_manager_role(after.role) && !is_manager_role(before.role) {
            backfill_manager_rows(conn, id)?;
        }
        if !is_manager_role(after.role) && is_manager_role(before.role) {
            // Demotion removes manager scope but keeps staff assignments.
            diesel::delete(
                property_managers::table.filter(property_managers::user_id.eq(id)),
            )
            .execute(conn)?;
        }
        Ok(())
    })?;

    let changes: Vec<_> = [
        history::change("email", &before.email, &after.email),
        history::change("role", before.role, after.role),
        history::change_opt(
            "group",
            before.group_name.as_deref(),
            after.group_name.as_deref(),
        ),
        history::change("is_active", before.is_active, after.is_active),
    ]
    .into_iter()
    .filter(|c| c.old != c.new)
    .collect();
    if !changes.is_empty() {
        state
            .notifier
            .dispatch(NotificationEvent::UserManaged { user_id: id, changes });
    }
    Ok(Json(after))
}

/// Promotion repair: a manager must have a property_managers row for every
/// property they were already assigned to as staff.
pub fn backfill_manager_rows(conn: &mut PgConnection, user_id: Uuid) -> Result<(), ApiError> {
    let assigned: Vec<Uuid> = user_properties::table
        .filter(user_properties::user_id.eq(user_id))
        .select(user_properties::property_id)
        .load(conn)?;
    let existing: Vec<Uuid> = property_managers::table
        .filter(property_managers::user_id.eq(user_id))
        .select(property_managers::property_id)
        .load(conn)?;
    for property_id in assigned.into_iter().filter(|p| !existing.contains(p)) {
        let row = PropertyManager {
            id: Uuid::new_v4(),
            user_id,
            property_id,
            created_at: Utc::now(),
        };
        diesel::insert_into(property_managers::table)
            .values(&row)
            .execute(conn)?;
    }
    Ok(())
}

async fn deactivate_user(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    access::require(access::can_manage_users(&identity), "deactivate users")?;
    let mut conn = get_conn(&state.conn)?;
    diesel::update(users::table.filter(users::id.eq(id)))
        .set((users::is_active.eq(false), users::updated_at.eq(Utc::now())))
        .execute(&mut conn)?;
    state.notifier.dispatch(NotificationEvent::UserManaged {
        user_id: id,
        changes: vec![history::change("is_active", "true", "false")],
    });
    Ok(Json(serde_json::json!({ "deactivated": id })))
}

async fn assign_property(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(payload): Json<PropertyLinkRequest>,
) -> Result<(StatusCode, Json<UserProperty>), ApiError> {
    access::require(access::can_manage_users(&identity), "assign properties")?;
    let mut conn = get_conn(&state.conn)?;
    let user: User = users::table.filter(users::id.eq(id)).first(&mut conn)?;
    let exists: i64 = properties::table
        .filter(properties::id.eq(payload.property_id))
        .count()
        .get_result(&mut conn)?;
    if exists == 0 {
        return Err(ApiError::InvalidReference(format!(
            "property {} does not exist",
            payload.property_id
        )));
    }

    let row = UserProperty {
        id: Uuid::new_v4(),
        user_id: id,
        property_id: payload.property_id,
        created_at: Utc::now(),
    };
    conn.transaction::<_, ApiError, _>(|conn| {
        diesel::insert_into(user_properties::table)
            .values(&row)
            .execute(conn)?;
        if is_manager_role(user.role) {
            backfill_manager_rows(conn, id)?;
        }
        Ok(())
    })?;
    Ok((StatusCode::CREATED, Json(row)))
}

async fn unassign_property(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path((id, property_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    access::require(access::can_manage_users(&identity), "unassign properties")?;
    let mut conn = get_conn(&state.conn)?;
    diesel::delete(
        user_properties::table
            .filter(user_properties::user_id.eq(id))
            .filter(user_properties::property_id.eq(property_id)),
    )
    .execute(&mut conn)?;
    Ok(Json(serde_json::json!({ "unassigned": property_id })))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(deactivate_user),
        )
        .route("/users/:id/properties", post(assign_property))
        .route(
            "/users/:id/properties/:property_id",
            axum::routing::delete(unassign_property),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_roles() {
        assert!(is_manager_role(Role::Manager));
        assert!(is_manager_role(Role::GeneralManager));
        assert!(!is_manager_role(Role::User));
        assert!(!is_manager_role(Role::SuperAdmin));
    }

    #[test]
    fn test_role_parse_rejects_unknown() {
        assert_eq!(parse_role("general_manager").unwrap(), Role::GeneralManager);
        assert!(parse_role("owner").is_err());
    }

    #[test]
    fn test_user_patch_distinguishes_missing_from_cleared_fields() {
        let missing: UpdateUserRequest = serde_json::from_str(r#"{"is_active":true}"#).unwrap();
        assert!(missing.group.is_none());
        assert!(missing.phone.is_none());

        let cleared: UpdateUserRequest =
            serde_json::from_str(r#"{"group":null,"phone":null,"manager_id":null}"#).unwrap();
        assert_eq!(cleared.group, Some(None));
        assert_eq!(cleared.phone, Some(None));
        assert_eq!(cleared.manager_id, Some(None));

        let set: UpdateUserRequest = serde_json::from_str(r#"{"group":"IT"}"#).unwrap();
        assert_eq!(set.group, Some(Some("IT".to_string())));
    }
}
