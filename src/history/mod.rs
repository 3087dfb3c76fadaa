//! Audit history. Every mutation records what changed, one row per field,
//! and skips no-op writes so the log stays readable.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::access::Identity;
use crate::notify::FieldChange;
use crate::shared::error::ApiError;
use crate::shared::models::HistoryEntry;
use crate::shared::schema::history;
use crate::shared::state::AppState;
use crate::shared::utils::get_conn;

pub fn record_created(
    conn: &mut PgConnection,
    entity_type: &str,
    entity_id: Uuid,
    user_id: Uuid,
) -> Result<(), ApiError> {
    insert(conn, entity_type, entity_id, "created", None, None, None, user_id)
}

pub fn record_deleted(
    conn: &mut PgConnection,
    entity_type: &str,
    entity_id: Uuid,
    user_id: Uuid,
) -> Result<(), ApiError> {
    insert(conn, entity_type, entity_id, "deleted", None, None, None, user_id)
}

/// One row per changed field. Unchanged fields produce no rows, so callers
/// can pass the full candidate diff unconditionally.
pub fn record_changes(
    conn: &mut PgConnection,
    entity_type: &str,
    entity_id: Uuid,
    user_id: Uuid,
    changes: &[FieldChange],
) -> Result<(), ApiError> {
    for change in changes.iter().filter(|c| c.old != c.new) {
        insert(
            conn,
            entity_type,
            entity_id,
            "updated",
            Some(&change.field),
            Some(&change.old),
            Some(&change.new),
            user_id,
        )?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn insert(
    conn: &mut PgConnection,
    entity_type: &str,
    entity_id: Uuid,
    action: &str,
    field: Option<&str>,
    old_value: Option<&str>,
    new_value: Option<&str>,
    user_id: Uuid,
) -> Result<(), ApiError> {
    let entry = HistoryEntry {
        id: Uuid::new_v4(),
        entity_type: entity_type.to_string(),
        entity_id,
        action: action.to_string(),
        field: field.map(String::from),
        old_value: old_value.map(String::from),
        new_value: new_value.map(String::from),
        user_id,
        created_at: Utc::now(),
    };
    diesel::insert_into(history::table)
        .values(&entry)
        .execute(conn)?;
    Ok(())
}

/// Build the candidate diff for a tracked field. Helper for mutation
/// handlers; pairs with [`record_changes`] which drops equal pairs.
pub fn change<T: std::fmt::Display>(field: &str, old: T, new: T) -> FieldChange {
    FieldChange {
        field: field.to_string(),
        old: old.to_string(),
        new: new.to_string(),
    }
}

pub fn change_opt(field: &str, old: Option<&str>, new: Option<&str>) -> FieldChange {
    FieldChange {
        field: field.to_string(),
        old: old.unwrap_or("").to_string(),
        new: new.unwrap_or("").to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub entity_type: Option<String>,
    pub limit: Option<i64>,
}

async fn list_history(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    if !identity.is_super_admin() && !identity.is_manager() {
        return Err(ApiError::forbidden("history is manager-only"));
    }
    let mut conn = get_conn(&state.conn)?;
    let mut q = history::table
        .order(history::created_at.desc())
        .limit(query.limit.unwrap_or(200).clamp(1, 1000))
        .into_boxed();
    if let Some(entity_type) = query.entity_type {
        q = q.filter(history::entity_type.eq(entity_type));
    }
    Ok(Json(q.load(&mut conn)?))
}

async fn entity_history(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path((entity_type, entity_id)): Path<(String, Uuid)>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    if !identity.is_super_admin() && !identity.is_manager() {
        return Err(ApiError::forbidden("history is manager-only"));
    }
    let mut conn = get_conn(&state.conn)?;
    let entries = history::table
        .filter(history::entity_type.eq(entity_type))
        .filter(history::entity_id.eq(entity_id))
        .order(history::created_at.asc())
        .load(&mut conn)?;
    Ok(Json(entries))
}

pub fn configure_history_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/history", get(list_history))
        .route("/api/history/:entity_type/:entity_id", get(entity_history))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_formats_display_values() {
        let c = change("status", "open", "in_progress");
        assert_eq!(c.field, "status");
        assert_eq!(c.old, "open");
        assert_eq!(c.new, "in_progress");
    }

    #[test]
    fn test_change_opt_maps_none_to_empty() {
        let c = change_opt("subcategory", None, Some("HVAC"));
        assert_eq!(c.old, "");
        assert_eq!(c.new, "HVAC");
    }
}
