//! Dashboard and statistics rollups. Everything is computed inside the
//! caller's property scope, so the numbers match what the same caller
//! would see in the corresponding listings.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde_json::json;
use uuid::Uuid;

use crate::access::{self, Identity, Scope};
use crate::shared::enums::{ServiceRequestStatus, TaskStatus, TicketStatus};
use crate::shared::error::ApiError;
use crate::shared::models::Task;
use crate::shared::schema::{properties, rooms, service_requests, tasks, tickets};
use crate::shared::state::AppState;
use crate::shared::utils::get_conn;
use crate::tasks::score::completion_score;

fn ticket_counts(
    conn: &mut PgConnection,
    scope: &Scope,
    property: Option<Uuid>,
) -> Result<serde_json::Value, ApiError> {
    let mut counts = serde_json::Map::new();
    for status in [
        TicketStatus::Open,
        TicketStatus::InProgress,
        TicketStatus::Completed,
    ] {
        let mut q = tickets::table.filter(tickets::status.eq(status)).into_boxed();
        if let Some(ids) = scope.id_vec() {
            q = q.filter(tickets::property_id.eq_any(ids));
        }
        if let Some(property) = property {
            q = q.filter(tickets::property_id.eq(property));
        }
        let n: i64 = q.count().get_result(conn)?;
        counts.insert(status.as_str().to_string(), json!(n));
    }
    Ok(serde_json::Value::Object(counts))
}

fn task_counts(
    conn: &mut PgConnection,
    scope: &Scope,
    property: Option<Uuid>,
) -> Result<serde_json::Value, ApiError> {
    let mut counts = serde_json::Map::new();
    for status in [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Completed,
    ] {
        let mut q = tasks::table.filter(tasks::status.eq(status)).into_boxed();
        if let Some(ids) = scope.id_vec() {
            q = q.filter(tasks::property_id.eq_any(ids));
        }
        if let Some(property) = property {
            q = q.filter(tasks::property_id.eq(property));
        }
        let n: i64 = q.count().get_result(conn)?;
        counts.insert(status.as_str().to_string(), json!(n));
    }
    Ok(serde_json::Value::Object(counts))
}

fn request_counts(
    conn: &mut PgConnection,
    scope: &Scope,
    property: Option<Uuid>,
) -> Result<serde_json::Value, ApiError> {
    let mut counts = serde_json::Map::new();
    for status in [
        ServiceRequestStatus::Pending,
        ServiceRequestStatus::InProgress,
        ServiceRequestStatus::Completed,
    ] {
        let mut q = service_requests::table
            .filter(service_requests::status.eq(status))
            .into_boxed();
        if let Some(ids) = scope.id_vec() {
            q = q.filter(service_requests::property_id.eq_any(ids));
        }
        if let Some(property) = property {
            q = q.filter(service_requests::property_id.eq(property));
        }
        let n: i64 = q.count().get_result(conn)?;
        counts.insert(status.as_str().to_string(), json!(n));
    }
    Ok(serde_json::Value::Object(counts))
}

/// Mean completion score over completed tasks in scope.
fn average_score(
    conn: &mut PgConnection,
    scope: &Scope,
    property: Option<Uuid>,
) -> Result<Option<f64>, ApiError> {
    let mut q = tasks::table
        .filter(tasks::status.eq(TaskStatus::Completed))
        .into_boxed();
    if let Some(ids) = scope.id_vec() {
        q = q.filter(tasks::property_id.eq_any(ids));
    }
    if let Some(property) = property {
        q = q.filter(tasks::property_id.eq(property));
    }
    let completed: Vec<Task> = q.load(conn)?;
    let scores: Vec<f64> = completed.iter().filter_map(completion_score).collect();
    if scores.is_empty() {
        return Ok(None);
    }
    Ok(Some(scores.iter().sum::<f64>() / scores.len() as f64))
}

async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;

    let mut property_count_query = properties::table.into_boxed();
    if let Some(ids) = scope.id_vec() {
        property_count_query = property_count_query.filter(properties::id.eq_any(ids));
    }
    let property_count: i64 = property_count_query.count().get_result(&mut conn)?;

    Ok(Json(json!({
        "properties": property_count,
        "tickets": ticket_counts(&mut conn, &scope, None)?,
        "tasks": task_counts(&mut conn, &scope, None)?,
        "service_requests": request_counts(&mut conn, &scope, None)?,
    })))
}

async fn statistics(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;

    let mut by_category_query = tickets::table
        .group_by(tickets::category)
        .select((tickets::category, count_star()))
        .into_boxed();
    if let Some(ids) = scope.id_vec() {
        by_category_query = by_category_query.filter(tickets::property_id.eq_any(ids));
    }
    let by_category: Vec<(String, i64)> = by_category_query.load(&mut conn)?;

    Ok(Json(json!({
        "tickets": ticket_counts(&mut conn, &scope, None)?,
        "tickets_by_category": by_category
            .into_iter()
            .map(|(category, n)| json!({ "category": category, "count": n }))
            .collect::<Vec<_>>(),
        "tasks": task_counts(&mut conn, &scope, None)?,
        "average_completion_score": average_score(&mut conn, &scope, None)?,
    })))
}

async fn property_statistics(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    if !scope.allows(id) {
        return Err(ApiError::forbidden("property is outside your scope"));
    }

    let room_statuses: Vec<(crate::shared::enums::RoomStatus, i64)> = rooms::table
        .filter(rooms::property_id.eq(id))
        .group_by(rooms::status)
        .select((rooms::status, count_star()))
        .load(&mut conn)?;

    Ok(Json(json!({
        "property_id": id,
        "tickets": ticket_counts(&mut conn, &scope, Some(id))?,
        "tasks": task_counts(&mut conn, &scope, Some(id))?,
        "service_requests": request_counts(&mut conn, &scope, Some(id))?,
        "rooms": room_statuses
            .into_iter()
            .map(|(status, n)| json!({ "status": status.as_str(), "count": n }))
            .collect::<Vec<_>>(),
        "average_completion_score": average_score(&mut conn, &scope, Some(id))?,
    })))
}

pub fn configure_stats_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dashboard/stats", get(dashboard_stats))
        .route("/statistics", get(statistics))
        .route("/properties/:id/statistics", get(property_statistics))
}
