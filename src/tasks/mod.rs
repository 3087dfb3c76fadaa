//! Task lifecycle and the explicit ticket->task assignment endpoint.
//! Status and priority writes mirror back to the linked ticket in the same
//! transaction.

pub mod mirror;
pub mod score;

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{self, Identity};
use crate::history;
use crate::notify::NotificationEvent;
use crate::shared::enums::{AssignmentStatus, Priority, TaskStatus};
use crate::shared::error::ApiError;
use crate::shared::models::{Task, TaskAssignment, Ticket, User};
use crate::shared::schema::{task_assignments, tasks, tickets, users};
use crate::shared::state::AppState;
use crate::shared::utils::{double_option, get_conn};

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
    pub priority: String,
    pub due_date: Option<DateTime<Utc>>,
    pub property_id: Uuid,
    pub assigned_to_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_to_id: Option<Option<Uuid>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskFilter {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub property_id: Option<Uuid>,
    pub assigned_to_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AssignTaskRequest {
    pub ticket_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct TaskWithScore {
    #[serde(flatten)]
    pub task: Task,
    pub completion_score: Option<f64>,
}

impl From<Task> for TaskWithScore {
    fn from(task: Task) -> Self {
        let completion_score = score::completion_score(&task);
        Self {
            task,
            completion_score,
        }
    }
}

fn parse_priority(raw: &str) -> Result<Priority, ApiError> {
    raw.parse().map_err(ApiError::Validation)
}

fn parse_status(raw: &str) -> Result<TaskStatus, ApiError> {
    raw.parse().map_err(ApiError::Validation)
}

fn load_active_user(conn: &mut PgConnection, user_id: Uuid) -> Result<User, ApiError> {
    users::table
        .filter(users::id.eq(user_id))
        .filter(users::is_active.eq(true))
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::not_found(format!("active user {user_id} not found")))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskWithScore>), ApiError> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::validation("title is required"));
    }
    let priority = parse_priority(&payload.priority)?;

    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_mutate_property(&identity, &scope, payload.property_id),
        "create tasks on this property",
    )?;
    if let Some(assignee) = payload.assigned_to_id {
        load_active_user(&mut conn, assignee)?;
    }

    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4(),
        title: payload.title.trim().to_string(),
        description: payload.description.trim().to_string(),
        status: TaskStatus::Pending,
        priority,
        due_date: payload.due_date,
        property_id: payload.property_id,
        assigned_to_id: payload.assigned_to_id,
        created_by_id: Some(identity.user_id),
        created_at: now,
        updated_at: now,
        completed_at: None,
    };

    conn.transaction::<_, ApiError, _>(|conn| {
        diesel::insert_into(tasks::table).values(&task).execute(conn)?;
        history::record_created(conn, "task", task.id, identity.user_id)?;
        Ok(())
    })?;

    if let Some(assignee_id) = task.assigned_to_id {
        state.notifier.dispatch(NotificationEvent::TaskAssigned {
            task_id: task.id,
            assignee_id,
        });
    }
    Ok((StatusCode::CREATED, Json(task.into())))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<Vec<TaskWithScore>>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;

    let mut query = tasks::table
        .order((tasks::created_at.desc(), tasks::id.desc()))
        .into_boxed();
    if let Some(status) = filter.status.as_deref() {
        query = query.filter(tasks::status.eq(parse_status(status)?));
    }
    if let Some(priority) = filter.priority.as_deref() {
        query = query.filter(tasks::priority.eq(parse_priority(priority)?));
    }
    if let Some(property_id) = filter.property_id {
        query = query.filter(tasks::property_id.eq(property_id));
    }
    if let Some(assigned_to_id) = filter.assigned_to_id {
        query = query.filter(tasks::assigned_to_id.eq(assigned_to_id));
    }

    let mut rows: Vec<Task> = query.load(&mut conn)?;
    rows.retain(|t| access::can_view_task(&identity, &scope, t));
    Ok(Json(rows.into_iter().map(TaskWithScore::from).collect()))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskWithScore>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let task: Task = tasks::table.filter(tasks::id.eq(id)).first(&mut conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_view_task(&identity, &scope, &task),
        "view this task",
    )?;
    Ok(Json(task.into()))
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateTaskRequest>,
) -> Result<Json<TaskWithScore>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let before: Task = tasks::table.filter(tasks::id.eq(id)).first(&mut conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_mutate_task(&identity, &scope, &before),
        "modify this task",
    )?;

    let status = patch
        .status
        .as_deref()
        .map(parse_status)
        .transpose()?
        .unwrap_or(before.status);
    let priority = patch
        .priority
        .as_deref()
        .map(parse_priority)
        .transpose()?
        .unwrap_or(before.priority);

    let mut after = before.clone();
    after.status = status;
    after.priority = priority;
    if let Some(title) = patch.title {
        after.title = title;
    }
    if let Some(description) = patch.description {
        after.description = description;
    }
    if let Some(due_date) = patch.due_date {
        after.due_date = due_date;
    }
    if let Some(assigned_to_id) = patch.assigned_to_id {
        // Plain users may move their own task's status but not reassign it.
        if assigned_to_id != before.assigned_to_id && !identity.is_manager()
            && !identity.is_super_admin()
        {
            return Err(ApiError::forbidden("only managers may reassign tasks"));
        }
        if let Some(new_assignee) = assigned_to_id {
            load_active_user(&mut conn, new_assignee)?;
        }
        after.assigned_to_id = assigned_to_id;
    }
    after.updated_at = Utc::now();
    after.completed_at = match after.status {
        TaskStatus::Completed => before.completed_at.or(Some(after.updated_at)),
        _ => None,
    };

    let changes = vec![
        history::change("title", &before.title, &after.title),
        history::change("description", &before.description, &after.description),
        history::change("status", before.status, after.status),
        history::change("priority", before.priority, after.priority),
        history::change_opt(
            "due_date",
            before.due_date.map(|d| d.to_rfc3339()).as_deref(),
            after.due_date.map(|d| d.to_rfc3339()).as_deref(),
        ),
        history::change_opt(
            "assigned_to_id",
            before.assigned_to_id.map(|u| u.to_string()).as_deref(),
            after.assigned_to_id.map(|u| u.to_string()).as_deref(),
        ),
    ];
    let changed: Vec<_> = changes.into_iter().filter(|c| c.old != c.new).collect();
    if changed.is_empty() {
        return Ok(Json(before.into()));
    }

    conn.transaction::<_, ApiError, _>(|conn| {
        diesel::update(tasks::table.filter(tasks::id.eq(id)))
            .set(&after)
            .execute(conn)?;
        if after.status != before.status || after.priority != before.priority {
            mirror::mirror_task_to_ticket(conn, id, after.status, after.priority)?;
        }
        history::record_changes(conn, "task", id, identity.user_id, &changed)?;
        Ok(())
    })?;

    let reassigned = after.assigned_to_id != before.assigned_to_id;
    if reassigned {
        if let Some(new_assignee) = after.assigned_to_id {
            state.notifier.dispatch(NotificationEvent::TaskAssigned {
                task_id: id,
                assignee_id: new_assignee,
            });
        }
    }
    state.notifier.dispatch(NotificationEvent::TaskUpdated {
        task_id: id,
        changes: changed,
        previous_assignee: reassigned.then_some(before.assigned_to_id).flatten(),
    });
    Ok(Json(after.into()))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let task: Task = tasks::table.filter(tasks::id.eq(id)).first(&mut conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_mutate_task(&identity, &scope, &task),
        "delete this task",
    )?;

    conn.transaction::<_, ApiError, _>(|conn| {
        diesel::delete(task_assignments::table.filter(task_assignments::task_id.eq(id)))
            .execute(conn)?;
        diesel::delete(tasks::table.filter(tasks::id.eq(id))).execute(conn)?;
        history::record_deleted(conn, "task", id, identity.user_id)?;
        Ok(())
    })?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// Manual counterpart of auto-dispatch: point a ticket at a chosen user,
/// creating the paired task and assignment row.
async fn assign_task(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<AssignTaskRequest>,
) -> Result<Json<TaskWithScore>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let ticket: Ticket = tickets::table
        .filter(tickets::id.eq(payload.ticket_id))
        .first(&mut conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_mutate_ticket(&identity, &scope, &ticket)
            && (identity.is_manager() || identity.is_super_admin()),
        "assign this ticket",
    )?;
    let assignee = load_active_user(&mut conn, payload.user_id)?;

    if mirror::task_link(&mut conn, ticket.id)?.is_some() {
        return Err(ApiError::Conflict(
            "ticket already has an assigned task".to_string(),
        ));
    }

    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4(),
        title: crate::tickets::dispatch::task_title_for(&ticket),
        description: ticket.description.clone(),
        status: ticket.status.mirrored_task_status(),
        priority: ticket.priority,
        due_date: None,
        property_id: ticket.property_id,
        assigned_to_id: Some(assignee.id),
        created_by_id: Some(identity.user_id),
        created_at: now,
        updated_at: now,
        completed_at: None,
    };
    let assignment = TaskAssignment {
        id: Uuid::new_v4(),
        task_id: task.id,
        ticket_id: ticket.id,
        user_id: assignee.id,
        status: AssignmentStatus::Pending,
        is_service_request: false,
        created_at: now,
        updated_at: now,
    };

    conn.transaction::<_, ApiError, _>(|conn| {
        diesel::insert_into(tasks::table).values(&task).execute(conn)?;
        diesel::insert_into(task_assignments::table)
            .values(&assignment)
            .execute(conn)?;
        history::record_created(conn, "task", task.id, identity.user_id)?;
        Ok(())
    })?;

    state.notifier.dispatch(NotificationEvent::TaskAssigned {
        task_id: task.id,
        assignee_id: assignee.id,
    });
    Ok(Json(task.into()))
}

pub fn configure_task_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/:id",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/assign-task", post(assign_task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_normalizes_casing() {
        assert_eq!(parse_status("Pending").unwrap(), TaskStatus::Pending);
        assert_eq!(parse_status("In Progress").unwrap(), TaskStatus::InProgress);
        assert!(parse_status("done").is_err());
    }

    #[test]
    fn test_full_row_update_writes_unassign_and_cleared_due_date() {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            title: "t".into(),
            description: "d".into(),
            status: TaskStatus::Pending,
            priority: Priority::Medium,
            due_date: None,
            property_id: Uuid::new_v4(),
            assigned_to_id: None,
            created_by_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let query = diesel::update(tasks::table.filter(tasks::id.eq(task.id))).set(&task);
        let sql = diesel::debug_query::<diesel::pg::Pg, _>(&query).to_string();
        assert!(sql.contains("\"assigned_to_id\""));
        assert!(sql.contains("\"due_date\""));
        assert!(sql.contains("\"completed_at\""));
    }

    #[test]
    fn test_task_with_score_flattens_fields() {
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            title: "t".into(),
            description: "d".into(),
            status: TaskStatus::Completed,
            priority: Priority::Low,
            due_date: None,
            property_id: Uuid::new_v4(),
            assigned_to_id: None,
            created_by_id: None,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        };
        let json = serde_json::to_value(TaskWithScore::from(task)).unwrap();
        assert_eq!(json["status"], "completed");
        assert!(json["completion_score"].is_number());
    }
}
