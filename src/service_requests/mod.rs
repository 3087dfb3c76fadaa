//! Guest service requests. Creation fans out a single task with one
//! assignment row per active staff member in the request group on the
//! property; completion cascades to the task and every assignment.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{self, Identity};
use crate::notify::{recipients, NotificationEvent};
use crate::shared::enums::{AssignmentStatus, Priority, ServiceRequestStatus, TaskStatus};
use crate::shared::error::ApiError;
use crate::shared::models::{Room, ServiceRequest, Task, TaskAssignment};
use crate::shared::schema::{rooms, service_requests, task_assignments, tasks};
use crate::shared::state::AppState;
use crate::shared::utils::get_conn;
use crate::tasks::mirror;

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub room_id: Uuid,
    pub property_id: Uuid,
    pub request_group: String,
    pub request_type: String,
    pub priority: String,
    pub quantity: Option<i32>,
    pub guest_name: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateServiceRequest {
    pub status: Option<String>,
    pub notes: Option<String>,
    pub quantity: Option<i32>,
    pub priority: Option<String>,
}

impl UpdateServiceRequest {
    /// True when the patch only moves the status; that is the one mutation
    /// group staff are allowed to make on their own requests.
    pub fn is_status_only(&self) -> bool {
        self.notes.is_none() && self.quantity.is_none() && self.priority.is_none()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceRequestFilter {
    pub status: Option<String>,
    pub property_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ServiceRequestCreatedResponse {
    pub request: ServiceRequest,
    pub task_created: bool,
    pub assignments: usize,
}

pub fn task_title_for(request: &ServiceRequest, room_name: &str) -> String {
    format!(
        "{} Request: {} - Room {}",
        request.request_group, request.request_type, room_name
    )
}

async fn create_service_request(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<ServiceRequestCreatedResponse>), ApiError> {
    if payload.request_group.trim().is_empty() {
        return Err(ApiError::validation("request_group is required"));
    }
    if payload.request_type.trim().is_empty() {
        return Err(ApiError::validation("request_type is required"));
    }
    let priority: Priority = payload.priority.parse().map_err(ApiError::Validation)?;
    let quantity = payload.quantity.unwrap_or(1);
    if quantity < 1 {
        return Err(ApiError::validation("quantity must be at least 1"));
    }

    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_create_ticket(&identity, &scope, payload.property_id),
        "create service requests on this property",
    )?;

    let room: Room = rooms::table
        .filter(rooms::id.eq(payload.room_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| {
            ApiError::InvalidReference(format!("room {} does not exist", payload.room_id))
        })?;
    if room.property_id != payload.property_id {
        return Err(ApiError::InvalidReference(
            "room does not belong to this property".to_string(),
        ));
    }

    let now = Utc::now();
    let mut request = ServiceRequest {
        id: Uuid::new_v4(),
        room_id: payload.room_id,
        property_id: payload.property_id,
        request_group: payload.request_group.trim().to_string(),
        request_type: payload.request_type.trim().to_string(),
        priority,
        quantity,
        guest_name: payload.guest_name,
        notes: payload.notes,
        status: ServiceRequestStatus::Pending,
        created_by_id: identity.user_id,
        assigned_task_id: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };

    let staff =
        recipients::group_staff_for_property(&mut conn, request.property_id, &request.request_group)?;

    let assignments = conn.transaction::<_, ApiError, _>(|conn| {
        let mut fanned_out = 0;
        if !staff.is_empty() {
            let task = Task {
                id: Uuid::new_v4(),
                title: task_title_for(&request, &room.name),
                description: request.notes.clone().unwrap_or_default(),
                status: TaskStatus::Pending,
                priority: request.priority,
                due_date: None,
                property_id: request.property_id,
                assigned_to_id: None,
                created_by_id: Some(identity.user_id),
                created_at: now,
                updated_at: now,
                completed_at: None,
            };
            diesel::insert_into(tasks::table).values(&task).execute(conn)?;
            for member in &staff {
                let assignment = TaskAssignment {
                    id: Uuid::new_v4(),
                    task_id: task.id,
                    ticket_id: request.id,
                    user_id: member.id,
                    status: AssignmentStatus::Pending,
                    is_service_request: true,
                    created_at: now,
                    updated_at: now,
                };
                diesel::insert_into(task_assignments::table)
                    .values(&assignment)
                    .execute(conn)?;
                fanned_out += 1;
            }
            request.assigned_task_id = Some(task.id);
        }
        diesel::insert_into(service_requests::table)
            .values(&request)
            .execute(conn)?;
        Ok(fanned_out)
    })?;

    state
        .notifier
        .dispatch(NotificationEvent::ServiceRequestCreated {
            request_id: request.id,
        });

    Ok((
        StatusCode::CREATED,
        Json(ServiceRequestCreatedResponse {
            task_created: assignments > 0,
            assignments,
            request,
        }),
    ))
}

async fn list_service_requests(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(filter): Query<ServiceRequestFilter>,
) -> Result<Json<Vec<ServiceRequest>>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;

    let mut query = service_requests::table
        .order((service_requests::created_at.desc(), service_requests::id.desc()))
        .into_boxed();
    if let Some(ids) = scope.id_vec() {
        query = query.filter(service_requests::property_id.eq_any(ids));
    }
    if let Some(status) = filter.status.as_deref() {
        let status: ServiceRequestStatus = status.parse().map_err(ApiError::Validation)?;
        query = query.filter(service_requests::status.eq(status));
    }
    if let Some(property_id) = filter.property_id {
        query = query.filter(service_requests::property_id.eq(property_id));
    }
    if let Some(room_id) = filter.room_id {
        query = query.filter(service_requests::room_id.eq(room_id));
    }

    let mut rows: Vec<ServiceRequest> = query.load(&mut conn)?;
    rows.retain(|r| access::can_view_service_request(&identity, &scope, r));
    Ok(Json(rows))
}

async fn get_service_request(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceRequest>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let request: ServiceRequest = service_requests::table
        .filter(service_requests::id.eq(id))
        .first(&mut conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_view_service_request(&identity, &scope, &request),
        "view this service request",
    )?;
    Ok(Json(request))
}

async fn update_service_request(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateServiceRequest>,
) -> Result<Json<ServiceRequest>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let before: ServiceRequest = service_requests::table
        .filter(service_requests::id.eq(id))
        .first(&mut conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    let manager = access::can_mutate_property(&identity, &scope, before.property_id);
    access::require(
        manager || access::can_view_service_request(&identity, &scope, &before),
        "modify this service request",
    )?;
    if !manager && !patch.is_status_only() {
        return Err(ApiError::forbidden(
            "staff may only change the status of a service request",
        ));
    }

    let status = patch
        .status
        .as_deref()
        .map(|s| s.parse::<ServiceRequestStatus>().map_err(ApiError::Validation))
        .transpose()?
        .unwrap_or(before.status);
    let priority = patch
        .priority
        .as_deref()
        .map(|p| p.parse::<Priority>().map_err(ApiError::Validation))
        .transpose()?
        .unwrap_or(before.priority);
    if let Some(quantity) = patch.quantity {
        if quantity < 1 {
            return Err(ApiError::validation("quantity must be at least 1"));
        }
    }

    let mut after = before.clone();
    after.status = status;
    after.priority = priority;
    if let Some(notes) = patch.notes {
        after.notes = Some(notes);
    }
    if let Some(quantity) = patch.quantity {
        after.quantity = quantity;
    }
    after.updated_at = Utc::now();

    let completing =
        after.status == ServiceRequestStatus::Completed && before.status != after.status;
    after.completed_at = match after.status {
        ServiceRequestStatus::Completed => before.completed_at.or(Some(after.updated_at)),
        _ => None,
    };

    conn.transaction::<_, ApiError, _>(|conn| {
        diesel::update(service_requests::table.filter(service_requests::id.eq(id)))
            .set(&after)
            .execute(conn)?;
        if let Some(task_id) = after.assigned_task_id {
            if completing {
                diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                    .set((
                        tasks::status.eq(TaskStatus::Completed),
                        tasks::completed_at.eq(Some(after.updated_at)),
                        tasks::updated_at.eq(after.updated_at),
                    ))
                    .execute(conn)?;
                mirror::sync_assignments(conn, task_id, TaskStatus::Completed)?;
            } else if after.priority != before.priority {
                diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
                    .set((
                        tasks::priority.eq(after.priority),
                        tasks::updated_at.eq(after.updated_at),
                    ))
                    .execute(conn)?;
            }
        }
        Ok(())
    })?;

    if completing {
        state
            .notifier
            .dispatch(NotificationEvent::ServiceRequestCompleted { request_id: id });
    }
    Ok(Json(after))
}

pub fn configure_service_request_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/service-requests",
            get(list_service_requests).post(create_service_request),
        )
        .route(
            "/service-requests/:id",
            get(get_service_request).patch(update_service_request),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staff_patch_is_limited_to_status() {
        let complete: UpdateServiceRequest =
            serde_json::from_str(r#"{"status":"completed"}"#).unwrap();
        assert!(complete.is_status_only());

        let reprioritize: UpdateServiceRequest =
            serde_json::from_str(r#"{"status":"completed","priority":"high"}"#).unwrap();
        assert!(!reprioritize.is_status_only());

        let restock: UpdateServiceRequest = serde_json::from_str(r#"{"quantity":3}"#).unwrap();
        assert!(!restock.is_status_only());
    }

    #[test]
    fn test_task_title_follows_convention() {
        let now = Utc::now();
        let request = ServiceRequest {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            request_group: "Housekeeping".into(),
            request_type: "Room Cleaning".into(),
            priority: Priority::Medium,
            quantity: 1,
            guest_name: None,
            notes: None,
            status: ServiceRequestStatus::Pending,
            created_by_id: Uuid::new_v4(),
            assigned_task_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        assert_eq!(
            task_title_for(&request, "301"),
            "Housekeeping Request: Room Cleaning - Room 301"
        );
    }
}
