//! Ticket lifecycle: create (with auto-dispatch), scoped listing, update
//! with ticket->task mirroring, and delete with room restoration.

pub mod dispatch;

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
use crate::history;
use crate::notify::NotificationEvent;
use crate::shared::enums::{Priority, RoomStatus, TicketStatus};
use crate::shared::error::ApiError;
use crate::shared::models::{Room, Ticket};
use crate::shared::schema::{properties, rooms, task_assignments, tickets};
use crate::shared::settings::load_settings;
use crate::shared::state::AppState;
use crate::shared::utils::{double_option, get_conn};
use crate::tasks::mirror;

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: String,
    pub priority: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub property_id: Uuid,
    pub room_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct TicketCreatedResponse {
    pub ticket: Ticket,
    pub task_created: bool,
    pub notifications_sent: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub room_id: Option<Option<Uuid>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TicketFilter {
    pub status: Option<String>,
    pub priority: Option<String>,
    pub category: Option<String>,
    pub property_id: Option<Uuid>,
}

fn parse_priority(raw: &str) -> Result<Priority, ApiError> {
    raw.parse().map_err(ApiError::Validation)
}

fn parse_status(raw: &str) -> Result<TicketStatus, ApiError> {
    raw.parse().map_err(ApiError::Validation)
}

fn load_room_of_property(
    conn: &mut PgConnection,
    room_id: Uuid,
    property_id: Uuid,
) -> Result<Room, ApiError> {
    let room: Room = rooms::table
        .filter(rooms::id.eq(room_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| ApiError::InvalidReference(format!("room {room_id} does not exist")))?;
    if room.property_id != property_id {
        return Err(ApiError::InvalidReference(
            "room does not belong to the ticket's property".to_string(),
        ));
    }
    Ok(room)
}

fn set_room_status(
    conn: &mut PgConnection,
    room_id: Uuid,
    status: RoomStatus,
) -> Result<(), ApiError> {
    diesel::update(rooms::table.filter(rooms::id.eq(room_id)))
        .set((rooms::status.eq(status), rooms::updated_at.eq(Utc::now())))
        .execute(conn)?;
    Ok(())
}

async fn create_ticket(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(payload): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<TicketCreatedResponse>), ApiError> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::validation("title is required"));
    }
    if payload.description.trim().is_empty() {
        return Err(ApiError::validation("description is required"));
    }
    if payload.category.trim().is_empty() {
        return Err(ApiError::validation("category is required"));
    }
    let priority = parse_priority(&payload.priority)?;

    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_create_ticket(&identity, &scope, payload.property_id),
        "create tickets on this property",
    )?;

    let property_exists: i64 = properties::table
        .filter(properties::id.eq(payload.property_id))
        .count()
        .get_result(&mut conn)?;
    if property_exists == 0 {
        return Err(ApiError::InvalidReference(format!(
            "property {} does not exist",
            payload.property_id
        )));
    }
    let room = payload
        .room_id
        .map(|id| load_room_of_property(&mut conn, id, payload.property_id))
        .transpose()?;

    let now = Utc::now();
    let ticket = Ticket {
        id: Uuid::new_v4(),
        title: payload.title.trim().to_string(),
        description: payload.description.trim().to_string(),
        status: TicketStatus::Open,
        priority,
        category: payload.category.trim().to_string(),
        subcategory: payload.subcategory,
        user_id: identity.user_id,
        property_id: payload.property_id,
        room_id: payload.room_id,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };

    let dispatched = conn.transaction::<_, ApiError, _>(|conn| {
        diesel::insert_into(tickets::table)
            .values(&ticket)
            .execute(conn)?;
        let dispatched = dispatch::dispatch_ticket(conn, &ticket)?;
        if let Some(room) = &room {
            if let Some(status) = dispatch::room_status_for_category(&ticket.category, room.status)
            {
                set_room_status(conn, room.id, status)?;
            }
        }
        history::record_created(conn, "ticket", ticket.id, identity.user_id)?;
        Ok(dispatched)
    })?;

    let settings = load_settings(&mut conn)?;
    let notifications_sent = crate::notify::notifications_enabled(&settings);
    state
        .notifier
        .dispatch(NotificationEvent::TicketCreated { ticket_id: ticket.id });
    if let Some((task, assignment)) = &dispatched {
        state.notifier.dispatch(NotificationEvent::TaskAssigned {
            task_id: task.id,
            assignee_id: assignment.user_id,
        });
    }

    Ok((
        StatusCode::CREATED,
        Json(TicketCreatedResponse {
            ticket,
            task_created: dispatched.is_some(),
            notifications_sent,
        }),
    ))
}

async fn list_tickets(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(filter): Query<TicketFilter>,
) -> Result<Json<Vec<Ticket>>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;

    let mut query = tickets::table
        .order((tickets::created_at.desc(), tickets::id.desc()))
        .into_boxed();
    if let Some(ids) = scope.id_vec() {
        query = query.filter(tickets::property_id.eq_any(ids));
    }
    if let Some(status) = filter.status.as_deref() {
        query = query.filter(tickets::status.eq(parse_status(status)?));
    }
    if let Some(priority) = filter.priority.as_deref() {
        query = query.filter(tickets::priority.eq(parse_priority(priority)?));
    }
    if let Some(category) = filter.category {
        query = query.filter(tickets::category.eq(category));
    }
    if let Some(property_id) = filter.property_id {
        query = query.filter(tickets::property_id.eq(property_id));
    }

    // Final visibility pass uses the same predicate as per-item reads so
    // listings and direct GETs agree.
    let mut rows: Vec<Ticket> = query.load(&mut conn)?;
    rows.retain(|t| access::can_view_ticket(&identity, &scope, t));
    Ok(Json(rows))
}

async fn get_ticket(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Ticket>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let ticket: Ticket = tickets::table.filter(tickets::id.eq(id)).first(&mut conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_view_ticket(&identity, &scope, &ticket),
        "view this ticket",
    )?;
    Ok(Json(ticket))
}

async fn update_ticket(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(patch): Json<UpdateTicketRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let before: Ticket = tickets::table.filter(tickets::id.eq(id)).first(&mut conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_mutate_ticket(&identity, &scope, &before),
        "modify this ticket",
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
    if let Some(category) = patch.category {
        after.category = category;
    }
    if let Some(subcategory) = patch.subcategory {
        after.subcategory = Some(subcategory);
    }
    if let Some(room_id) = patch.room_id {
        after.room_id = room_id;
    }
    after.updated_at = Utc::now();
    after.completed_at = match (before.status, after.status) {
        (_, TicketStatus::Completed) => before.completed_at.or(Some(after.updated_at)),
        _ => None,
    };

    if let Some(room_id) = after.room_id {
        if after.room_id != before.room_id || after.category != before.category {
            load_room_of_property(&mut conn, room_id, after.property_id)?;
        }
    }

    let changes = vec![
        history::change("title", &before.title, &after.title),
        history::change("description", &before.description, &after.description),
        history::change("category", &before.category, &after.category),
        history::change_opt(
            "subcategory",
            before.subcategory.as_deref(),
            after.subcategory.as_deref(),
        ),
        history::change("status", before.status, after.status),
        history::change("priority", before.priority, after.priority),
        history::change_opt(
            "room_id",
            before.room_id.map(|r| r.to_string()).as_deref(),
            after.room_id.map(|r| r.to_string()).as_deref(),
        ),
    ];
    let changed: Vec<_> = changes.into_iter().filter(|c| c.old != c.new).collect();
    if changed.is_empty() {
        return Ok(Json(before));
    }

    conn.transaction::<_, ApiError, _>(|conn| {
        if after.room_id != before.room_id {
            if let Some(old_room) = before.room_id {
                set_room_status(conn, old_room, RoomStatus::Available)?;
            }
            if let Some(new_room) = after.room_id {
                let room = load_room_of_property(conn, new_room, after.property_id)?;
                if let Some(status) =
                    dispatch::room_status_for_category(&after.category, room.status)
                {
                    set_room_status(conn, new_room, status)?;
                }
            }
        }

        diesel::update(tickets::table.filter(tickets::id.eq(id)))
            .set(&after)
            .execute(conn)?;
        if after.status != before.status || after.priority != before.priority {
            mirror::mirror_ticket_to_task(conn, id, after.status, after.priority)?;
        }
        history::record_changes(conn, "ticket", id, identity.user_id, &changed)?;
        Ok(())
    })?;

    state.notifier.dispatch(NotificationEvent::TicketUpdated {
        ticket_id: id,
        changes: changed,
    });
    Ok(Json(after))
}

async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let ticket: Ticket = tickets::table.filter(tickets::id.eq(id)).first(&mut conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_mutate_ticket(&identity, &scope, &ticket),
        "delete this ticket",
    )?;

    conn.transaction::<_, ApiError, _>(|conn| {
        diesel::delete(
            task_assignments::table
                .filter(task_assignments::ticket_id.eq(id))
                .filter(task_assignments::is_service_request.eq(false)),
        )
        .execute(conn)?;
        if let Some(room_id) = ticket.room_id {
            set_room_status(conn, room_id, RoomStatus::Available)?;
        }
        diesel::delete(tickets::table.filter(tickets::id.eq(id))).execute(conn)?;
        history::record_deleted(conn, "ticket", id, identity.user_id)?;
        Ok(())
    })?;

    state
        .notifier
        .dispatch(NotificationEvent::TicketDeleted { ticket });
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub fn configure_ticket_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tickets", get(list_tickets).post(create_ticket))
        .route(
            "/tickets/:id",
            get(get_ticket).patch(update_ticket).delete(delete_ticket),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_payload_distinguishes_missing_from_null_room() {
        let missing: UpdateTicketRequest = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert!(missing.room_id.is_none());

        let unlink: UpdateTicketRequest = serde_json::from_str(r#"{"room_id":null}"#).unwrap();
        assert_eq!(unlink.room_id, Some(None));

        let id = Uuid::new_v4();
        let set: UpdateTicketRequest =
            serde_json::from_str(&format!(r#"{{"room_id":"{id}"}}"#)).unwrap();
        assert_eq!(set.room_id, Some(Some(id)));
    }

    #[test]
    fn test_full_row_update_writes_cleared_columns() {
        // Unlinking the room and reopening a completed ticket must emit NULL
        // assignments, not silently skip the columns.
        let now = Utc::now();
        let ticket = Ticket {
            id: Uuid::new_v4(),
            title: "t".into(),
            description: "d".into(),
            status: TicketStatus::Open,
            priority: Priority::Medium,
            category: "Maintenance".into(),
            subcategory: None,
            user_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            room_id: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        let query = diesel::update(tickets::table.filter(tickets::id.eq(ticket.id))).set(&ticket);
        let sql = diesel::debug_query::<diesel::pg::Pg, _>(&query).to_string();
        assert!(sql.contains("\"room_id\""));
        assert!(sql.contains("\"completed_at\""));
    }

    #[test]
    fn test_priority_parsing_accepts_source_casing() {
        assert_eq!(parse_priority("High").unwrap(), Priority::High);
        assert_eq!(parse_priority("urgent").unwrap(), Priority::Critical);
        assert!(parse_priority("sev1").is_err());
    }
}
