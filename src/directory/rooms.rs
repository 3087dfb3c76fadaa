//! Rooms, nested under their property. A room cannot be deleted while any
//! ticket still references it.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::access::{self, Identity};
use crate::notify::NotificationEvent;
use crate::shared::enums::RoomStatus;
use crate::shared::error::ApiError;
use crate::shared::models::Room;
use crate::shared::schema::{rooms, tickets};
use crate::shared::state::AppState;
use crate::shared::utils::get_conn;

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: String,
    pub room_type: String,
    pub floor: i32,
    pub capacity: Option<i32>,
    pub amenities: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRoomRequest {
    pub name: Option<String>,
    pub room_type: Option<String>,
    pub floor: Option<i32>,
    pub status: Option<String>,
    pub capacity: Option<i32>,
    pub amenities: Option<Vec<String>>,
}

async fn list_rooms(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(property_id): Path<Uuid>,
) -> Result<Json<Vec<Room>>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    if !scope.allows(property_id) {
        return Err(ApiError::forbidden("property is outside your scope"));
    }
    let rows = rooms::table
        .filter(rooms::property_id.eq(property_id))
        .order(rooms::name.asc())
        .load(&mut conn)?;
    Ok(Json(rows))
}

async fn create_room(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(property_id): Path<Uuid>,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<Room>), ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_mutate_property(&identity, &scope, property_id),
        "add rooms to this property",
    )?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::validation("name is required"));
    }

    let now = Utc::now();
    let room = Room {
        id: Uuid::new_v4(),
        property_id,
        name: payload.name.trim().to_string(),
        room_type: payload.room_type,
        floor: payload.floor,
        status: RoomStatus::Available,
        capacity: payload.capacity.unwrap_or(2),
        amenities: payload.amenities.unwrap_or_default(),
        last_cleaned: None,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(rooms::table).values(&room).execute(&mut conn)?;
    Ok((StatusCode::CREATED, Json(room)))
}

async fn update_room(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path((property_id, room_id)): Path<(Uuid, Uuid)>,
    Json(patch): Json<UpdateRoomRequest>,
) -> Result<Json<Room>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_mutate_property(&identity, &scope, property_id),
        "modify rooms on this property",
    )?;
    let before: Room = rooms::table
        .filter(rooms::id.eq(room_id))
        .filter(rooms::property_id.eq(property_id))
        .first(&mut conn)?;

    let status = patch
        .status
        .as_deref()
        .map(|s| s.parse::<RoomStatus>().map_err(ApiError::Validation))
        .transpose()?
        .unwrap_or(before.status);

    let mut after = before.clone();
    after.status = status;
    if let Some(name) = patch.name {
        after.name = name;
    }
    if let Some(room_type) = patch.room_type {
        after.room_type = room_type;
    }
    if let Some(floor) = patch.floor {
        after.floor = floor;
    }
    if let Some(capacity) = patch.capacity {
        after.capacity = capacity;
    }
    if let Some(amenities) = patch.amenities {
        after.amenities = amenities;
    }
    // Coming out of cleaning marks the room freshly cleaned.
    if before.status == RoomStatus::Cleaning && after.status == RoomStatus::Available {
        after.last_cleaned = Some(Utc::now());
    }
    after.updated_at = Utc::now();

    diesel::update(rooms::table.filter(rooms::id.eq(room_id)))
        .set(&after)
        .execute(&mut conn)?;

    if after.status != before.status {
        state.notifier.dispatch(NotificationEvent::RoomStatusChanged {
            room_id,
            property_id,
            status: after.status,
        });
    }
    Ok(Json(after))
}

async fn delete_room(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path((property_id, room_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    access::require(
        access::can_mutate_property(&identity, &scope, property_id),
        "delete rooms on this property",
    )?;

    // Guard and delete share a transaction so a ticket created in between
    // cannot end up pointing at a vanished room.
    conn.transaction::<_, ApiError, _>(|conn| {
        let referencing: i64 = tickets::table
            .filter(tickets::room_id.eq(room_id))
            .count()
            .get_result(conn)?;
        if referencing > 0 {
            return Err(ApiError::Conflict(
                "room still has tickets referencing it".to_string(),
            ));
        }
        diesel::delete(
            rooms::table
                .filter(rooms::id.eq(room_id))
                .filter(rooms::property_id.eq(property_id)),
        )
        .execute(conn)?;
        Ok(())
    })?;
    Ok(Json(serde_json::json!({ "deleted": room_id })))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/properties/:id/rooms", get(list_rooms).post(create_room))
        .route(
            "/properties/:id/rooms/:room_id",
            get(get_room).patch(update_room).delete(delete_room),
        )
}

async fn get_room(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path((property_id, room_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Room>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let scope = access::scope_for(&mut conn, &identity)?;
    if !scope.allows(property_id) {
        return Err(ApiError::forbidden("property is outside your scope"));
    }
    let room: Room = rooms::table
        .filter(rooms::id.eq(room_id))
        .filter(rooms::property_id.eq(property_id))
        .first(&mut conn)?;
    Ok(Json(room))
}
