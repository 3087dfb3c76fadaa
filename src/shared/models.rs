use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::enums::{
    AssignmentStatus, Priority, PropertyStatus, Role, RoomStatus, ServiceRequestStatus,
    SubscriptionPlan, TaskStatus, TicketStatus,
};
use crate::shared::schema::{
    history, password_resets, properties, property_managers, rooms, service_requests,
    system_settings, task_assignments, tasks, tickets, user_properties, users,
};

// Changeset rows are written back whole: a `None` option field means NULL,
// not "leave unchanged". Applies to every struct carrying
// `treat_none_as_null` below.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = users)]
#[diesel(treat_none_as_null = true)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub group_name: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub manager_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = properties)]
pub struct Property {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub property_type: String,
    pub status: PropertyStatus,
    pub subscription_plan: SubscriptionPlan,
    pub has_attachments: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = rooms)]
pub struct Room {
    pub id: Uuid,
    pub property_id: Uuid,
    pub name: String,
    pub room_type: String,
    pub floor: i32,
    pub status: RoomStatus,
    pub capacity: i32,
    pub amenities: Vec<String>,
    pub last_cleaned: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = user_properties)]
pub struct UserProperty {
    pub id: Uuid,
    pub user_id: Uuid,
    pub property_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = property_managers)]
pub struct PropertyManager {
    pub id: Uuid,
    pub user_id: Uuid,
    pub property_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tickets)]
#[diesel(treat_none_as_null = true)]
pub struct Ticket {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub category: String,
    pub subcategory: Option<String>,
    pub user_id: Uuid,
    pub property_id: Uuid,
    pub room_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tasks)]
#[diesel(treat_none_as_null = true)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: Option<DateTime<Utc>>,
    pub property_id: Uuid,
    pub assigned_to_id: Option<Uuid>,
    pub created_by_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Links a task to either a ticket or a service request. `ticket_id` holds
/// the service-request id when `is_service_request` is set; the flag is the
/// only discriminator, so callers must honor it.
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = task_assignments)]
pub struct TaskAssignment {
    pub id: Uuid,
    pub task_id: Uuid,
    pub ticket_id: Uuid,
    pub user_id: Uuid,
    pub status: AssignmentStatus,
    pub is_service_request: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = service_requests)]
#[diesel(treat_none_as_null = true)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub room_id: Uuid,
    pub property_id: Uuid,
    pub request_group: String,
    pub request_type: String,
    pub priority: Priority,
    pub quantity: i32,
    pub guest_name: Option<String>,
    pub notes: Option<String>,
    pub status: ServiceRequestStatus,
    pub created_by_id: Uuid,
    pub assigned_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = history)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub action: String,
    pub field: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = password_resets)]
pub struct PasswordReset {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = system_settings)]
pub struct SystemSettings {
    pub id: i32,
    pub email_enabled: bool,
    pub smtp_host: String,
    pub smtp_port: i32,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_from: String,
    pub sms_enabled: bool,
    pub sms_api_url: String,
    pub sms_api_key: String,
    pub sms_from: String,
    pub attachments_enabled: bool,
    pub daily_reports_enabled: bool,
    pub report_hour: i32,
    pub report_minute: i32,
    pub report_timezone: String,
    pub report_last_fire: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SystemSettings {
    /// Singleton row id; the settings table has single-row semantics.
    pub const ROW_ID: i32 = 1;
}
