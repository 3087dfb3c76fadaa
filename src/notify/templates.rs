//! Message rendering. Plain `format!` HTML, one function per message kind.

use diesel::prelude::*;
use uuid::Uuid;

use super::FieldChange;
use crate::shared::enums::{PropertyStatus, RoomStatus};
use crate::shared::models::{Property, Room, ServiceRequest, Task, Ticket, User};
use crate::shared::schema::{properties, rooms, users};

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn change_rows(changes: &[FieldChange]) -> String {
    changes
        .iter()
        .map(|c| {
            format!(
                "<tr><td><b>{}</b></td><td>{}</td><td>{}</td></tr>",
                escape_html(&c.field),
                escape_html(&c.old),
                escape_html(&c.new)
            )
        })
        .collect()
}

fn ticket_summary(ticket: &Ticket) -> String {
    format!(
        "<p><b>{}</b></p>\
         <p>{}</p>\
         <p>Priority: {} &middot; Category: {} &middot; Status: {}</p>",
        escape_html(&ticket.title),
        escape_html(&ticket.description),
        ticket.priority,
        escape_html(&ticket.category),
        ticket.status
    )
}

pub fn ticket_created(ticket: &Ticket) -> (String, String) {
    let subject = format!("New Ticket: {}", ticket.title);
    let html = format!(
        "<h2>A new ticket was created</h2>{}",
        ticket_summary(ticket)
    );
    (subject, html)
}

pub fn ticket_updated(ticket: &Ticket, changes: &[FieldChange]) -> (String, String) {
    let subject = format!("Ticket Updated: {}", ticket.title);
    let html = format!(
        "<h2>Ticket updated</h2>{}\
         <table><tr><th>Field</th><th>Before</th><th>After</th></tr>{}</table>",
        ticket_summary(ticket),
        change_rows(changes)
    );
    (subject, html)
}

pub fn ticket_deleted(ticket: &Ticket) -> (String, String) {
    let subject = format!("Ticket Deleted: {}", ticket.title);
    let html = format!("<h2>Ticket deleted</h2>{}", ticket_summary(ticket));
    (subject, html)
}

pub fn task_assigned(task: &Task) -> (String, String) {
    let subject = format!("Task Assigned: {}", task.title);
    let html = format!(
        "<h2>You have a new task</h2>\
         <p><b>{}</b></p><p>{}</p><p>Priority: {} &middot; Status: {}</p>",
        escape_html(&task.title),
        escape_html(&task.description),
        task.priority,
        task.status
    );
    (subject, html)
}

pub fn task_updated(task: &Task, changes: &[FieldChange]) -> (String, String) {
    let subject = format!("Task Updated: {}", task.title);
    let html = format!(
        "<h2>Task updated</h2><p><b>{}</b></p>\
         <table><tr><th>Field</th><th>Before</th><th>After</th></tr>{}</table>",
        escape_html(&task.title),
        change_rows(changes)
    );
    (subject, html)
}

pub fn password_reset(username: &str, token: &str) -> (String, String) {
    let subject = "Password Reset Request".to_string();
    let html = format!(
        "<h2>Password reset</h2>\
         <p>Hello {},</p>\
         <p>Use the code below to reset your password. It expires in one hour.</p>\
         <p><code>{}</code></p>\
         <p>If you did not request this, you can ignore this message.</p>",
        escape_html(username),
        escape_html(token)
    );
    (subject, html)
}

pub fn user_managed(
    conn: &mut PgConnection,
    user_id: Uuid,
    changes: &[FieldChange],
) -> QueryResult<(String, String)> {
    let username = users::table
        .filter(users::id.eq(user_id))
        .first::<User>(conn)
        .optional()?
        .map(|u| u.username)
        .unwrap_or_else(|| user_id.to_string());
    let subject = format!("User Account Updated: {username}");
    let html = format!(
        "<h2>User account updated</h2><p>Account: <b>{}</b></p>\
         <table><tr><th>Field</th><th>Before</th><th>After</th></tr>{}</table>",
        escape_html(&username),
        change_rows(changes)
    );
    Ok((subject, html))
}

pub fn room_status_changed(
    conn: &mut PgConnection,
    room_id: Uuid,
    status: RoomStatus,
) -> QueryResult<(String, String)> {
    let name = rooms::table
        .filter(rooms::id.eq(room_id))
        .first::<Room>(conn)
        .optional()?
        .map(|r| r.name)
        .unwrap_or_else(|| room_id.to_string());
    let subject = format!("Room {name} is now {status}");
    let html = format!(
        "<h2>Room status change</h2><p>Room <b>{}</b> is now <b>{}</b>.</p>",
        escape_html(&name),
        status
    );
    Ok((subject, html))
}

pub fn property_status_changed(
    conn: &mut PgConnection,
    property_id: Uuid,
    status: PropertyStatus,
) -> QueryResult<(String, String)> {
    let name = properties::table
        .filter(properties::id.eq(property_id))
        .first::<Property>(conn)
        .optional()?
        .map(|p| p.name)
        .unwrap_or_else(|| property_id.to_string());
    let subject = format!("Property {name} is now {status}");
    let html = format!(
        "<h2>Property status change</h2><p>Property <b>{}</b> is now <b>{}</b>.</p>",
        escape_html(&name),
        status
    );
    Ok((subject, html))
}

fn room_name(conn: &mut PgConnection, room_id: Uuid) -> QueryResult<String> {
    Ok(rooms::table
        .filter(rooms::id.eq(room_id))
        .first::<Room>(conn)
        .optional()?
        .map(|r| r.name)
        .unwrap_or_else(|| room_id.to_string()))
}

pub fn service_request_sms(
    conn: &mut PgConnection,
    request: &ServiceRequest,
) -> QueryResult<String> {
    let room = room_name(conn, request.room_id)?;
    let mut body = format!(
        "{}: {} x{} - Room {} ({} priority)",
        request.request_group, request.request_type, request.quantity, room, request.priority
    );
    if let Some(guest) = request.guest_name.as_deref() {
        body.push_str(&format!(" for {guest}"));
    }
    if let Some(notes) = request.notes.as_deref() {
        body.push_str(&format!(" - {notes}"));
    }
    Ok(body)
}

pub fn service_request_completed_sms(
    conn: &mut PgConnection,
    request: &ServiceRequest,
) -> QueryResult<String> {
    let room = room_name(conn, request.room_id)?;
    Ok(format!(
        "Completed: {} - Room {}",
        request.request_type, room
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::enums::{Priority, TicketStatus};
    use chrono::Utc;

    #[test]
    fn test_html_is_escaped() {
        let ticket = Ticket {
            id: Uuid::new_v4(),
            title: "<script>alert(1)</script>".into(),
            description: "a & b".into(),
            status: TicketStatus::Open,
            priority: Priority::High,
            category: "IT".into(),
            subcategory: None,
            user_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            room_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };
        let (subject, html) = ticket_created(&ticket);
        assert!(subject.contains("<script>"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("a &amp; b"));
    }

    #[test]
    fn test_change_table_lists_every_field() {
        let changes = vec![
            FieldChange {
                field: "status".into(),
                old: "open".into(),
                new: "in_progress".into(),
            },
            FieldChange {
                field: "priority".into(),
                old: "low".into(),
                new: "critical".into(),
            },
        ];
        let rows = change_rows(&changes);
        assert!(rows.contains("status"));
        assert!(rows.contains("critical"));
        assert_eq!(rows.matches("<tr>").count(), 2);
    }
}
