//! Recipient resolution for notification events.
//!
//! Each resolver returns active users only and deduplicates by email, so a
//! super admin who also manages the property gets a single message.

use std::collections::HashSet;

use diesel::prelude::*;
use uuid::Uuid;

use crate::shared::enums::{group_matches, Role};
use crate::shared::models::{ServiceRequest, Task, Ticket, User};
use crate::shared::schema::{
    property_managers, service_requests, task_assignments, tasks, tickets, user_properties, users,
};

pub fn dedup_by_email(mut recipients: Vec<User>) -> Vec<User> {
    let mut seen = HashSet::new();
    recipients.retain(|u| seen.insert(u.email.to_lowercase()));
    recipients
}

pub fn super_admins(conn: &mut PgConnection) -> QueryResult<Vec<User>> {
    users::table
        .filter(users::role.eq(Role::SuperAdmin))
        .filter(users::is_active.eq(true))
        .load(conn)
}

fn property_manager_users(conn: &mut PgConnection, property_id: Uuid) -> QueryResult<Vec<User>> {
    property_managers::table
        .inner_join(users::table.on(users::id.eq(property_managers::user_id)))
        .filter(property_managers::property_id.eq(property_id))
        .filter(users::is_active.eq(true))
        .select(users::all_columns)
        .load(conn)
}

fn property_staff(conn: &mut PgConnection, property_id: Uuid) -> QueryResult<Vec<User>> {
    user_properties::table
        .inner_join(users::table.on(users::id.eq(user_properties::user_id)))
        .filter(user_properties::property_id.eq(property_id))
        .filter(users::is_active.eq(true))
        .select(users::all_columns)
        .load(conn)
}

fn active_user(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<Option<User>> {
    users::table
        .filter(users::id.eq(user_id))
        .filter(users::is_active.eq(true))
        .first(conn)
        .optional()
}

/// Everyone who should hear about a ticket: admins, managers of the
/// property, the author, the mirrored-task assignees, and property staff
/// whose group matches the ticket category.
pub fn for_ticket(
    conn: &mut PgConnection,
    ticket_id: Uuid,
) -> QueryResult<Option<(Ticket, Vec<User>)>> {
    let Some(ticket) = tickets::table
        .filter(tickets::id.eq(ticket_id))
        .first::<Ticket>(conn)
        .optional()?
    else {
        return Ok(None);
    };

    let mut recipients = super_admins(conn)?;
    recipients.extend(property_manager_users(conn, ticket.property_id)?);
    if let Some(author) = active_user(conn, ticket.user_id)? {
        recipients.push(author);
    }

    let assignees: Vec<User> = task_assignments::table
        .inner_join(users::table.on(users::id.eq(task_assignments::user_id)))
        .filter(task_assignments::ticket_id.eq(ticket.id))
        .filter(task_assignments::is_service_request.eq(false))
        .filter(users::is_active.eq(true))
        .select(users::all_columns)
        .load(conn)?;
    recipients.extend(assignees);

    let staff = property_staff(conn, ticket.property_id)?;
    recipients.extend(
        staff
            .into_iter()
            .filter(|u| matches_group(u, &ticket.category)),
    );

    Ok(Some((ticket, dedup_by_email(recipients))))
}

/// The deleted row no longer exists, so assignee lookups are skipped.
pub fn for_deleted_ticket(conn: &mut PgConnection, ticket: &Ticket) -> QueryResult<Vec<User>> {
    let mut recipients = super_admins(conn)?;
    recipients.extend(property_manager_users(conn, ticket.property_id)?);
    if let Some(author) = active_user(conn, ticket.user_id)? {
        recipients.push(author);
    }
    Ok(dedup_by_email(recipients))
}

pub fn for_task(
    conn: &mut PgConnection,
    task_id: Uuid,
    extra_assignee: Option<Uuid>,
    previous_assignee: Option<Uuid>,
) -> QueryResult<Option<(Task, Vec<User>)>> {
    let Some(task) = tasks::table
        .filter(tasks::id.eq(task_id))
        .first::<Task>(conn)
        .optional()?
    else {
        return Ok(None);
    };

    let mut recipients = super_admins(conn)?;
    recipients.extend(property_manager_users(conn, task.property_id)?);
    for id in [
        task.assigned_to_id,
        task.created_by_id,
        extra_assignee,
        previous_assignee,
    ]
    .into_iter()
    .flatten()
    {
        if let Some(user) = active_user(conn, id)? {
            recipients.push(user);
        }
    }

    Ok(Some((task, dedup_by_email(recipients))))
}

pub fn for_property_admins(
    conn: &mut PgConnection,
    property_id: Uuid,
) -> QueryResult<Vec<User>> {
    let mut recipients = super_admins(conn)?;
    recipients.extend(property_manager_users(conn, property_id)?);
    Ok(dedup_by_email(recipients))
}

/// Active staff in the request group who are attached to the property,
/// either as assigned staff or as managers.
pub fn for_service_request(
    conn: &mut PgConnection,
    request_id: Uuid,
) -> QueryResult<Option<(ServiceRequest, Vec<User>)>> {
    let Some(request) = service_requests::table
        .filter(service_requests::id.eq(request_id))
        .first::<ServiceRequest>(conn)
        .optional()?
    else {
        return Ok(None);
    };

    let staff = group_staff_for_property(conn, request.property_id, &request.request_group)?;
    Ok(Some((request, staff)))
}

/// Shared with the service-request fan-out: one task assignment and one SMS
/// per user returned here.
pub fn group_staff_for_property(
    conn: &mut PgConnection,
    property_id: Uuid,
    group: &str,
) -> QueryResult<Vec<User>> {
    let mut staff = property_staff(conn, property_id)?;
    staff.extend(property_manager_users(conn, property_id)?);
    staff.retain(|u| matches_group(u, group));
    Ok(dedup_by_email(staff))
}

fn matches_group(user: &User, group: &str) -> bool {
    user.group_name
        .as_deref()
        .map(|g| group_matches(g, group))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(email: &str, group: Option<&str>) -> User {
        User {
            id: Uuid::new_v4(),
            username: email.split('@').next().unwrap_or(email).to_string(),
            email: email.to_string(),
            password_hash: String::new(),
            role: Role::User,
            group_name: group.map(String::from),
            phone: None,
            is_active: true,
            manager_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_dedup_by_email_is_case_insensitive() {
        let deduped = dedup_by_email(vec![
            user("ops@example.com", None),
            user("OPS@example.com", None),
            user("gm@example.com", None),
        ]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].email, "ops@example.com");
    }

    #[test]
    fn test_group_match_tolerates_spacing_and_case() {
        let u = user("hk@example.com", Some(" housekeeping "));
        assert!(matches_group(&u, "Housekeeping"));
        assert!(!matches_group(&u, "Engineering"));
        assert!(!matches_group(&user("none@example.com", None), "Engineering"));
    }
}
