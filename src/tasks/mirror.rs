//! Ticket <-> task state mirroring.
//!
//! A write to either side of a linked pair updates the other inside the same
//! transaction, so readers never observe a half-mirrored pair. Callers are
//! responsible for opening the transaction; every function here takes the
//! transaction connection.

use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::shared::enums::{AssignmentStatus, TaskStatus, TicketStatus};
use crate::shared::error::ApiError;
use crate::shared::schema::{task_assignments, tasks, tickets};

fn assignment_status_for(status: TaskStatus) -> AssignmentStatus {
    match status {
        TaskStatus::Pending => AssignmentStatus::Pending,
        TaskStatus::InProgress => AssignmentStatus::InProgress,
        TaskStatus::Completed => AssignmentStatus::Completed,
    }
}

/// Task paired with a ticket, if dispatch created one.
pub fn task_link(conn: &mut PgConnection, ticket_id: Uuid) -> Result<Option<Uuid>, ApiError> {
    let id = task_assignments::table
        .filter(task_assignments::ticket_id.eq(ticket_id))
        .filter(task_assignments::is_service_request.eq(false))
        .select(task_assignments::task_id)
        .first(conn)
        .optional()?;
    Ok(id)
}

/// Ticket paired with a task, if any. Service-request links do not count.
pub fn ticket_link(conn: &mut PgConnection, task_id: Uuid) -> Result<Option<Uuid>, ApiError> {
    let id = task_assignments::table
        .filter(task_assignments::task_id.eq(task_id))
        .filter(task_assignments::is_service_request.eq(false))
        .select(task_assignments::ticket_id)
        .first(conn)
        .optional()?;
    Ok(id)
}

/// Push a ticket's status and priority onto its paired task and that task's
/// assignment rows.
pub fn mirror_ticket_to_task(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    status: TicketStatus,
    priority: crate::shared::enums::Priority,
) -> Result<(), ApiError> {
    let Some(task_id) = task_link(conn, ticket_id)? else {
        return Ok(());
    };
    let task_status = status.mirrored_task_status();
    let now = Utc::now();
    let completed_at = (task_status == TaskStatus::Completed).then_some(now);

    diesel::update(tasks::table.filter(tasks::id.eq(task_id)))
        .set((
            tasks::status.eq(task_status),
            tasks::priority.eq(priority),
            tasks::completed_at.eq(completed_at),
            tasks::updated_at.eq(now),
        ))
        .execute(conn)?;
    sync_assignments(conn, task_id, task_status)?;
    Ok(())
}

/// Push a task's status and priority back onto its paired ticket, and keep
/// the task's assignment rows in step.
pub fn mirror_task_to_ticket(
    conn: &mut PgConnection,
    task_id: Uuid,
    status: TaskStatus,
    priority: crate::shared::enums::Priority,
) -> Result<(), ApiError> {
    sync_assignments(conn, task_id, status)?;

    let Some(ticket_id) = ticket_link(conn, task_id)? else {
        return Ok(());
    };
    let ticket_status = status.mirrored_ticket_status();
    let now = Utc::now();
    let completed_at = (ticket_status == TicketStatus::Completed).then_some(now);

    diesel::update(tickets::table.filter(tickets::id.eq(ticket_id)))
        .set((
            tickets::status.eq(ticket_status),
            tickets::priority.eq(priority),
            tickets::completed_at.eq(completed_at),
            tickets::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn sync_assignments(
    conn: &mut PgConnection,
    task_id: Uuid,
    status: TaskStatus,
) -> Result<(), ApiError> {
    diesel::update(task_assignments::table.filter(task_assignments::task_id.eq(task_id)))
        .set((
            task_assignments::status.eq(assignment_status_for(status)),
            task_assignments::updated_at.eq(Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_status_tracks_task_status() {
        assert_eq!(
            assignment_status_for(TaskStatus::Pending),
            AssignmentStatus::Pending
        );
        assert_eq!(
            assignment_status_for(TaskStatus::InProgress),
            AssignmentStatus::InProgress
        );
        assert_eq!(
            assignment_status_for(TaskStatus::Completed),
            AssignmentStatus::Completed
        );
    }
}
