//! Auto-dispatch: picks the responsible user for a newly created ticket.
//!
//! Selection is a pure function over the fetched candidate list so the rule
//! is testable without a database. Candidates are the active property
//! managers of the ticket's property, ordered by account age for a
//! deterministic "first match".

use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::shared::enums::{
    group_matches, groups, AssignmentStatus, RoomStatus, TaskStatus,
};
use crate::shared::error::ApiError;
use crate::shared::models::{Task, TaskAssignment, Ticket, User};
use crate::shared::schema::{property_managers, task_assignments, tasks, users};

/// Fixed category routing table. Unknown categories have no direct group and
/// reach Executive through the fallback.
pub fn group_for_category(category: &str) -> Option<&'static str> {
    let c = category.trim();
    for (cat, group) in [
        ("Maintenance", groups::ENGINEERING),
        ("Housekeeping", groups::HOUSEKEEPING),
        ("Front Desk", groups::FRONT_DESK),
        ("General", groups::FRONT_DESK),
        ("IT", groups::IT),
        ("Security", groups::SECURITY),
        ("Food & Beverage", groups::FOOD_BEVERAGE),
        ("Accounting", groups::ACCOUNTING),
    ] {
        if c.eq_ignore_ascii_case(cat) {
            return Some(group);
        }
    }
    None
}

/// Operational categories handled on-site; these never fall back to
/// Executive when their own department has nobody on the property.
fn falls_back_to_executive(category: &str) -> bool {
    !["Maintenance", "Housekeeping", "Front Desk"]
        .iter()
        .any(|c| category.trim().eq_ignore_ascii_case(c))
}

/// First candidate in the mapped group, else the Executive fallback when the
/// category permits it. Candidates must already be active property managers
/// of the ticket's property.
pub fn select_assignee<'a>(category: &str, candidates: &'a [User]) -> Option<&'a User> {
    let in_group = |user: &&User, group: &str| {
        user.group_name
            .as_deref()
            .map(|g| group_matches(g, group))
            .unwrap_or(false)
    };

    if let Some(group) = group_for_category(category) {
        if let Some(user) = candidates.iter().find(|u| in_group(u, group)) {
            return Some(user);
        }
    }
    if falls_back_to_executive(category) {
        return candidates.iter().find(|u| in_group(u, groups::EXECUTIVE));
    }
    None
}

pub fn task_title_for(ticket: &Ticket) -> String {
    format!("Task for Ticket #{}: {}", ticket.id, ticket.title)
}

fn candidates_for(conn: &mut PgConnection, property_id: Uuid) -> Result<Vec<User>, ApiError> {
    let candidates = property_managers::table
        .inner_join(users::table.on(users::id.eq(property_managers::user_id)))
        .filter(property_managers::property_id.eq(property_id))
        .filter(users::is_active.eq(true))
        .order((users::created_at.asc(), users::id.asc()))
        .select(users::all_columns)
        .load(conn)?;
    Ok(candidates)
}

/// Runs the dispatch rule for a freshly inserted ticket. Returns the created
/// task and assignment, or `None` when no candidate satisfied the rule.
/// Must be called inside the ticket-creation transaction.
pub fn dispatch_ticket(
    conn: &mut PgConnection,
    ticket: &Ticket,
) -> Result<Option<(Task, TaskAssignment)>, ApiError> {
    let candidates = candidates_for(conn, ticket.property_id)?;
    let Some(assignee) = select_assignee(&ticket.category, &candidates) else {
        return Ok(None);
    };

    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4(),
        title: task_title_for(ticket),
        description: ticket.description.clone(),
        status: TaskStatus::Pending,
        priority: ticket.priority,
        due_date: None,
        property_id: ticket.property_id,
        assigned_to_id: Some(assignee.id),
        created_by_id: Some(ticket.user_id),
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

    diesel::insert_into(tasks::table).values(&task).execute(conn)?;
    diesel::insert_into(task_assignments::table)
        .values(&assignment)
        .execute(conn)?;
    Ok(Some((task, assignment)))
}

/// Room status implied by an open ticket's category. `None` means leave the
/// room alone.
pub fn room_status_for_category(category: &str, current: RoomStatus) -> Option<RoomStatus> {
    let c = category.trim();
    if c.eq_ignore_ascii_case("Maintenance") {
        Some(RoomStatus::Maintenance)
    } else if c.eq_ignore_ascii_case("Housekeeping") {
        Some(RoomStatus::Cleaning)
    } else if current == RoomStatus::Available {
        Some(RoomStatus::OutOfOrder)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::enums::Role;

    fn manager(group: &str) -> User {
        User {
            id: Uuid::new_v4(),
            username: group.to_lowercase(),
            email: format!("{}@example.com", group.to_lowercase()),
            password_hash: String::new(),
            role: Role::Manager,
            group_name: Some(group.to_string()),
            phone: None,
            is_active: true,
            manager_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_category_routing_table() {
        assert_eq!(group_for_category("Maintenance"), Some(groups::ENGINEERING));
        assert_eq!(group_for_category("General"), Some(groups::FRONT_DESK));
        assert_eq!(group_for_category("food & beverage"), Some(groups::FOOD_BEVERAGE));
        assert_eq!(group_for_category("Spa"), None);
    }

    #[test]
    fn test_department_manager_preferred() {
        let candidates = vec![manager("Executive"), manager("Engineering")];
        let picked = select_assignee("Maintenance", &candidates).unwrap();
        assert_eq!(picked.group_name.as_deref(), Some("Engineering"));
    }

    #[test]
    fn test_executive_fallback_for_office_categories() {
        let candidates = vec![manager("Executive")];
        let picked = select_assignee("Accounting", &candidates).unwrap();
        assert_eq!(picked.group_name.as_deref(), Some("Executive"));
    }

    #[test]
    fn test_unknown_category_reaches_executive() {
        let candidates = vec![manager("Executive")];
        assert!(select_assignee("Spa", &candidates).is_some());
    }

    #[test]
    fn test_operational_categories_never_fall_back() {
        let candidates = vec![manager("Executive")];
        assert!(select_assignee("Maintenance", &candidates).is_none());
        assert!(select_assignee("Housekeeping", &candidates).is_none());
        assert!(select_assignee("Front Desk", &candidates).is_none());
    }

    #[test]
    fn test_first_match_wins() {
        let first = manager("Engineering");
        let first_id = first.id;
        let candidates = vec![first, manager("Engineering")];
        assert_eq!(select_assignee("Maintenance", &candidates).unwrap().id, first_id);
    }

    #[test]
    fn test_room_side_effect() {
        assert_eq!(
            room_status_for_category("Maintenance", RoomStatus::Occupied),
            Some(RoomStatus::Maintenance)
        );
        assert_eq!(
            room_status_for_category("Housekeeping", RoomStatus::Available),
            Some(RoomStatus::Cleaning)
        );
        assert_eq!(
            room_status_for_category("IT", RoomStatus::Available),
            Some(RoomStatus::OutOfOrder)
        );
        assert_eq!(room_status_for_category("IT", RoomStatus::Occupied), None);
    }
}
