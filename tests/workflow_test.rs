//! End-to-end checks of the pure work-item rules: dispatch selection,
//! status mirroring, and completion scoring working together.

use chrono::{Duration, Utc};
use uuid::Uuid;

use propserver::shared::enums::{Priority, Role, TaskStatus, TicketStatus};
use propserver::shared::models::{Task, User};
use propserver::tasks::score::completion_score;
use propserver::tickets::dispatch::{select_assignee, task_title_for};

fn manager(group: &str, created_offset_mins: i64) -> User {
    let created = Utc::now() - Duration::minutes(created_offset_mins);
    User {
        id: Uuid::new_v4(),
        username: format!("{}-mgr", group.to_lowercase()),
        email: format!("{}@example.com", group.to_lowercase()),
        password_hash: String::new(),
        role: Role::Manager,
        group_name: Some(group.to_string()),
        phone: None,
        is_active: true,
        manager_id: None,
        created_at: created,
        updated_at: created,
    }
}

#[test]
fn dispatch_prefers_department_then_falls_back() {
    let engineering = manager("Engineering", 100);
    let executive = manager("Executive", 200);
    let candidates = vec![executive.clone(), engineering.clone()];

    // Maintenance routes to Engineering even when an Executive is older.
    let picked = select_assignee("Maintenance", &candidates).unwrap();
    assert_eq!(picked.id, engineering.id);

    // Accounting with no Accounting manager lands on the Executive.
    let picked = select_assignee("Accounting", &candidates).unwrap();
    assert_eq!(picked.id, executive.id);

    // Housekeeping with nobody in Housekeeping stays unassigned.
    assert!(select_assignee("Housekeeping", &candidates).is_none());
}

#[test]
fn ticket_and_task_statuses_round_trip() {
    for status in [
        TicketStatus::Open,
        TicketStatus::InProgress,
        TicketStatus::Completed,
    ] {
        assert_eq!(
            status.mirrored_task_status().mirrored_ticket_status(),
            status
        );
    }
    assert_eq!(
        TaskStatus::Pending.mirrored_ticket_status(),
        TicketStatus::Open
    );
}

#[test]
fn dispatch_task_title_embeds_ticket_id() {
    let now = Utc::now();
    let ticket = propserver::shared::models::Ticket {
        id: Uuid::new_v4(),
        title: "Leak".into(),
        description: "water on floor".into(),
        status: TicketStatus::Open,
        priority: Priority::High,
        category: "Maintenance".into(),
        subcategory: None,
        user_id: Uuid::new_v4(),
        property_id: Uuid::new_v4(),
        room_id: None,
        created_at: now,
        updated_at: now,
        completed_at: None,
    };
    let title = task_title_for(&ticket);
    assert_eq!(title, format!("Task for Ticket #{}: Leak", ticket.id));
}

#[test]
fn completion_scores_are_bounded_for_every_priority() {
    let created = Utc::now();
    for priority in [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ] {
        for hours_late in [-20i64, 0, 5, 500] {
            let due = created + Duration::hours(24);
            let task = Task {
                id: Uuid::new_v4(),
                title: "t".into(),
                description: "d".into(),
                status: TaskStatus::Completed,
                priority,
                due_date: Some(due),
                property_id: Uuid::new_v4(),
                assigned_to_id: None,
                created_by_id: None,
                created_at: created,
                updated_at: created,
                completed_at: Some(due + Duration::hours(hours_late)),
            };
            let score = completion_score(&task).unwrap();
            assert!((0.0..=100.0).contains(&score));
        }
    }
}
