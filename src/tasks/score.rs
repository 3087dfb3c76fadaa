//! Task completion scoring.
//!
//! A completed task earns a score in [0, 100]: a base of 70, a bonus of up
//! to 20 for finishing ahead of the due date, a penalty of up to 50 for
//! overshooting it, then a priority multiplier and a final clamp. Tasks
//! without a due date score the weighted base.

use crate::shared::models::Task;

const BASE: f64 = 70.0;
const MAX_BONUS: f64 = 20.0;
const MAX_PENALTY: f64 = 50.0;

/// `None` for tasks that are not completed yet.
pub fn completion_score(task: &Task) -> Option<f64> {
    let completed_at = task.completed_at?;
    let elapsed_hours = (completed_at - task.created_at).num_minutes() as f64 / 60.0;

    let mut score = BASE;
    if let Some(due) = task.due_date {
        let allotted_hours = ((due - task.created_at).num_minutes() as f64 / 60.0).max(1.0);
        if elapsed_hours <= allotted_hours {
            // Earlier finishes earn a larger share of the bonus.
            score += MAX_BONUS * (1.0 - elapsed_hours / allotted_hours).max(0.0);
        } else {
            let overrun = (elapsed_hours - allotted_hours) / allotted_hours;
            score -= MAX_PENALTY * overrun.min(1.0);
        }
    }

    Some((score * task.priority.score_weight()).clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::enums::{Priority, TaskStatus};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn task(priority: Priority, due_hours: Option<i64>, took_hours: i64) -> Task {
        let created = Utc::now();
        Task {
            id: Uuid::new_v4(),
            title: "t".into(),
            description: "d".into(),
            status: TaskStatus::Completed,
            priority,
            due_date: due_hours.map(|h| created + Duration::hours(h)),
            property_id: Uuid::new_v4(),
            assigned_to_id: None,
            created_by_id: None,
            created_at: created,
            updated_at: created,
            completed_at: Some(created + Duration::hours(took_hours)),
        }
    }

    #[test]
    fn test_incomplete_task_has_no_score() {
        let mut t = task(Priority::Low, Some(10), 5);
        t.completed_at = None;
        assert!(completion_score(&t).is_none());
    }

    #[test]
    fn test_score_stays_in_range() {
        for priority in [
            Priority::Critical,
            Priority::High,
            Priority::Medium,
            Priority::Low,
        ] {
            for (due, took) in [
                (Some(24), 1),
                (Some(24), 24),
                (Some(24), 240),
                (Some(1), 100),
                (None, 5),
            ] {
                let score = completion_score(&task(priority, due, took)).unwrap();
                assert!(
                    (0.0..=100.0).contains(&score),
                    "score {score} out of range for {priority:?} due={due:?} took={took}"
                );
            }
        }
    }

    #[test]
    fn test_early_beats_late() {
        let early = completion_score(&task(Priority::Medium, Some(24), 2)).unwrap();
        let on_time = completion_score(&task(Priority::Medium, Some(24), 24)).unwrap();
        let late = completion_score(&task(Priority::Medium, Some(24), 48)).unwrap();
        assert!(early > on_time);
        assert!(on_time > late);
    }

    #[test]
    fn test_high_priority_on_time_caps_at_hundred() {
        let score = completion_score(&task(Priority::Critical, Some(24), 1)).unwrap();
        assert_eq!(score, 100.0);
    }
}
