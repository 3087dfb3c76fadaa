//! Daily executive digest: per-property activity buckets, summary totals,
//! and top resolvers, rendered to HTML and handed to the notifier.

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use diesel::prelude::*;
use log::{info, warn};
use uuid::Uuid;

use crate::notify::{templates::escape_html, NotificationEvent, Notifier};
use crate::shared::enums::{
    group_matches, groups, AssignmentStatus, ServiceRequestStatus, TaskStatus, TicketStatus,
};
use crate::shared::error::ApiError;
use crate::shared::models::{Property, ServiceRequest, SystemSettings, Task, Ticket, User};
use crate::shared::schema::{
    properties, service_requests, task_assignments, tasks, tickets, user_properties, users,
};
use crate::shared::settings::load_settings;
use crate::shared::utils::DbPool;

#[derive(Debug)]
pub struct PropertyReport {
    pub property: Property,
    pub open_tickets: Vec<Ticket>,
    pub completed_tickets: Vec<(Ticket, String)>,
    pub open_tasks: Vec<Task>,
    pub completed_tasks: Vec<(Task, String)>,
    pub open_requests: Vec<ServiceRequest>,
    pub completed_requests: Vec<(ServiceRequest, String)>,
}

impl PropertyReport {
    pub fn has_activity(&self) -> bool {
        !(self.open_tickets.is_empty()
            && self.completed_tickets.is_empty()
            && self.open_tasks.is_empty()
            && self.completed_tasks.is_empty()
            && self.open_requests.is_empty()
            && self.completed_requests.is_empty())
    }
}

/// UTC bounds of "today" in the report timezone, evaluated once at job
/// start so every query shares the same boundary. The end bound is the next
/// local midnight, so DST transition days keep their real 23 or 25 hours.
pub fn day_bounds(now: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_day = now.with_timezone(&tz).date_naive();
    let midnight = |day: chrono::NaiveDate| {
        tz.from_local_datetime(&day.and_hms_opt(0, 0, 0).unwrap_or_default())
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    };
    let start = midnight(local_day).unwrap_or(now - Duration::hours(24));
    let end = local_day
        .succ_opt()
        .and_then(midnight)
        .unwrap_or(start + Duration::hours(24));
    (start, end)
}

fn username_of(conn: &mut PgConnection, user_id: Option<Uuid>) -> Result<String, ApiError> {
    let Some(user_id) = user_id else {
        return Ok("unassigned".to_string());
    };
    let name: Option<String> = users::table
        .filter(users::id.eq(user_id))
        .select(users::username)
        .first(conn)
        .optional()?;
    Ok(name.unwrap_or_else(|| "unassigned".to_string()))
}

/// Completer of a finished service request: the first assignment row in the
/// fan-out that reached Completed.
fn request_completer(conn: &mut PgConnection, request_id: Uuid) -> Result<String, ApiError> {
    let completer: Option<Uuid> = task_assignments::table
        .filter(task_assignments::ticket_id.eq(request_id))
        .filter(task_assignments::is_service_request.eq(true))
        .filter(task_assignments::status.eq(AssignmentStatus::Completed))
        .order(task_assignments::updated_at.asc())
        .select(task_assignments::user_id)
        .first(conn)
        .optional()?;
    username_of(conn, completer)
}

/// Resolver of a completed ticket: the assignee of its mirrored task.
fn ticket_resolver(conn: &mut PgConnection, ticket_id: Uuid) -> Result<String, ApiError> {
    let assignee: Option<Option<Uuid>> = task_assignments::table
        .inner_join(tasks::table.on(tasks::id.eq(task_assignments::task_id)))
        .filter(task_assignments::ticket_id.eq(ticket_id))
        .filter(task_assignments::is_service_request.eq(false))
        .select(tasks::assigned_to_id)
        .first(conn)
        .optional()?;
    username_of(conn, assignee.flatten())
}

pub fn build_property_report(
    conn: &mut PgConnection,
    property: Property,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<PropertyReport, ApiError> {
    let open_tickets: Vec<Ticket> = tickets::table
        .filter(tickets::property_id.eq(property.id))
        .filter(tickets::status.ne(TicketStatus::Completed))
        .order(tickets::created_at.desc())
        .load(conn)?;
    let completed_today: Vec<Ticket> = tickets::table
        .filter(tickets::property_id.eq(property.id))
        .filter(tickets::status.eq(TicketStatus::Completed))
        .filter(tickets::updated_at.ge(start))
        .filter(tickets::updated_at.lt(end))
        .load(conn)?;
    let mut completed_tickets = Vec::with_capacity(completed_today.len());
    for ticket in completed_today {
        let resolver = ticket_resolver(conn, ticket.id)?;
        completed_tickets.push((ticket, resolver));
    }

    let open_tasks: Vec<Task> = tasks::table
        .filter(tasks::property_id.eq(property.id))
        .filter(tasks::status.ne(TaskStatus::Completed))
        .order(tasks::created_at.desc())
        .load(conn)?;
    let completed_today: Vec<Task> = tasks::table
        .filter(tasks::property_id.eq(property.id))
        .filter(tasks::status.eq(TaskStatus::Completed))
        .filter(tasks::updated_at.ge(start))
        .filter(tasks::updated_at.lt(end))
        .load(conn)?;
    let mut completed_tasks = Vec::with_capacity(completed_today.len());
    for task in completed_today {
        let resolver = username_of(conn, task.assigned_to_id)?;
        completed_tasks.push((task, resolver));
    }

    let open_requests: Vec<ServiceRequest> = service_requests::table
        .filter(service_requests::property_id.eq(property.id))
        .filter(service_requests::status.ne(ServiceRequestStatus::Completed))
        .order(service_requests::created_at.desc())
        .load(conn)?;
    let completed_today: Vec<ServiceRequest> = service_requests::table
        .filter(service_requests::property_id.eq(property.id))
        .filter(service_requests::status.eq(ServiceRequestStatus::Completed))
        .filter(service_requests::updated_at.ge(start))
        .filter(service_requests::updated_at.lt(end))
        .load(conn)?;
    let mut completed_requests = Vec::with_capacity(completed_today.len());
    for request in completed_today {
        let completer = request_completer(conn, request.id)?;
        completed_requests.push((request, completer));
    }

    Ok(PropertyReport {
        property,
        open_tickets,
        completed_tickets,
        open_tasks,
        completed_tasks,
        open_requests,
        completed_requests,
    })
}

/// Top three resolvers by completed tickets plus tasks across the reported
/// set. Ties break alphabetically so the digest is stable.
pub fn top_resolvers(reports: &[PropertyReport]) -> Vec<(String, usize)> {
    let mut counts = std::collections::HashMap::<String, usize>::new();
    for report in reports {
        for (_, resolver) in &report.completed_tickets {
            if resolver != "unassigned" {
                *counts.entry(resolver.clone()).or_default() += 1;
            }
        }
        for (_, resolver) in &report.completed_tasks {
            if resolver != "unassigned" {
                *counts.entry(resolver.clone()).or_default() += 1;
            }
        }
    }
    let mut ranked: Vec<_> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(3);
    ranked
}

fn section<T>(title: &str, items: &[T], line: impl Fn(&T) -> String) -> String {
    if items.is_empty() {
        return String::new();
    }
    let rows: String = items
        .iter()
        .map(|i| format!("<li>{}</li>", line(i)))
        .collect();
    format!("<h4>{title} ({})</h4><ul>{rows}</ul>", items.len())
}

pub fn render_digest(username: &str, date_label: &str, reports: &[PropertyReport]) -> String {
    let mut body = format!(
        "<h2>Daily Operations Report - {date_label}</h2>\
         <p>Hello {},</p>",
        escape_html(username)
    );

    let totals = (
        reports.iter().map(|r| r.open_tickets.len()).sum::<usize>(),
        reports.iter().map(|r| r.completed_tickets.len()).sum::<usize>(),
        reports.iter().map(|r| r.open_tasks.len()).sum::<usize>(),
        reports.iter().map(|r| r.completed_tasks.len()).sum::<usize>(),
    );
    body.push_str(&format!(
        "<p>Across your properties: {} open tickets, {} resolved today, \
         {} open tasks, {} completed today.</p>",
        totals.0, totals.1, totals.2, totals.3
    ));

    let leaders = top_resolvers(reports);
    if !leaders.is_empty() {
        let rows: String = leaders
            .iter()
            .map(|(name, count)| format!("<li>{} ({count})</li>", escape_html(name)))
            .collect();
        body.push_str(&format!("<h3>Top resolvers</h3><ol>{rows}</ol>"));
    }

    for report in reports.iter().filter(|r| r.has_activity()) {
        body.push_str(&format!("<h3>{}</h3>", escape_html(&report.property.name)));
        body.push_str(&section("Open tickets", &report.open_tickets, |t| {
            format!("{} [{}]", escape_html(&t.title), t.priority)
        }));
        body.push_str(&section(
            "Tickets resolved today",
            &report.completed_tickets,
            |(t, resolver)| format!("{} — resolved by {}", escape_html(&t.title), escape_html(resolver)),
        ));
        body.push_str(&section("Open tasks", &report.open_tasks, |t| {
            escape_html(&t.title)
        }));
        body.push_str(&section(
            "Tasks completed today",
            &report.completed_tasks,
            |(t, resolver)| format!("{} — by {}", escape_html(&t.title), escape_html(resolver)),
        ));
        body.push_str(&section(
            "Open service requests",
            &report.open_requests,
            |r| format!("{} ({})", escape_html(&r.request_type), escape_html(&r.request_group)),
        ));
        body.push_str(&section(
            "Service requests completed today",
            &report.completed_requests,
            |(r, completer)| {
                format!(
                    "{} ({}) — completed by {}",
                    escape_html(&r.request_type),
                    escape_html(&r.request_group),
                    escape_html(completer)
                )
            },
        ));
    }
    body
}

fn is_executive(user: &User) -> bool {
    user.group_name
        .as_deref()
        .map(|g| group_matches(g, groups::EXECUTIVE))
        .unwrap_or(false)
}

/// Run the digest for every active Executive user. Returns how many digests
/// were dispatched.
pub fn run_daily_reports(pool: &DbPool, notifier: &Notifier) -> Result<usize, ApiError> {
    let mut conn = pool.get()?;
    let settings: SystemSettings = load_settings(&mut conn)?;
    if !settings.daily_reports_enabled {
        return Ok(0);
    }
    let tz: Tz = settings.report_timezone.parse().unwrap_or_else(|_| {
        warn!("invalid report timezone {:?}, using UTC", settings.report_timezone);
        Tz::UTC
    });
    let now = Utc::now();
    let (start, end) = day_bounds(now, tz);
    let date_label = now.with_timezone(&tz).format("%Y-%m-%d").to_string();

    let mut executives: Vec<User> = users::table
        .filter(users::is_active.eq(true))
        .order(users::username.asc())
        .load(&mut conn)?;
    // Group names are stored free-form, so matching happens in Rust where
    // casing and padding can be normalized.
    executives.retain(is_executive);

    let mut sent = 0;
    for exec in executives {
        let assigned: Vec<Property> = user_properties::table
            .inner_join(properties::table.on(properties::id.eq(user_properties::property_id)))
            .filter(user_properties::user_id.eq(exec.id))
            .select(properties::all_columns)
            .load(&mut conn)?;

        let mut reports = Vec::with_capacity(assigned.len());
        for property in assigned {
            reports.push(build_property_report(&mut conn, property, start, end)?);
        }
        if !reports.iter().any(PropertyReport::has_activity) {
            continue;
        }

        let html = render_digest(&exec.username, &date_label, &reports);
        notifier.dispatch(NotificationEvent::DailyReport {
            to: exec.email.clone(),
            subject: format!("Daily Operations Report - {date_label}"),
            html,
        });
        sent += 1;
    }
    info!("daily report run dispatched {sent} digests");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::enums::{Priority, PropertyStatus, SubscriptionPlan};

    fn property(name: &str) -> Property {
        let now = Utc::now();
        Property {
            id: Uuid::new_v4(),
            name: name.into(),
            address: "1 Main St".into(),
            property_type: "hotel".into(),
            status: PropertyStatus::Active,
            subscription_plan: SubscriptionPlan::Basic,
            has_attachments: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn empty_report(name: &str) -> PropertyReport {
        PropertyReport {
            property: property(name),
            open_tickets: Vec::new(),
            completed_tickets: Vec::new(),
            open_tasks: Vec::new(),
            completed_tasks: Vec::new(),
            open_requests: Vec::new(),
            completed_requests: Vec::new(),
        }
    }

    fn ticket(title: &str) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: Uuid::new_v4(),
            title: title.into(),
            description: "d".into(),
            status: TicketStatus::Completed,
            priority: Priority::Medium,
            category: "IT".into(),
            subcategory: None,
            user_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            room_id: None,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        }
    }

    #[test]
    fn test_day_bounds_run_midnight_to_midnight() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let now = Utc::now();
        let (start, end) = day_bounds(now, tz);
        assert!(start <= now && now < end);
        assert_eq!(
            start.with_timezone(&tz).format("%H:%M").to_string(),
            "00:00"
        );
        assert_eq!(end.with_timezone(&tz).format("%H:%M").to_string(), "00:00");

        let utc_now = Utc::now();
        let (start, end) = day_bounds(utc_now, Tz::UTC);
        assert_eq!(end - start, Duration::hours(24));
    }

    #[test]
    fn test_day_bounds_track_dst_transitions() {
        let tz: Tz = "America/New_York".parse().unwrap();

        // Spring forward: 2026-03-08 has 23 local hours.
        let spring = Utc.with_ymd_and_hms(2026, 3, 8, 17, 0, 0).unwrap();
        let (start, end) = day_bounds(spring, tz);
        assert_eq!(end - start, Duration::hours(23));

        // Fall back: 2026-11-01 has 25.
        let fall = Utc.with_ymd_and_hms(2026, 11, 1, 17, 0, 0).unwrap();
        let (start, end) = day_bounds(fall, tz);
        assert_eq!(end - start, Duration::hours(25));
    }

    #[test]
    fn test_executive_matching_ignores_case_and_padding() {
        let now = Utc::now();
        let user = |group: Option<&str>| User {
            id: Uuid::new_v4(),
            username: "exec".into(),
            email: "exec@example.com".into(),
            password_hash: String::new(),
            role: crate::shared::enums::Role::Manager,
            group_name: group.map(String::from),
            phone: None,
            is_active: true,
            manager_id: None,
            created_at: now,
            updated_at: now,
        };
        assert!(is_executive(&user(Some("Executive"))));
        assert!(is_executive(&user(Some("  executive "))));
        assert!(!is_executive(&user(Some("Engineering"))));
        assert!(!is_executive(&user(None)));
    }

    #[test]
    fn test_empty_reports_have_no_activity() {
        let report = empty_report("Grand");
        assert!(!report.has_activity());
        let mut busy = empty_report("Plaza");
        busy.open_tickets.push(ticket("Leak"));
        assert!(busy.has_activity());
    }

    #[test]
    fn test_top_resolvers_ranks_and_truncates() {
        let mut report = empty_report("Grand");
        for _ in 0..3 {
            report.completed_tickets.push((ticket("a"), "alice".into()));
        }
        for _ in 0..2 {
            report.completed_tickets.push((ticket("b"), "bob".into()));
        }
        report.completed_tickets.push((ticket("c"), "carol".into()));
        report.completed_tickets.push((ticket("d"), "dave".into()));
        report.completed_tickets.push((ticket("e"), "unassigned".into()));

        let ranked = top_resolvers(&[report]);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0], ("alice".to_string(), 3));
        assert_eq!(ranked[1], ("bob".to_string(), 2));
        // Tie between carol and dave breaks alphabetically.
        assert_eq!(ranked[2].0, "carol");
    }

    #[test]
    fn test_digest_lists_only_active_properties() {
        let mut busy = empty_report("Plaza");
        busy.open_tickets.push(ticket("Leak"));
        let html = render_digest("exec", "2026-08-28", &[empty_report("Grand"), busy]);
        assert!(html.contains("Plaza"));
        assert!(!html.contains("Grand"));
    }

    #[test]
    fn test_digest_names_service_request_completer() {
        let now = Utc::now();
        let request = ServiceRequest {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            request_group: "Housekeeping".into(),
            request_type: "Extra Towels".into(),
            priority: Priority::Medium,
            quantity: 2,
            guest_name: None,
            notes: None,
            status: ServiceRequestStatus::Completed,
            created_by_id: Uuid::new_v4(),
            assigned_task_id: None,
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        };
        let mut report = empty_report("Plaza");
        report.completed_requests.push((request, "maria".into()));
        let html = render_digest("exec", "2026-08-28", &[report]);
        assert!(html.contains("completed by maria"));
    }
}
