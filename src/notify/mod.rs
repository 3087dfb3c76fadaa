//! Notification dispatcher.
//!
//! Mutations hand typed events to [`Notifier::dispatch`] after their
//! transaction commits; background workers resolve recipients, render the
//! message and push it to the email/SMS transports. Transport failures are
//! logged and dropped, never surfaced to the triggering request.

pub mod email;
pub mod recipients;
pub mod sms;
pub mod templates;

use std::sync::Arc;

use log::{error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::shared::enums::{PropertyStatus, RoomStatus};
use crate::shared::models::{SystemSettings, Ticket, User};
use crate::shared::settings::load_settings;
use crate::shared::utils::DbPool;

const QUEUE_CAPACITY: usize = 1024;
const WORKER_COUNT: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone)]
pub enum NotificationEvent {
    TicketCreated {
        ticket_id: Uuid,
    },
    TicketUpdated {
        ticket_id: Uuid,
        changes: Vec<FieldChange>,
    },
    /// The row is gone by the time workers run, so the event carries a
    /// snapshot of the deleted ticket.
    TicketDeleted {
        ticket: Ticket,
    },
    TaskAssigned {
        task_id: Uuid,
        assignee_id: Uuid,
    },
    TaskUpdated {
        task_id: Uuid,
        changes: Vec<FieldChange>,
        previous_assignee: Option<Uuid>,
    },
    PasswordReset {
        user_id: Uuid,
        email: String,
        username: String,
        token: String,
    },
    UserManaged {
        user_id: Uuid,
        changes: Vec<FieldChange>,
    },
    RoomStatusChanged {
        room_id: Uuid,
        property_id: Uuid,
        status: RoomStatus,
    },
    PropertyStatusChanged {
        property_id: Uuid,
        status: PropertyStatus,
    },
    ServiceRequestCreated {
        request_id: Uuid,
    },
    ServiceRequestCompleted {
        request_id: Uuid,
    },
    AdminAlert {
        subject: String,
        body: String,
    },
    /// Pre-rendered digest for one executive user.
    DailyReport {
        to: String,
        subject: String,
        html: String,
    },
}

/// Cheap handle mutations use to enqueue events. Failures never abort the
/// triggering mutation.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<NotificationEvent>,
}

impl Notifier {
    pub fn dispatch(&self, event: NotificationEvent) {
        if let Err(e) = self.tx.try_send(event) {
            error!("notification queue full, dropping event: {e}");
        }
    }
}

/// Start the background worker pool. Returns the handle used by request
/// handlers; workers outlive any individual request.
pub fn spawn_workers(pool: DbPool) -> Notifier {
    let (tx, rx) = mpsc::channel::<NotificationEvent>(QUEUE_CAPACITY);
    let rx = Arc::new(Mutex::new(rx));

    for worker in 0..WORKER_COUNT {
        let rx = rx.clone();
        let pool = pool.clone();
        tokio::spawn(async move {
            loop {
                let event = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                let Some(event) = event else {
                    info!("notification worker {worker} shutting down");
                    break;
                };
                if let Err(e) = handle_event(&pool, event).await {
                    error!("notification delivery failed: {e}");
                }
            }
        });
    }

    Notifier { tx }
}

async fn handle_event(pool: &DbPool, event: NotificationEvent) -> anyhow::Result<()> {
    let mut conn = pool.get()?;
    let settings = load_settings(&mut conn).map_err(|e| anyhow::anyhow!("{e}"))?;

    match event {
        NotificationEvent::TicketCreated { ticket_id } => {
            let Some((ticket, users)) = recipients::for_ticket(&mut conn, ticket_id)? else {
                return Ok(());
            };
            let (subject, html) = templates::ticket_created(&ticket);
            send_emails(&settings, &users, &subject, &html).await;
        }
        NotificationEvent::TicketUpdated { ticket_id, changes } => {
            let Some((ticket, users)) = recipients::for_ticket(&mut conn, ticket_id)? else {
                return Ok(());
            };
            let (subject, html) = templates::ticket_updated(&ticket, &changes);
            send_emails(&settings, &users, &subject, &html).await;
        }
        NotificationEvent::TicketDeleted { ticket } => {
            let users = recipients::for_deleted_ticket(&mut conn, &ticket)?;
            let (subject, html) = templates::ticket_deleted(&ticket);
            send_emails(&settings, &users, &subject, &html).await;
        }
        NotificationEvent::TaskAssigned {
            task_id,
            assignee_id,
        } => {
            let Some((task, users)) =
                recipients::for_task(&mut conn, task_id, Some(assignee_id), None)?
            else {
                return Ok(());
            };
            let (subject, html) = templates::task_assigned(&task);
            send_emails(&settings, &users, &subject, &html).await;
        }
        NotificationEvent::TaskUpdated {
            task_id,
            changes,
            previous_assignee,
        } => {
            let Some((task, users)) =
                recipients::for_task(&mut conn, task_id, None, previous_assignee)?
            else {
                return Ok(());
            };
            let (subject, html) = templates::task_updated(&task, &changes);
            send_emails(&settings, &users, &subject, &html).await;
        }
        NotificationEvent::PasswordReset {
            email: to,
            username,
            token,
            ..
        } => {
            let (subject, html) = templates::password_reset(&username, &token);
            send_email_to(&settings, &to, &subject, &html).await;
        }
        NotificationEvent::UserManaged { user_id, changes } => {
            let users = recipients::super_admins(&mut conn)?;
            let (subject, html) = templates::user_managed(&mut conn, user_id, &changes)?;
            send_emails(&settings, &users, &subject, &html).await;
        }
        NotificationEvent::RoomStatusChanged {
            room_id,
            property_id,
            status,
        } => {
            let users = recipients::for_property_admins(&mut conn, property_id)?;
            let (subject, html) = templates::room_status_changed(&mut conn, room_id, status)?;
            send_emails(&settings, &users, &subject, &html).await;
        }
        NotificationEvent::PropertyStatusChanged {
            property_id,
            status,
        } => {
            let users = recipients::for_property_admins(&mut conn, property_id)?;
            let (subject, html) =
                templates::property_status_changed(&mut conn, property_id, status)?;
            send_emails(&settings, &users, &subject, &html).await;
        }
        NotificationEvent::ServiceRequestCreated { request_id } => {
            let Some((request, staff)) = recipients::for_service_request(&mut conn, request_id)?
            else {
                return Ok(());
            };
            let body = templates::service_request_sms(&mut conn, &request)?;
            send_sms_fanout(&settings, &staff, &body).await;
        }
        NotificationEvent::ServiceRequestCompleted { request_id } => {
            let Some((request, staff)) = recipients::for_service_request(&mut conn, request_id)?
            else {
                return Ok(());
            };
            let body = templates::service_request_completed_sms(&mut conn, &request)?;
            send_sms_fanout(&settings, &staff, &body).await;
        }
        NotificationEvent::AdminAlert { subject, body } => {
            let users = recipients::super_admins(&mut conn)?;
            send_emails(&settings, &users, &subject, &body).await;
        }
        NotificationEvent::DailyReport { to, subject, html } => {
            send_email_to(&settings, &to, &subject, &html).await;
        }
    }
    Ok(())
}

async fn send_emails(settings: &SystemSettings, users: &[User], subject: &str, html: &str) {
    for user in users {
        send_email_to(settings, &user.email, subject, html).await;
    }
}

async fn send_email_to(settings: &SystemSettings, to: &str, subject: &str, html: &str) {
    if !settings.email_enabled {
        return;
    }
    if let Err(e) = email::send(settings, to, subject, html) {
        error!("email to {to} failed: {e}");
    }
}

async fn send_sms_fanout(settings: &SystemSettings, staff: &[User], body: &str) {
    if !settings.sms_enabled {
        return;
    }
    let client = sms::SmsClient::from_settings(settings);
    for user in staff {
        let Some(phone) = user.phone.as_deref() else {
            continue;
        };
        if let Err(e) = client.send(phone, body).await {
            error!("sms to {phone} failed: {e}");
        }
    }
}

/// Lets callers report whether any notification was attempted for a
/// mutation without waiting for delivery.
pub fn notifications_enabled(settings: &SystemSettings) -> bool {
    settings.email_enabled || settings.sms_enabled
}
