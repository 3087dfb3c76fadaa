//! Identity & access resolution.
//!
//! A typed [`Identity`] is constructed at the HTTP boundary from validated
//! token claims and passed by value into the core. Authority checks are pure
//! functions over the identity plus a precomputed property [`Scope`]; list
//! queries reuse the same scope so filtered listings match what per-item
//! checks would allow.

use std::collections::HashSet;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::enums::{group_matches, Role};
use crate::shared::error::ApiError;
use crate::shared::models::{ServiceRequest, Task, Ticket};
use crate::shared::schema::{property_managers, user_properties};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub role: Role,
    pub group: Option<String>,
    pub property_ids: Vec<Uuid>,
}

impl Identity {
    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    pub fn is_manager(&self) -> bool {
        matches!(self.role, Role::Manager | Role::GeneralManager)
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.group
            .as_deref()
            .map(|g| group_matches(g, group))
            .unwrap_or(false)
    }
}

/// Property scope for one request. `None` means unbounded (super_admin).
#[derive(Debug, Clone)]
pub struct Scope {
    pub property_ids: Option<HashSet<Uuid>>,
}

impl Scope {
    pub fn unbounded() -> Self {
        Self { property_ids: None }
    }

    pub fn of(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            property_ids: Some(ids.into_iter().collect()),
        }
    }

    pub fn allows(&self, property_id: Uuid) -> bool {
        match &self.property_ids {
            None => true,
            Some(ids) => ids.contains(&property_id),
        }
    }

    /// Id list for `eq_any` filters; `None` when no filter is needed.
    pub fn id_vec(&self) -> Option<Vec<Uuid>> {
        self.property_ids
            .as_ref()
            .map(|s| s.iter().copied().collect())
    }
}

/// Precompute the allowed property-id set for the caller, once per query.
/// Managers are scoped by the property_managers join; plain users by their
/// user_properties assignments.
pub fn scope_for(conn: &mut PgConnection, identity: &Identity) -> Result<Scope, ApiError> {
    match identity.role {
        Role::SuperAdmin => Ok(Scope::unbounded()),
        Role::Manager | Role::GeneralManager => {
            let ids: Vec<Uuid> = property_managers::table
                .filter(property_managers::user_id.eq(identity.user_id))
                .select(property_managers::property_id)
                .load(conn)?;
            Ok(Scope::of(ids))
        }
        Role::User => {
            let ids: Vec<Uuid> = user_properties::table
                .filter(user_properties::user_id.eq(identity.user_id))
                .select(user_properties::property_id)
                .load(conn)?;
            Ok(Scope::of(ids))
        }
    }
}

pub fn can_view_ticket(identity: &Identity, scope: &Scope, ticket: &Ticket) -> bool {
    if identity.is_super_admin() {
        return true;
    }
    if !scope.allows(ticket.property_id) {
        return false;
    }
    if identity.is_manager() {
        return true;
    }
    ticket.user_id == identity.user_id || identity.in_group(&ticket.category)
}

/// Ticket mutation is manager territory; plain users create and read
/// tickets but never update or delete them, even their own.
pub fn can_mutate_ticket(identity: &Identity, scope: &Scope, ticket: &Ticket) -> bool {
    if identity.is_super_admin() {
        return true;
    }
    identity.is_manager() && scope.allows(ticket.property_id)
}

pub fn can_create_ticket(identity: &Identity, scope: &Scope, property_id: Uuid) -> bool {
    identity.is_super_admin() || scope.allows(property_id)
}

pub fn can_view_task(identity: &Identity, scope: &Scope, task: &Task) -> bool {
    if identity.is_super_admin() {
        return true;
    }
    if identity.is_manager() {
        return scope.allows(task.property_id);
    }
    task.assigned_to_id == Some(identity.user_id) || scope.allows(task.property_id)
}

pub fn can_mutate_task(identity: &Identity, scope: &Scope, task: &Task) -> bool {
    if identity.is_super_admin() {
        return true;
    }
    if identity.is_manager() {
        return scope.allows(task.property_id);
    }
    task.assigned_to_id == Some(identity.user_id)
}

pub fn can_view_service_request(
    identity: &Identity,
    scope: &Scope,
    request: &ServiceRequest,
) -> bool {
    if identity.is_super_admin() {
        return true;
    }
    if identity.is_manager() {
        return scope.allows(request.property_id);
    }
    scope.allows(request.property_id) && identity.in_group(&request.request_group)
}

/// Directory mutations (properties, rooms) are manager-scoped; user and
/// settings mutations are super_admin only.
pub fn can_mutate_property(identity: &Identity, scope: &Scope, property_id: Uuid) -> bool {
    identity.is_super_admin() || (identity.is_manager() && scope.allows(property_id))
}

pub fn can_manage_users(identity: &Identity) -> bool {
    identity.is_super_admin()
}

pub fn require(allowed: bool, what: &str) -> Result<(), ApiError> {
    if allowed {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!("not allowed to {what}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::enums::{Priority, TicketStatus};
    use chrono::Utc;

    fn ticket(property_id: Uuid, author: Uuid, category: &str) -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            title: "t".into(),
            description: "d".into(),
            status: TicketStatus::Open,
            priority: Priority::Medium,
            category: category.into(),
            subcategory: None,
            user_id: author,
            property_id,
            room_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    fn identity(role: Role, group: Option<&str>) -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            username: "u".into(),
            role,
            group: group.map(String::from),
            property_ids: Vec::new(),
        }
    }

    #[test]
    fn test_super_admin_ignores_property_scoping() {
        let admin = identity(Role::SuperAdmin, None);
        let scope = Scope::unbounded();
        let t = ticket(Uuid::new_v4(), Uuid::new_v4(), "Maintenance");
        assert!(can_view_ticket(&admin, &scope, &t));
        assert!(can_mutate_ticket(&admin, &scope, &t));
    }

    #[test]
    fn test_user_sees_own_or_group_tickets_on_assigned_properties() {
        let property = Uuid::new_v4();
        let user = identity(Role::User, Some("Engineering"));
        let scope = Scope::of([property]);

        // Group match on an assigned property.
        let group_ticket = ticket(property, Uuid::new_v4(), "Engineering");
        assert!(can_view_ticket(&user, &scope, &group_ticket));

        // Authored ticket outside the group.
        let mut own = ticket(property, user.user_id, "Accounting");
        assert!(can_view_ticket(&user, &scope, &own));

        // Same ticket on an unassigned property is invisible.
        own.property_id = Uuid::new_v4();
        assert!(!can_view_ticket(&user, &scope, &own));

        // Foreign ticket in a foreign group is invisible.
        let foreign = ticket(property, Uuid::new_v4(), "Accounting");
        assert!(!can_view_ticket(&user, &scope, &foreign));
    }

    #[test]
    fn test_plain_users_never_hold_ticket_mutation_authority() {
        let property = Uuid::new_v4();
        let user = identity(Role::User, Some("Engineering"));
        let scope = Scope::of([property]);

        // Visible via group match, still not mutable.
        let group_ticket = ticket(property, Uuid::new_v4(), "Engineering");
        assert!(can_view_ticket(&user, &scope, &group_ticket));
        assert!(!can_mutate_ticket(&user, &scope, &group_ticket));

        // Not even the author may update or delete.
        let own = ticket(property, user.user_id, "Engineering");
        assert!(!can_mutate_ticket(&user, &scope, &own));
    }

    #[test]
    fn test_manager_scope_bounds_mutation() {
        let managed = Uuid::new_v4();
        let manager = identity(Role::Manager, Some("Executive"));
        let scope = Scope::of([managed]);

        let inside = ticket(managed, Uuid::new_v4(), "IT");
        let outside = ticket(Uuid::new_v4(), Uuid::new_v4(), "IT");
        assert!(can_mutate_ticket(&manager, &scope, &inside));
        assert!(!can_mutate_ticket(&manager, &scope, &outside));
        assert!(can_mutate_property(&manager, &scope, managed));
        assert!(!can_manage_users(&manager));
    }

    #[test]
    fn test_service_request_visibility_requires_group() {
        let property = Uuid::new_v4();
        let staff = identity(Role::User, Some("Housekeeping"));
        let scope = Scope::of([property]);
        let request = ServiceRequest {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            property_id: property,
            request_group: "Housekeeping".into(),
            request_type: "Room Cleaning".into(),
            priority: Priority::Medium,
            quantity: 1,
            guest_name: None,
            notes: None,
            status: crate::shared::enums::ServiceRequestStatus::Pending,
            created_by_id: Uuid::new_v4(),
            assigned_task_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
        };
        assert!(can_view_service_request(&staff, &scope, &request));

        let other = identity(Role::User, Some("IT"));
        assert!(!can_view_service_request(&other, &scope, &request));
    }
}
