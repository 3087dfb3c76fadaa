//! Typed status and role values stored as lowercase text columns.
//!
//! The upstream data arrives with inconsistent casing (`Open`, `in progress`,
//! `Completed`), so every parser here is case-insensitive and the canonical
//! form written back to the database is lowercase snake_case.

use diesel::deserialize::{self, FromSql};
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::str::FromStr;

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal [$($alias:literal),*]),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
        #[diesel(sql_type = Text)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
                match normalized.as_str() {
                    $($text => Ok(Self::$variant),)+
                    $($($alias => Ok(Self::$variant),)*)+
                    _ => Err(format!("unknown {}: {}", stringify!($name), s)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let s = <String as FromSql<Text, Pg>>::from_sql(bytes)?;
                s.parse().map_err(|e: String| e.into())
            }
        }
    };
}

text_enum!(Role {
    SuperAdmin => "super_admin" [],
    Manager => "manager" [],
    GeneralManager => "general_manager" [],
    User => "user" [],
});

text_enum!(TicketStatus {
    Open => "open" [],
    InProgress => "in_progress" [],
    Completed => "completed" [],
});

text_enum!(TaskStatus {
    Pending => "pending" [],
    InProgress => "in_progress" [],
    Completed => "completed" [],
});

text_enum!(AssignmentStatus {
    Pending => "pending" [],
    InProgress => "in_progress" [],
    Completed => "completed" [],
});

text_enum!(ServiceRequestStatus {
    Pending => "pending" [],
    InProgress => "in_progress" [],
    Completed => "completed" [],
});

text_enum!(Priority {
    Critical => "critical" ["urgent"],
    High => "high" [],
    Medium => "medium" ["normal"],
    Low => "low" [],
});

text_enum!(RoomStatus {
    Available => "available" [],
    Occupied => "occupied" [],
    Maintenance => "maintenance" [],
    Cleaning => "cleaning" [],
    Reserved => "reserved" [],
    OutOfOrder => "out_of_order" [],
});

text_enum!(PropertyStatus {
    Active => "active" [],
    Inactive => "inactive" [],
    Suspended => "suspended" [],
});

text_enum!(SubscriptionPlan {
    Basic => "basic" [],
    Premium => "premium" [],
});

impl Priority {
    /// Weight applied to the task completion score.
    pub fn score_weight(&self) -> f64 {
        match self {
            Self::Critical => 1.5,
            Self::High => 1.3,
            Self::Medium => 1.1,
            Self::Low => 1.0,
        }
    }
}

impl TicketStatus {
    /// Task status a linked ticket status mirrors to.
    pub fn mirrored_task_status(&self) -> TaskStatus {
        match self {
            Self::Open => TaskStatus::Pending,
            Self::InProgress => TaskStatus::InProgress,
            Self::Completed => TaskStatus::Completed,
        }
    }
}

impl TaskStatus {
    /// Ticket status a linked task status mirrors back to.
    pub fn mirrored_ticket_status(&self) -> TicketStatus {
        match self {
            Self::Pending => TicketStatus::Open,
            Self::InProgress => TicketStatus::InProgress,
            Self::Completed => TicketStatus::Completed,
        }
    }
}

/// Functional departments used for routing and visibility.
pub mod groups {
    pub const ENGINEERING: &str = "Engineering";
    pub const HOUSEKEEPING: &str = "Housekeeping";
    pub const FRONT_DESK: &str = "Front Desk";
    pub const IT: &str = "IT";
    pub const SECURITY: &str = "Security";
    pub const FOOD_BEVERAGE: &str = "Food & Beverage";
    pub const ACCOUNTING: &str = "Accounting";
    pub const EXECUTIVE: &str = "Executive";
}

/// Group comparison is case-insensitive; group values are free-form strings.
pub fn group_matches(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("Open".parse::<TicketStatus>().unwrap(), TicketStatus::Open);
        assert_eq!(
            "In Progress".parse::<TicketStatus>().unwrap(),
            TicketStatus::InProgress
        );
        assert_eq!(
            "Completed".parse::<TicketStatus>().unwrap(),
            TicketStatus::Completed
        );
        assert_eq!("CRITICAL".parse::<Priority>().unwrap(), Priority::Critical);
        assert!("bogus".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn test_canonical_form_is_lowercase() {
        assert_eq!(TicketStatus::InProgress.as_str(), "in_progress");
        assert_eq!(Role::SuperAdmin.as_str(), "super_admin");
        assert_eq!(RoomStatus::OutOfOrder.as_str(), "out_of_order");
    }

    #[test]
    fn test_status_mirror_is_involutive() {
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
    }

    #[test]
    fn test_priority_weights() {
        assert_eq!(Priority::Critical.score_weight(), 1.5);
        assert_eq!(Priority::Low.score_weight(), 1.0);
        assert_eq!("normal".parse::<Priority>().unwrap(), Priority::Medium);
    }

    #[test]
    fn test_group_matching() {
        assert!(group_matches("Engineering", "engineering"));
        assert!(group_matches(" Front Desk ", "front desk"));
        assert!(!group_matches("IT", "Security"));
    }
}
