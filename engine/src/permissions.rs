//! Role-based permissions
//!
//! Every user has one [`Role`]. Roles come from `[roles]` in config.toml;
//! users without an entry get `default_role`.
//!
//! | Role                             | Tasks | Escalations |
//! |----------------------------------|-------|-------------|
//! | `admin`                          | yes   | yes         |
//! | `senior_seller`, `senior_barista`| yes   | yes         |
//! | `seller`, `barista`              | yes   | no          |

use sdk::types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::direction::ReportKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    SeniorSeller,
    SeniorBarista,
    #[default]
    Seller,
    Barista,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::SeniorSeller => "senior_seller",
            Role::SeniorBarista => "senior_barista",
            Role::Seller => "seller",
            Role::Barista => "barista",
        }
    }

    fn is_senior(&self) -> bool {
        matches!(self, Role::SeniorSeller | Role::SeniorBarista)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something a user asks the bot to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Recent and open task reports
    ViewTasks,
    /// The escalation ("control") report
    ViewEscalations,
}

impl Action {
    pub fn for_report(kind: ReportKind) -> Self {
        match kind {
            ReportKind::Recent | ReportKind::Open => Action::ViewTasks,
            ReportKind::Escalated => Action::ViewEscalations,
        }
    }
}

/// Whether `role` may perform `action`.
pub fn can(role: Role, action: Action) -> bool {
    if role == Role::Admin || role.is_senior() {
        return true;
    }
    match action {
        Action::ViewTasks => true,
        Action::ViewEscalations => false,
    }
}

/// Role lookup by user id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleMap {
    default_role: Role,
    users: HashMap<UserId, Role>,
}

impl RoleMap {
    pub fn new(default_role: Role) -> Self {
        Self {
            default_role,
            users: HashMap::new(),
        }
    }

    /// Assign a role; a later assignment for the same user wins.
    pub fn assign(mut self, user_id: UserId, role: Role) -> Self {
        self.users.insert(user_id, role);
        self
    }

    pub fn role_of(&self, user_id: UserId) -> Role {
        self.users.get(&user_id).copied().unwrap_or(self.default_role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_can_everything() {
        assert!(can(Role::Admin, Action::ViewTasks));
        assert!(can(Role::Admin, Action::ViewEscalations));
    }

    #[test]
    fn test_basic_permissions() {
        assert!(can(Role::Seller, Action::ViewTasks));
        assert!(can(Role::Barista, Action::ViewTasks));
        assert!(!can(Role::Seller, Action::ViewEscalations));
        assert!(!can(Role::Barista, Action::ViewEscalations));
        assert!(can(Role::SeniorBarista, Action::ViewEscalations));
        assert!(can(Role::SeniorSeller, Action::ViewEscalations));
    }

    #[test]
    fn test_report_actions() {
        assert_eq!(Action::for_report(ReportKind::Recent), Action::ViewTasks);
        assert_eq!(Action::for_report(ReportKind::Open), Action::ViewTasks);
        assert_eq!(
            Action::for_report(ReportKind::Escalated),
            Action::ViewEscalations
        );
    }

    #[test]
    fn test_role_map_falls_back_to_default() {
        let roles = RoleMap::new(Role::Barista).assign(7, Role::Admin);
        assert_eq!(roles.role_of(7), Role::Admin);
        assert_eq!(roles.role_of(8), Role::Barista);
        assert_eq!(RoleMap::default().role_of(1), Role::Seller);
    }

    #[test]
    fn test_role_names_round_trip() {
        let parsed: Role = serde_json::from_str("\"senior_barista\"").unwrap();
        assert_eq!(parsed, Role::SeniorBarista);
        assert_eq!(parsed.to_string(), "senior_barista");
    }
}
