//! Actor roles and per-request actor context.
//!
//! The role set is a fixed enumeration; authorization decisions over it live
//! in [`crate::auth::scope`], never in inline role comparisons.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Administrative roles recognized by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Cross-institution operator
    SuperAdmin,
    /// Head of a single institution
    InstitutionHead,
    /// Administrator of one department within an institution
    DepartmentAdmin,
    /// Placement-cell administrator (institution-wide over placement students)
    PlacementsAdmin,
    /// Teaching staff, no badge management rights
    Faculty,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::SuperAdmin => write!(f, "SUPER_ADMIN"),
            Role::InstitutionHead => write!(f, "INSTITUTION_HEAD"),
            Role::DepartmentAdmin => write!(f, "DEPARTMENT_ADMIN"),
            Role::PlacementsAdmin => write!(f, "PLACEMENTS_ADMIN"),
            Role::Faculty => write!(f, "FACULTY"),
        }
    }
}

impl Role {
    /// Parse a role string as carried in identity tokens.
    /// Unknown strings map to None and are ignored (fail closed).
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "SUPER_ADMIN" => Some(Role::SuperAdmin),
            "INSTITUTION_HEAD" => Some(Role::InstitutionHead),
            "DEPARTMENT_ADMIN" => Some(Role::DepartmentAdmin),
            "PLACEMENTS_ADMIN" => Some(Role::PlacementsAdmin),
            "FACULTY" => Some(Role::Faculty),
            _ => None,
        }
    }
}

/// The data boundary an actor is authorized to act within
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataScope {
    /// Whole institution
    Institution,
    /// A single department
    Department(String),
    /// Placement-eligible students across the institution
    PlacementSubset,
    /// No access
    None,
}

/// Authenticated administrative identity for one request.
///
/// Reconstructed per request from a verified token; never persisted.
#[derive(Debug, Clone)]
pub struct ActorContext {
    /// Actor identifier
    pub actor_id: String,
    /// Roles held by the actor
    pub roles: Vec<Role>,
    /// Institution the actor belongs to
    pub institution_id: String,
    /// Department assignment, when the role carries one
    pub department: Option<String>,
    /// Request origin address, for audit records
    pub origin: Option<String>,
    /// Client string (user agent), for audit records
    pub client: Option<String>,
}

impl ActorContext {
    pub fn new(actor_id: impl Into<String>, institution_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            roles: Vec::new(),
            institution_id: institution_id.into(),
            department: None,
            origin: None,
            client: None,
        }
    }

    pub fn with_roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    /// Whether the actor holds a given role
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_round_trip() {
        for role in [
            Role::SuperAdmin,
            Role::InstitutionHead,
            Role::DepartmentAdmin,
            Role::PlacementsAdmin,
            Role::Faculty,
        ] {
            assert_eq!(Role::parse(&role.to_string()), Some(role));
        }
    }

    #[test]
    fn test_unknown_role_ignored() {
        assert_eq!(Role::parse("HEAD_ADMIN"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn test_actor_builder() {
        let actor = ActorContext::new("a-1", "inst-1")
            .with_roles(vec![Role::DepartmentAdmin])
            .with_department("physics")
            .with_origin("10.0.0.8");

        assert!(actor.has_role(Role::DepartmentAdmin));
        assert!(!actor.has_role(Role::SuperAdmin));
        assert_eq!(actor.department.as_deref(), Some("physics"));
    }
}
