//! Role capabilities. Identity comes from an external provider; this module
//! only answers "may this actor do that" as pure predicates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Approver,
    Editor,
    Viewer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Stage mutations, create, submit and merge change sets
    Write,
    /// Approve or reject change sets
    Review,
    /// Operational endpoints (stats)
    Administer,
}

const WRITE_ROLES: &[Role] = &[Role::Admin, Role::Approver, Role::Editor];
const REVIEW_ROLES: &[Role] = &[Role::Admin, Role::Approver];
const ADMIN_ROLES: &[Role] = &[Role::Admin];

impl Capability {
    pub fn allowed_roles(self) -> &'static [Role] {
        match self {
            Capability::Write => WRITE_ROLES,
            Capability::Review => REVIEW_ROLES,
            Capability::Administer => ADMIN_ROLES,
        }
    }
}

impl Role {
    pub fn allows(self, capability: Capability) -> bool {
        capability.allowed_roles().contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Approver => "approver",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "approver" => Ok(Role::Approver),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// The authenticated caller of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.role.allows(capability)
    }

    /// Author of the resource, or an admin acting on it
    pub fn owns_or_admin(&self, author: &str) -> bool {
        self.id == author || self.is_admin()
    }

    /// Reviewing your own change set is only allowed for admins
    pub fn may_review_work_of(&self, author: &str) -> bool {
        self.id != author || self.is_admin()
    }
}
