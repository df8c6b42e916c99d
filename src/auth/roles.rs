use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AppError, AuthError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            other => Err(AppError::Internal(format!("unknown role '{}'", other))),
        }
    }
}

/// Per-route authorization record.
///
/// `allowed_roles = None` admits any authenticated identity.
#[derive(Debug, Clone, Default)]
pub struct RoutePolicy {
    pub allowed_roles: Option<Vec<Role>>,
}

impl RoutePolicy {
    pub fn any_authenticated() -> Self {
        Self { allowed_roles: None }
    }

    pub fn roles(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            allowed_roles: Some(roles.into_iter().collect()),
        }
    }

    pub fn check(&self, role: Role) -> Result<(), AuthError> {
        match &self.allowed_roles {
            Some(allowed) if !allowed.contains(&role) => Err(AuthError::Forbidden),
            _ => Ok(()),
        }
    }
}
