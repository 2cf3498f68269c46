use serde::{Deserialize, Serialize};

use crate::errors::{AclError, AclResult};

/// Identifies a principal an ACE is keyed by: a concrete user or a role.
///
/// Equality is variant-aware; a user named `admin` never equals the role
/// `admin`. Identities are immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityIdentity {
    User(String),
    Role(String),
}

impl SecurityIdentity {
    pub fn user(username: impl Into<String>) -> AclResult<Self> {
        let username = username.into();
        if username.is_empty() {
            return Err(AclError::invalid_input("username must not be empty"));
        }
        Ok(Self::User(username))
    }

    pub fn role(role: impl Into<String>) -> AclResult<Self> {
        let role = role.into();
        if role.is_empty() {
            return Err(AclError::invalid_input("role must not be empty"));
        }
        Ok(Self::Role(role))
    }

    pub fn identifier(&self) -> &str {
        match self {
            Self::User(username) => username,
            Self::Role(role) => role,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl std::fmt::Display for SecurityIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(username) => write!(f, "user:{}", username),
            Self::Role(role) => write!(f, "role:{}", role),
        }
    }
}
