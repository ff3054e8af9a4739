//! # Security
//!
//! The authenticated principal and its per-property access checks.
//!
//! Authentication itself (tokens, sessions, middleware) is an external
//! collaborator: by the time core code runs, the caller presents a
//! `Principal` that is already verified. This crate only answers "may this
//! principal touch this client's data, and at what level".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from access checks
#[derive(Debug, Error, PartialEq)]
pub enum AccessError {
    #[error("user {user_id} has no access to client {client_id}")]
    Forbidden { user_id: String, client_id: String },

    #[error("user {user_id} is not an administrator for client {client_id}")]
    NotAdmin { user_id: String, client_id: String },
}

pub type AccessResult<T> = Result<T, AccessError>;

/// Access level a principal holds on one client association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Admin,
    Manager,
    Owner,
}

/// An authenticated caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: String,
    #[serde(default)]
    pub is_super_admin: bool,
    /// clientId -> granted role
    #[serde(default)]
    pub property_access: HashMap<String, Role>,
}

impl Principal {
    /// A principal with access to everything; used by system jobs and tests
    pub fn super_admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_super_admin: true,
            property_access: HashMap::new(),
        }
    }

    pub fn with_role(user_id: impl Into<String>, client_id: impl Into<String>, role: Role) -> Self {
        let mut property_access = HashMap::new();
        property_access.insert(client_id.into(), role);
        Self {
            user_id: user_id.into(),
            is_super_admin: false,
            property_access,
        }
    }

    pub fn role_for(&self, client_id: &str) -> Option<Role> {
        self.property_access.get(client_id).copied()
    }
}

/// Require any level of access to a client
pub fn ensure_client_access(principal: &Principal, client_id: &str) -> AccessResult<()> {
    if principal.is_super_admin || principal.property_access.contains_key(client_id) {
        return Ok(());
    }
    tracing::warn!(
        user_id = %principal.user_id,
        client_id = %client_id,
        "access denied"
    );
    Err(AccessError::Forbidden {
        user_id: principal.user_id.clone(),
        client_id: client_id.to_string(),
    })
}

/// Require administrative access to a client (deletes, purges, imports)
pub fn ensure_admin(principal: &Principal, client_id: &str) -> AccessResult<()> {
    if principal.is_super_admin || principal.role_for(client_id) == Some(Role::Admin) {
        return Ok(());
    }
    tracing::warn!(
        user_id = %principal.user_id,
        client_id = %client_id,
        "admin access denied"
    );
    Err(AccessError::NotAdmin {
        user_id: principal.user_id.clone(),
        client_id: client_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_super_admin_passes_everything() {
        let root = Principal::super_admin("ops");
        assert!(ensure_client_access(&root, "AVII").is_ok());
        assert!(ensure_admin(&root, "AVII").is_ok());
    }

    #[test]
    fn test_role_scoped_access() {
        let manager = Principal::with_role("maria", "AVII", Role::Manager);
        assert!(ensure_client_access(&manager, "AVII").is_ok());
        assert_eq!(
            ensure_client_access(&manager, "MTC"),
            Err(AccessError::Forbidden {
                user_id: "maria".into(),
                client_id: "MTC".into()
            })
        );
        assert_eq!(
            ensure_admin(&manager, "AVII"),
            Err(AccessError::NotAdmin {
                user_id: "maria".into(),
                client_id: "AVII".into()
            })
        );
    }

    #[test]
    fn test_client_admin_can_administer_only_their_client() {
        let admin = Principal::with_role("pat", "AVII", Role::Admin);
        assert!(ensure_admin(&admin, "AVII").is_ok());
        assert!(ensure_admin(&admin, "MTC").is_err());
    }
}
