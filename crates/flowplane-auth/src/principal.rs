//! The authenticated subject of a request.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AuthError, Result};

/// Role name that grants a wildcard permission match.
pub const ADMIN_ROLE: &str = "admin";

/// Which token family a principal was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    /// A human user authenticated by the identity provider.
    User,
    /// A machine client authenticated via client credentials.
    Machine,
}

/// The authenticated subject of a request, derived from a verified token.
///
/// Transient and per-request; never persisted.
#[derive(Debug, Clone)]
pub struct Principal {
    /// User id or client id, depending on [`Principal::kind`].
    pub id: Uuid,
    /// Token family this principal came from.
    pub kind: PrincipalKind,
    /// Role names held by the principal.
    pub roles: HashSet<String>,
    /// Effective permission set (union over the roles' permissions).
    pub permissions: HashSet<String>,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    /// Whether the principal holds the named role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Whether the principal holds the named permission. The `admin` role
    /// grants a wildcard match.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.has_role(ADMIN_ROLE) || self.permissions.contains(permission)
    }

    /// Require a permission, failing with `forbidden` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Forbidden`] when the permission is not held.
    pub fn require(&self, permission: &str) -> Result<()> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                permission: permission.to_string(),
            })
        }
    }

    /// Whether this is a machine principal.
    #[must_use]
    pub const fn is_machine(&self) -> bool {
        matches!(self.kind, PrincipalKind::Machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: &[&str], permissions: &[&str]) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            kind: PrincipalKind::User,
            roles: roles.iter().map(ToString::to_string).collect(),
            permissions: permissions.iter().map(ToString::to_string).collect(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        }
    }

    #[test]
    fn require_held_permission() {
        let p = principal(&["user"], &["agent:create"]);
        assert!(p.require("agent:create").is_ok());
    }

    #[test]
    fn require_missing_permission_is_forbidden() {
        let p = principal(&["user"], &[]);
        let err = p.require("admin:manage").unwrap_err();
        assert!(err.is_forbidden());
    }

    #[test]
    fn admin_role_is_wildcard() {
        let p = principal(&["admin"], &[]);
        assert!(p.require("anything:at:all").is_ok());
    }
}
