//! Ownership and cross-owner access checks.

use flowplane_auth::Principal;
use flowplane_core::UserId;

use crate::error::{CatalogError, Result};

/// Permission allowing reads across owners.
pub const READ_ANY: &str = "agent:read:any";

/// Permission allowing writes across owners.
pub const WRITE_ANY: &str = "agent:write:any";

/// The principal of a request plus the optional `on_behalf_of` header.
///
/// Machine principals acting on behalf of a user must carry the header
/// *and* hold [`READ_ANY`]; the ownership check then pivots to the named
/// user. For human principals the header is ignored.
#[derive(Clone, Copy)]
pub struct AccessContext<'a> {
    /// The verified request principal.
    pub principal: &'a Principal,
    /// Value of the `on_behalf_of` header, when present.
    pub on_behalf_of: Option<UserId>,
}

impl<'a> AccessContext<'a> {
    /// Context without delegation.
    #[must_use]
    pub const fn direct(principal: &'a Principal) -> Self {
        Self {
            principal,
            on_behalf_of: None,
        }
    }

    /// Context with an `on_behalf_of` header.
    #[must_use]
    pub const fn on_behalf_of(principal: &'a Principal, user: Option<UserId>) -> Self {
        Self {
            principal,
            on_behalf_of: user,
        }
    }

    /// The user the request effectively acts as: the delegated user for
    /// machine principals carrying `on_behalf_of`, otherwise the
    /// principal itself.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Forbidden`] when a machine principal
    /// delegates without holding [`READ_ANY`].
    pub fn effective_user(&self) -> Result<UserId> {
        match self.on_behalf_of {
            Some(user) if self.principal.is_machine() => {
                if self.principal.has_permission(READ_ANY) {
                    Ok(user)
                } else {
                    Err(CatalogError::Forbidden)
                }
            }
            _ => Ok(UserId::from_uuid(self.principal.id)),
        }
    }

    /// Check read access to a resource owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Forbidden`] when access is denied.
    pub fn check_read(&self, owner: UserId) -> Result<()> {
        if self.principal.has_permission(READ_ANY) && self.on_behalf_of.is_none() {
            return Ok(());
        }
        if self.effective_user()? == owner {
            return Ok(());
        }
        Err(CatalogError::Forbidden)
    }

    /// Check write access to a resource owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Forbidden`] when access is denied.
    pub fn check_write(&self, owner: UserId) -> Result<()> {
        if self.principal.has_permission(WRITE_ANY) && self.on_behalf_of.is_none() {
            return Ok(());
        }
        if self.effective_user()? == owner {
            return Ok(());
        }
        Err(CatalogError::Forbidden)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowplane_auth::PrincipalKind;
    use uuid::Uuid;

    fn principal(kind: PrincipalKind, permissions: &[&str]) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            kind,
            roles: std::collections::HashSet::new(),
            permissions: permissions.iter().map(ToString::to_string).collect(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        }
    }

    #[test]
    fn owner_reads_own_resource() {
        let p = principal(PrincipalKind::User, &[]);
        let ctx = AccessContext::direct(&p);
        assert!(ctx.check_read(UserId::from_uuid(p.id)).is_ok());
    }

    #[test]
    fn stranger_is_forbidden() {
        let p = principal(PrincipalKind::User, &[]);
        let ctx = AccessContext::direct(&p);
        assert!(matches!(
            ctx.check_read(UserId::generate()),
            Err(CatalogError::Forbidden)
        ));
    }

    #[test]
    fn read_any_crosses_owners() {
        let p = principal(PrincipalKind::Machine, &[READ_ANY]);
        let ctx = AccessContext::direct(&p);
        assert!(ctx.check_read(UserId::generate()).is_ok());
    }

    #[test]
    fn delegation_requires_read_any() {
        let owner = UserId::generate();

        let unprivileged = principal(PrincipalKind::Machine, &[]);
        let ctx = AccessContext::on_behalf_of(&unprivileged, Some(owner));
        assert!(matches!(ctx.check_read(owner), Err(CatalogError::Forbidden)));

        let privileged = principal(PrincipalKind::Machine, &[READ_ANY]);
        let ctx = AccessContext::on_behalf_of(&privileged, Some(owner));
        assert!(ctx.check_read(owner).is_ok());
        // And the pivot really is to the named user, not a wildcard.
        assert!(matches!(
            ctx.check_read(UserId::generate()),
            Err(CatalogError::Forbidden)
        ));
    }

    #[test]
    fn header_is_ignored_for_human_principals() {
        let p = principal(PrincipalKind::User, &[]);
        let ctx = AccessContext::on_behalf_of(&p, Some(UserId::generate()));
        assert!(ctx.check_read(UserId::from_uuid(p.id)).is_ok());
    }
}
