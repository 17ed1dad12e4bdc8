//! [`RoleSource`] implementation backed by the identity store.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use flowplane_auth::{AuthError, Grants, RoleSource};
use flowplane_core::{ClientId, UserId};
use flowplane_store::IdentityStore;

/// Resolves roles and permissions from the identity store for the token
/// verifier. Revoked or unknown machine clients are rejected here, which
/// invalidates their outstanding tokens.
pub struct StoreRoleSource {
    store: Arc<dyn IdentityStore>,
}

impl StoreRoleSource {
    /// Create a role source over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RoleSource for StoreRoleSource {
    async fn user_grants(&self, user_id: Uuid) -> Result<Grants, AuthError> {
        let user_id = UserId::from_uuid(user_id);
        let roles = self
            .store
            .roles_for_user(user_id)
            .await
            .map_err(|e| AuthError::RoleSource(e.to_string()))?;
        let permissions = self
            .store
            .permissions_for_roles(&roles)
            .await
            .map_err(|e| AuthError::RoleSource(e.to_string()))?;

        Ok(Grants {
            roles: roles.into_iter().collect(),
            permissions: permissions.into_iter().collect(),
        })
    }

    async fn client_grants(
        &self,
        client_id: Uuid,
        token_roles: &[String],
    ) -> Result<Grants, AuthError> {
        let client = self
            .store
            .get_machine_client(ClientId::from_uuid(client_id))
            .await
            .map_err(|e| AuthError::RoleSource(e.to_string()))?;

        match client {
            Some(client) if client.is_active() => {}
            _ => return Err(AuthError::InvalidToken("client revoked or unknown".into())),
        }

        let permissions = self
            .store
            .permissions_for_roles(token_roles)
            .await
            .map_err(|e| AuthError::RoleSource(e.to_string()))?;

        Ok(Grants {
            roles: token_roles.iter().cloned().collect(),
            permissions: permissions.into_iter().collect(),
        })
    }
}
