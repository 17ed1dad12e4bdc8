//! The identity service: user registration/login, RBAC administration,
//! machine clients, and the client-credentials token grant.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use flowplane_auth::{MintedToken, TokenMinter};
use flowplane_core::{ClientId, UserId};
use flowplane_store::{IdentityStore, MachineClient, Permission, Profile, Role};

use crate::error::{IdentityError, Result};
use crate::provider::{IdentityProvider, ProviderTokens};
use crate::secrets;

/// Role assigned to every newly registered user.
pub const DEFAULT_USER_ROLE: &str = "user";

/// A machine client plus its one-time plaintext secret.
#[derive(Debug)]
pub struct CreatedClient {
    /// The stored client record.
    pub client: MachineClient,
    /// The plaintext secret; shown once and never stored.
    pub client_secret: String,
}

/// Response of the client-credentials grant.
#[derive(Debug, Clone, Serialize)]
pub struct TokenGrant {
    /// The machine bearer token.
    pub access_token: String,
    /// Always `Bearer`.
    pub token_type: &'static str,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/// Identity service used by the HTTP surface and the bootstrap runner.
pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    provider: Arc<dyn IdentityProvider>,
    minter: TokenMinter,
    token_ttl: Duration,
}

impl IdentityService {
    /// Create the service.
    #[must_use]
    pub fn new(
        store: Arc<dyn IdentityStore>,
        provider: Arc<dyn IdentityProvider>,
        minter: TokenMinter,
        token_ttl: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            minter,
            token_ttl,
        }
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Register a user: create it with the identity provider, then insert
    /// the profile row and default role assignment in one transaction. If
    /// the profile insert fails the registration is reported as failed.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Conflict` for duplicate emails and
    /// `IdentityError::Invalid` for malformed input.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<Profile> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(IdentityError::Invalid("invalid email address".into()));
        }
        if password.len() < 8 {
            return Err(IdentityError::Invalid(
                "password must be at least 8 characters".into(),
            ));
        }

        let user = self.provider.register(email, password).await?;

        let display_name = display_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(
                || email.split('@').next().unwrap_or(email).to_string(),
                ToString::to_string,
            );

        let now = Utc::now();
        let profile = Profile {
            user_id: UserId::from_uuid(user.id),
            email: email.to_string(),
            display_name,
            created_at: now,
            updated_at: now,
        };

        self.store
            .register_user(&profile, DEFAULT_USER_ROLE)
            .await
            .map_err(|e| IdentityError::from_store(e, "email already registered"))?;

        tracing::info!(user_id = %profile.user_id, "Registered user");
        Ok(profile)
    }

    /// Authenticate against the provider; the token pair is returned to
    /// the caller unchanged.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidCredentials` when rejected.
    pub async fn login(&self, email: &str, password: &str) -> Result<ProviderTokens> {
        let (_, tokens) = self.provider.login(email, password).await?;
        Ok(tokens)
    }

    /// Fetch the caller's own profile.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::NotFound` if no profile exists.
    pub async fn me(&self, user_id: UserId) -> Result<Profile> {
        self.store
            .get_profile(user_id)
            .await?
            .ok_or_else(|| IdentityError::NotFound("profile".into()))
    }

    /// Update the caller's display name.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::NotFound` if no profile exists.
    pub async fn update_me(&self, user_id: UserId, display_name: &str) -> Result<Profile> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(IdentityError::Invalid("display name must not be empty".into()));
        }
        self.store
            .update_display_name(user_id, display_name)
            .await
            .map_err(|e| IdentityError::from_store(e, "profile"))
    }

    // =========================================================================
    // Admin: roles and permissions
    // =========================================================================

    /// Create a role. Names are unique and immutable after creation.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Conflict` on a duplicate name.
    pub async fn create_role(&self, name: &str, description: &str) -> Result<Role> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IdentityError::Invalid("role name must not be empty".into()));
        }
        let role = Role {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.store
            .insert_role(&role)
            .await
            .map_err(|e| IdentityError::from_store(e, "role name already exists"))?;
        Ok(role)
    }

    /// List all roles.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        Ok(self.store.list_roles().await?)
    }

    /// Delete a role.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::NotFound` if the role doesn't exist.
    pub async fn delete_role(&self, role_id: Uuid) -> Result<()> {
        self.store
            .delete_role(role_id)
            .await
            .map_err(|e| IdentityError::from_store(e, "role"))
    }

    /// Create a permission. Names are unique and immutable after creation.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Conflict` on a duplicate name.
    pub async fn create_permission(&self, name: &str, description: &str) -> Result<Permission> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IdentityError::Invalid(
                "permission name must not be empty".into(),
            ));
        }
        let permission = Permission {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.store
            .insert_permission(&permission)
            .await
            .map_err(|e| IdentityError::from_store(e, "permission name already exists"))?;
        Ok(permission)
    }

    /// List all permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_permissions(&self) -> Result<Vec<Permission>> {
        Ok(self.store.list_permissions().await?)
    }

    /// Delete a permission.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::NotFound` if the permission doesn't exist.
    pub async fn delete_permission(&self, permission_id: Uuid) -> Result<()> {
        self.store
            .delete_permission(permission_id)
            .await
            .map_err(|e| IdentityError::from_store(e, "permission"))
    }

    /// Attach a permission to a role.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::NotFound` if either doesn't exist.
    pub async fn attach_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<()> {
        self.store
            .attach_permission(role_id, permission_id)
            .await
            .map_err(|e| IdentityError::from_store(e, "role or permission"))
    }

    // =========================================================================
    // Admin: machine clients
    // =========================================================================

    /// Create a machine client with the given roles. The plaintext secret
    /// is returned exactly once.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Conflict` on a duplicate client name and
    /// `IdentityError::NotFound` when a role name is unknown.
    pub async fn create_client(&self, name: &str, role_names: &[String]) -> Result<CreatedClient> {
        let name = name.trim();
        if name.is_empty() {
            return Err(IdentityError::Invalid("client name must not be empty".into()));
        }

        let mut role_ids = Vec::with_capacity(role_names.len());
        for role_name in role_names {
            let role = self
                .store
                .get_role_by_name(role_name)
                .await?
                .ok_or_else(|| IdentityError::NotFound(format!("role {role_name}")))?;
            role_ids.push(role.id);
        }

        let client_secret = secrets::generate_client_secret();
        let client = MachineClient {
            client_id: ClientId::generate(),
            name: name.to_string(),
            secret_hash: secrets::hash_secret(&client_secret)?,
            created_at: Utc::now(),
            revoked_at: None,
        };

        self.store
            .insert_machine_client(&client)
            .await
            .map_err(|e| IdentityError::from_store(e, "client name already exists"))?;

        for role_id in role_ids {
            self.store.assign_client_role(client.client_id, role_id).await?;
        }

        tracing::info!(client_id = %client.client_id, name, "Created machine client");
        Ok(CreatedClient {
            client,
            client_secret,
        })
    }

    /// Assign an additional role to a client.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::NotFound` if either doesn't exist.
    pub async fn assign_client_role(&self, client_id: ClientId, role_id: Uuid) -> Result<()> {
        self.store
            .assign_client_role(client_id, role_id)
            .await
            .map_err(|e| IdentityError::from_store(e, "client or role"))
    }

    /// Revoke a client. Outstanding tokens stop verifying once the
    /// verifier's grants cache expires.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::NotFound` if the client doesn't exist.
    pub async fn revoke_client(&self, client_id: ClientId) -> Result<()> {
        self.store
            .revoke_machine_client(client_id)
            .await
            .map_err(|e| IdentityError::from_store(e, "client"))?;
        tracing::info!(client_id = %client_id, "Revoked machine client");
        Ok(())
    }

    // =========================================================================
    // Token endpoint
    // =========================================================================

    /// The client-credentials grant: verify the client id and secret and
    /// mint a machine token embedding the client's current roles.
    ///
    /// The secret check goes through argon2's constant-time verification
    /// on the stored hash. Which of id/secret/revocation failed is never
    /// distinguished in the public error.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidCredentials` or
    /// `IdentityError::ClientRevoked`.
    pub async fn issue_token(&self, client_id: &str, client_secret: &str) -> Result<TokenGrant> {
        let client_id = client_id
            .parse::<Uuid>()
            .map_err(|_| IdentityError::InvalidCredentials)?;

        let client = self
            .store
            .get_machine_client(ClientId::from_uuid(client_id))
            .await?
            .ok_or(IdentityError::InvalidCredentials)?;

        if !client.is_active() {
            return Err(IdentityError::ClientRevoked);
        }

        if !secrets::verify_secret(client_secret, &client.secret_hash) {
            return Err(IdentityError::InvalidCredentials);
        }

        let roles = self.store.roles_for_client(client.client_id).await?;
        let minted: MintedToken = self.minter.mint(client_id, &roles, self.token_ttl)?;

        Ok(TokenGrant {
            access_token: minted.token,
            token_type: "Bearer",
            expires_in: minted.expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockIdentityProvider;
    use crate::roles::StoreRoleSource;
    use flowplane_auth::{
        JwtVerifier, TokenFamily, TokenVerifier, VerifierConfig,
    };
    use flowplane_store::{IdentityStore as _, MemoryStore};

    fn machine_family() -> TokenFamily {
        TokenFamily {
            secret: "m2m-secret".into(),
            issuer: "https://auth.flowplane.local".into(),
            audience: "flowplane-services".into(),
        }
    }

    fn user_family() -> TokenFamily {
        TokenFamily {
            secret: "provider-secret".into(),
            issuer: "https://id.example.com".into(),
            audience: "authenticated".into(),
        }
    }

    async fn setup() -> (IdentityService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = IdentityService::new(
            store.clone(),
            Arc::new(MockIdentityProvider::new()),
            TokenMinter::new(machine_family()),
            Duration::from_secs(900),
        );
        // Seed the roles bootstrap would normally create.
        service.create_role("admin", "Full access").await.unwrap();
        service.create_role("user", "Standard user").await.unwrap();
        service
            .create_role("conversation_client", "Conversation hub service client")
            .await
            .unwrap();
        (service, store)
    }

    #[tokio::test]
    async fn register_assigns_default_role() {
        let (service, store) = setup().await;

        let profile = service
            .register("a@example.com", "Secret123!", None)
            .await
            .unwrap();
        assert_eq!(profile.display_name, "a");

        let roles = store.roles_for_user(profile.user_id).await.unwrap();
        assert_eq!(roles, vec!["user".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let (service, _) = setup().await;
        service
            .register("a@example.com", "Secret123!", None)
            .await
            .unwrap();

        let err = service
            .register("a@example.com", "Secret123!", None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Conflict(_)));
    }

    #[tokio::test]
    async fn register_rejects_bad_input() {
        let (service, _) = setup().await;
        assert!(matches!(
            service.register("", "Secret123!", None).await,
            Err(IdentityError::Invalid(_))
        ));
        assert!(matches!(
            service.register("a@example.com", "short", None).await,
            Err(IdentityError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials() {
        let (service, _) = setup().await;
        service
            .register("a@example.com", "Secret123!", None)
            .await
            .unwrap();

        assert!(service.login("a@example.com", "Secret123!").await.is_ok());
        assert!(matches!(
            service.login("a@example.com", "WrongPass1").await,
            Err(IdentityError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn client_credentials_roundtrip() {
        let (service, _) = setup().await;

        let created = service
            .create_client("conversation_service_client", &["conversation_client".into()])
            .await
            .unwrap();

        let grant = service
            .issue_token(&created.client.client_id.to_string(), &created.client_secret)
            .await
            .unwrap();
        assert_eq!(grant.token_type, "Bearer");
        assert_eq!(grant.expires_in, 900);

        let wrong = service
            .issue_token(&created.client.client_id.to_string(), "wrong-secret")
            .await;
        assert!(matches!(wrong, Err(IdentityError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn issued_token_verifies_until_revoked() {
        let (service, store) = setup().await;

        let created = service
            .create_client("conversation_service_client", &["conversation_client".into()])
            .await
            .unwrap();
        let grant = service
            .issue_token(&created.client.client_id.to_string(), &created.client_secret)
            .await
            .unwrap();

        let make_verifier = || {
            JwtVerifier::new(
                VerifierConfig {
                    user: user_family(),
                    machine: machine_family(),
                    leeway_secs: 30,
                    cache_ttl: Duration::from_secs(0),
                    cache_capacity: 16,
                },
                Arc::new(StoreRoleSource::new(store.clone())),
            )
        };

        let principal = make_verifier().verify(&grant.access_token).await.unwrap();
        assert!(principal.is_machine());
        assert!(principal.has_role("conversation_client"));

        service.revoke_client(created.client.client_id).await.unwrap();

        // A fresh verifier (no cached grants) must reject the token now.
        assert!(make_verifier().verify(&grant.access_token).await.is_err());

        // And the grant endpoint refuses revoked clients outright.
        let err = service
            .issue_token(&created.client.client_id.to_string(), &created.client_secret)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::ClientRevoked));
    }

    #[tokio::test]
    async fn create_client_with_unknown_role_fails() {
        let (service, _) = setup().await;
        let err = service
            .create_client("broken_client", &["no_such_role".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::NotFound(_)));
    }
}
