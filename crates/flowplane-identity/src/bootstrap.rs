//! Cold-start bootstrap.
//!
//! Runs once per process before the gateway serves traffic; failures are
//! fatal. The sequence is idempotent and at-most-once observable:
//!
//! 1. Seed core roles, permissions, and their mapping (get-or-create).
//! 2. Ensure the admin account exists with the provider, has a profile,
//!    and holds the `admin` role.
//! 3. For each dependent service, look up its machine client by
//!    well-known name. An existing client is reused with the credentials
//!    persisted on a previous cold start; an existing client with *no*
//!    stored credentials is a hard startup error (never silently create a
//!    duplicate); a missing client is created with the roles the service
//!    requires, and its credentials are persisted for subsequent starts.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use flowplane_store::IdentityStore;

use crate::error::IdentityError;
use crate::provider::IdentityProvider;
use crate::service::IdentityService;

/// Core roles created at bootstrap.
pub const CORE_ROLES: &[(&str, &str)] = &[
    ("admin", "Full administrative access."),
    ("user", "A standard, authenticated user."),
    (
        "conversation_client",
        "Service role for the conversation hub.",
    ),
];

/// Core permissions created at bootstrap.
pub const CORE_PERMISSIONS: &[(&str, &str)] = &[
    ("admin:manage", "Manage roles, permissions, and clients."),
    ("agent:create", "Create new agent definitions."),
    ("agent:deploy", "Deploy an agent version."),
    ("agent:read:any", "Read any agent regardless of owner."),
    ("agent:write:any", "Write any agent regardless of owner."),
    ("deployment:read:any", "Read any deployment regardless of owner."),
];

/// Role → permission mapping applied at bootstrap.
pub const ROLE_PERMISSION_MAP: &[(&str, &[&str])] = &[
    (
        "admin",
        &[
            "admin:manage",
            "agent:create",
            "agent:deploy",
            "agent:read:any",
            "agent:write:any",
            "deployment:read:any",
        ],
    ),
    ("user", &["agent:create", "agent:deploy"]),
    (
        "conversation_client",
        &["agent:read:any", "deployment:read:any"],
    ),
];

/// A dependent service's machine-client requirements.
#[derive(Debug, Clone)]
pub struct ServiceClientSpec {
    /// Well-known client name, e.g. `conversation_service_client`.
    pub name: String,
    /// Roles the service's operation requires.
    pub roles: Vec<String>,
}

/// Bootstrap configuration.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Admin account email.
    pub admin_email: String,
    /// Admin account password.
    pub admin_password: String,
    /// Machine clients to ensure for dependent services.
    pub service_clients: Vec<ServiceClientSpec>,
}

/// Credentials of one machine client, persisted between cold starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCredentials {
    /// Client id.
    pub client_id: Uuid,
    /// Plaintext client secret.
    pub client_secret: String,
}

/// What bootstrap established.
#[derive(Debug, Default)]
pub struct BootstrapOutcome {
    /// The admin account's user id, when admin credentials were given.
    pub admin_user_id: Option<Uuid>,
    /// Credentials per service client name.
    pub clients: HashMap<String, ClientCredentials>,
}

/// Fatal bootstrap errors: the service refuses to serve traffic.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A machine client exists but its credentials were not found in the
    /// credential store; creating a duplicate silently is forbidden.
    #[error(
        "machine client '{0}' exists but no stored credentials were found; \
         restore the credential store or delete the client"
    )]
    MissingCredentials(String),

    /// The credential store could not be read or written.
    #[error("credential store error: {0}")]
    CredentialStore(String),

    /// An identity operation failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Persistence for service-client credentials across cold starts.
pub trait CredentialStore: Send + Sync {
    /// Load stored credentials by client name.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn load(&self, name: &str) -> Result<Option<ClientCredentials>, BootstrapError>;

    /// Persist credentials for a client name.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn save(&self, name: &str, credentials: &ClientCredentials) -> Result<(), BootstrapError>;
}

/// JSON-file-backed credential store.
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Create a store backed by the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> Result<HashMap<String, ClientCredentials>, BootstrapError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| BootstrapError::CredentialStore(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(BootstrapError::CredentialStore(e.to_string())),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, name: &str) -> Result<Option<ClientCredentials>, BootstrapError> {
        Ok(self.read_all()?.remove(name))
    }

    fn save(&self, name: &str, credentials: &ClientCredentials) -> Result<(), BootstrapError> {
        let mut all = self.read_all()?;
        all.insert(name.to_string(), credentials.clone());
        let bytes = serde_json::to_vec_pretty(&all)
            .map_err(|e| BootstrapError::CredentialStore(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BootstrapError::CredentialStore(e.to_string()))?;
        }
        std::fs::write(&self.path, bytes)
            .map_err(|e| BootstrapError::CredentialStore(e.to_string()))
    }
}

/// In-memory credential store for tests.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<HashMap<String, ClientCredentials>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, name: &str) -> Result<Option<ClientCredentials>, BootstrapError> {
        Ok(self.inner.lock().get(name).cloned())
    }

    fn save(&self, name: &str, credentials: &ClientCredentials) -> Result<(), BootstrapError> {
        self.inner
            .lock()
            .insert(name.to_string(), credentials.clone());
        Ok(())
    }
}

/// Run the bootstrap sequence.
///
/// # Errors
///
/// Any error is fatal to startup; see [`BootstrapError`].
pub async fn run(
    service: &IdentityService,
    store: &dyn IdentityStore,
    provider: &dyn IdentityProvider,
    credentials: &dyn CredentialStore,
    config: &BootstrapConfig,
) -> Result<BootstrapOutcome, BootstrapError> {
    let mut outcome = BootstrapOutcome::default();

    seed_rbac(service, store).await?;
    outcome.admin_user_id = ensure_admin(store, provider, config).await?;

    for spec in &config.service_clients {
        let creds = ensure_service_client(service, store, credentials, spec).await?;
        outcome.clients.insert(spec.name.clone(), creds);
    }

    tracing::info!(
        clients = outcome.clients.len(),
        "Bootstrap complete"
    );
    Ok(outcome)
}

async fn seed_rbac(
    service: &IdentityService,
    store: &dyn IdentityStore,
) -> Result<(), BootstrapError> {
    for (name, description) in CORE_ROLES {
        if store
            .get_role_by_name(name)
            .await
            .map_err(IdentityError::Store)?
            .is_none()
        {
            service.create_role(name, description).await?;
            tracing::info!(role = name, "Created core role");
        }
    }

    for (name, description) in CORE_PERMISSIONS {
        if store
            .get_permission_by_name(name)
            .await
            .map_err(IdentityError::Store)?
            .is_none()
        {
            service.create_permission(name, description).await?;
            tracing::info!(permission = name, "Created core permission");
        }
    }

    for (role_name, permission_names) in ROLE_PERMISSION_MAP {
        let Some(role) = store
            .get_role_by_name(role_name)
            .await
            .map_err(IdentityError::Store)?
        else {
            continue;
        };
        for permission_name in *permission_names {
            if let Some(permission) = store
                .get_permission_by_name(permission_name)
                .await
                .map_err(IdentityError::Store)?
            {
                store
                    .attach_permission(role.id, permission.id)
                    .await
                    .map_err(IdentityError::Store)?;
            }
        }
    }

    Ok(())
}

async fn ensure_admin(
    store: &dyn IdentityStore,
    provider: &dyn IdentityProvider,
    config: &BootstrapConfig,
) -> Result<Option<Uuid>, BootstrapError> {
    if config.admin_email.is_empty() {
        tracing::info!("No admin credentials configured; skipping admin bootstrap");
        return Ok(None);
    }

    let user = match provider
        .login(&config.admin_email, &config.admin_password)
        .await
    {
        Ok((user, _)) => user,
        Err(IdentityError::InvalidCredentials) => provider
            .register(&config.admin_email, &config.admin_password)
            .await
            .map_err(BootstrapError::Identity)?,
        Err(e) => return Err(e.into()),
    };

    let user_id = flowplane_core::UserId::from_uuid(user.id);

    if store
        .get_profile(user_id)
        .await
        .map_err(IdentityError::Store)?
        .is_none()
    {
        let now = chrono::Utc::now();
        let profile = flowplane_store::Profile {
            user_id,
            email: user.email.clone(),
            display_name: "Admin".to_string(),
            created_at: now,
            updated_at: now,
        };
        store
            .register_user(&profile, "admin")
            .await
            .map_err(IdentityError::Store)?;
    } else if let Some(role) = store
        .get_role_by_name("admin")
        .await
        .map_err(IdentityError::Store)?
    {
        store
            .assign_user_role(user_id, role.id)
            .await
            .map_err(IdentityError::Store)?;
    }

    tracing::info!(user_id = %user_id, "Admin account ensured");
    Ok(Some(user.id))
}

async fn ensure_service_client(
    service: &IdentityService,
    store: &dyn IdentityStore,
    credentials: &dyn CredentialStore,
    spec: &ServiceClientSpec,
) -> Result<ClientCredentials, BootstrapError> {
    let existing = store
        .get_machine_client_by_name(&spec.name)
        .await
        .map_err(IdentityError::Store)?;

    if let Some(client) = existing {
        return match credentials.load(&spec.name)? {
            Some(stored) if stored.client_id == client.client_id.as_uuid() => {
                tracing::info!(client = %spec.name, "Reusing stored service client credentials");
                Ok(stored)
            }
            // Stored credentials for a different client id are as useless
            // as none at all.
            _ => Err(BootstrapError::MissingCredentials(spec.name.clone())),
        };
    }

    let created = service.create_client(&spec.name, &spec.roles).await?;
    let creds = ClientCredentials {
        client_id: created.client.client_id.as_uuid(),
        client_secret: created.client_secret,
    };
    credentials.save(&spec.name, &creds)?;
    tracing::info!(client = %spec.name, "Created service client");
    Ok(creds)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::provider::MockIdentityProvider;
    use flowplane_auth::{TokenFamily, TokenMinter};
    use flowplane_store::MemoryStore;

    fn config() -> BootstrapConfig {
        BootstrapConfig {
            admin_email: "admin@example.com".into(),
            admin_password: "AdminPass1!".into(),
            service_clients: vec![ServiceClientSpec {
                name: "conversation_service_client".into(),
                roles: vec!["conversation_client".into()],
            }],
        }
    }

    fn service(store: Arc<MemoryStore>, provider: Arc<MockIdentityProvider>) -> IdentityService {
        IdentityService::new(
            store,
            provider,
            TokenMinter::new(TokenFamily {
                secret: "m2m".into(),
                issuer: "https://auth.local".into(),
                audience: "services".into(),
            }),
            Duration::from_secs(900),
        )
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockIdentityProvider::new());
        let service = service(store.clone(), provider.clone());
        let creds = MemoryCredentialStore::new();

        let first = run(&service, store.as_ref(), provider.as_ref(), &creds, &config())
            .await
            .unwrap();
        let second = run(&service, store.as_ref(), provider.as_ref(), &creds, &config())
            .await
            .unwrap();

        // Same client both times; no duplicate was created.
        assert_eq!(
            first.clients["conversation_service_client"].client_id,
            second.clients["conversation_service_client"].client_id
        );
        assert_eq!(first.admin_user_id, second.admin_user_id);
    }

    #[tokio::test]
    async fn existing_client_without_credentials_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockIdentityProvider::new());
        let service = service(store.clone(), provider.clone());

        let creds = MemoryCredentialStore::new();
        run(&service, store.as_ref(), provider.as_ref(), &creds, &config())
            .await
            .unwrap();

        // Second cold start with an empty credential store: the client
        // exists but its secret is gone.
        let empty = MemoryCredentialStore::new();
        let err = run(&service, store.as_ref(), provider.as_ref(), &empty, &config())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn seeded_roles_carry_mapped_permissions() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockIdentityProvider::new());
        let service = service(store.clone(), provider.clone());
        let creds = MemoryCredentialStore::new();

        run(&service, store.as_ref(), provider.as_ref(), &creds, &config())
            .await
            .unwrap();

        let permissions = store
            .permissions_for_roles(&["conversation_client".to_string()])
            .await
            .unwrap();
        assert!(permissions.contains(&"agent:read:any".to_string()));
        assert!(permissions.contains(&"deployment:read:any".to_string()));
    }

    #[tokio::test]
    async fn file_credential_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));

        assert!(store.load("missing").unwrap().is_none());

        let creds = ClientCredentials {
            client_id: Uuid::new_v4(),
            client_secret: "s3cret".into(),
        };
        store.save("conversation_service_client", &creds).unwrap();

        let loaded = store.load("conversation_service_client").unwrap().unwrap();
        assert_eq!(loaded.client_id, creds.client_id);
        assert_eq!(loaded.client_secret, creds.client_secret);
    }
}
