//! Persistence layer for the flowplane control plane.
//!
//! One relational schema per component, all behind narrow async traits so
//! services depend only on the slice of storage they use:
//!
//! - [`IdentityStore`]: profiles, roles, permissions, machine clients
//! - [`CatalogStore`]: agents and their immutable versions
//! - [`DeploymentStore`]: deployment rows, worker leases, transition log
//! - [`ConversationStore`]: conversations and messages
//!
//! [`PgStore`] implements all of them over a bounded `sqlx` Postgres pool
//! (READ COMMITTED, with explicit row locking where an invariant needs it).
//! [`MemoryStore`] (behind the `test-utils` feature) implements the same
//! traits in memory for tests.
//!
//! # Example
//!
//! ```no_run
//! use flowplane_store::PgStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PgStore::connect("postgres://localhost/flowplane", 20).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod pg;
pub mod types;

pub use error::{Result, StoreError};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use types::{
    Agent, AgentFilter, AgentStatus, AgentVersion, BuildStrategyKind, Conversation, DeployStrategyKind,
    Deployment, DeploymentFilter, DeploymentPatch, DeploymentStatus, DeploymentTransition,
    MachineClient, Message, MessageRole, Permission, Profile, Role,
};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use uuid::Uuid;

use flowplane_core::{AgentId, ClientId, ConversationId, DeploymentId, Page, UserId, VersionId};

// =============================================================================
// Identity
// =============================================================================

/// Storage operations backing the identity component.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a profile and assign the named default role in one
    /// transaction. A failed profile insert fails the whole registration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` on a duplicate email or user id.
    async fn register_user(&self, profile: &Profile, default_role: &str) -> Result<()>;

    /// Get a profile by user id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_profile(&self, user_id: UserId) -> Result<Option<Profile>>;

    /// Get a profile by email.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_profile_by_email(&self, email: &str) -> Result<Option<Profile>>;

    /// Update a profile's display name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the profile doesn't exist.
    async fn update_display_name(&self, user_id: UserId, display_name: &str) -> Result<Profile>;

    /// Insert a role.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` on a duplicate name.
    async fn insert_role(&self, role: &Role) -> Result<()>;

    /// List all roles.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_roles(&self) -> Result<Vec<Role>>;

    /// Look up a role by its unique name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>>;

    /// Delete a role and its assignments.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the role doesn't exist.
    async fn delete_role(&self, role_id: Uuid) -> Result<()>;

    /// Insert a permission.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` on a duplicate name.
    async fn insert_permission(&self, permission: &Permission) -> Result<()>;

    /// List all permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_permissions(&self) -> Result<Vec<Permission>>;

    /// Look up a permission by its unique name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_permission_by_name(&self, name: &str) -> Result<Option<Permission>>;

    /// Delete a permission and its role attachments.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the permission doesn't exist.
    async fn delete_permission(&self, permission_id: Uuid) -> Result<()>;

    /// Attach a permission to a role (idempotent).
    ///
    /// # Errors
    ///
    /// Returns an error if either row doesn't exist.
    async fn attach_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<()>;

    /// Assign a role to a user (idempotent).
    ///
    /// # Errors
    ///
    /// Returns an error if the role doesn't exist.
    async fn assign_user_role(&self, user_id: UserId, role_id: Uuid) -> Result<()>;

    /// Assign a role to a machine client (idempotent).
    ///
    /// # Errors
    ///
    /// Returns an error if either row doesn't exist.
    async fn assign_client_role(&self, client_id: ClientId, role_id: Uuid) -> Result<()>;

    /// Insert a machine client.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` on a duplicate name.
    async fn insert_machine_client(&self, client: &MachineClient) -> Result<()>;

    /// Get a machine client by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_machine_client(&self, client_id: ClientId) -> Result<Option<MachineClient>>;

    /// Get a machine client by its well-known name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_machine_client_by_name(&self, name: &str) -> Result<Option<MachineClient>>;

    /// Stamp `revoked_at` on a machine client.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the client doesn't exist.
    async fn revoke_machine_client(&self, client_id: ClientId) -> Result<()>;

    /// Role names assigned to a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn roles_for_user(&self, user_id: UserId) -> Result<Vec<String>>;

    /// Role names assigned to a machine client.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn roles_for_client(&self, client_id: ClientId) -> Result<Vec<String>>;

    /// The union of permission names granted by the given roles.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn permissions_for_roles(&self, roles: &[String]) -> Result<Vec<String>>;
}

// =============================================================================
// Catalog
// =============================================================================

/// Storage operations backing the agent catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert an agent together with its version 1 in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` on a duplicate `(owner_id, name)`.
    async fn create_agent_with_version(&self, agent: &Agent, version: &AgentVersion) -> Result<()>;

    /// Get an agent by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_agent(&self, agent_id: AgentId) -> Result<Option<Agent>>;

    /// List agents, optionally restricted to one owner, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_agents(
        &self,
        owner: Option<UserId>,
        filter: &AgentFilter,
        page: Page,
    ) -> Result<Vec<Agent>>;

    /// Update an agent's mutable fields (description, status, tags).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the agent doesn't exist.
    async fn update_agent(&self, agent: &Agent) -> Result<()>;

    /// Allocate and insert the next version of an agent.
    ///
    /// The current maximum `version_number` is read under a row lock on the
    /// agent so concurrent writers observe strictly increasing numbers with
    /// no gaps. The counter is always derived from stored rows.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the agent doesn't exist.
    async fn insert_next_version(
        &self,
        agent_id: AgentId,
        owner_id: UserId,
        config: &Json,
        changelog: Option<&str>,
    ) -> Result<AgentVersion>;

    /// Get a version by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_version(&self, version_id: VersionId) -> Result<Option<AgentVersion>>;

    /// Get the version with the maximum `version_number` for an agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn latest_version(&self, agent_id: AgentId) -> Result<Option<AgentVersion>>;

    /// List an agent's versions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_versions(&self, agent_id: AgentId, page: Page) -> Result<Vec<AgentVersion>>;

    /// Stamp `published_at` on a version if not already set.
    ///
    /// Returns `true` if this call set the stamp, `false` if it was set
    /// before (`published_at` is set at most once).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the version doesn't exist.
    async fn publish_version(&self, version_id: VersionId, at: DateTime<Utc>) -> Result<bool>;
}

// =============================================================================
// Deployments
// =============================================================================

/// Storage operations backing the deployment engine.
///
/// The deployments table is also the durable job queue: workers claim rows
/// with [`DeploymentStore::lease_next`] (`FOR UPDATE SKIP LOCKED` in the
/// Postgres implementation) and every status change goes through
/// [`DeploymentStore::transition`], which appends a log entry in the same
/// transaction.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new deployment row (status `pending`, no lease).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_deployment(&self, deployment: &Deployment) -> Result<()>;

    /// Get a deployment by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_deployment(&self, id: DeploymentId) -> Result<Option<Deployment>>;

    /// List deployments, optionally restricted to one owner, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_deployments(
        &self,
        owner: Option<UserId>,
        filter: &DeploymentFilter,
        page: Page,
    ) -> Result<Vec<Deployment>>;

    /// Lease the oldest leasable deployment for `worker`, or `None`.
    ///
    /// A row is leasable when it is `pending`, or `deploying` with an
    /// expired lease (a crashed worker's row becomes visible again here).
    /// At most one worker holds a given deployment at a time.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn lease_next(&self, worker: &str, lease: Duration) -> Result<Option<Deployment>>;

    /// Extend the lease on a deployment held by `worker`.
    ///
    /// Returns `false` when the lease is no longer held by `worker`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn renew_lease(&self, id: DeploymentId, worker: &str, lease: Duration) -> Result<bool>;

    /// Release the lease held by `worker` without changing status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn release_lease(&self, id: DeploymentId, worker: &str) -> Result<()>;

    /// Atomically transition `from → to`, apply the patch, and append a
    /// transition log entry, all in one transaction.
    ///
    /// Returns `false` (and writes nothing) when the row is not currently
    /// in `from`; callers use this to lose races gracefully.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the deployment doesn't exist.
    async fn transition(
        &self,
        id: DeploymentId,
        from: DeploymentStatus,
        to: DeploymentStatus,
        detail: Option<&str>,
        patch: DeploymentPatch,
    ) -> Result<bool>;

    /// Shallow-merge keys into `metadata` (resumption markers).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the deployment doesn't exist.
    async fn merge_metadata(&self, id: DeploymentId, patch: &Json) -> Result<()>;

    /// Set the cooperative cancellation flag.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the deployment doesn't exist.
    async fn request_stop(&self, id: DeploymentId) -> Result<()>;

    /// Read the cooperative cancellation flag.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the deployment doesn't exist.
    async fn stop_requested(&self, id: DeploymentId) -> Result<bool>;

    /// The transition log for a deployment, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn transitions(&self, id: DeploymentId) -> Result<Vec<DeploymentTransition>>;

    /// The most recent `running` deployment for an agent, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn running_deployment_for_agent(&self, agent_id: AgentId) -> Result<Option<Deployment>>;
}

// =============================================================================
// Conversations
// =============================================================================

/// Storage operations backing the conversation hub.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Insert a conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Get a conversation by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_conversation(&self, id: ConversationId) -> Result<Option<Conversation>>;

    /// Insert a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_message(&self, message: &Message) -> Result<()>;

    /// List a conversation's messages ordered by `(created_at, id)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_messages(&self, conversation_id: ConversationId, page: Page)
        -> Result<Vec<Message>>;
}

/// The full storage surface, plus a liveness probe for readiness checks.
#[async_trait]
pub trait Store: IdentityStore + CatalogStore + DeploymentStore + ConversationStore {
    /// Round-trip a trivial query to verify the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn ping(&self) -> Result<()>;
}
