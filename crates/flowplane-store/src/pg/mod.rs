//! Postgres implementation of the storage traits.
//!
//! Queries use the runtime `sqlx` API with explicit row mapping, so the
//! crate builds without a live database. Invariants that need serialization
//! (version numbering, worker leases) use `FOR UPDATE` / `FOR UPDATE SKIP
//! LOCKED` row locks inside short transactions.

mod catalog;
mod conversations;
mod deployments;
mod identity;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use flowplane_core::{AgentId, ClientId, ConversationId, DeploymentId, MessageId, UserId, VersionId};

use crate::error::{Result, StoreError};
use crate::types::{
    Agent, AgentStatus, AgentVersion, BuildStrategyKind, Conversation, DeployStrategyKind,
    Deployment, DeploymentStatus, DeploymentTransition, MachineClient, Message, MessageRole,
    Permission, Profile, Role,
};
use crate::Store;

/// Postgres-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to Postgres with a bounded pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .idle_timeout(Duration::from_secs(300))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (used by tests and tooling).
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run pending embedded migrations. Safe to run on every startup;
    /// Postgres advisory locks serialize concurrent migrators.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    /// Access the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn parse_enum<T>(raw: &str, parse: impl Fn(&str) -> Option<T>, what: &str) -> Result<T> {
    parse(raw).ok_or_else(|| StoreError::Serialization(format!("unknown {what}: {raw}")))
}

pub(crate) fn profile_from_row(row: &PgRow) -> Result<Profile> {
    Ok(Profile {
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn role_from_row(row: &PgRow) -> Result<Role> {
    Ok(Role {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn permission_from_row(row: &PgRow) -> Result<Permission> {
    Ok(Permission {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn machine_client_from_row(row: &PgRow) -> Result<MachineClient> {
    Ok(MachineClient {
        client_id: ClientId::from_uuid(row.try_get("client_id")?),
        name: row.try_get("name")?,
        secret_hash: row.try_get("secret_hash")?,
        created_at: row.try_get("created_at")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

pub(crate) fn agent_from_row(row: &PgRow) -> Result<Agent> {
    let status: String = row.try_get("status")?;
    Ok(Agent {
        id: AgentId::from_uuid(row.try_get("id")?),
        owner_id: UserId::from_uuid(row.try_get("owner_id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        status: parse_enum(&status, AgentStatus::parse, "agent status")?,
        tags: row.try_get("tags")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn version_from_row(row: &PgRow) -> Result<AgentVersion> {
    Ok(AgentVersion {
        id: VersionId::from_uuid(row.try_get("id")?),
        agent_id: AgentId::from_uuid(row.try_get("agent_id")?),
        owner_id: UserId::from_uuid(row.try_get("owner_id")?),
        version_number: row.try_get("version_number")?,
        config: row.try_get("config")?,
        changelog: row.try_get("changelog")?,
        published_at: row.try_get("published_at")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn deployment_from_row(row: &PgRow) -> Result<Deployment> {
    let status: String = row.try_get("status")?;
    let build: String = row.try_get("build_strategy")?;
    let deploy: String = row.try_get("deploy_strategy")?;
    Ok(Deployment {
        id: DeploymentId::from_uuid(row.try_get("id")?),
        owner_id: UserId::from_uuid(row.try_get("owner_id")?),
        agent_id: AgentId::from_uuid(row.try_get("agent_id")?),
        agent_version_id: VersionId::from_uuid(row.try_get("agent_version_id")?),
        status: parse_enum(&status, DeploymentStatus::parse, "deployment status")?,
        endpoint_url: row.try_get("endpoint_url")?,
        metadata: row.try_get("metadata")?,
        error_message: row.try_get("error_message")?,
        build_strategy: parse_enum(&build, BuildStrategyKind::parse, "build strategy")?,
        deploy_strategy: parse_enum(&deploy, DeployStrategyKind::parse, "deploy strategy")?,
        stop_requested: row.try_get("stop_requested")?,
        leased_by: row.try_get("leased_by")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        deployed_at: row.try_get("deployed_at")?,
        stopped_at: row.try_get("stopped_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn transition_from_row(row: &PgRow) -> Result<DeploymentTransition> {
    let from: String = row.try_get("from_status")?;
    let to: String = row.try_get("to_status")?;
    Ok(DeploymentTransition {
        id: row.try_get("id")?,
        deployment_id: DeploymentId::from_uuid(row.try_get("deployment_id")?),
        from_status: parse_enum(&from, DeploymentStatus::parse, "deployment status")?,
        to_status: parse_enum(&to, DeploymentStatus::parse, "deployment status")?,
        detail: row.try_get("detail")?,
        at: row.try_get("at")?,
    })
}

pub(crate) fn conversation_from_row(row: &PgRow) -> Result<Conversation> {
    let owner: Option<Uuid> = row.try_get("owner_id")?;
    let agent: Option<Uuid> = row.try_get("agent_id")?;
    Ok(Conversation {
        id: ConversationId::from_uuid(row.try_get("id")?),
        owner_id: owner.map(UserId::from_uuid),
        agent_id: agent.map(AgentId::from_uuid),
        title: row.try_get("title")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn message_from_row(row: &PgRow) -> Result<Message> {
    let role: String = row.try_get("role")?;
    Ok(Message {
        id: MessageId::from_uuid(row.try_get("id")?),
        conversation_id: ConversationId::from_uuid(row.try_get("conversation_id")?),
        role: parse_enum(&role, MessageRole::parse, "message role")?,
        content: row.try_get("content")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn lease_deadline(lease: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::minutes(5))
}
