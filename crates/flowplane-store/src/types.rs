//! Domain types persisted by the store.
//!
//! These mirror the relational schema one-to-one. Enumerations are stored
//! as lowercase text columns; the `as_str`/`parse` helpers are the single
//! source of truth for that mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use flowplane_core::{AgentId, ClientId, ConversationId, DeploymentId, MessageId, UserId, VersionId};

// =============================================================================
// Identity
// =============================================================================

/// A user profile, created at registration. The row id is the user id
/// issued by the external identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Provider-issued user id.
    pub user_id: UserId,
    /// Unique email address.
    pub email: String,
    /// Display name shown in UIs.
    pub display_name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A machine client able to obtain M2M tokens via the client-credentials
/// grant. Only the argon2 hash of the secret is stored; the plaintext is
/// shown once at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineClient {
    /// Client id (the `sub` claim of tokens minted for this client).
    pub client_id: ClientId,
    /// Well-known unique name, e.g. `conversation_service_client`.
    pub name: String,
    /// Argon2 hash of the client secret.
    #[serde(skip_serializing)]
    pub secret_hash: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when the client is revoked; revoked clients cannot mint tokens.
    pub revoked_at: Option<DateTime<Utc>>,
}

impl MachineClient {
    /// Whether the client is still allowed to mint tokens.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// A named role. Role names are unique and immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// Row id.
    pub id: Uuid,
    /// Unique name, e.g. `admin`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// A named permission. Permission names are unique and immutable after
/// creation; a principal's effective set is the union over its roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    /// Row id.
    pub id: Uuid,
    /// Unique name, e.g. `agent:read:any`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Catalog
// =============================================================================

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Newly created, not yet published.
    Draft,
    /// At least one version has been published.
    Published,
    /// Terminal for new versions; existing deployments are unaffected.
    Archived,
}

impl AgentStatus {
    /// Text form stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    /// Parse the stored text form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// An agent definition. `(owner_id, name)` is unique among live agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Row id.
    pub id: AgentId,
    /// Owning user.
    pub owner_id: UserId,
    /// Name, unique per owner.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Lifecycle status.
    pub status: AgentStatus,
    /// Search tags.
    pub tags: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// An immutable snapshot of an agent's configuration.
///
/// `version_number` is strictly increasing per agent with no gaps; the
/// config document is opaque to the catalog and only interpreted by the
/// deployment build stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentVersion {
    /// Row id.
    pub id: VersionId,
    /// Parent agent.
    pub agent_id: AgentId,
    /// Owner, denormalized from the agent for access checks.
    pub owner_id: UserId,
    /// Per-agent version number, starting at 1.
    pub version_number: i32,
    /// Full configuration snapshot (not a delta).
    pub config: Json,
    /// Optional change description.
    pub changelog: Option<String>,
    /// Set at most once, when the version is published.
    pub published_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Filters accepted by [`CatalogStore::list_agents`](crate::CatalogStore::list_agents).
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    /// Restrict to a lifecycle status.
    pub status: Option<AgentStatus>,
    /// Restrict to agents carrying this tag.
    pub tag: Option<String>,
    /// Case-insensitive name substring match.
    pub name_contains: Option<String>,
}

// =============================================================================
// Deployments
// =============================================================================

/// Lifecycle status of a deployment. Legal transitions are enforced by the
/// deployment engine's state machine; the store only records them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Queued, waiting for a worker lease.
    Pending,
    /// A worker is executing the build/deploy pipeline.
    Deploying,
    /// Live, with a non-null endpoint URL.
    Running,
    /// Terminal failure, with an error message.
    Failed,
    /// Stopped by request, with a non-null `stopped_at`.
    Stopped,
}

impl DeploymentStatus {
    /// Text form stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deploying => "deploying",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Parse the stored text form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "deploying" => Some(Self::Deploying),
            "running" => Some(Self::Running),
            "failed" => Some(Self::Failed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

/// How the container image is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStrategyKind {
    /// Dispatch a remote CI workflow and poll it.
    CiDriven,
    /// Submit a job to a managed build service and poll it.
    HostedBuild,
}

impl BuildStrategyKind {
    /// Text form stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CiDriven => "ci_driven",
            Self::HostedBuild => "hosted_build",
        }
    }

    /// Parse the stored text form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ci_driven" => Some(Self::CiDriven),
            "hosted_build" => Some(Self::HostedBuild),
            _ => None,
        }
    }
}

/// Where the image is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStrategyKind {
    /// Managed serverless runtime.
    Serverless,
    /// Kubernetes cluster.
    Cluster,
}

impl DeployStrategyKind {
    /// Text form stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Serverless => "serverless",
            Self::Cluster => "cluster",
        }
    }

    /// Parse the stored text form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "serverless" => Some(Self::Serverless),
            "cluster" => Some(Self::Cluster),
            _ => None,
        }
    }
}

/// A deployment record binding one agent version to one running service.
///
/// The row doubles as the durable job: workers lease rows via the lease
/// columns, and `metadata` carries resumption markers (`build_job_id`,
/// `image_tag`, `platform_service_name`) so a re-leased deployment
/// re-attaches to external resources instead of duplicating them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Row id; also the basis of external resource names.
    pub id: DeploymentId,
    /// Owning user.
    pub owner_id: UserId,
    /// Agent being deployed.
    pub agent_id: AgentId,
    /// Version being deployed.
    pub agent_version_id: VersionId,
    /// Current lifecycle status.
    pub status: DeploymentStatus,
    /// Service URL; set only while `running`.
    pub endpoint_url: Option<String>,
    /// Platform-specific metadata and resumption markers.
    pub metadata: Json,
    /// Failure detail; set only when `failed`.
    pub error_message: Option<String>,
    /// Build strategy selector.
    pub build_strategy: BuildStrategyKind,
    /// Deploy strategy selector.
    pub deploy_strategy: DeployStrategyKind,
    /// Cooperative cancellation flag checked by workers between stages.
    pub stop_requested: bool,
    /// Worker currently holding the lease, if any.
    pub leased_by: Option<String>,
    /// Lease expiry; an expired lease makes the row leasable again.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// When the deployment reached `running`.
    pub deployed_at: Option<DateTime<Utc>>,
    /// When the deployment reached `stopped`.
    pub stopped_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// One entry of the per-deployment transition log, written in the same
/// transaction as the status update it records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentTransition {
    /// Monotonic log id.
    pub id: i64,
    /// Deployment this entry belongs to.
    pub deployment_id: DeploymentId,
    /// Status before the transition.
    pub from_status: DeploymentStatus,
    /// Status after the transition.
    pub to_status: DeploymentStatus,
    /// Optional human-readable detail (e.g. `timeout`).
    pub detail: Option<String>,
    /// When the transition was recorded.
    pub at: DateTime<Utc>,
}

/// Field updates applied together with a status transition.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    /// Set the endpoint URL.
    pub endpoint_url: Option<String>,
    /// Set the failure message.
    pub error_message: Option<String>,
    /// Stamp `deployed_at`.
    pub deployed_at: Option<DateTime<Utc>>,
    /// Stamp `stopped_at`.
    pub stopped_at: Option<DateTime<Utc>>,
    /// Shallow-merge these keys into `metadata`.
    pub metadata: Option<Json>,
}

/// Filters accepted by [`DeploymentStore::list_deployments`](crate::DeploymentStore::list_deployments).
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    /// Restrict to deployments of one agent.
    pub agent_id: Option<AgentId>,
    /// Restrict to a lifecycle status.
    pub status: Option<DeploymentStatus>,
}

// =============================================================================
// Conversations
// =============================================================================

/// A conversation. The bound agent, when set, is whose deployment the hub
/// streams replies from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Row id.
    pub id: ConversationId,
    /// Owning user, when the conversation is owner-scoped.
    pub owner_id: Option<UserId>,
    /// Agent whose deployment answers in this conversation.
    pub agent_id: Option<AgentId>,
    /// Optional title.
    pub title: Option<String>,
    /// Free-form metadata.
    pub metadata: Json,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Author role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Posted by an end user.
    User,
    /// Produced by the agent runtime.
    Assistant,
    /// Injected by the platform.
    System,
}

impl MessageRole {
    /// Text form stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parse the stored text form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// A persisted message. Messages within a conversation are totally ordered
/// by `(created_at, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Row id.
    pub id: MessageId,
    /// Parent conversation.
    pub conversation_id: ConversationId,
    /// Author role.
    pub role: MessageRole,
    /// Message body.
    pub content: String,
    /// Free-form metadata.
    pub metadata: Json,
    /// Creation timestamp; part of the ordering key.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_roundtrip() {
        for status in [
            DeploymentStatus::Pending,
            DeploymentStatus::Deploying,
            DeploymentStatus::Running,
            DeploymentStatus::Failed,
            DeploymentStatus::Stopped,
        ] {
            assert_eq!(DeploymentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DeploymentStatus::parse("bogus"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(DeploymentStatus::Failed.is_terminal());
        assert!(DeploymentStatus::Stopped.is_terminal());
        assert!(!DeploymentStatus::Running.is_terminal());
        assert!(!DeploymentStatus::Pending.is_terminal());
    }

    #[test]
    fn strategy_text_roundtrip() {
        assert_eq!(
            BuildStrategyKind::parse("ci_driven"),
            Some(BuildStrategyKind::CiDriven)
        );
        assert_eq!(
            DeployStrategyKind::parse("serverless"),
            Some(DeployStrategyKind::Serverless)
        );
        assert_eq!(BuildStrategyKind::parse("docker"), None);
    }

    #[test]
    fn revoked_client_is_inactive() {
        let client = MachineClient {
            client_id: ClientId::generate(),
            name: "test_client".into(),
            secret_hash: "$argon2id$stub".into(),
            created_at: Utc::now(),
            revoked_at: Some(Utc::now()),
        };
        assert!(!client.is_active());
    }
}
