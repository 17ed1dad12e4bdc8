//! Catalog operations.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as Json;

use flowplane_core::{AgentId, Page, PageParams, VersionId};
use flowplane_store::{Agent, AgentFilter, AgentStatus, AgentVersion, CatalogStore};

use crate::access::AccessContext;
use crate::error::{CatalogError, Result};

/// Permission required to create agents.
pub const CREATE_PERMISSION: &str = "agent:create";

/// Catalog configuration.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Maximum size of a configuration document in bytes.
    pub max_config_bytes: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            max_config_bytes: 1024 * 1024,
        }
    }
}

/// Input for [`CatalogService::create_agent`].
#[derive(Debug, Clone)]
pub struct CreateAgentInput {
    /// Agent name, unique per owner.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Initial configuration document (becomes version 1).
    pub config: Json,
    /// Search tags.
    pub tags: Vec<String>,
}

/// Result of [`CatalogService::create_agent`].
#[derive(Debug, Clone)]
pub struct CreatedAgent {
    /// The new agent.
    pub agent: Agent,
    /// Its first version (`version_number = 1`).
    pub version: AgentVersion,
}

/// The agent catalog service.
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    config: CatalogConfig,
}

impl CatalogService {
    /// Create the service.
    #[must_use]
    pub fn new(store: Arc<dyn CatalogStore>, config: CatalogConfig) -> Self {
        Self { store, config }
    }

    fn check_config_size(&self, config: &Json) -> Result<()> {
        let size = serde_json::to_vec(config).map(|v| v.len()).unwrap_or(0);
        if size > self.config.max_config_bytes {
            return Err(CatalogError::PayloadTooLarge {
                limit: self.config.max_config_bytes,
            });
        }
        Ok(())
    }

    async fn load_agent(&self, agent_id: AgentId) -> Result<Agent> {
        self.store
            .get_agent(agent_id)
            .await?
            .ok_or(CatalogError::AgentNotFound(agent_id))
    }

    /// Create an agent together with its version 1, atomically.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` for empty (or whitespace-only) names,
    /// `PayloadTooLarge` for oversized configs, and `Conflict` when the
    /// owner already has an agent of that name.
    pub async fn create_agent(
        &self,
        ctx: AccessContext<'_>,
        input: CreateAgentInput,
    ) -> Result<CreatedAgent> {
        ctx.principal
            .require(CREATE_PERMISSION)
            .map_err(|_| CatalogError::Forbidden)?;

        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(CatalogError::InvalidName);
        }
        self.check_config_size(&input.config)?;

        let owner_id = ctx.effective_user()?;
        let now = Utc::now();
        let agent = Agent {
            id: AgentId::generate(),
            owner_id,
            name,
            description: input.description,
            status: AgentStatus::Draft,
            tags: input.tags,
            created_at: now,
            updated_at: now,
        };
        let version = AgentVersion {
            id: VersionId::generate(),
            agent_id: agent.id,
            owner_id,
            version_number: 1,
            config: input.config,
            changelog: None,
            published_at: None,
            created_at: now,
        };

        self.store
            .create_agent_with_version(&agent, &version)
            .await
            .map_err(|e| match e {
                flowplane_store::StoreError::Conflict(_) => {
                    CatalogError::Conflict("an agent with this name already exists".into())
                }
                other => other.into(),
            })?;

        tracing::info!(agent_id = %agent.id, owner_id = %owner_id, "Created agent");
        Ok(CreatedAgent { agent, version })
    }

    /// Get an agent, enforcing read access.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `Forbidden`.
    pub async fn get_agent(&self, ctx: AccessContext<'_>, agent_id: AgentId) -> Result<Agent> {
        let agent = self.load_agent(agent_id).await?;
        ctx.check_read(agent.owner_id)?;
        Ok(agent)
    }

    /// List agents visible to the principal, paged (default 20, max 100).
    ///
    /// Principals with `agent:read:any` (and no delegation header) see all
    /// owners; everyone else sees their own agents.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_agents(
        &self,
        ctx: AccessContext<'_>,
        filter: &AgentFilter,
        params: PageParams,
    ) -> Result<Vec<Agent>> {
        let owner = if ctx.principal.has_permission(crate::access::READ_ANY)
            && ctx.on_behalf_of.is_none()
        {
            None
        } else {
            Some(ctx.effective_user()?)
        };

        Ok(self
            .store
            .list_agents(owner, filter, Page::clamped(params))
            .await?)
    }

    /// Append a new configuration snapshot as version N+1.
    ///
    /// The version counter derives from stored rows under a per-agent row
    /// lock; concurrent calls serialize and observe gapless numbering.
    ///
    /// # Errors
    ///
    /// Returns `Archived` when the agent no longer accepts versions.
    pub async fn update_agent_config(
        &self,
        ctx: AccessContext<'_>,
        agent_id: AgentId,
        config: Json,
        changelog: Option<String>,
    ) -> Result<AgentVersion> {
        let agent = self.load_agent(agent_id).await?;
        ctx.check_write(agent.owner_id)?;

        if agent.status == AgentStatus::Archived {
            return Err(CatalogError::Archived(agent_id));
        }
        self.check_config_size(&config)?;

        let version = self
            .store
            .insert_next_version(agent_id, agent.owner_id, &config, changelog.as_deref())
            .await?;

        tracing::info!(
            agent_id = %agent_id,
            version = version.version_number,
            "Created agent version"
        );
        Ok(version)
    }

    /// Get a version by id, enforcing read access.
    ///
    /// # Errors
    ///
    /// Returns `VersionNotFound` or `Forbidden`.
    pub async fn get_version(
        &self,
        ctx: AccessContext<'_>,
        version_id: VersionId,
    ) -> Result<AgentVersion> {
        let version = self
            .store
            .get_version(version_id)
            .await?
            .ok_or(CatalogError::VersionNotFound(version_id))?;
        ctx.check_read(version.owner_id)?;
        Ok(version)
    }

    /// Get the latest version of an agent.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` when the agent doesn't exist or has no
    /// versions (the latter cannot happen for catalog-created agents).
    pub async fn latest_version(
        &self,
        ctx: AccessContext<'_>,
        agent_id: AgentId,
    ) -> Result<AgentVersion> {
        let agent = self.load_agent(agent_id).await?;
        ctx.check_read(agent.owner_id)?;

        self.store
            .latest_version(agent_id)
            .await?
            .ok_or(CatalogError::AgentNotFound(agent_id))
    }

    /// List an agent's versions, newest first, paged.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `Forbidden`.
    pub async fn list_versions(
        &self,
        ctx: AccessContext<'_>,
        agent_id: AgentId,
        params: PageParams,
    ) -> Result<Vec<AgentVersion>> {
        let agent = self.load_agent(agent_id).await?;
        ctx.check_read(agent.owner_id)?;
        Ok(self
            .store
            .list_versions(agent_id, Page::clamped(params))
            .await?)
    }

    /// Publish a version: stamp `published_at` (at most once) and move the
    /// agent out of draft.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` when the version is already published or the
    /// version does not belong to the agent.
    pub async fn publish_version(
        &self,
        ctx: AccessContext<'_>,
        agent_id: AgentId,
        version_id: VersionId,
    ) -> Result<AgentVersion> {
        let mut agent = self.load_agent(agent_id).await?;
        ctx.check_write(agent.owner_id)?;

        if agent.status == AgentStatus::Archived {
            return Err(CatalogError::Archived(agent_id));
        }

        let version = self
            .store
            .get_version(version_id)
            .await?
            .ok_or(CatalogError::VersionNotFound(version_id))?;
        if version.agent_id != agent_id {
            return Err(CatalogError::Conflict(
                "version does not belong to this agent".into(),
            ));
        }

        let stamped = self.store.publish_version(version_id, Utc::now()).await?;
        if !stamped {
            return Err(CatalogError::Conflict("version already published".into()));
        }

        if agent.status == AgentStatus::Draft {
            agent.status = AgentStatus::Published;
            self.store.update_agent(&agent).await?;
        }

        let version = self
            .store
            .get_version(version_id)
            .await?
            .ok_or(CatalogError::VersionNotFound(version_id))?;

        tracing::info!(agent_id = %agent_id, version_id = %version_id, "Published version");
        Ok(version)
    }

    /// Update an agent's description and tags.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `Forbidden`.
    pub async fn update_agent(
        &self,
        ctx: AccessContext<'_>,
        agent_id: AgentId,
        description: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Result<Agent> {
        let mut agent = self.load_agent(agent_id).await?;
        ctx.check_write(agent.owner_id)?;

        if let Some(description) = description {
            agent.description = description;
        }
        if let Some(tags) = tags {
            agent.tags = tags;
        }
        agent.updated_at = Utc::now();
        self.store.update_agent(&agent).await?;
        Ok(agent)
    }

    /// Archive an agent. Terminal for new versions; running deployments
    /// are left alone and must be stopped explicitly.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `Forbidden`.
    pub async fn archive_agent(&self, ctx: AccessContext<'_>, agent_id: AgentId) -> Result<Agent> {
        let mut agent = self.load_agent(agent_id).await?;
        ctx.check_write(agent.owner_id)?;

        if agent.status != AgentStatus::Archived {
            agent.status = AgentStatus::Archived;
            agent.updated_at = Utc::now();
            self.store.update_agent(&agent).await?;
            tracing::info!(agent_id = %agent_id, "Archived agent");
        }
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::READ_ANY;
    use flowplane_auth::{Principal, PrincipalKind};
    use flowplane_core::UserId;
    use flowplane_store::MemoryStore;
    use serde_json::json;
    use uuid::Uuid;

    fn user_principal(id: Uuid) -> Principal {
        Principal {
            id,
            kind: PrincipalKind::User,
            roles: ["user".to_string()].into(),
            permissions: ["agent:create".to_string()].into(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        }
    }

    fn machine_principal(permissions: &[&str]) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            kind: PrincipalKind::Machine,
            roles: ["conversation_client".to_string()].into(),
            permissions: permissions.iter().map(ToString::to_string).collect(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        }
    }

    fn service() -> CatalogService {
        CatalogService::new(Arc::new(MemoryStore::new()), CatalogConfig::default())
    }

    fn input(name: &str) -> CreateAgentInput {
        CreateAgentInput {
            name: name.to_string(),
            description: String::new(),
            config: json!({"nodes": [], "edges": []}),
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn create_returns_agent_and_first_version() {
        let service = service();
        let principal = user_principal(Uuid::new_v4());
        let created = service
            .create_agent(AccessContext::direct(&principal), input("assistant"))
            .await
            .unwrap();

        assert_eq!(created.version.version_number, 1);
        assert_eq!(created.agent.status, AgentStatus::Draft);
        assert_eq!(created.agent.owner_id.as_uuid(), principal.id);
    }

    #[tokio::test]
    async fn empty_and_whitespace_names_are_rejected() {
        let service = service();
        let principal = user_principal(Uuid::new_v4());

        for name in ["", "   "] {
            let err = service
                .create_agent(AccessContext::direct(&principal), input(name))
                .await
                .unwrap_err();
            assert!(matches!(err, CatalogError::InvalidName));
        }
    }

    #[tokio::test]
    async fn oversized_config_is_rejected() {
        let service = CatalogService::new(
            Arc::new(MemoryStore::new()),
            CatalogConfig {
                max_config_bytes: 64,
            },
        );
        let principal = user_principal(Uuid::new_v4());

        let mut big = input("big");
        big.config = json!({"blob": "x".repeat(1000)});
        let err = service
            .create_agent(AccessContext::direct(&principal), big)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::PayloadTooLarge { limit: 64 }));
    }

    #[tokio::test]
    async fn duplicate_name_per_owner_conflicts() {
        let service = service();
        let principal = user_principal(Uuid::new_v4());
        let ctx = AccessContext::direct(&principal);

        service.create_agent(ctx, input("dup")).await.unwrap();
        let err = service.create_agent(ctx, input("dup")).await.unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));

        // A different owner can reuse the name.
        let other = user_principal(Uuid::new_v4());
        assert!(service
            .create_agent(AccessContext::direct(&other), input("dup"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn concurrent_updates_yield_gapless_versions() {
        let service = Arc::new(service());
        let principal = user_principal(Uuid::new_v4());
        let created = service
            .create_agent(AccessContext::direct(&principal), input("concurrent"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let service = Arc::clone(&service);
            let principal = principal.clone();
            let agent_id = created.agent.id;
            handles.push(tokio::spawn(async move {
                service
                    .update_agent_config(
                        AccessContext::direct(&principal),
                        agent_id,
                        json!({"rev": i}),
                        None,
                    )
                    .await
                    .unwrap()
                    .version_number
            }));
        }

        let mut numbers = Vec::new();
        for handle in handles {
            numbers.push(handle.await.unwrap());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (2..=11).collect::<Vec<_>>());

        let latest = service
            .latest_version(AccessContext::direct(&principal), created.agent.id)
            .await
            .unwrap();
        assert_eq!(latest.version_number, 11);
    }

    #[tokio::test]
    async fn archived_agent_rejects_new_versions() {
        let service = service();
        let principal = user_principal(Uuid::new_v4());
        let ctx = AccessContext::direct(&principal);
        let created = service.create_agent(ctx, input("archived")).await.unwrap();

        service.archive_agent(ctx, created.agent.id).await.unwrap();

        let err = service
            .update_agent_config(ctx, created.agent.id, json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Archived(_)));
    }

    #[tokio::test]
    async fn other_owner_is_forbidden_without_read_any() {
        let service = service();
        let owner = user_principal(Uuid::new_v4());
        let created = service
            .create_agent(AccessContext::direct(&owner), input("private"))
            .await
            .unwrap();

        let stranger = machine_principal(&[]);
        let err = service
            .get_agent(AccessContext::direct(&stranger), created.agent.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Forbidden));

        let reader = machine_principal(&[READ_ANY]);
        assert!(service
            .get_agent(AccessContext::direct(&reader), created.agent.id)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn on_behalf_of_pivots_to_named_user() {
        let service = service();
        let owner = user_principal(Uuid::new_v4());
        let created = service
            .create_agent(AccessContext::direct(&owner), input("delegated"))
            .await
            .unwrap();

        let machine = machine_principal(&[READ_ANY]);
        let ctx = AccessContext::on_behalf_of(&machine, Some(UserId::from_uuid(owner.id)));
        assert!(service.get_agent(ctx, created.agent.id).await.is_ok());

        // Delegating to a non-owner pivots the check away from the owner.
        let ctx = AccessContext::on_behalf_of(&machine, Some(UserId::generate()));
        assert!(matches!(
            service.get_agent(ctx, created.agent.id).await,
            Err(CatalogError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn publish_is_one_shot() {
        let service = service();
        let principal = user_principal(Uuid::new_v4());
        let ctx = AccessContext::direct(&principal);
        let created = service.create_agent(ctx, input("published")).await.unwrap();

        let version = service
            .publish_version(ctx, created.agent.id, created.version.id)
            .await
            .unwrap();
        assert!(version.published_at.is_some());

        let agent = service.get_agent(ctx, created.agent.id).await.unwrap();
        assert_eq!(agent.status, AgentStatus::Published);

        let err = service
            .publish_version(ctx, created.agent.id, created.version.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_scopes_to_owner_without_read_any() {
        let service = service();
        let alice = user_principal(Uuid::new_v4());
        let bob = user_principal(Uuid::new_v4());

        service
            .create_agent(AccessContext::direct(&alice), input("alice-agent"))
            .await
            .unwrap();
        service
            .create_agent(AccessContext::direct(&bob), input("bob-agent"))
            .await
            .unwrap();

        let mine = service
            .list_agents(
                AccessContext::direct(&alice),
                &AgentFilter::default(),
                PageParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "alice-agent");

        let all = service
            .list_agents(
                AccessContext::direct(&machine_principal(&[READ_ANY])),
                &AgentFilter::default(),
                PageParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }
}
