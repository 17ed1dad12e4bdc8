//! Deployment API surface: create, inspect, and stop deployments.
//!
//! `CreateDeployment` only validates and enqueues; pipeline errors are
//! never surfaced synchronously. Clients poll the status endpoint, whose
//! reads never cancel the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use flowplane_auth::Principal;
use flowplane_core::{AgentId, DeploymentId, Page, PageParams, UserId, VersionId};
use flowplane_store::{
    BuildStrategyKind, CatalogStore, DeployStrategyKind, Deployment, DeploymentFilter,
    DeploymentPatch, DeploymentStatus, DeploymentStore, DeploymentTransition,
};

use crate::build::BuildStrategy;
use crate::error::{EngineError, Result};
use crate::service_name;
use crate::state;
use crate::target::DeployTarget;

/// Permission required to create deployments.
pub const DEPLOY_PERMISSION: &str = "agent:deploy";

/// Permission allowing reads across owners.
pub const READ_ANY: &str = "deployment:read:any";

/// Permission allowing writes across owners.
pub const WRITE_ANY: &str = "agent:write:any";

/// The configured build strategies and deploy targets, keyed by the
/// selector stored on each deployment row.
#[derive(Default)]
pub struct Strategies {
    builds: HashMap<BuildStrategyKind, Arc<dyn BuildStrategy>>,
    targets: HashMap<DeployStrategyKind, Arc<dyn DeployTarget>>,
}

impl Strategies {
    /// Register a build strategy.
    #[must_use]
    pub fn with_build(mut self, kind: BuildStrategyKind, strategy: Arc<dyn BuildStrategy>) -> Self {
        self.builds.insert(kind, strategy);
        self
    }

    /// Register a deploy target.
    #[must_use]
    pub fn with_target(mut self, kind: DeployStrategyKind, target: Arc<dyn DeployTarget>) -> Self {
        self.targets.insert(kind, target);
        self
    }

    /// Resolve a build strategy.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invalid`] when the strategy is not configured.
    pub fn build(&self, kind: BuildStrategyKind) -> Result<Arc<dyn BuildStrategy>> {
        self.builds.get(&kind).cloned().ok_or_else(|| {
            EngineError::Invalid(format!("build strategy {} is not configured", kind.as_str()))
        })
    }

    /// Resolve a deploy target.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Invalid`] when the target is not configured.
    pub fn target(&self, kind: DeployStrategyKind) -> Result<Arc<dyn DeployTarget>> {
        self.targets.get(&kind).cloned().ok_or_else(|| {
            EngineError::Invalid(format!("deploy strategy {} is not configured", kind.as_str()))
        })
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Strategy used when a request does not select one.
    pub default_build_strategy: BuildStrategyKind,
    /// Target used when a request does not select one.
    pub default_deploy_strategy: DeployStrategyKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_build_strategy: BuildStrategyKind::HostedBuild,
            default_deploy_strategy: DeployStrategyKind::Serverless,
        }
    }
}

/// Input for [`DeploymentEngine::create_deployment`].
#[derive(Debug, Clone)]
pub struct CreateDeploymentInput {
    /// The agent to deploy.
    pub agent_id: AgentId,
    /// The version to deploy; must belong to the agent.
    pub agent_version_id: VersionId,
    /// Optional build strategy override.
    pub build_strategy: Option<BuildStrategyKind>,
    /// Optional deploy strategy override.
    pub deploy_strategy: Option<DeployStrategyKind>,
}

/// The deployment engine's API surface (workers live in
/// [`crate::worker`]).
pub struct DeploymentEngine {
    store: Arc<dyn DeploymentStore>,
    catalog: Arc<dyn CatalogStore>,
    strategies: Arc<Strategies>,
    config: EngineConfig,
}

impl DeploymentEngine {
    /// Create the engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        catalog: Arc<dyn CatalogStore>,
        strategies: Arc<Strategies>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            strategies,
            config,
        }
    }

    fn check_read(principal: &Principal, owner: UserId) -> Result<()> {
        if owner.as_uuid() == principal.id || principal.has_permission(READ_ANY) {
            Ok(())
        } else {
            Err(EngineError::Forbidden)
        }
    }

    fn check_write(principal: &Principal, owner: UserId) -> Result<()> {
        if owner.as_uuid() == principal.id || principal.has_permission(WRITE_ANY) {
            Ok(())
        } else {
            Err(EngineError::Forbidden)
        }
    }

    async fn load(&self, id: DeploymentId) -> Result<Deployment> {
        self.store
            .get_deployment(id)
            .await?
            .ok_or(EngineError::DeploymentNotFound(id))
    }

    /// Validate and enqueue a deployment; returns immediately with the
    /// `pending` row. Deliberately not idempotent: identical inputs create
    /// distinct deployments.
    ///
    /// # Errors
    ///
    /// Returns validation errors synchronously; pipeline failures are
    /// only ever visible on the deployment row.
    pub async fn create_deployment(
        &self,
        principal: &Principal,
        input: CreateDeploymentInput,
    ) -> Result<Deployment> {
        principal
            .require(DEPLOY_PERMISSION)
            .map_err(|_| EngineError::Forbidden)?;

        let agent = self
            .catalog
            .get_agent(input.agent_id)
            .await?
            .ok_or(EngineError::AgentNotFound(input.agent_id))?;
        Self::check_write(principal, agent.owner_id)?;

        let version = self
            .catalog
            .get_version(input.agent_version_id)
            .await?
            .ok_or(EngineError::VersionNotFound(input.agent_version_id))?;
        if version.agent_id != input.agent_id {
            return Err(EngineError::VersionMismatch {
                version_id: input.agent_version_id,
                agent_id: input.agent_id,
            });
        }

        let build_strategy = input
            .build_strategy
            .unwrap_or(self.config.default_build_strategy);
        let deploy_strategy = input
            .deploy_strategy
            .unwrap_or(self.config.default_deploy_strategy);

        // Fail fast when the selected strategy has no backend configured.
        self.strategies.build(build_strategy)?;
        self.strategies.target(deploy_strategy)?;

        let now = Utc::now();
        let deployment = Deployment {
            id: DeploymentId::generate(),
            owner_id: agent.owner_id,
            agent_id: agent.id,
            agent_version_id: version.id,
            status: DeploymentStatus::Pending,
            endpoint_url: None,
            metadata: json!({}),
            error_message: None,
            build_strategy,
            deploy_strategy,
            stop_requested: false,
            leased_by: None,
            lease_expires_at: None,
            deployed_at: None,
            stopped_at: None,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_deployment(&deployment).await?;
        tracing::info!(
            deployment_id = %deployment.id,
            agent_id = %agent.id,
            version = version.version_number,
            "Enqueued deployment"
        );
        Ok(deployment)
    }

    /// Get a deployment.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentNotFound` or `Forbidden`.
    pub async fn get_deployment(
        &self,
        principal: &Principal,
        id: DeploymentId,
    ) -> Result<Deployment> {
        let deployment = self.load(id).await?;
        Self::check_read(principal, deployment.owner_id)?;
        Ok(deployment)
    }

    /// The transition log of a deployment, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentNotFound` or `Forbidden`.
    pub async fn transitions(
        &self,
        principal: &Principal,
        id: DeploymentId,
    ) -> Result<Vec<DeploymentTransition>> {
        let deployment = self.load(id).await?;
        Self::check_read(principal, deployment.owner_id)?;
        Ok(self.store.transitions(id).await?)
    }

    /// List deployments visible to the principal, paged.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_deployments(
        &self,
        principal: &Principal,
        filter: &DeploymentFilter,
        params: PageParams,
    ) -> Result<Vec<Deployment>> {
        let owner = if principal.has_permission(READ_ANY) {
            None
        } else {
            Some(UserId::from_uuid(principal.id))
        };
        Ok(self
            .store
            .list_deployments(owner, filter, Page::clamped(params))
            .await?)
    }

    /// Stop a deployment. Valid in any non-terminal state:
    ///
    /// - `pending` (unleased): transitions directly to `stopped`, no
    ///   platform call;
    /// - `deploying`: sets the cancellation flag, which the worker
    ///   observes between stages and unwinds with teardown;
    /// - `running`: tears the platform service down, then `stopped`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for terminal deployments.
    pub async fn stop_deployment(
        &self,
        principal: &Principal,
        id: DeploymentId,
    ) -> Result<Deployment> {
        let deployment = self.load(id).await?;
        Self::check_write(principal, deployment.owner_id)?;

        match deployment.status {
            DeploymentStatus::Failed | DeploymentStatus::Stopped => {
                return Err(EngineError::InvalidState {
                    status: deployment.status,
                });
            }
            DeploymentStatus::Pending => {
                self.store.request_stop(id).await?;
                state::validate_transition(id, DeploymentStatus::Pending, DeploymentStatus::Stopped)?;
                let applied = self
                    .store
                    .transition(
                        id,
                        DeploymentStatus::Pending,
                        DeploymentStatus::Stopped,
                        Some("stopped before start"),
                        DeploymentPatch {
                            stopped_at: Some(Utc::now()),
                            ..DeploymentPatch::default()
                        },
                    )
                    .await?;
                if !applied {
                    // A worker won the race and has the row in
                    // `deploying`; the flag we set makes it unwind.
                    tracing::debug!(deployment_id = %id, "Stop raced with worker lease");
                }
            }
            DeploymentStatus::Deploying => {
                self.store.request_stop(id).await?;
            }
            DeploymentStatus::Running => {
                let name = deployment
                    .metadata
                    .get("platform_service_name")
                    .and_then(|v| v.as_str())
                    .map_or_else(|| service_name(id), ToString::to_string);
                self.strategies
                    .target(deployment.deploy_strategy)?
                    .teardown(&name)
                    .await?;

                state::validate_transition(id, DeploymentStatus::Running, DeploymentStatus::Stopped)?;
                self.store
                    .transition(
                        id,
                        DeploymentStatus::Running,
                        DeploymentStatus::Stopped,
                        Some("stopped"),
                        DeploymentPatch {
                            stopped_at: Some(Utc::now()),
                            ..DeploymentPatch::default()
                        },
                    )
                    .await?;
            }
        }

        tracing::info!(deployment_id = %id, "Stop requested");
        self.load(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::MockBuildStrategy;
    use crate::target::MockDeployTarget;
    use chrono::Utc;
    use flowplane_auth::PrincipalKind;
    use flowplane_store::{
        Agent, AgentStatus, AgentVersion, CatalogStore as _, DeploymentStore as _, MemoryStore,
    };
    use serde_json::json;
    use uuid::Uuid;

    fn principal(id: Uuid) -> Principal {
        Principal {
            id,
            kind: PrincipalKind::User,
            roles: ["user".to_string()].into(),
            permissions: ["agent:deploy".to_string()].into(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::minutes(15),
        }
    }

    async fn seed_agent(store: &MemoryStore, owner: Uuid) -> (Agent, AgentVersion) {
        let now = Utc::now();
        let agent = Agent {
            id: AgentId::generate(),
            owner_id: UserId::from_uuid(owner),
            name: "deployable".into(),
            description: String::new(),
            status: AgentStatus::Draft,
            tags: vec![],
            created_at: now,
            updated_at: now,
        };
        let version = AgentVersion {
            id: VersionId::generate(),
            agent_id: agent.id,
            owner_id: agent.owner_id,
            version_number: 1,
            config: json!({"nodes": []}),
            changelog: None,
            published_at: None,
            created_at: now,
        };
        store
            .create_agent_with_version(&agent, &version)
            .await
            .unwrap();
        (agent, version)
    }

    fn engine_with(store: Arc<MemoryStore>, target: Arc<MockDeployTarget>) -> DeploymentEngine {
        let strategies = Strategies::default()
            .with_build(
                BuildStrategyKind::HostedBuild,
                Arc::new(MockBuildStrategy::succeeding()),
            )
            .with_target(DeployStrategyKind::Serverless, target);
        DeploymentEngine::new(
            store.clone(),
            store,
            Arc::new(strategies),
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn create_validates_version_ownership() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let (agent, version) = seed_agent(&store, owner).await;
        let engine = engine_with(store.clone(), Arc::new(MockDeployTarget::ready()));

        let created = engine
            .create_deployment(
                &principal(owner),
                CreateDeploymentInput {
                    agent_id: agent.id,
                    agent_version_id: version.id,
                    build_strategy: None,
                    deploy_strategy: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(created.status, DeploymentStatus::Pending);

        // A stranger may not deploy someone else's agent.
        let err = engine
            .create_deployment(
                &principal(Uuid::new_v4()),
                CreateDeploymentInput {
                    agent_id: agent.id,
                    agent_version_id: version.id,
                    build_strategy: None,
                    deploy_strategy: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden));
    }

    #[tokio::test]
    async fn create_rejects_foreign_version() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let (agent, _) = seed_agent(&store, owner).await;

        // A version that belongs to some other agent.
        let other = AgentVersion {
            id: VersionId::generate(),
            agent_id: AgentId::generate(),
            owner_id: UserId::from_uuid(owner),
            version_number: 1,
            config: json!({}),
            changelog: None,
            published_at: None,
            created_at: Utc::now(),
        };

        let engine = engine_with(store.clone(), Arc::new(MockDeployTarget::ready()));
        let err = engine
            .create_deployment(
                &principal(owner),
                CreateDeploymentInput {
                    agent_id: agent.id,
                    agent_version_id: other.id,
                    build_strategy: None,
                    deploy_strategy: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::VersionNotFound(_)));
    }

    #[tokio::test]
    async fn identical_creates_yield_distinct_deployments() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let (agent, version) = seed_agent(&store, owner).await;
        let engine = engine_with(store.clone(), Arc::new(MockDeployTarget::ready()));

        let input = CreateDeploymentInput {
            agent_id: agent.id,
            agent_version_id: version.id,
            build_strategy: None,
            deploy_strategy: None,
        };
        let first = engine
            .create_deployment(&principal(owner), input.clone())
            .await
            .unwrap();
        let second = engine
            .create_deployment(&principal(owner), input)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn stop_while_pending_needs_no_platform_call() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let (agent, version) = seed_agent(&store, owner).await;
        let target = Arc::new(MockDeployTarget::ready());
        let engine = engine_with(store.clone(), target.clone());

        let created = engine
            .create_deployment(
                &principal(owner),
                CreateDeploymentInput {
                    agent_id: agent.id,
                    agent_version_id: version.id,
                    build_strategy: None,
                    deploy_strategy: None,
                },
            )
            .await
            .unwrap();

        let stopped = engine
            .stop_deployment(&principal(owner), created.id)
            .await
            .unwrap();
        assert_eq!(stopped.status, DeploymentStatus::Stopped);
        assert!(stopped.stopped_at.is_some());
        assert_eq!(target.teardown_count(), 0);
    }

    #[tokio::test]
    async fn stop_running_tears_down_platform_service() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let (agent, version) = seed_agent(&store, owner).await;
        let target = Arc::new(MockDeployTarget::ready());
        let engine = engine_with(store.clone(), target.clone());

        let created = engine
            .create_deployment(
                &principal(owner),
                CreateDeploymentInput {
                    agent_id: agent.id,
                    agent_version_id: version.id,
                    build_strategy: None,
                    deploy_strategy: None,
                },
            )
            .await
            .unwrap();

        // Drive the row to running as a worker would.
        store
            .transition(
                created.id,
                DeploymentStatus::Pending,
                DeploymentStatus::Deploying,
                None,
                DeploymentPatch::default(),
            )
            .await
            .unwrap();
        store
            .transition(
                created.id,
                DeploymentStatus::Deploying,
                DeploymentStatus::Running,
                None,
                DeploymentPatch {
                    endpoint_url: Some("https://svc.run.example.com".into()),
                    deployed_at: Some(Utc::now()),
                    metadata: Some(json!({"platform_service_name": service_name(created.id)})),
                    ..DeploymentPatch::default()
                },
            )
            .await
            .unwrap();

        let stopped = engine
            .stop_deployment(&principal(owner), created.id)
            .await
            .unwrap();
        assert_eq!(stopped.status, DeploymentStatus::Stopped);
        assert_eq!(target.teardown_count(), 1);

        // Terminal: a second stop is rejected.
        let err = engine
            .stop_deployment(&principal(owner), created.id)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { .. }));
    }
}
