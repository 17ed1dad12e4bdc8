//! The deployment worker pool.
//!
//! Workers lease pending (or lease-expired deploying) rows, execute the
//! pipeline, and record every status change durably. Leases are renewed in
//! the background during long polls; a worker that crashes simply stops
//! renewing and another worker picks the deployment up after expiry,
//! re-attaching to external resources through the metadata markers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use flowplane_core::DeploymentId;
use flowplane_store::{
    CatalogStore, DeployStrategyKind, Deployment, DeploymentPatch, DeploymentStatus,
    DeploymentStore,
};

use crate::build::{BuildState, BuildStrategy};
use crate::context::BuildContext;
use crate::engine::Strategies;
use crate::error::{EngineError, Result};
use crate::registry::{ImageRegistry, AMD64};
use crate::resources::DeploymentResources;
use crate::state;
use crate::target::{DeployTarget, ServiceState};
use crate::{image_tag, service_name};

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Lease duration; renewed at half-life while processing.
    pub lease: Duration,
    /// Sleep between queue polls when idle.
    pub idle_poll: Duration,
    /// Initial interval when polling builds and services.
    pub poll_initial: Duration,
    /// Cap on the poll interval.
    pub poll_max: Duration,
    /// Initial backoff for transient-failure retries.
    pub retry_initial: Duration,
    /// Per-stage deadline.
    pub stage_timeout: Duration,
    /// Wall-clock budget from creation to a terminal state.
    pub pipeline_timeout: Duration,
    /// Maximum attempts per external call within a stage.
    pub max_attempts: u32,
    /// Registry host images are pushed to.
    pub registry_host: String,
    /// Base image for rendered build contexts.
    pub runtime_image: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(300),
            idle_poll: Duration::from_secs(2),
            poll_initial: Duration::from_secs(5),
            poll_max: Duration::from_secs(30),
            retry_initial: Duration::from_secs(1),
            stage_timeout: Duration::from_secs(300),
            pipeline_timeout: Duration::from_secs(900),
            max_attempts: 5,
            registry_host: "registry.flowplane.dev".to_string(),
            runtime_image: "flowplane/agent-runtime:latest".to_string(),
        }
    }
}

/// One deployment worker. Run several in parallel; the lease table is
/// the only coordination between them.
pub struct DeploymentWorker {
    id: String,
    store: Arc<dyn DeploymentStore>,
    catalog: Arc<dyn CatalogStore>,
    registry: Arc<dyn ImageRegistry>,
    strategies: Arc<Strategies>,
    config: WorkerConfig,
}

impl DeploymentWorker {
    /// Create a worker with the given identity (used in lease columns).
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn DeploymentStore>,
        catalog: Arc<dyn CatalogStore>,
        registry: Arc<dyn ImageRegistry>,
        strategies: Arc<Strategies>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            catalog,
            registry,
            strategies,
            config,
        }
    }

    /// Run until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = %self.id, "Deployment worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.idle_poll) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(worker = %self.id, error = %e, "Worker queue poll failed");
                    tokio::time::sleep(self.config.idle_poll).await;
                }
            }
        }
        tracing::info!(worker = %self.id, "Deployment worker stopped");
    }

    /// Lease and process at most one deployment. Returns whether any work
    /// was found.
    ///
    /// # Errors
    ///
    /// Returns an error only when the queue itself cannot be polled;
    /// per-deployment failures are recorded on the deployment row.
    pub async fn tick(&self) -> Result<bool> {
        let Some(deployment) = self.store.lease_next(&self.id, self.config.lease).await? else {
            return Ok(false);
        };
        self.process(deployment).await;
        Ok(true)
    }

    async fn process(&self, deployment: Deployment) {
        let id = deployment.id;
        tracing::info!(
            worker = %self.id,
            deployment_id = %id,
            status = ?deployment.status,
            "Leased deployment"
        );

        let renewal = self.spawn_lease_renewal(id);
        let result = self.execute(&deployment).await;
        renewal.abort();

        match result {
            Ok(()) => {}
            Err(EngineError::Cancelled) => {
                if let Err(e) = self.finish_stopped(id).await {
                    tracing::error!(deployment_id = %id, error = %e, "Stop unwind failed");
                }
            }
            Err(EngineError::Timeout(detail)) => {
                if let Err(e) = self.finish_failed(id, &detail, "timeout", true).await {
                    tracing::error!(deployment_id = %id, error = %e, "Timeout unwind failed");
                }
            }
            Err(e) => {
                if let Err(e) = self.finish_failed(id, &e.to_string(), "failed", false).await {
                    tracing::error!(deployment_id = %id, error = %e, "Failure unwind failed");
                }
            }
        }

        if let Err(e) = self.store.release_lease(id, &self.id).await {
            tracing::warn!(deployment_id = %id, error = %e, "Lease release failed");
        }
    }

    // =========================================================================
    // Pipeline
    // =========================================================================

    async fn execute(&self, deployment: &Deployment) -> Result<()> {
        let id = deployment.id;
        let pipeline_deadline = deployment.created_at
            + chrono::Duration::from_std(self.config.pipeline_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(15));

        let build = self.strategies.build(deployment.build_strategy)?;
        let target = self.strategies.target(deployment.deploy_strategy)?;

        if deployment.status == DeploymentStatus::Pending {
            self.check_cancel(id).await?;
            state::validate_transition(id, DeploymentStatus::Pending, DeploymentStatus::Deploying)?;
            let applied = self
                .store
                .transition(
                    id,
                    DeploymentStatus::Pending,
                    DeploymentStatus::Deploying,
                    Some("pipeline started"),
                    DeploymentPatch::default(),
                )
                .await?;
            if !applied {
                // The row left `pending` under us (stopped); nothing to do.
                return Ok(());
            }
        }

        check_deadline(pipeline_deadline)?;

        // Stage 1: materialize the build context from the version's flow.
        let version = self
            .catalog
            .get_version(deployment.agent_version_id)
            .await?
            .ok_or(EngineError::VersionNotFound(deployment.agent_version_id))?;
        let resources = DeploymentResources::from_version_config(&version.config);
        let context = BuildContext::materialize(&version.config, &self.config.runtime_image)?;

        let tag = image_tag(&self.config.registry_host, id);

        // Stage 2: build. Re-attach to an in-flight build when resuming.
        self.check_cancel(id).await?;
        let markers = self.markers(id).await?;
        let job_id = if let Some(job_id) = markers.build_job_id {
            tracing::info!(deployment_id = %id, job_id = %job_id, "Re-attaching to build");
            job_id
        } else {
            let job_id = self
                .with_retries(id, pipeline_deadline, "build submit", || {
                    build.submit(id, &tag, &context)
                })
                .await?;
            self.store
                .merge_metadata(id, &json!({ "build_job_id": job_id, "image_tag": tag }))
                .await?;
            job_id
        };
        self.wait_for_build(id, build.as_ref(), &job_id, pipeline_deadline)
            .await?;

        // Stage 3: verify the image exists and fits the target platform.
        self.check_cancel(id).await?;
        let manifest = self
            .with_retries(id, pipeline_deadline, "registry check", || {
                self.registry.manifest(&tag)
            })
            .await?
            .ok_or_else(|| EngineError::ImageMissing(tag.clone()))?;
        if deployment.deploy_strategy == DeployStrategyKind::Serverless && !manifest.supports(AMD64)
        {
            return Err(EngineError::ImageIncompatible(format!(
                "{tag} lacks {AMD64}, required by the serverless target"
            )));
        }

        // Stage 4: deploy. Creation is idempotent on the service name.
        self.check_cancel(id).await?;
        let name = service_name(id);
        self.with_retries(id, pipeline_deadline, "service create", || {
            target.create_service(&name, &tag, &resources)
        })
        .await?;
        self.store
            .merge_metadata(id, &json!({ "platform_service_name": name }))
            .await?;

        let endpoint_url = self
            .wait_for_service(id, target.as_ref(), &name, pipeline_deadline)
            .await?;

        // Stage 5: stamp the endpoint and go running.
        state::validate_transition(id, DeploymentStatus::Deploying, DeploymentStatus::Running)?;
        let applied = self
            .store
            .transition(
                id,
                DeploymentStatus::Deploying,
                DeploymentStatus::Running,
                Some("service ready"),
                DeploymentPatch {
                    endpoint_url: Some(endpoint_url.clone()),
                    deployed_at: Some(Utc::now()),
                    ..DeploymentPatch::default()
                },
            )
            .await?;
        if !applied {
            // Stopped while we were waiting on readiness; unwind.
            return Err(EngineError::Cancelled);
        }

        tracing::info!(
            deployment_id = %id,
            endpoint_url = %endpoint_url,
            "Deployment running"
        );
        Ok(())
    }

    async fn wait_for_build(
        &self,
        id: DeploymentId,
        build: &dyn BuildStrategy,
        job_id: &str,
        deadline: DateTime<Utc>,
    ) -> Result<()> {
        let mut delay = self.config.poll_initial;
        let mut transient_failures = 0u32;

        loop {
            self.check_cancel(id).await?;
            check_deadline(deadline)?;

            match build.poll(job_id).await {
                Ok(BuildState::Succeeded) => return Ok(()),
                Ok(BuildState::Failed(message)) => return Err(EngineError::BuildFailed(message)),
                Ok(BuildState::Queued | BuildState::Running) => {
                    transient_failures = 0;
                }
                Err(e) if e.is_transient() && transient_failures < self.config.max_attempts => {
                    transient_failures += 1;
                    tracing::warn!(
                        deployment_id = %id,
                        job_id,
                        attempt = transient_failures,
                        error = %e,
                        "Build poll failed, will retry"
                    );
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.config.poll_max);
        }
    }

    async fn wait_for_service(
        &self,
        id: DeploymentId,
        target: &dyn DeployTarget,
        name: &str,
        deadline: DateTime<Utc>,
    ) -> Result<String> {
        let mut delay = self.config.poll_initial;
        let mut transient_failures = 0u32;

        loop {
            self.check_cancel(id).await?;
            check_deadline(deadline)?;

            match target.service_state(name).await {
                Ok(ServiceState::Ready { endpoint_url }) => return Ok(endpoint_url),
                Ok(ServiceState::Failed(message)) => {
                    return Err(EngineError::External(format!(
                        "platform reported failure: {message}"
                    )));
                }
                Ok(ServiceState::Missing) => {
                    // We just created it; a missing answer right after is
                    // eventual consistency, not absence.
                    transient_failures += 1;
                    if transient_failures > self.config.max_attempts {
                        return Err(EngineError::External(format!(
                            "service {name} disappeared after creation"
                        )));
                    }
                }
                Ok(ServiceState::Provisioning) => {
                    transient_failures = 0;
                }
                Err(e) if e.is_transient() && transient_failures < self.config.max_attempts => {
                    transient_failures += 1;
                    tracing::warn!(
                        deployment_id = %id,
                        service = name,
                        attempt = transient_failures,
                        error = %e,
                        "Readiness poll failed, will retry"
                    );
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.config.poll_max);
        }
    }

    /// Retry transient failures with exponential backoff, up to
    /// `max_attempts` or the deadline, whichever is first. Hard failures
    /// abort immediately.
    async fn with_retries<T, F, Fut>(
        &self,
        id: DeploymentId,
        deadline: DateTime<Utc>,
        what: &str,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let stage_deadline = stage_deadline(deadline, self.config.stage_timeout);
        let mut delay = self.config.retry_initial;

        for attempt in 1..=self.config.max_attempts {
            check_deadline(stage_deadline)?;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    tracing::warn!(
                        deployment_id = %id,
                        stage = what,
                        attempt,
                        error = %e,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }

        Err(EngineError::Transient(format!("{what}: retries exhausted")))
    }

    async fn check_cancel(&self, id: DeploymentId) -> Result<()> {
        if self.store.stop_requested(id).await? {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn markers(&self, id: DeploymentId) -> Result<Markers> {
        let deployment = self
            .store
            .get_deployment(id)
            .await?
            .ok_or(EngineError::DeploymentNotFound(id))?;
        Ok(Markers::from(&deployment))
    }

    fn spawn_lease_renewal(&self, id: DeploymentId) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let worker = self.id.clone();
        let lease = self.config.lease;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(lease / 2);
            interval.tick().await; // immediate first tick
            loop {
                interval.tick().await;
                match store.renew_lease(id, &worker, lease).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(deployment_id = %id, worker = %worker, "Lost lease");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(deployment_id = %id, error = %e, "Lease renewal failed");
                    }
                }
            }
        })
    }

    // =========================================================================
    // Unwinding
    // =========================================================================

    /// Stop observed mid-pipeline: cancel the in-flight build, tear down
    /// whatever was created, and record `stopped`.
    async fn finish_stopped(&self, id: DeploymentId) -> Result<()> {
        let deployment = self
            .store
            .get_deployment(id)
            .await?
            .ok_or(EngineError::DeploymentNotFound(id))?;
        let markers = Markers::from(&deployment);

        if let Some(job_id) = &markers.build_job_id {
            if let Ok(build) = self.strategies.build(deployment.build_strategy) {
                if let Err(e) = build.cancel(job_id).await {
                    tracing::warn!(deployment_id = %id, error = %e, "Build cancel failed");
                }
            }
        }
        if let Some(name) = &markers.platform_service_name {
            if let Ok(target) = self.strategies.target(deployment.deploy_strategy) {
                if let Err(e) = target.teardown(name).await {
                    tracing::warn!(deployment_id = %id, error = %e, "Teardown failed");
                }
            }
        }

        if !deployment.status.is_terminal() {
            self.store
                .transition(
                    id,
                    deployment.status,
                    DeploymentStatus::Stopped,
                    Some("stop requested"),
                    DeploymentPatch {
                        stopped_at: Some(Utc::now()),
                        ..DeploymentPatch::default()
                    },
                )
                .await?;
        }

        tracing::info!(deployment_id = %id, "Deployment stopped mid-pipeline");
        Ok(())
    }

    async fn finish_failed(
        &self,
        id: DeploymentId,
        message: &str,
        detail: &str,
        teardown: bool,
    ) -> Result<()> {
        let deployment = self
            .store
            .get_deployment(id)
            .await?
            .ok_or(EngineError::DeploymentNotFound(id))?;

        if teardown {
            let markers = Markers::from(&deployment);
            if let Some(name) = &markers.platform_service_name {
                if let Ok(target) = self.strategies.target(deployment.deploy_strategy) {
                    if let Err(e) = target.teardown(name).await {
                        tracing::warn!(deployment_id = %id, error = %e, "Best-effort teardown failed");
                    }
                }
            }
        }

        if !deployment.status.is_terminal() {
            self.store
                .transition(
                    id,
                    deployment.status,
                    DeploymentStatus::Failed,
                    Some(detail),
                    DeploymentPatch {
                        error_message: Some(message.to_string()),
                        ..DeploymentPatch::default()
                    },
                )
                .await?;
        }

        tracing::warn!(deployment_id = %id, error = message, "Deployment failed");
        Ok(())
    }
}

/// Resumption markers kept in `Deployment.metadata`.
struct Markers {
    build_job_id: Option<String>,
    platform_service_name: Option<String>,
}

impl From<&Deployment> for Markers {
    fn from(deployment: &Deployment) -> Self {
        let get = |key: &str| {
            deployment
                .metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(ToString::to_string)
        };
        Self {
            build_job_id: get("build_job_id"),
            platform_service_name: get("platform_service_name"),
        }
    }
}

fn stage_deadline(pipeline_deadline: DateTime<Utc>, stage: Duration) -> DateTime<Utc> {
    let stage_end =
        Utc::now() + chrono::Duration::from_std(stage).unwrap_or_else(|_| chrono::Duration::minutes(5));
    stage_end.min(pipeline_deadline)
}

fn check_deadline(deadline: DateTime<Utc>) -> Result<()> {
    if Utc::now() > deadline {
        Err(EngineError::Timeout("pipeline deadline elapsed".into()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::MockBuildStrategy;
    use crate::registry::MockImageRegistry;
    use crate::target::MockDeployTarget;
    use flowplane_core::{AgentId, UserId, VersionId};
    use flowplane_store::{
        Agent, AgentStatus, AgentVersion, BuildStrategyKind, MemoryStore,
    };
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        build: Arc<MockBuildStrategy>,
        target: Arc<MockDeployTarget>,
        worker: DeploymentWorker,
        deployment: Deployment,
    }

    async fn fixture(
        build: MockBuildStrategy,
        registry: MockImageRegistry,
        target: MockDeployTarget,
    ) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let owner = UserId::generate();

        let agent = Agent {
            id: AgentId::generate(),
            owner_id: owner,
            name: "worker-test".into(),
            description: String::new(),
            status: AgentStatus::Draft,
            tags: vec![],
            created_at: now,
            updated_at: now,
        };
        let version = AgentVersion {
            id: VersionId::generate(),
            agent_id: agent.id,
            owner_id: owner,
            version_number: 1,
            config: json!({"nodes": [], "edges": []}),
            changelog: None,
            published_at: None,
            created_at: now,
        };
        store
            .create_agent_with_version(&agent, &version)
            .await
            .unwrap();

        let deployment = Deployment {
            id: flowplane_core::DeploymentId::generate(),
            owner_id: owner,
            agent_id: agent.id,
            agent_version_id: version.id,
            status: DeploymentStatus::Pending,
            endpoint_url: None,
            metadata: json!({}),
            error_message: None,
            build_strategy: BuildStrategyKind::HostedBuild,
            deploy_strategy: DeployStrategyKind::Serverless,
            stop_requested: false,
            leased_by: None,
            lease_expires_at: None,
            deployed_at: None,
            stopped_at: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_deployment(&deployment).await.unwrap();

        let build = Arc::new(build);
        let target = Arc::new(target);
        let build_dyn: Arc<dyn BuildStrategy> = build.clone();
        let target_dyn: Arc<dyn DeployTarget> = target.clone();
        let strategies = Arc::new(
            Strategies::default()
                .with_build(BuildStrategyKind::HostedBuild, build_dyn)
                .with_target(DeployStrategyKind::Serverless, target_dyn),
        );

        let worker = DeploymentWorker::new(
            "worker-1",
            store.clone(),
            store.clone(),
            Arc::new(registry),
            strategies,
            WorkerConfig {
                poll_initial: Duration::from_millis(5),
                poll_max: Duration::from_millis(20),
                retry_initial: Duration::from_millis(1),
                ..WorkerConfig::default()
            },
        );

        Fixture {
            store,
            build,
            target,
            worker,
            deployment,
        }
    }

    fn observed_statuses(log: &[flowplane_store::DeploymentTransition]) -> Vec<DeploymentStatus> {
        log.iter().map(|t| t.to_status).collect()
    }

    #[tokio::test]
    async fn pipeline_reaches_running_with_endpoint() {
        let f = fixture(
            MockBuildStrategy::succeeding(),
            MockImageRegistry::amd64(),
            MockDeployTarget::ready(),
        )
        .await;

        assert!(f.worker.tick().await.unwrap());

        let deployment = f.store.get_deployment(f.deployment.id).await.unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Running);
        let endpoint = deployment.endpoint_url.unwrap();
        assert!(endpoint.starts_with("https://"));
        assert!(deployment.deployed_at.is_some());

        // Resumption markers are persisted.
        assert!(deployment.metadata["build_job_id"].is_string());
        assert_eq!(
            deployment.metadata["platform_service_name"],
            service_name(f.deployment.id)
        );

        // Observed statuses form a path through the state graph.
        let log = f.store.transitions(f.deployment.id).await.unwrap();
        assert_eq!(
            observed_statuses(&log),
            vec![DeploymentStatus::Deploying, DeploymentStatus::Running]
        );
    }

    #[tokio::test]
    async fn resumed_deployment_reattaches_to_existing_build() {
        let f = fixture(
            MockBuildStrategy::succeeding(),
            MockImageRegistry::amd64(),
            MockDeployTarget::ready(),
        )
        .await;

        // Simulate a crashed worker: the row is already deploying with a
        // submitted build and an expired lease.
        f.store
            .transition(
                f.deployment.id,
                DeploymentStatus::Pending,
                DeploymentStatus::Deploying,
                Some("pipeline started"),
                DeploymentPatch {
                    metadata: Some(json!({
                        "build_job_id": "build-from-dead-worker",
                        "image_tag": "registry.flowplane.dev/x:latest",
                    })),
                    ..DeploymentPatch::default()
                },
            )
            .await
            .unwrap();

        assert!(f.worker.tick().await.unwrap());

        let deployment = f.store.get_deployment(f.deployment.id).await.unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Running);
        // No second build job was created.
        assert_eq!(f.build.submission_count(), 0);
    }

    #[tokio::test]
    async fn stop_mid_build_unwinds_to_stopped() {
        let f = fixture(
            MockBuildStrategy::never_finishing(),
            MockImageRegistry::amd64(),
            MockDeployTarget::ready(),
        )
        .await;

        f.store.request_stop(f.deployment.id).await.unwrap();

        assert!(f.worker.tick().await.unwrap());

        let deployment = f.store.get_deployment(f.deployment.id).await.unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Stopped);
        assert!(deployment.stopped_at.is_some());
        // No running observation is allowed on the way.
        let log = f.store.transitions(f.deployment.id).await.unwrap();
        assert!(!observed_statuses(&log).contains(&DeploymentStatus::Running));
    }

    #[tokio::test]
    async fn stop_during_build_poll_cancels_the_build() {
        let f = fixture(
            MockBuildStrategy::never_finishing(),
            MockImageRegistry::amd64(),
            MockDeployTarget::ready(),
        )
        .await;

        // Let the worker submit the build first, then request stop while
        // it is polling.
        let store = f.store.clone();
        let id = f.deployment.id;
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            store.request_stop(id).await.unwrap();
        });

        assert!(f.worker.tick().await.unwrap());
        stopper.await.unwrap();

        let deployment = f.store.get_deployment(id).await.unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Stopped);
        // The in-flight build was cancelled best-effort.
        assert_eq!(f.build.cancelled.lock().len(), 1);
    }

    #[tokio::test]
    async fn pipeline_timeout_fails_with_detail() {
        let mut f = fixture(
            MockBuildStrategy::succeeding(),
            MockImageRegistry::amd64(),
            MockDeployTarget::ready(),
        )
        .await;

        // Age the deployment past the 15-minute budget.
        f.deployment.created_at = Utc::now() - chrono::Duration::minutes(16);
        f.store.insert_deployment(&f.deployment).await.unwrap();

        assert!(f.worker.tick().await.unwrap());

        let deployment = f.store.get_deployment(f.deployment.id).await.unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert!(deployment.error_message.is_some());

        let log = f.store.transitions(f.deployment.id).await.unwrap();
        assert_eq!(log.last().unwrap().detail.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn build_failure_is_terminal() {
        let f = fixture(
            MockBuildStrategy::failing("flow does not compile"),
            MockImageRegistry::amd64(),
            MockDeployTarget::ready(),
        )
        .await;

        assert!(f.worker.tick().await.unwrap());

        let deployment = f.store.get_deployment(f.deployment.id).await.unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert!(deployment
            .error_message
            .unwrap()
            .contains("flow does not compile"));
    }

    #[tokio::test]
    async fn missing_image_fails_without_deploying() {
        let f = fixture(
            MockBuildStrategy::succeeding(),
            MockImageRegistry::empty(),
            MockDeployTarget::ready(),
        )
        .await;

        assert!(f.worker.tick().await.unwrap());

        let deployment = f.store.get_deployment(f.deployment.id).await.unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert!(!f.target.has_service(&service_name(f.deployment.id)));
    }

    #[tokio::test]
    async fn arch_mismatch_fails_serverless_deploys() {
        let f = fixture(
            MockBuildStrategy::succeeding(),
            MockImageRegistry::with_platforms(&["linux/arm64"]),
            MockDeployTarget::ready(),
        )
        .await;

        assert!(f.worker.tick().await.unwrap());

        let deployment = f.store.get_deployment(f.deployment.id).await.unwrap().unwrap();
        assert_eq!(deployment.status, DeploymentStatus::Failed);
        assert!(deployment.error_message.unwrap().contains("linux/amd64"));
        assert!(!f.target.has_service(&service_name(f.deployment.id)));
    }

    #[tokio::test]
    async fn idle_tick_reports_no_work() {
        let f = fixture(
            MockBuildStrategy::succeeding(),
            MockImageRegistry::amd64(),
            MockDeployTarget::ready(),
        )
        .await;

        assert!(f.worker.tick().await.unwrap());
        // The only deployment is now terminal; nothing left to lease.
        assert!(!f.worker.tick().await.unwrap());
    }
}
