//! Build strategies.
//!
//! Both strategies take `(build_context, image_tag)`, return a job id to
//! poll, and leave the image at the deterministic registry path on
//! success. The job id is persisted as a resumption marker so a re-leased
//! deployment re-attaches to the in-flight build.

use async_trait::async_trait;
use serde::Deserialize;

use flowplane_core::DeploymentId;

use crate::context::BuildContext;
use crate::error::{EngineError, Result};

/// Where a remote build currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildState {
    /// Accepted but not started.
    Queued,
    /// In progress.
    Running,
    /// Finished; the image is at its registry path.
    Succeeded,
    /// Finished unsuccessfully (a hard failure).
    Failed(String),
}

/// A pluggable image build backend.
#[async_trait]
pub trait BuildStrategy: Send + Sync {
    /// Submit a build, returning an opaque job id to poll.
    ///
    /// # Errors
    ///
    /// Returns a transient or hard [`EngineError`] per the retry policy.
    async fn submit(
        &self,
        deployment_id: DeploymentId,
        image_tag: &str,
        context: &BuildContext,
    ) -> Result<String>;

    /// Poll a previously submitted build.
    ///
    /// # Errors
    ///
    /// Returns a transient or hard [`EngineError`] per the retry policy.
    async fn poll(&self, job_id: &str) -> Result<BuildState>;

    /// Best-effort cancellation of an in-flight build.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend rejects the cancellation.
    async fn cancel(&self, job_id: &str) -> Result<()>;
}

// =============================================================================
// CI-driven builds (workflow dispatch)
// =============================================================================

/// Configuration for [`CiDrivenBuild`].
#[derive(Debug, Clone)]
pub struct CiConfig {
    /// API base, e.g. `https://api.github.com`.
    pub api_base: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Workflow file name, e.g. `build-agent-image.yml`.
    pub workflow: String,
    /// Git ref to dispatch on.
    pub git_ref: String,
    /// API token.
    pub token: String,
}

/// Dispatch-input size cap imposed by the CI provider.
const DISPATCH_CONTEXT_CAP: usize = 64_000;

/// Builds images by dispatching a remote CI workflow and polling its run.
pub struct CiDrivenBuild {
    http: reqwest::Client,
    config: CiConfig,
}

#[derive(Deserialize)]
struct WorkflowRun {
    id: u64,
    #[serde(default)]
    path: Option<String>,
    status: String,
    #[serde(default)]
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct WorkflowRunList {
    workflow_runs: Vec<WorkflowRun>,
}

impl CiDrivenBuild {
    /// Create the strategy.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: CiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Invalid(format!("http client: {e}")))?;
        Ok(Self { http, config })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{path}",
            self.config.api_base, self.config.owner, self.config.repo
        )
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.config.token))
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "flowplane-deploy")
    }

    /// The dispatch API returns no run id; find the newest run of our
    /// workflow after dispatching.
    async fn discover_run_id(&self) -> Result<String> {
        let url = self.repo_url("actions/runs?per_page=5");
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(|e| EngineError::from_transport(&e, "ci run discovery"))?;

        let status = response.status().as_u16();
        if status >= 300 {
            return Err(EngineError::from_status(status, "ci run discovery"));
        }

        let runs: WorkflowRunList = response
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("ci run discovery: {e}")))?;

        runs.workflow_runs
            .into_iter()
            .find(|run| {
                run.path
                    .as_deref()
                    .is_some_and(|p| p.ends_with(&self.config.workflow))
            })
            .map(|run| run.id.to_string())
            .ok_or_else(|| EngineError::Transient("dispatched run not yet visible".into()))
    }
}

#[async_trait]
impl BuildStrategy for CiDrivenBuild {
    async fn submit(
        &self,
        deployment_id: DeploymentId,
        image_tag: &str,
        context: &BuildContext,
    ) -> Result<String> {
        let mut context_b64 = context.to_base64();
        context_b64.truncate(DISPATCH_CONTEXT_CAP);

        let url = self.repo_url(&format!(
            "actions/workflows/{}/dispatches",
            self.config.workflow
        ));
        let body = serde_json::json!({
            "ref": self.config.git_ref,
            "inputs": {
                "deployment_id": deployment_id.to_string(),
                "image_tag": image_tag,
                "build_context": context_b64,
            },
        });

        let response = self
            .authorized(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::from_transport(&e, "ci dispatch"))?;

        let status = response.status().as_u16();
        if status >= 300 {
            return Err(EngineError::from_status(status, "ci dispatch"));
        }

        tracing::info!(deployment_id = %deployment_id, image_tag, "Dispatched CI build");

        // Give the provider a moment to register the run before listing.
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        self.discover_run_id().await
    }

    async fn poll(&self, job_id: &str) -> Result<BuildState> {
        let url = self.repo_url(&format!("actions/runs/{job_id}"));
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(|e| EngineError::from_transport(&e, "ci poll"))?;

        let status = response.status().as_u16();
        if status >= 300 {
            return Err(EngineError::from_status(status, "ci poll"));
        }

        let run: WorkflowRun = response
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("ci poll: {e}")))?;

        Ok(match (run.status.as_str(), run.conclusion.as_deref()) {
            ("queued" | "waiting" | "requested" | "pending", _) => BuildState::Queued,
            ("in_progress", _) => BuildState::Running,
            ("completed", Some("success")) => BuildState::Succeeded,
            ("completed", conclusion) => {
                BuildState::Failed(conclusion.unwrap_or("unknown").to_string())
            }
            (other, _) => BuildState::Failed(format!("unexpected run status: {other}")),
        })
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        let url = self.repo_url(&format!("actions/runs/{job_id}/cancel"));
        let response = self
            .authorized(self.http.post(&url))
            .send()
            .await
            .map_err(|e| EngineError::from_transport(&e, "ci cancel"))?;

        let status = response.status().as_u16();
        // 409 means the run already finished; nothing left to cancel.
        if status >= 300 && status != 409 {
            return Err(EngineError::from_status(status, "ci cancel"));
        }
        Ok(())
    }
}

// =============================================================================
// Hosted builds (managed build service)
// =============================================================================

/// Configuration for [`HostedBuild`].
#[derive(Debug, Clone)]
pub struct HostedBuildConfig {
    /// Build service API base.
    pub api_base: String,
    /// API token.
    pub token: String,
}

/// Builds images by submitting a job to a managed build service with a
/// storage-backed build context.
pub struct HostedBuild {
    http: reqwest::Client,
    config: HostedBuildConfig,
}

#[derive(Deserialize)]
struct HostedJob {
    id: String,
    status: String,
    #[serde(default)]
    #[allow(dead_code)]
    logs_url: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

impl HostedBuild {
    /// Create the strategy.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: HostedBuildConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| EngineError::Invalid(format!("http client: {e}")))?;
        Ok(Self { http, config })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", format!("Bearer {}", self.config.token))
    }
}

#[async_trait]
impl BuildStrategy for HostedBuild {
    async fn submit(
        &self,
        deployment_id: DeploymentId,
        image_tag: &str,
        context: &BuildContext,
    ) -> Result<String> {
        let url = format!("{}/v1/builds", self.config.api_base);
        let body = serde_json::json!({
            "deployment_id": deployment_id.to_string(),
            "image_tag": image_tag,
            "build_context": context.to_base64(),
        });

        let response = self
            .authorized(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::from_transport(&e, "build submit"))?;

        let status = response.status().as_u16();
        if status >= 300 {
            return Err(EngineError::from_status(status, "build submit"));
        }

        let job: HostedJob = response
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("build submit: {e}")))?;

        tracing::info!(deployment_id = %deployment_id, job_id = %job.id, "Submitted hosted build");
        Ok(job.id)
    }

    async fn poll(&self, job_id: &str) -> Result<BuildState> {
        let url = format!("{}/v1/builds/{job_id}", self.config.api_base);
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(|e| EngineError::from_transport(&e, "build poll"))?;

        let status = response.status().as_u16();
        if status >= 300 {
            return Err(EngineError::from_status(status, "build poll"));
        }

        let job: HostedJob = response
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("build poll: {e}")))?;

        Ok(match job.status.as_str() {
            "queued" => BuildState::Queued,
            "working" => BuildState::Running,
            "success" => BuildState::Succeeded,
            other => BuildState::Failed(
                job.detail
                    .unwrap_or_else(|| format!("build finished with status {other}")),
            ),
        })
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        let url = format!("{}/v1/builds/{job_id}/cancel", self.config.api_base);
        let response = self
            .authorized(self.http.post(&url))
            .send()
            .await
            .map_err(|e| EngineError::from_transport(&e, "build cancel"))?;

        let status = response.status().as_u16();
        if status >= 300 && status != 409 {
            return Err(EngineError::from_status(status, "build cancel"));
        }
        Ok(())
    }
}

// =============================================================================
// Mock
// =============================================================================

/// An in-memory build strategy for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockBuildStrategy {
    /// Job ids handed out by `submit`, in order.
    pub submissions: parking_lot::Mutex<Vec<String>>,
    /// What `poll` reports for any job.
    pub outcome: parking_lot::Mutex<BuildState>,
    /// Job ids passed to `cancel`.
    pub cancelled: parking_lot::Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MockBuildStrategy {
    fn default() -> Self {
        Self {
            submissions: parking_lot::Mutex::new(Vec::new()),
            outcome: parking_lot::Mutex::new(BuildState::Succeeded),
            cancelled: parking_lot::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl MockBuildStrategy {
    /// A mock whose builds succeed immediately.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// A mock whose builds stay running forever.
    #[must_use]
    pub fn never_finishing() -> Self {
        let mock = Self::default();
        *mock.outcome.lock() = BuildState::Running;
        mock
    }

    /// A mock whose builds fail with the given message.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        let mock = Self::default();
        *mock.outcome.lock() = BuildState::Failed(message.to_string());
        mock
    }

    /// Number of builds submitted so far.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl BuildStrategy for MockBuildStrategy {
    async fn submit(
        &self,
        deployment_id: DeploymentId,
        _image_tag: &str,
        _context: &BuildContext,
    ) -> Result<String> {
        let mut submissions = self.submissions.lock();
        let job_id = format!("build-{}-{}", deployment_id, submissions.len());
        submissions.push(job_id.clone());
        Ok(job_id)
    }

    async fn poll(&self, _job_id: &str) -> Result<BuildState> {
        Ok(self.outcome.lock().clone())
    }

    async fn cancel(&self, job_id: &str) -> Result<()> {
        self.cancelled.lock().push(job_id.to_string());
        Ok(())
    }
}
