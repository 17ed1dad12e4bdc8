//! Deploy targets.
//!
//! Both targets accept `(service_name, image, resource bounds)` and expose
//! readiness plus a service URL. Create calls use the deployment-derived
//! service name as their idempotency key: an "already exists" answer is
//! success, and the worker re-attaches to the existing service.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment as K8sDeployment;
use k8s_openapi::api::core::v1::Service as K8sService;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::resources::DeploymentResources;

/// Readiness of a platform-side service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    /// No service of that name exists.
    Missing,
    /// Created but not yet serving.
    Provisioning,
    /// Serving at the given URL.
    Ready {
        /// The service URL.
        endpoint_url: String,
    },
    /// The platform reports a permanent failure.
    Failed(String),
}

/// A pluggable deploy target.
#[async_trait]
pub trait DeployTarget: Send + Sync {
    /// Create the service. Idempotent: an existing service of the same
    /// name is success.
    ///
    /// # Errors
    ///
    /// Returns a transient or hard [`EngineError`] per the retry policy.
    async fn create_service(
        &self,
        name: &str,
        image: &str,
        resources: &DeploymentResources,
    ) -> Result<()>;

    /// Report the service's readiness.
    ///
    /// # Errors
    ///
    /// Returns a transient or hard [`EngineError`] per the retry policy.
    async fn service_state(&self, name: &str) -> Result<ServiceState>;

    /// Delete the service. A missing service is success.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform rejects the deletion.
    async fn teardown(&self, name: &str) -> Result<()>;
}

// =============================================================================
// Serverless target
// =============================================================================

/// Configuration for [`ServerlessTarget`].
#[derive(Debug, Clone)]
pub struct ServerlessConfig {
    /// Platform API base URL.
    pub api_base: String,
    /// API token.
    pub token: String,
}

/// Managed serverless runtime, driven over its HTTP API.
pub struct ServerlessTarget {
    http: reqwest::Client,
    config: ServerlessConfig,
}

#[derive(Deserialize)]
struct ServerlessService {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ServerlessTarget {
    /// Create the target.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: ServerlessConfig) -> Result<Self> {
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
impl DeployTarget for ServerlessTarget {
    async fn create_service(
        &self,
        name: &str,
        image: &str,
        resources: &DeploymentResources,
    ) -> Result<()> {
        let url = format!("{}/v1/services", self.config.api_base);
        let body = serde_json::json!({
            "name": name,
            "image": image,
            "port": 8080,
            "concurrency": resources.concurrency,
            "min_instances": resources.min_replicas,
            "max_instances": resources.max_replicas,
            "cpu_millicores": resources.cpu_millicores,
            "memory_mb": resources.memory_mb,
        });

        let response = self
            .authorized(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::from_transport(&e, "serverless create"))?;

        let status = response.status().as_u16();
        // 409: the service already exists; re-attach.
        if status == 409 {
            tracing::info!(service = name, "Serverless service already exists, re-attaching");
            return Ok(());
        }
        if status >= 300 {
            return Err(EngineError::from_status(status, "serverless create"));
        }

        tracing::info!(service = name, image, "Created serverless service");
        Ok(())
    }

    async fn service_state(&self, name: &str) -> Result<ServiceState> {
        let url = format!("{}/v1/services/{name}", self.config.api_base);
        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(|e| EngineError::from_transport(&e, "serverless status"))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Ok(ServiceState::Missing);
        }
        if status >= 300 {
            return Err(EngineError::from_status(status, "serverless status"));
        }

        let service: ServerlessService = response
            .json()
            .await
            .map_err(|e| EngineError::Transient(format!("serverless status: {e}")))?;

        if let Some(error) = service.error {
            return Ok(ServiceState::Failed(error));
        }
        match (service.ready, service.url) {
            (true, Some(endpoint_url)) => Ok(ServiceState::Ready { endpoint_url }),
            _ => Ok(ServiceState::Provisioning),
        }
    }

    async fn teardown(&self, name: &str) -> Result<()> {
        let url = format!("{}/v1/services/{name}", self.config.api_base);
        let response = self
            .authorized(self.http.delete(&url))
            .send()
            .await
            .map_err(|e| EngineError::from_transport(&e, "serverless delete"))?;

        let status = response.status().as_u16();
        if status == 404 {
            return Ok(());
        }
        if status >= 300 {
            return Err(EngineError::from_status(status, "serverless delete"));
        }

        tracing::info!(service = name, "Deleted serverless service");
        Ok(())
    }
}

// =============================================================================
// Cluster target
// =============================================================================

/// Configuration for [`ClusterTarget`].
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Namespace that holds agent runtimes.
    pub namespace: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: "agent-runtimes".to_string(),
        }
    }
}

/// Kubernetes target: one Deployment + ClusterIP Service per agent
/// runtime, addressed via in-cluster DNS.
pub struct ClusterTarget {
    client: Client,
    config: ClusterConfig,
}

impl ClusterTarget {
    /// Connect using in-cluster config or the local kubeconfig.
    ///
    /// # Errors
    ///
    /// Returns an error if no Kubernetes client can be constructed.
    pub async fn new(config: ClusterConfig) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| EngineError::Invalid(format!("kubernetes client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Use a pre-configured client (tests, custom auth).
    #[must_use]
    pub const fn with_client(client: Client, config: ClusterConfig) -> Self {
        Self { client, config }
    }

    fn deployments(&self) -> Api<K8sDeployment> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn services(&self) -> Api<K8sService> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn endpoint(&self, name: &str) -> String {
        format!("http://{name}.{}.svc.cluster.local", self.config.namespace)
    }

    fn from_kube(err: &kube::Error, context: &str) -> EngineError {
        match err {
            kube::Error::Api(response) if response.code == 429 || response.code >= 500 => {
                EngineError::Transient(format!("{context}: {err}"))
            }
            kube::Error::Api(_) => EngineError::External(format!("{context}: {err}")),
            _ => EngineError::Transient(format!("{context}: {err}")),
        }
    }
}

#[async_trait]
impl DeployTarget for ClusterTarget {
    async fn create_service(
        &self,
        name: &str,
        image: &str,
        resources: &DeploymentResources,
    ) -> Result<()> {
        let labels = serde_json::json!({ "app": name });

        let deployment: K8sDeployment = serde_json::from_value(serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": name, "labels": labels },
            "spec": {
                "replicas": resources.min_replicas,
                "selector": { "matchLabels": labels },
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "containers": [{
                            "name": "agent-runtime",
                            "image": image,
                            "ports": [{ "containerPort": 8080 }],
                            "resources": {
                                "limits": {
                                    "cpu": format!("{}m", resources.cpu_millicores),
                                    "memory": format!("{}Mi", resources.memory_mb),
                                },
                            },
                        }],
                    },
                },
            },
        }))
        .map_err(|e| EngineError::Invalid(format!("deployment manifest: {e}")))?;

        let service: K8sService = serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": name, "labels": labels },
            "spec": {
                "selector": labels,
                "ports": [{ "port": 80, "targetPort": 8080 }],
                "type": "ClusterIP",
            },
        }))
        .map_err(|e| EngineError::Invalid(format!("service manifest: {e}")))?;

        match self
            .deployments()
            .create(&PostParams::default(), &deployment)
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 409 => {
                tracing::info!(service = name, "Cluster deployment already exists, re-attaching");
            }
            Err(e) => return Err(Self::from_kube(&e, "cluster deployment create")),
        }

        match self.services().create(&PostParams::default(), &service).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 409 => {}
            Err(e) => return Err(Self::from_kube(&e, "cluster service create")),
        }

        tracing::info!(service = name, image, "Applied cluster manifests");
        Ok(())
    }

    async fn service_state(&self, name: &str) -> Result<ServiceState> {
        let deployment = self
            .deployments()
            .get_opt(name)
            .await
            .map_err(|e| Self::from_kube(&e, "cluster status"))?;

        let Some(deployment) = deployment else {
            return Ok(ServiceState::Missing);
        };

        let wanted = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let ready = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);

        if ready >= wanted {
            Ok(ServiceState::Ready {
                endpoint_url: self.endpoint(name),
            })
        } else {
            Ok(ServiceState::Provisioning)
        }
    }

    async fn teardown(&self, name: &str) -> Result<()> {
        match self
            .deployments()
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(Self::from_kube(&e, "cluster deployment delete")),
        }

        match self.services().delete(name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(Self::from_kube(&e, "cluster service delete")),
        }

        tracing::info!(service = name, "Deleted cluster resources");
        Ok(())
    }
}

// =============================================================================
// Mock
// =============================================================================

/// An in-memory deploy target for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockDeployTarget {
    services: parking_lot::Mutex<std::collections::HashMap<String, MockService>>,
    /// Service names passed to `teardown`.
    pub teardowns: parking_lot::Mutex<Vec<String>>,
    /// Whether newly created services become ready immediately.
    pub ready_immediately: bool,
}

#[cfg(any(test, feature = "test-utils"))]
struct MockService {
    image: String,
    ready: bool,
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MockDeployTarget {
    fn default() -> Self {
        Self {
            services: parking_lot::Mutex::new(std::collections::HashMap::new()),
            teardowns: parking_lot::Mutex::new(Vec::new()),
            ready_immediately: true,
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl MockDeployTarget {
    /// A target whose services become ready as soon as they are created.
    #[must_use]
    pub fn ready() -> Self {
        Self::default()
    }

    /// A target whose services never become ready.
    #[must_use]
    pub fn never_ready() -> Self {
        Self {
            ready_immediately: false,
            ..Self::default()
        }
    }

    /// Whether a service of this name currently exists.
    #[must_use]
    pub fn has_service(&self, name: &str) -> bool {
        self.services.lock().contains_key(name)
    }

    /// Number of teardown calls so far.
    #[must_use]
    pub fn teardown_count(&self) -> usize {
        self.teardowns.lock().len()
    }

    /// The image a service was created with.
    #[must_use]
    pub fn image_of(&self, name: &str) -> Option<String> {
        self.services.lock().get(name).map(|s| s.image.clone())
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl DeployTarget for MockDeployTarget {
    async fn create_service(
        &self,
        name: &str,
        image: &str,
        _resources: &DeploymentResources,
    ) -> Result<()> {
        let mut services = self.services.lock();
        // Idempotent: an existing service is left untouched.
        services.entry(name.to_string()).or_insert(MockService {
            image: image.to_string(),
            ready: self.ready_immediately,
        });
        Ok(())
    }

    async fn service_state(&self, name: &str) -> Result<ServiceState> {
        let services = self.services.lock();
        Ok(match services.get(name) {
            None => ServiceState::Missing,
            Some(service) if service.ready => ServiceState::Ready {
                endpoint_url: format!("https://{name}.run.example.com"),
            },
            Some(_) => ServiceState::Provisioning,
        })
    }

    async fn teardown(&self, name: &str) -> Result<()> {
        self.services.lock().remove(name);
        self.teardowns.lock().push(name.to_string());
        Ok(())
    }
}
