//! Deployment engine for the flowplane control plane.
//!
//! Takes an agent version to a running endpoint through a durable state
//! machine:
//!
//! ```text
//! pending ─► deploying ─► running ─► stopped
//!    │          │           │
//!    ▼          ▼           ▼
//!  failed     failed      failed
//! ```
//!
//! The deployments table is the job queue. [`DeploymentEngine`] validates
//! and enqueues rows; a pool of [`DeploymentWorker`]s leases them
//! (time-bounded, auto-renewed) and executes the pipeline: materialize a
//! build context, build the image via a pluggable [`BuildStrategy`],
//! verify it against the [`ImageRegistry`], deploy via a pluggable
//! [`DeployTarget`], and stamp the endpoint.
//!
//! Every stage records a resumption marker in the deployment's metadata,
//! and every external resource is named after the deployment id, so a
//! worker that re-leases a crashed deployment re-attaches instead of
//! creating duplicates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod build;
pub mod context;
pub mod engine;
pub mod error;
pub mod registry;
pub mod resources;
pub mod state;
pub mod target;
pub mod worker;

pub use build::{BuildState, BuildStrategy, CiConfig, CiDrivenBuild, HostedBuild, HostedBuildConfig};
pub use context::BuildContext;
pub use engine::{CreateDeploymentInput, DeploymentEngine, EngineConfig, Strategies};
pub use error::{EngineError, Result};
pub use registry::{HttpImageRegistry, ImageManifest, ImageRegistry};
pub use resources::DeploymentResources;
pub use target::{
    ClusterConfig, ClusterTarget, DeployTarget, ServerlessConfig, ServerlessTarget, ServiceState,
};
pub use worker::{DeploymentWorker, WorkerConfig};

#[cfg(any(test, feature = "test-utils"))]
pub use build::MockBuildStrategy;
#[cfg(any(test, feature = "test-utils"))]
pub use registry::MockImageRegistry;
#[cfg(any(test, feature = "test-utils"))]
pub use target::MockDeployTarget;

use flowplane_core::DeploymentId;

/// Platform-side service name for a deployment; doubles as the natural
/// idempotency key for all external create calls.
#[must_use]
pub fn service_name(deployment_id: DeploymentId) -> String {
    format!("agent-runtime-{deployment_id}")
}

/// Deterministic registry path for a deployment's image.
#[must_use]
pub fn image_tag(registry_host: &str, deployment_id: DeploymentId) -> String {
    format!("{registry_host}/agent-runtime-{deployment_id}:latest")
}
