//! Deployment endpoints.
//!
//! `POST` enqueues and returns immediately; clients poll `GET` for
//! progress. Polling never cancels the pipeline.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use flowplane_core::{AgentId, DeploymentId, PageParams, VersionId};
use flowplane_deploy::CreateDeploymentInput;
use flowplane_store::{BuildStrategyKind, DeployStrategyKind, DeploymentFilter, DeploymentStatus};

use crate::error::ApiError;
use crate::extract::AuthPrincipal;
use crate::state::AppState;

/// Body of `POST /deployments/`.
#[derive(Debug, Deserialize)]
pub struct CreateDeploymentBody {
    /// Agent to deploy.
    pub agent_id: AgentId,
    /// Version to deploy; must belong to the agent.
    pub agent_version_id: VersionId,
    /// Optional build strategy override.
    #[serde(default)]
    pub build_strategy: Option<BuildStrategyKind>,
    /// Optional deploy strategy override.
    #[serde(default)]
    pub deploy_strategy: Option<DeployStrategyKind>,
}

/// Query of `GET /deployments/`.
#[derive(Debug, Deserialize)]
pub struct ListDeploymentsQuery {
    /// Filter by agent.
    #[serde(default)]
    pub agent_id: Option<AgentId>,
    /// Filter by status.
    #[serde(default)]
    pub status: Option<DeploymentStatus>,
    /// Zero-based page index.
    #[serde(default)]
    pub page: u32,
    /// Page size (clamped server-side).
    #[serde(default)]
    pub page_size: Option<u32>,
}

/// `POST /deployments/`.
pub async fn create_deployment(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(body): Json<CreateDeploymentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state
        .deployments
        .create_deployment(
            &principal,
            CreateDeploymentInput {
                agent_id: body.agent_id,
                agent_version_id: body.agent_version_id,
                build_strategy: body.build_strategy,
                deploy_strategy: body.deploy_strategy,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(deployment)))
}

/// `GET /deployments/`.
pub async fn list_deployments(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Query(query): Query<ListDeploymentsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = DeploymentFilter {
        agent_id: query.agent_id,
        status: query.status,
    };
    let deployments = state
        .deployments
        .list_deployments(
            &principal,
            &filter,
            PageParams {
                page: query.page,
                page_size: query.page_size,
            },
        )
        .await?;
    Ok(Json(deployments))
}

/// `GET /deployments/{deployment_id}`.
pub async fn get_deployment(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(deployment_id): Path<DeploymentId>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state
        .deployments
        .get_deployment(&principal, deployment_id)
        .await?;
    Ok(Json(deployment))
}

/// `GET /deployments/{deployment_id}/transitions`.
pub async fn list_transitions(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(deployment_id): Path<DeploymentId>,
) -> Result<impl IntoResponse, ApiError> {
    let transitions = state
        .deployments
        .transitions(&principal, deployment_id)
        .await?;
    Ok(Json(transitions))
}

/// `DELETE /deployments/{deployment_id}`: stop.
pub async fn stop_deployment(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(deployment_id): Path<DeploymentId>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state
        .deployments
        .stop_deployment(&principal, deployment_id)
        .await?;
    Ok(Json(deployment))
}
