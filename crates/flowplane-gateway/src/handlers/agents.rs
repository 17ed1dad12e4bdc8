//! Agent catalog endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use flowplane_catalog::{AccessContext, CreateAgentInput};
use flowplane_core::{AgentId, PageParams, VersionId};
use flowplane_store::{Agent, AgentFilter, AgentStatus, AgentVersion};

use crate::error::ApiError;
use crate::extract::{AuthPrincipal, OnBehalfOf};
use crate::state::AppState;

/// Body of `POST /agents/`.
#[derive(Debug, Deserialize)]
pub struct CreateAgentBody {
    /// Agent name, unique per owner.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Initial flow configuration (becomes version 1).
    pub config: JsonValue,
    /// Search tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Body of `POST /agents/{id}/versions`.
#[derive(Debug, Deserialize)]
pub struct NewVersionBody {
    /// Full configuration snapshot.
    pub config: JsonValue,
    /// Optional change description.
    #[serde(default)]
    pub changelog: Option<String>,
}

/// Body of `PATCH /agents/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateAgentBody {
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// New tags.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Query of `GET /agents/`.
#[derive(Debug, Deserialize)]
pub struct ListAgentsQuery {
    /// Filter by lifecycle status.
    #[serde(default)]
    pub status: Option<AgentStatus>,
    /// Filter by tag.
    #[serde(default)]
    pub tag: Option<String>,
    /// Case-insensitive name substring.
    #[serde(default)]
    pub q: Option<String>,
    /// Zero-based page index.
    #[serde(default)]
    pub page: u32,
    /// Page size (clamped server-side).
    #[serde(default)]
    pub page_size: Option<u32>,
}

/// Response of `POST /agents/`.
#[derive(Debug, Serialize)]
pub struct CreatedAgentResponse {
    /// The new agent.
    pub agent: Agent,
    /// Its first version.
    pub version: AgentVersion,
}

/// `POST /agents/`.
pub async fn create_agent(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    OnBehalfOf(on_behalf_of): OnBehalfOf,
    Json(body): Json<CreateAgentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .catalog
        .create_agent(
            AccessContext::on_behalf_of(&principal, on_behalf_of),
            CreateAgentInput {
                name: body.name,
                description: body.description,
                config: body.config,
                tags: body.tags,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedAgentResponse {
            agent: created.agent,
            version: created.version,
        }),
    ))
}

/// `GET /agents/`.
pub async fn list_agents(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    OnBehalfOf(on_behalf_of): OnBehalfOf,
    Query(query): Query<ListAgentsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = AgentFilter {
        status: query.status,
        tag: query.tag,
        name_contains: query.q,
    };
    let agents = state
        .catalog
        .list_agents(
            AccessContext::on_behalf_of(&principal, on_behalf_of),
            &filter,
            PageParams {
                page: query.page,
                page_size: query.page_size,
            },
        )
        .await?;
    Ok(Json(agents))
}

/// `GET /agents/{agent_id}`.
pub async fn get_agent(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    OnBehalfOf(on_behalf_of): OnBehalfOf,
    Path(agent_id): Path<AgentId>,
) -> Result<impl IntoResponse, ApiError> {
    let agent = state
        .catalog
        .get_agent(AccessContext::on_behalf_of(&principal, on_behalf_of), agent_id)
        .await?;
    Ok(Json(agent))
}

/// `PATCH /agents/{agent_id}`.
pub async fn update_agent(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    OnBehalfOf(on_behalf_of): OnBehalfOf,
    Path(agent_id): Path<AgentId>,
    Json(body): Json<UpdateAgentBody>,
) -> Result<impl IntoResponse, ApiError> {
    let agent = state
        .catalog
        .update_agent(
            AccessContext::on_behalf_of(&principal, on_behalf_of),
            agent_id,
            body.description,
            body.tags,
        )
        .await?;
    Ok(Json(agent))
}

/// `POST /agents/{agent_id}/archive`.
pub async fn archive_agent(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    OnBehalfOf(on_behalf_of): OnBehalfOf,
    Path(agent_id): Path<AgentId>,
) -> Result<impl IntoResponse, ApiError> {
    let agent = state
        .catalog
        .archive_agent(AccessContext::on_behalf_of(&principal, on_behalf_of), agent_id)
        .await?;
    Ok(Json(agent))
}

/// `POST /agents/{agent_id}/versions`: append a configuration snapshot.
pub async fn create_version(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    OnBehalfOf(on_behalf_of): OnBehalfOf,
    Path(agent_id): Path<AgentId>,
    Json(body): Json<NewVersionBody>,
) -> Result<impl IntoResponse, ApiError> {
    let version = state
        .catalog
        .update_agent_config(
            AccessContext::on_behalf_of(&principal, on_behalf_of),
            agent_id,
            body.config,
            body.changelog,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(version)))
}

/// `GET /agents/{agent_id}/versions`.
pub async fn list_versions(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    OnBehalfOf(on_behalf_of): OnBehalfOf,
    Path(agent_id): Path<AgentId>,
    Query(page): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let versions = state
        .catalog
        .list_versions(
            AccessContext::on_behalf_of(&principal, on_behalf_of),
            agent_id,
            page,
        )
        .await?;
    Ok(Json(versions))
}

/// `GET /agents/{agent_id}/versions/latest`.
pub async fn latest_version(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    OnBehalfOf(on_behalf_of): OnBehalfOf,
    Path(agent_id): Path<AgentId>,
) -> Result<impl IntoResponse, ApiError> {
    let version = state
        .catalog
        .latest_version(
            AccessContext::on_behalf_of(&principal, on_behalf_of),
            agent_id,
        )
        .await?;
    Ok(Json(version))
}

/// `GET /agents/{agent_id}/versions/{version_id}`.
pub async fn get_version(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    OnBehalfOf(on_behalf_of): OnBehalfOf,
    Path((_agent_id, version_id)): Path<(AgentId, VersionId)>,
) -> Result<impl IntoResponse, ApiError> {
    let version = state
        .catalog
        .get_version(
            AccessContext::on_behalf_of(&principal, on_behalf_of),
            version_id,
        )
        .await?;
    Ok(Json(version))
}

/// `POST /agents/{agent_id}/versions/{version_id}/publish`.
pub async fn publish_version(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    OnBehalfOf(on_behalf_of): OnBehalfOf,
    Path((agent_id, version_id)): Path<(AgentId, VersionId)>,
) -> Result<impl IntoResponse, ApiError> {
    let version = state
        .catalog
        .publish_version(
            AccessContext::on_behalf_of(&principal, on_behalf_of),
            agent_id,
            version_id,
        )
        .await?;
    Ok(Json(version))
}
