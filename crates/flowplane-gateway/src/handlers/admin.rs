//! Admin endpoints: roles, permissions, machine clients.
//!
//! Everything here requires the `admin:manage` permission.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use flowplane_auth::Principal;
use flowplane_core::ClientId;

use crate::error::ApiError;
use crate::extract::AuthPrincipal;
use crate::state::AppState;

/// Permission gating this module.
pub const ADMIN_PERMISSION: &str = "admin:manage";

fn require_admin(principal: &Principal) -> Result<(), ApiError> {
    principal.require(ADMIN_PERMISSION).map_err(ApiError::from)
}

/// Body of role/permission creation.
#[derive(Debug, Deserialize)]
pub struct CreateNamedBody {
    /// Unique name, immutable after creation.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

/// Body of `POST /admin/roles/{id}/permissions`.
#[derive(Debug, Deserialize)]
pub struct AttachPermissionBody {
    /// Permission to attach.
    pub permission_id: Uuid,
}

/// Body of `POST /admin/clients`.
#[derive(Debug, Deserialize)]
pub struct CreateClientBody {
    /// Well-known client name.
    pub name: String,
    /// Role names to assign.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Body of `POST /admin/clients/{id}/roles`.
#[derive(Debug, Deserialize)]
pub struct AssignClientRoleBody {
    /// Role to assign.
    pub role_id: Uuid,
}

/// Response of `POST /admin/clients`; the secret appears exactly once.
#[derive(Debug, Serialize)]
pub struct CreatedClientResponse {
    /// Client id.
    pub client_id: ClientId,
    /// Client name.
    pub name: String,
    /// One-time plaintext secret.
    pub client_secret: String,
}

/// `POST /admin/roles`.
pub async fn create_role(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(body): Json<CreateNamedBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&principal)?;
    let role = state.identity.create_role(&body.name, &body.description).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// `GET /admin/roles`.
pub async fn list_roles(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&principal)?;
    Ok(Json(state.identity.list_roles().await?))
}

/// `DELETE /admin/roles/{role_id}`.
pub async fn delete_role(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(role_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&principal)?;
    state.identity.delete_role(role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /admin/permissions`.
pub async fn create_permission(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(body): Json<CreateNamedBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&principal)?;
    let permission = state
        .identity
        .create_permission(&body.name, &body.description)
        .await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

/// `GET /admin/permissions`.
pub async fn list_permissions(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&principal)?;
    Ok(Json(state.identity.list_permissions().await?))
}

/// `DELETE /admin/permissions/{permission_id}`.
pub async fn delete_permission(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(permission_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&principal)?;
    state.identity.delete_permission(permission_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /admin/roles/{role_id}/permissions`.
pub async fn attach_permission(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(role_id): Path<Uuid>,
    Json(body): Json<AttachPermissionBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&principal)?;
    state
        .identity
        .attach_permission(role_id, body.permission_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /admin/clients`.
pub async fn create_client(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(body): Json<CreateClientBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&principal)?;
    let created = state.identity.create_client(&body.name, &body.roles).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedClientResponse {
            client_id: created.client.client_id,
            name: created.client.name,
            client_secret: created.client_secret,
        }),
    ))
}

/// `POST /admin/clients/{client_id}/roles`.
pub async fn assign_client_role(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(client_id): Path<ClientId>,
    Json(body): Json<AssignClientRoleBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&principal)?;
    state
        .identity
        .assign_client_role(client_id, body.role_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /admin/clients/{client_id}`: revoke.
pub async fn revoke_client(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Path(client_id): Path<ClientId>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&principal)?;
    state.identity.revoke_client(client_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
