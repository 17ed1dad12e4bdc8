//! User authentication and the client-credentials token endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Form, Json};
use serde::Deserialize;

use flowplane_core::UserId;

use crate::error::ApiError;
use crate::extract::AuthPrincipal;
use crate::state::AppState;

/// Body of `POST /auth/users/register`.
#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    /// Email address, unique across users.
    pub email: String,
    /// Password, forwarded to the identity provider.
    pub password: String,
    /// Optional display name; derived from the email when absent.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Body of `POST /auth/users/login`.
#[derive(Debug, Deserialize)]
pub struct LoginBody {
    /// Email address.
    pub email: String,
    /// Password.
    pub password: String,
}

/// Body of `PATCH /auth/users/me`.
#[derive(Debug, Deserialize)]
pub struct UpdateMeBody {
    /// New display name.
    pub display_name: String,
}

/// Form of `POST /auth/token` (client-credentials grant only).
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    /// Must be `client_credentials`.
    pub grant_type: String,
    /// Client id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

/// `POST /auth/users/register`.
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .identity
        .register(&body.email, &body.password, body.display_name.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// `POST /auth/users/login`: the provider's token pair is returned
/// unchanged.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<impl IntoResponse, ApiError> {
    let tokens = state.identity.login(&body.email, &body.password).await?;
    Ok(Json(tokens))
}

/// `GET /auth/users/me`.
pub async fn me(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .identity
        .me(UserId::from_uuid(principal.id))
        .await?;
    Ok(Json(profile))
}

/// `PATCH /auth/users/me`.
pub async fn update_me(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    Json(body): Json<UpdateMeBody>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .identity
        .update_me(UserId::from_uuid(principal.id), &body.display_name)
        .await?;
    Ok(Json(profile))
}

/// `POST /auth/token`.
pub async fn token(
    State(state): State<AppState>,
    Form(form): Form<TokenForm>,
) -> Result<impl IntoResponse, ApiError> {
    if form.grant_type != "client_credentials" {
        return Err(ApiError::Invalid("unsupported grant_type".into()));
    }
    let grant = state
        .identity
        .issue_token(&form.client_id, &form.client_secret)
        .await?;
    Ok(Json(grant))
}
