//! External identity provider client.
//!
//! The provider issues and verifies human-user credentials; the platform
//! only mirrors a profile row. Login responses are returned to callers
//! unchanged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IdentityError, Result};

/// A user record as reported by the provider.
#[derive(Debug, Clone)]
pub struct ProviderUser {
    /// Provider-issued user id (becomes the profile's user id).
    pub id: Uuid,
    /// Email address.
    pub email: String,
}

/// A token pair as issued by the provider, passed through to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTokens {
    /// The user bearer token.
    pub access_token: String,
    /// Optional refresh token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token type, normally `bearer`.
    pub token_type: String,
    /// Lifetime in seconds, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// Client for the external identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create a user with the provider.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::Conflict` when the email is already
    /// registered, `IdentityError::Provider` on transport failures.
    async fn register(&self, email: &str, password: &str) -> Result<ProviderUser>;

    /// Authenticate a user, returning the provider's tokens unchanged.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidCredentials` when the provider
    /// rejects the credentials.
    async fn login(&self, email: &str, password: &str) -> Result<(ProviderUser, ProviderTokens)>;
}

/// HTTP implementation speaking the provider's REST API.
pub struct HttpIdentityProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct SignupResponse {
    id: Uuid,
    email: String,
}

#[derive(Deserialize)]
struct PasswordGrantResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
    user: SignupResponse,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl HttpIdentityProvider {
    /// Create a provider client for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| IdentityError::Provider(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.post(format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key);
        }
        builder
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn register(&self, email: &str, password: &str) -> Result<ProviderUser> {
        let response = self
            .request("/auth/v1/signup")
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| IdentityError::Provider(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: SignupResponse = response
                .json()
                .await
                .map_err(|e| IdentityError::Provider(e.to_string()))?;
            return Ok(ProviderUser {
                id: body.id,
                email: body.email,
            });
        }

        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::CONFLICT || body.contains("already registered") {
            return Err(IdentityError::Conflict("email already registered".into()));
        }
        Err(IdentityError::Provider(format!("signup failed: {status}")))
    }

    async fn login(&self, email: &str, password: &str) -> Result<(ProviderUser, ProviderTokens)> {
        let response = self
            .request("/auth/v1/token?grant_type=password")
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| IdentityError::Provider(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(IdentityError::InvalidCredentials);
        }
        if !status.is_success() {
            return Err(IdentityError::Provider(format!("login failed: {status}")));
        }

        let body: PasswordGrantResponse = response
            .json()
            .await
            .map_err(|e| IdentityError::Provider(e.to_string()))?;

        Ok((
            ProviderUser {
                id: body.user.id,
                email: body.user.email,
            },
            ProviderTokens {
                access_token: body.access_token,
                refresh_token: body.refresh_token,
                token_type: body.token_type,
                expires_in: body.expires_in,
            },
        ))
    }
}

/// In-memory provider for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockIdentityProvider {
    users: parking_lot::Mutex<std::collections::HashMap<String, (String, Uuid)>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MockIdentityProvider {
    fn default() -> Self {
        Self {
            users: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl MockIdentityProvider {
    /// Create an empty mock provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    async fn register(&self, email: &str, password: &str) -> Result<ProviderUser> {
        let mut users = self.users.lock();
        if users.contains_key(email) {
            return Err(IdentityError::Conflict("email already registered".into()));
        }
        let id = Uuid::new_v4();
        users.insert(email.to_string(), (password.to_string(), id));
        Ok(ProviderUser {
            id,
            email: email.to_string(),
        })
    }

    async fn login(&self, email: &str, password: &str) -> Result<(ProviderUser, ProviderTokens)> {
        let users = self.users.lock();
        match users.get(email) {
            Some((stored, id)) if stored == password => Ok((
                ProviderUser {
                    id: *id,
                    email: email.to_string(),
                },
                ProviderTokens {
                    access_token: format!("provider-token-{id}"),
                    refresh_token: None,
                    token_type: "bearer".to_string(),
                    expires_in: Some(3600),
                },
            )),
            _ => Err(IdentityError::InvalidCredentials),
        }
    }
}
