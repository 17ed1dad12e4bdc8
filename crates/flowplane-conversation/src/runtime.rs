//! Client for the deployed agent runtime.
//!
//! The runtime is the HTTP endpoint exposed by the deployed container: a
//! login handshake returning a bearer, and a run endpoint streaming flow
//! output chunks.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;

/// Errors from runtime interaction.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The login handshake was rejected.
    #[error("runtime authentication failed")]
    AuthFailed,

    /// The runtime could not be reached or answered outside its contract.
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// The output stream broke mid-turn.
    #[error("runtime stream failed: {0}")]
    Stream(String),
}

/// A stream of output chunks from one flow run.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, RuntimeError>> + Send>>;

/// Source of machine tokens presented to the runtime's login handshake.
#[async_trait]
pub trait ServiceTokenSource: Send + Sync {
    /// A currently valid machine token.
    ///
    /// # Errors
    ///
    /// Returns an error when no token can be obtained.
    async fn token(&self) -> Result<String, RuntimeError>;
}

/// Client for a deployed runtime endpoint.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Perform the login handshake and return the runtime's bearer.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::AuthFailed`] when rejected.
    async fn login(&self, endpoint: &str, service_token: &str) -> Result<String, RuntimeError>;

    /// Start a flow run, streaming output chunks.
    ///
    /// # Errors
    ///
    /// Returns an error when the run cannot be started.
    async fn run_flow(
        &self,
        endpoint: &str,
        bearer: &str,
        input: &str,
    ) -> Result<ChunkStream, RuntimeError>;
}

/// HTTP implementation of [`RuntimeClient`].
pub struct HttpRuntimeClient {
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
}

impl HttpRuntimeClient {
    /// Create the client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, RuntimeError> {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl RuntimeClient for HttpRuntimeClient {
    async fn login(&self, endpoint: &str, service_token: &str) -> Result<String, RuntimeError> {
        let url = format!("{}/api/v1/login", endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {service_token}"))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RuntimeError::AuthFailed);
        }
        if !status.is_success() {
            return Err(RuntimeError::Unavailable(format!("login status {status}")));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(body.access_token)
    }

    async fn run_flow(
        &self,
        endpoint: &str,
        bearer: &str,
        input: &str,
    ) -> Result<ChunkStream, RuntimeError> {
        let url = format!("{}/api/v1/run", endpoint.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {bearer}"))
            .json(&serde_json::json!({ "input": input, "stream": true }))
            .send()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RuntimeError::Unavailable(format!("run status {status}")));
        }

        let stream = response.bytes_stream().map(|chunk| match chunk {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => Err(RuntimeError::Stream(e.to_string())),
        });

        Ok(Box::pin(stream))
    }
}

/// A mock runtime for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRuntimeClient {
    /// When `true`, the login handshake is rejected.
    pub fail_login: bool,
    /// Chunks every run emits.
    pub chunks: Vec<String>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRuntimeClient {
    /// A runtime that streams the given chunks.
    #[must_use]
    pub fn streaming(chunks: &[&str]) -> Self {
        Self {
            fail_login: false,
            chunks: chunks.iter().map(ToString::to_string).collect(),
        }
    }

    /// A runtime that rejects every login.
    #[must_use]
    pub fn rejecting_login() -> Self {
        Self {
            fail_login: true,
            chunks: Vec::new(),
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RuntimeClient for MockRuntimeClient {
    async fn login(&self, _endpoint: &str, _service_token: &str) -> Result<String, RuntimeError> {
        if self.fail_login {
            Err(RuntimeError::AuthFailed)
        } else {
            Ok("runtime-bearer".to_string())
        }
    }

    async fn run_flow(
        &self,
        _endpoint: &str,
        _bearer: &str,
        _input: &str,
    ) -> Result<ChunkStream, RuntimeError> {
        let chunks = self.chunks.clone();
        Ok(Box::pin(futures::stream::iter(
            chunks.into_iter().map(Ok),
        )))
    }
}

/// A token source returning a fixed token, for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct StaticTokenSource;

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl ServiceTokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String, RuntimeError> {
        Ok("service-token".to_string())
    }
}
