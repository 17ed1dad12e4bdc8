//! Gateway application state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use flowplane_auth::TokenVerifier;
use flowplane_catalog::CatalogService;
use flowplane_conversation::{ConversationService, RuntimeError, ServiceTokenSource};
use flowplane_deploy::DeploymentEngine;
use flowplane_identity::{IdentityService, ServiceTokenProvider};
use flowplane_store::Store;

/// Dependency-injection struct threaded through every handler.
#[derive(Clone)]
pub struct AppState {
    /// Bearer-token verifier (shared by HTTP handlers and WS upgrades).
    pub verifier: Arc<dyn TokenVerifier>,
    /// Identity store service.
    pub identity: Arc<IdentityService>,
    /// Agent catalog service.
    pub catalog: Arc<CatalogService>,
    /// Deployment engine API surface.
    pub deployments: Arc<DeploymentEngine>,
    /// Conversation hub service.
    pub conversations: Arc<ConversationService>,
    /// Storage handle for readiness probes.
    pub store: Arc<dyn Store>,
    /// Flipped once bootstrap completes; readiness gates on it.
    pub ready: Arc<AtomicBool>,
}

impl AppState {
    /// Whether bootstrap has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Mark bootstrap complete.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }
}

/// Adapter feeding the conversation hub's runtime login with machine
/// tokens from the identity store's token provider.
pub struct HubTokenSource {
    provider: Arc<ServiceTokenProvider>,
}

impl HubTokenSource {
    /// Wrap a token provider.
    #[must_use]
    pub fn new(provider: Arc<ServiceTokenProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ServiceTokenSource for HubTokenSource {
    async fn token(&self) -> Result<String, RuntimeError> {
        self.provider
            .token()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }
}
