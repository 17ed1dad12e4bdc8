//! Service-to-service token provisioning.
//!
//! Services that call the runtime (or each other) obtain machine tokens
//! through the client-credentials grant using the credentials bootstrap
//! handed them, and cache the token until 60 seconds before expiry.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use crate::bootstrap::ClientCredentials;
use crate::error::Result;
use crate::service::IdentityService;

/// Refresh margin before expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Caches machine tokens for one service client.
pub struct ServiceTokenProvider {
    identity: Arc<IdentityService>,
    credentials: ClientCredentials,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl ServiceTokenProvider {
    /// Create a provider for the given service credentials.
    #[must_use]
    pub fn new(identity: Arc<IdentityService>, credentials: ClientCredentials) -> Self {
        Self {
            identity,
            credentials,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid machine token, minting a fresh one when the cached
    /// token is within 60 s of expiry.
    ///
    /// # Errors
    ///
    /// Returns an error when the grant fails (e.g. the client was
    /// revoked).
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if entry.expires_at - ChronoDuration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                return Ok(entry.token.clone());
            }
        }

        let grant = self
            .identity
            .issue_token(
                &self.credentials.client_id.to_string(),
                &self.credentials.client_secret,
            )
            .await?;

        let expires_at = Utc::now()
            + ChronoDuration::seconds(i64::try_from(grant.expires_in).unwrap_or(i64::MAX));
        let token = grant.access_token.clone();
        *cached = Some(CachedToken {
            token: grant.access_token,
            expires_at,
        });

        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockIdentityProvider;
    use flowplane_auth::{TokenFamily, TokenMinter};
    use flowplane_store::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn token_is_cached_between_calls() {
        let store = Arc::new(MemoryStore::new());
        let service = Arc::new(IdentityService::new(
            store,
            Arc::new(MockIdentityProvider::new()),
            TokenMinter::new(TokenFamily {
                secret: "m2m".into(),
                issuer: "https://auth.local".into(),
                audience: "services".into(),
            }),
            Duration::from_secs(900),
        ));
        service.create_role("worker", "worker role").await.unwrap();
        let created = service
            .create_client("deploy_service_client", &["worker".into()])
            .await
            .unwrap();

        let provider = ServiceTokenProvider::new(
            service,
            ClientCredentials {
                client_id: created.client.client_id.as_uuid(),
                client_secret: created.client_secret,
            },
        );

        let first = provider.token().await.unwrap();
        let second = provider.token().await.unwrap();
        assert_eq!(first, second);
    }
}
