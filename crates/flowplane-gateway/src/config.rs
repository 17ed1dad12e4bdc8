//! Environment-driven configuration.
//!
//! Every recognized option is read from a `FLOWPLANE_`-prefixed variable;
//! unknown variables under the prefix are ignored. Required options
//! produce a startup error naming the variable.

use std::time::Duration;

use thiserror::Error;

use flowplane_store::{BuildStrategyKind, DeployStrategyKind};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FLOWPLANE_";

/// Configuration errors are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is missing.
    #[error("missing required environment variable FLOWPLANE_{0}")]
    Missing(String),

    /// A variable could not be parsed.
    #[error("invalid value for FLOWPLANE_{0}: {1}")]
    Invalid(String, String),
}

/// Full gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address.
    pub listen_addr: String,
    /// Path prefix prepended to `/api/v1` (e.g. behind a proxy).
    pub root_path: String,
    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
    /// Request body cap in bytes.
    pub max_body_bytes: usize,
    /// Handler timeout in seconds.
    pub request_timeout_secs: u64,
    /// `tracing` filter directive.
    pub log_filter: String,

    /// Database URL.
    pub database_url: String,
    /// Connection pool bound.
    pub database_max_connections: u32,

    /// User-token family: secret.
    pub user_jwt_secret: String,
    /// User-token family: issuer.
    pub user_jwt_issuer: String,
    /// User-token family: audience.
    pub user_jwt_audience: String,
    /// Machine-token family: secret.
    pub m2m_jwt_secret: String,
    /// Machine-token family: issuer.
    pub m2m_jwt_issuer: String,
    /// Machine-token family: audience.
    pub m2m_jwt_audience: String,
    /// Machine-token lifetime in seconds.
    pub m2m_token_ttl_secs: u64,
    /// Grants-cache TTL in seconds (hard-capped at 60).
    pub auth_cache_ttl_secs: u64,

    /// Bootstrap admin email (empty skips admin bootstrap).
    pub admin_email: String,
    /// Bootstrap admin password.
    pub admin_password: String,
    /// Identity provider base URL.
    pub provider_base_url: String,
    /// Identity provider API key, when required.
    pub provider_api_key: Option<String>,
    /// Path of the service-credentials file written by bootstrap.
    pub credentials_path: String,

    /// Default build strategy.
    pub build_strategy: BuildStrategyKind,
    /// Default deploy strategy.
    pub deploy_strategy: DeployStrategyKind,
    /// Registry host images are pushed to.
    pub registry_host: String,
    /// Registry bearer token, when required.
    pub registry_token: Option<String>,
    /// Base image for rendered build contexts.
    pub runtime_image: String,
    /// CI API base URL.
    pub ci_api_base: String,
    /// CI repository owner.
    pub ci_owner: String,
    /// CI repository name.
    pub ci_repo: String,
    /// CI workflow file.
    pub ci_workflow: String,
    /// CI git ref.
    pub ci_ref: String,
    /// CI API token (empty disables the CI strategy).
    pub ci_token: String,
    /// Hosted build service base URL (empty disables the strategy).
    pub hosted_build_api_base: String,
    /// Hosted build service token.
    pub hosted_build_token: String,
    /// Serverless platform base URL (empty disables the target).
    pub serverless_api_base: String,
    /// Serverless platform token.
    pub serverless_token: String,
    /// Kubernetes namespace for the cluster target.
    pub cluster_namespace: String,
    /// Number of deployment workers to run.
    pub worker_count: usize,
    /// Worker lease in seconds.
    pub lease_secs: u64,
    /// Per-stage deadline in seconds.
    pub stage_timeout_secs: u64,
    /// Full pipeline deadline in seconds.
    pub pipeline_timeout_secs: u64,

    /// Per-subscriber WS queue depth.
    pub ws_queue_depth: usize,
    /// Persist assistant replies at `complete`.
    pub persist_assistant_replies: bool,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for missing or malformed values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Load configuration through an arbitrary lookup (tests).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for missing or malformed values.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &str| get(key).ok_or_else(|| ConfigError::Missing(key.to_string()));
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let parse_u64 = |key: &str, default: u64| -> Result<u64, ConfigError> {
            match get(key) {
                None => Ok(default),
                Some(raw) => raw
                    .parse()
                    .map_err(|_| ConfigError::Invalid(key.to_string(), raw)),
            }
        };
        let parse_usize = |key: &str, default: usize| -> Result<usize, ConfigError> {
            match get(key) {
                None => Ok(default),
                Some(raw) => raw
                    .parse()
                    .map_err(|_| ConfigError::Invalid(key.to_string(), raw)),
            }
        };
        let parse_bool = |key: &str, default: bool| -> Result<bool, ConfigError> {
            match get(key) {
                None => Ok(default),
                Some(raw) => match raw.as_str() {
                    "true" | "1" => Ok(true),
                    "false" | "0" => Ok(false),
                    _ => Err(ConfigError::Invalid(key.to_string(), raw)),
                },
            }
        };

        let build_strategy_raw = or("BUILD_STRATEGY", "hosted_build");
        let build_strategy = BuildStrategyKind::parse(&build_strategy_raw)
            .ok_or_else(|| ConfigError::Invalid("BUILD_STRATEGY".into(), build_strategy_raw))?;
        let deploy_strategy_raw = or("DEPLOY_STRATEGY", "serverless");
        let deploy_strategy = DeployStrategyKind::parse(&deploy_strategy_raw)
            .ok_or_else(|| ConfigError::Invalid("DEPLOY_STRATEGY".into(), deploy_strategy_raw))?;

        Ok(Self {
            listen_addr: or("LISTEN_ADDR", "0.0.0.0:8080"),
            root_path: or("ROOT_PATH", ""),
            cors_origins: or("CORS_ORIGINS", "*")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            max_body_bytes: parse_usize("MAX_BODY_BYTES", 2 * 1024 * 1024)?,
            request_timeout_secs: parse_u64("REQUEST_TIMEOUT_SECS", 30)?,
            log_filter: or("LOG_LEVEL", "info,flowplane=debug"),

            database_url: required("DATABASE_URL")?,
            database_max_connections: u32::try_from(parse_usize("DATABASE_MAX_CONNECTIONS", 20)?)
                .unwrap_or(20),

            user_jwt_secret: required("USER_JWT_SECRET")?,
            user_jwt_issuer: required("USER_JWT_ISSUER")?,
            user_jwt_audience: or("USER_JWT_AUDIENCE", "authenticated"),
            m2m_jwt_secret: required("M2M_JWT_SECRET")?,
            m2m_jwt_issuer: required("M2M_JWT_ISSUER")?,
            m2m_jwt_audience: or("M2M_JWT_AUDIENCE", "flowplane-services"),
            m2m_token_ttl_secs: parse_u64("M2M_TOKEN_TTL_SECS", 900)?,
            auth_cache_ttl_secs: parse_u64("AUTH_CACHE_TTL_SECS", 30)?,

            admin_email: or("ADMIN_EMAIL", ""),
            admin_password: or("ADMIN_PASSWORD", ""),
            provider_base_url: required("PROVIDER_BASE_URL")?,
            provider_api_key: get("PROVIDER_API_KEY"),
            credentials_path: or("CREDENTIALS_PATH", "./flowplane-credentials.json"),

            build_strategy,
            deploy_strategy,
            registry_host: or("REGISTRY_HOST", "registry.flowplane.dev"),
            registry_token: get("REGISTRY_TOKEN"),
            runtime_image: or("RUNTIME_IMAGE", "flowplane/agent-runtime:latest"),
            ci_api_base: or("CI_API_BASE", "https://api.github.com"),
            ci_owner: or("CI_OWNER", ""),
            ci_repo: or("CI_REPO", ""),
            ci_workflow: or("CI_WORKFLOW", "build-agent-image.yml"),
            ci_ref: or("CI_REF", "main"),
            ci_token: or("CI_TOKEN", ""),
            hosted_build_api_base: or("HOSTED_BUILD_API_BASE", ""),
            hosted_build_token: or("HOSTED_BUILD_TOKEN", ""),
            serverless_api_base: or("SERVERLESS_API_BASE", ""),
            serverless_token: or("SERVERLESS_TOKEN", ""),
            cluster_namespace: or("CLUSTER_NAMESPACE", "agent-runtimes"),
            worker_count: parse_usize("WORKER_COUNT", 2)?.max(1),
            lease_secs: parse_u64("LEASE_SECS", 300)?,
            stage_timeout_secs: parse_u64("STAGE_TIMEOUT_SECS", 300)?,
            pipeline_timeout_secs: parse_u64("PIPELINE_TIMEOUT_SECS", 900)?,

            ws_queue_depth: parse_usize("WS_QUEUE_DEPTH", 64)?,
            persist_assistant_replies: parse_bool("PERSIST_ASSISTANT_REPLIES", true)?,
        })
    }

    /// Base path the API is served under.
    #[must_use]
    pub fn api_base(&self) -> String {
        let root = self.root_path.trim_end_matches('/');
        format!("{root}/api/v1")
    }

    /// Handler timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn minimal() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DATABASE_URL", "postgres://localhost/flowplane"),
            ("USER_JWT_SECRET", "user-secret"),
            ("USER_JWT_ISSUER", "https://id.example.com"),
            ("M2M_JWT_SECRET", "m2m-secret"),
            ("M2M_JWT_ISSUER", "https://auth.flowplane.local"),
            ("PROVIDER_BASE_URL", "https://id.example.com"),
        ])
    }

    fn load(vars: &HashMap<&str, &str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).map(ToString::to_string))
    }

    #[test]
    fn minimal_environment_gets_defaults() {
        let config = load(&minimal()).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.user_jwt_audience, "authenticated");
        assert_eq!(config.m2m_token_ttl_secs, 900);
        assert_eq!(config.pipeline_timeout_secs, 900);
        assert_eq!(config.api_base(), "/api/v1");
        assert!(config.persist_assistant_replies);
    }

    #[test]
    fn missing_database_url_is_fatal() {
        let mut vars = minimal();
        vars.remove("DATABASE_URL");
        assert!(matches!(load(&vars), Err(ConfigError::Missing(key)) if key == "DATABASE_URL"));
    }

    #[test]
    fn malformed_number_is_reported() {
        let mut vars = minimal();
        vars.insert("WORKER_COUNT", "many");
        assert!(matches!(load(&vars), Err(ConfigError::Invalid(key, _)) if key == "WORKER_COUNT"));
    }

    #[test]
    fn strategy_selectors_parse() {
        let mut vars = minimal();
        vars.insert("BUILD_STRATEGY", "ci_driven");
        vars.insert("DEPLOY_STRATEGY", "cluster");
        let config = load(&vars).unwrap();
        assert_eq!(config.build_strategy, BuildStrategyKind::CiDriven);
        assert_eq!(config.deploy_strategy, DeployStrategyKind::Cluster);

        vars.insert("BUILD_STRATEGY", "docker");
        assert!(load(&vars).is_err());
    }

    #[test]
    fn root_path_prefixes_api_base() {
        let mut vars = minimal();
        vars.insert("ROOT_PATH", "/platform");
        let config = load(&vars).unwrap();
        assert_eq!(config.api_base(), "/platform/api/v1");
    }

    #[test]
    fn unknown_prefixed_variables_are_ignored() {
        let mut vars = minimal();
        vars.insert("SOMETHING_ELSE_ENTIRELY", "ignored");
        assert!(load(&vars).is_ok());
    }
}
