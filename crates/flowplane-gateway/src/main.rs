//! Gateway entry point: configuration, storage, bootstrap, worker pool,
//! and the HTTP server. Bootstrap failures are fatal; the process refuses
//! to serve traffic.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowplane_auth::{JwtVerifier, TokenFamily, TokenMinter, VerifierConfig};
use flowplane_catalog::{CatalogConfig, CatalogService};
use flowplane_conversation::{
    ConversationHub, ConversationService, HttpRuntimeClient, TurnRunner,
};
use flowplane_deploy::{
    CiConfig, CiDrivenBuild, ClusterConfig, ClusterTarget, DeploymentEngine, DeploymentWorker,
    EngineConfig, HostedBuild, HostedBuildConfig, HttpImageRegistry, ServerlessConfig,
    ServerlessTarget, Strategies, WorkerConfig,
};
use flowplane_gateway::{create_router, AppState, Config, HubTokenSource};
use flowplane_identity::{
    bootstrap, BootstrapConfig, FileCredentialStore, HttpIdentityProvider, IdentityService,
    ServiceTokenProvider, ServiceClientSpec, StoreRoleSource,
};
use flowplane_store::{BuildStrategyKind, DeployStrategyKind, PgStore};

/// Well-known machine-client name of the conversation hub.
const CONVERSATION_CLIENT: &str = "conversation_service_client";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(listen_addr = %config.listen_addr, "Starting flowplane gateway");

    // Storage
    let store = Arc::new(
        PgStore::connect(&config.database_url, config.database_max_connections).await?,
    );
    store.migrate().await?;
    tracing::info!("Database connected and migrated");

    // Identity
    let provider = Arc::new(HttpIdentityProvider::new(
        config.provider_base_url.clone(),
        config.provider_api_key.clone(),
    )?);
    let machine_family = TokenFamily {
        secret: config.m2m_jwt_secret.clone(),
        issuer: config.m2m_jwt_issuer.clone(),
        audience: config.m2m_jwt_audience.clone(),
    };
    let identity = Arc::new(IdentityService::new(
        store.clone(),
        provider.clone(),
        TokenMinter::new(machine_family.clone()),
        Duration::from_secs(config.m2m_token_ttl_secs),
    ));

    // Bootstrap (fatal on failure)
    let credentials = FileCredentialStore::new(&config.credentials_path);
    let outcome = bootstrap::run(
        &identity,
        store.as_ref(),
        provider.as_ref(),
        &credentials,
        &BootstrapConfig {
            admin_email: config.admin_email.clone(),
            admin_password: config.admin_password.clone(),
            service_clients: vec![ServiceClientSpec {
                name: CONVERSATION_CLIENT.to_string(),
                roles: vec!["conversation_client".to_string()],
            }],
        },
    )
    .await?;

    // Token verifier shared by HTTP handlers and WS upgrades
    let verifier = Arc::new(JwtVerifier::new(
        VerifierConfig {
            user: TokenFamily {
                secret: config.user_jwt_secret.clone(),
                issuer: config.user_jwt_issuer.clone(),
                audience: config.user_jwt_audience.clone(),
            },
            machine: machine_family,
            leeway_secs: VerifierConfig::DEFAULT_LEEWAY_SECS,
            cache_ttl: Duration::from_secs(config.auth_cache_ttl_secs),
            cache_capacity: 1024,
        },
        Arc::new(StoreRoleSource::new(store.clone())),
    ));

    // Catalog
    let catalog = Arc::new(CatalogService::new(
        store.clone(),
        CatalogConfig::default(),
    ));

    // Deployment strategies per configuration
    let mut strategies = Strategies::default();
    if !config.ci_token.is_empty() {
        strategies = strategies.with_build(
            BuildStrategyKind::CiDriven,
            Arc::new(CiDrivenBuild::new(CiConfig {
                api_base: config.ci_api_base.clone(),
                owner: config.ci_owner.clone(),
                repo: config.ci_repo.clone(),
                workflow: config.ci_workflow.clone(),
                git_ref: config.ci_ref.clone(),
                token: config.ci_token.clone(),
            })?),
        );
    }
    if !config.hosted_build_api_base.is_empty() {
        strategies = strategies.with_build(
            BuildStrategyKind::HostedBuild,
            Arc::new(HostedBuild::new(HostedBuildConfig {
                api_base: config.hosted_build_api_base.clone(),
                token: config.hosted_build_token.clone(),
            })?),
        );
    }
    if !config.serverless_api_base.is_empty() {
        strategies = strategies.with_target(
            DeployStrategyKind::Serverless,
            Arc::new(ServerlessTarget::new(ServerlessConfig {
                api_base: config.serverless_api_base.clone(),
                token: config.serverless_token.clone(),
            })?),
        );
    }
    if config.deploy_strategy == DeployStrategyKind::Cluster {
        strategies = strategies.with_target(
            DeployStrategyKind::Cluster,
            Arc::new(
                ClusterTarget::new(ClusterConfig {
                    namespace: config.cluster_namespace.clone(),
                })
                .await?,
            ),
        );
    }
    let strategies = Arc::new(strategies);

    let deployments = Arc::new(DeploymentEngine::new(
        store.clone(),
        store.clone(),
        strategies.clone(),
        EngineConfig {
            default_build_strategy: config.build_strategy,
            default_deploy_strategy: config.deploy_strategy,
        },
    ));

    // Worker pool
    let registry = Arc::new(HttpImageRegistry::new(config.registry_token.clone())?);
    let worker_config = WorkerConfig {
        lease: Duration::from_secs(config.lease_secs),
        stage_timeout: Duration::from_secs(config.stage_timeout_secs),
        pipeline_timeout: Duration::from_secs(config.pipeline_timeout_secs),
        registry_host: config.registry_host.clone(),
        runtime_image: config.runtime_image.clone(),
        ..WorkerConfig::default()
    };
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    for index in 0..config.worker_count {
        let worker = Arc::new(DeploymentWorker::new(
            format!("worker-{index}"),
            store.clone(),
            store.clone(),
            registry.clone(),
            strategies.clone(),
            worker_config.clone(),
        ));
        tokio::spawn(worker.run(shutdown_rx.clone()));
    }
    tracing::info!(workers = config.worker_count, "Deployment workers started");

    // Conversation hub
    let hub_credentials = outcome
        .clients
        .get(CONVERSATION_CLIENT)
        .cloned()
        .ok_or("bootstrap did not yield conversation service credentials")?;
    let token_provider = Arc::new(ServiceTokenProvider::new(
        identity.clone(),
        hub_credentials,
    ));
    let hub = Arc::new(ConversationHub::new(config.ws_queue_depth));
    let turns = Arc::new(TurnRunner::new(
        store.clone(),
        store.clone(),
        Arc::new(HttpRuntimeClient::new()?),
        Arc::new(HubTokenSource::new(token_provider)),
        hub.clone(),
        config.persist_assistant_replies,
    ));
    let conversations = Arc::new(ConversationService::new(store.clone(), hub, turns));

    // HTTP server
    let state = AppState {
        verifier,
        identity,
        catalog,
        deployments,
        conversations,
        store: store.clone(),
        ready: Arc::new(AtomicBool::new(false)),
    };
    state.mark_ready();

    let app = create_router(state, &config);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(listen_addr = %config.listen_addr, "Serving");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    Ok(())
}
