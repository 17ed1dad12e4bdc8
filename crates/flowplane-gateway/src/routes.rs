//! Router configuration.

use axum::middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::handlers::{admin, agents, auth, conversations, deployments, health, ws};
use crate::request_id::request_id_middleware;
use crate::state::AppState;

/// Create the gateway router: every service's prefix under `/api/v1`
/// (optionally behind the configured root path), plus health endpoints.
pub fn create_router(state: AppState, config: &Config) -> Router {
    let api = Router::new()
        // Identity: users
        .route("/auth/users/register", post(auth::register))
        .route("/auth/users/login", post(auth::login))
        .route("/auth/users/me", get(auth::me).patch(auth::update_me))
        // Identity: token endpoint
        .route("/auth/token", post(auth::token))
        // Identity: admin
        .route("/admin/roles", post(admin::create_role).get(admin::list_roles))
        .route("/admin/roles/{role_id}", delete(admin::delete_role))
        .route(
            "/admin/roles/{role_id}/permissions",
            post(admin::attach_permission),
        )
        .route(
            "/admin/permissions",
            post(admin::create_permission).get(admin::list_permissions),
        )
        .route(
            "/admin/permissions/{permission_id}",
            delete(admin::delete_permission),
        )
        .route("/admin/clients", post(admin::create_client))
        .route(
            "/admin/clients/{client_id}",
            delete(admin::revoke_client),
        )
        .route(
            "/admin/clients/{client_id}/roles",
            post(admin::assign_client_role),
        )
        // Catalog
        .route("/agents/", post(agents::create_agent).get(agents::list_agents))
        .route(
            "/agents/{agent_id}",
            get(agents::get_agent).patch(agents::update_agent),
        )
        .route("/agents/{agent_id}/archive", post(agents::archive_agent))
        .route(
            "/agents/{agent_id}/versions",
            post(agents::create_version).get(agents::list_versions),
        )
        .route(
            "/agents/{agent_id}/versions/latest",
            get(agents::latest_version),
        )
        .route(
            "/agents/{agent_id}/versions/{version_id}",
            get(agents::get_version),
        )
        .route(
            "/agents/{agent_id}/versions/{version_id}/publish",
            post(agents::publish_version),
        )
        // Deployments
        .route(
            "/deployments/",
            post(deployments::create_deployment).get(deployments::list_deployments),
        )
        .route(
            "/deployments/{deployment_id}",
            get(deployments::get_deployment).delete(deployments::stop_deployment),
        )
        .route(
            "/deployments/{deployment_id}/transitions",
            get(deployments::list_transitions),
        )
        // Conversations
        .route(
            "/conversations/",
            post(conversations::create_conversation),
        )
        .route(
            "/conversations/{conversation_id}",
            get(conversations::get_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            post(conversations::append_message).get(conversations::list_messages),
        )
        // WebSocket
        .route("/ws/conversations/{conversation_id}", get(ws::conversation_ws))
        // Health (inside the API base so proxies route it too)
        .route("/health/liveness", get(health::liveness))
        .route("/health/readiness", get(health::readiness));

    let cors = build_cors_layer(&config.cors_origins);

    Router::new()
        .nest(&config.api_base(), api)
        .route("/health/liveness", get(health::liveness))
        .route("/health/readiness", get(health::readiness))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .with_state(state)
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_any_origin() {
        let _layer = build_cors_layer(&["*".to_string()]);
    }

    #[test]
    fn cors_specific_origins() {
        let _layer = build_cors_layer(&[
            "http://localhost:3000".to_string(),
            "https://studio.flowplane.dev".to_string(),
        ]);
    }
}
