pub mod auth;
pub mod dispatch;
pub mod handler;
pub mod streaming;

use axum::{Router, middleware as axum_mw};
use llm_relay_core::config::Config;
use llm_relay_core::keys::KeyRotator;
use llm_relay_core::middleware::MiddlewareChain;
use llm_relay_core::registry::Registry;
use llm_relay_oauth::manager::TokenManager;
use llm_relay_provider::UpstreamFactory;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub rotator: Arc<KeyRotator>,
    pub tokens: Arc<TokenManager>,
    pub upstreams: Arc<UpstreamFactory>,
    pub middleware: Arc<MiddlewareChain>,
}

pub fn build_router(state: AppState) -> Router {
    let body_limit_bytes = state.config.body_limit_mb * 1024 * 1024;

    // Public routes — no auth required
    let public_routes = Router::new()
        .route("/health", axum::routing::get(handler::health::health))
        .route(
            "/test-connection",
            axum::routing::get(handler::health::test_connection),
        );

    // API routes — proxy key required when configured, body size limited
    let api_routes = Router::new()
        .route(
            "/v1/messages",
            axum::routing::post(handler::messages::messages),
        )
        .route(
            "/v1/messages/count_tokens",
            axum::routing::post(handler::count_tokens::count_tokens),
        )
        .route(
            "/v1/models",
            axum::routing::get(handler::models::list_models),
        )
        .layer(RequestBodyLimitLayer::new(body_limit_bytes))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
