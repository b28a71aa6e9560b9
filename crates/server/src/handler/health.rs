use crate::AppState;
use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use llm_relay_core::provider::ProviderAuth;
use serde_json::json;

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness report per provider: auth mode and whether a credential is
/// currently on hand. No upstream calls are made.
pub async fn test_connection(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<_> = state
        .registry
        .list()
        .into_iter()
        .map(|d| {
            let credentialed = match &d.auth {
                ProviderAuth::StaticKeys(_) => true,
                ProviderAuth::Oauth(_) => state.tokens.store().is_authenticated(&d.name),
                ProviderAuth::None => false,
            };
            json!({
                "name": d.name,
                "api_format": d.api_format.as_str(),
                "auth": d.auth.kind(),
                "credentialed": credentialed,
            })
        })
        .collect();

    Json(json!({
        "default_provider": state.registry.default().name,
        "providers": providers,
    }))
}
