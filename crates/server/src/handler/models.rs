use crate::AppState;
use axum::Json;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use llm_relay_core::error::RelayError;
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
pub struct ModelsQuery {
    pub provider: Option<String>,
    pub format: Option<String>,
}

/// Union of the providers' advertised model lists. `?provider=` filters;
/// `?format=anthropic|openai|raw` selects the envelope shape.
pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ModelsQuery>,
) -> Result<impl IntoResponse, RelayError> {
    let descriptors: Vec<_> = state
        .registry
        .list()
        .into_iter()
        .filter(|d| {
            query
                .provider
                .as_deref()
                .is_none_or(|wanted| d.name == wanted)
        })
        .collect();

    if let Some(wanted) = &query.provider
        && descriptors.is_empty()
    {
        return Err(RelayError::ProviderNotFound(wanted.clone()));
    }

    let response = match query.format.as_deref().unwrap_or("anthropic") {
        "openai" => {
            let created = chrono::Utc::now().timestamp();
            let data: Vec<Value> = descriptors
                .iter()
                .flat_map(|d| {
                    d.models.iter().map(move |m| {
                        json!({
                            "id": m,
                            "object": "model",
                            "created": created,
                            "owned_by": d.name,
                        })
                    })
                })
                .collect();
            json!({"object": "list", "data": data})
        }
        "raw" => {
            let mut providers = serde_json::Map::new();
            for d in &descriptors {
                providers.insert(d.name.clone(), json!(d.models));
            }
            Value::Object(providers)
        }
        _ => {
            let created_at = chrono::Utc::now().to_rfc3339();
            let data: Vec<Value> = descriptors
                .iter()
                .flat_map(|d| {
                    let created_at = created_at.clone();
                    d.models.iter().map(move |m| {
                        json!({
                            "type": "model",
                            "id": m,
                            "display_name": m,
                            "created_at": created_at,
                        })
                    })
                })
                .collect();
            let first_id = data.first().and_then(|m| m.get("id")).cloned();
            let last_id = data.last().and_then(|m| m.get("id")).cloned();
            json!({
                "data": data,
                "has_more": false,
                "first_id": first_id,
                "last_id": last_id,
            })
        }
    };

    Ok(Json(response))
}
