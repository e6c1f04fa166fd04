//! Aggregated model catalogue.
//!
//! Mapped models are reported through their default instance's adapter;
//! instances whose adapters expose extra catalogue entries contribute
//! those too.

use std::collections::BTreeSet;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::gateway::ModelInfo;

use super::{auth_headers, render_error, GatewayState};

pub(super) async fn list_models(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if let Err(err) = state.gate().authenticate(&auth_headers(&headers)).await {
        state.metrics().record_auth_failure();
        return render_error("/v1/models", &err);
    }

    let registry = state.registry();
    let mut seen = BTreeSet::new();
    let mut models: Vec<ModelInfo> = Vec::new();

    // Mapped models first: these are the names clients are expected to
    // send.
    for (model, mapping) in registry.model_router().mappings() {
        let Some(instance) = registry.provider(&mapping.default_instance) else {
            continue;
        };
        if !instance.enabled {
            continue;
        }
        let info = match state.adapter(&instance.id) {
            Some(adapter) => adapter.get_model_info(model).await,
            None => None,
        };
        models.push(info.unwrap_or_else(|| ModelInfo {
            id: model.clone(),
            name: model.clone(),
            provider: instance.kind.as_str().to_string(),
            context_window: None,
            available: true,
        }));
        seen.insert(model.clone());
    }

    // Then whatever each enabled instance advertises on its own.
    for instance in registry.providers_in_order() {
        if !instance.enabled {
            continue;
        }
        let Some(adapter) = state.adapter(&instance.id) else {
            continue;
        };
        for info in adapter.list_models().await {
            if seen.insert(info.id.clone()) {
                models.push(info);
            }
        }
    }

    Json(serde_json::json!({"object": "list", "data": models})).into_response()
}

pub(super) async fn get_model(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(err) = state.gate().authenticate(&auth_headers(&headers)).await {
        state.metrics().record_auth_failure();
        return render_error("/v1/models", &err);
    }

    let registry = state.registry();
    let route = match registry.model_router().resolve(&id, &registry) {
        Ok(route) => route,
        Err(err) => return render_error("/v1/models", &err),
    };

    let instance = route.primary();
    let info = match state.adapter(&instance.id) {
        Some(adapter) => adapter.get_model_info(&id).await,
        None => None,
    };

    match info {
        Some(info) => Json(info).into_response(),
        None => Json(ModelInfo {
            id: id.clone(),
            name: id,
            provider: instance.kind.as_str().to_string(),
            context_window: None,
            available: true,
        })
        .into_response(),
    }
}
