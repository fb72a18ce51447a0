use super::{ApiError, ApiResult};
use crate::config::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use reqwest::header;
use serde::Deserialize;
use serde_json::{Map, Value};
use simmer_core::Recipe;
use std::sync::Arc;

/// Execute a recipe supplied inline or by reference.
///
/// A body of `{"type": "recipe-ref", "recipe": "<uri>", ...}` dereferences
/// the URI first; any other JSON object is treated as the recipe document
/// itself. Returns the stage-id-keyed terminal result aggregate.
pub async fn execute_recipe(
    State(state): State<Arc<AppState>>,
    Json(request): Json<Value>,
) -> ApiResult<Json<Map<String, Value>>> {
    let run_id = uuid::Uuid::new_v4();
    let (recipe, variables) = prepare_run(&state, request).await?;

    tracing::info!(%run_id, recipe = %recipe.id, "executing recipe");

    let content = state.runner.run(recipe, &variables).await?;

    tracing::info!(%run_id, "recipe completed");
    Ok(Json(content))
}

/// Resolves the request into a recipe document plus effective variable
/// bindings. Request-level bindings take precedence over bindings carried
/// in the document.
async fn prepare_run(
    state: &AppState,
    request: Value,
) -> Result<(Recipe, Map<String, Value>), ApiError> {
    let Value::Object(body) = request else {
        return Err(ApiError::bad_request("Recipe document is not a JSON object."));
    };

    let request_variables = body.get("variables").and_then(Value::as_object).cloned();

    let document = if body.get("type").and_then(Value::as_str) == Some("recipe-ref") {
        let uri = body.get("recipe").and_then(Value::as_str).ok_or_else(|| {
            ApiError::bad_request(
                "Missing or invalid 'recipe' field. Expected a recipe URI string.",
            )
        })?;
        let document = fetch_recipe(state, uri).await?;
        if !document.is_object() {
            return Err(ApiError::bad_request("Recipe document is not a JSON object."));
        }
        document
    } else {
        Value::Object(body)
    };

    let recipe: Recipe = serde_json::from_value(document)
        .map_err(|e| ApiError::bad_request(format!("Invalid recipe document: {e}")))?;

    let variables = request_variables
        .or_else(|| recipe.variables.clone())
        .unwrap_or_default();

    Ok((recipe, variables))
}

async fn fetch_recipe(state: &AppState, uri: &str) -> Result<Value, ApiError> {
    let response = state
        .http
        .get(uri)
        .header(header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| ApiError::upstream("Error while fetching recipe document.", e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(1000).collect();
        return Err(ApiError::upstream(
            "Failed to fetch recipe document.",
            format!("{uri} returned {status}: {snippet}"),
        ));
    }

    response.json().await.map_err(|e| {
        ApiError::upstream("Recipe document is not valid JSON.", e.to_string())
    })
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Job-completion callback from a remote process service. Forwards the
/// outcome to the callback registry; a signal with no registered waiter is
/// dropped there.
pub async fn job_callback(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Query(query): Query<CallbackQuery>,
    Json(payload): Json<Value>,
) -> ApiResult<StatusCode> {
    tracing::info!(%job_id, kind = %query.kind, "callback received");

    match query.kind.as_str() {
        "success" => state.registry.success(&job_id, payload).await,
        "failed" => state.registry.failed(&job_id, payload).await,
        other => {
            return Err(ApiError::bad_request(format!(
                "Unknown callback type '{other}'. Expected 'success' or 'failed'."
            )))
        }
    }

    Ok(StatusCode::OK)
}
