use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use skyway_core::access::Resource;
use skyway_core::cache::CacheKind;
use skyway_core::models::{Airline, AirlineInput, AirlinePatch, AirlineSummary};
use skyway_core::repository::AirlineQuery;
use tracing::info;

use crate::error::AppError;
use crate::extract::{JsonBody, RowId};
use crate::middleware::Identity;
use crate::params::{Paginated, Params};
use crate::response::{cached, created, no_content, ok, to_json};
use crate::state::AppState;

const RESOURCE: Resource = Resource::Airlines;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/airlines/", get(list).post(create))
        .route(
            "/airlines/{id}/",
            get(retrieve).put(update).patch(partial_update).delete(destroy),
        )
        .route("/airlines/{id}/duplicate/", post(duplicate))
}

// ============================================================================
// Reads
// ============================================================================

/// GET /api/airlines/
async fn list(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "list")?;
    let key = state
        .cache
        .key(RESOURCE, CacheKind::List, identity.caller(), params.pairs());
    cached(&state, key, || render_list(&state, &params)).await
}

async fn render_list(state: &AppState, params: &Params) -> Result<String, AppError> {
    let query = AirlineQuery {
        search: params.search(),
        ordering: params.ordering(),
    };
    let request = params.page_request(state.page_size)?;
    let page = state.airlines.list(&query, Some(request)).await?;
    to_json(&Paginated::new(
        params,
        request,
        page.map(|a| AirlineSummary::from(&a)),
    )?)
}

/// GET /api/airlines/{id}/
async fn retrieve(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "retrieve")?;
    let key = state
        .cache
        .key(RESOURCE, CacheKind::Detail(id), identity.caller(), params.pairs());
    cached(&state, key, || render_detail(&state, id)).await
}

async fn render_detail(state: &AppState, id: i64) -> Result<String, AppError> {
    to_json(&load(state, id).await?)
}

async fn load(state: &AppState, id: i64) -> Result<Airline, AppError> {
    state
        .airlines
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Airline"))
}

// ============================================================================
// Writes
// ============================================================================

/// POST /api/airlines/
async fn create(
    State(state): State<AppState>,
    identity: Identity,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "create")?;
    let input = body.parse::<AirlineInput>()?.normalized();
    input.validate_fields().into_result()?;

    let airline = state.airlines.insert(&input).await?;
    state.cache.invalidate(RESOURCE, Some(airline.id)).await;
    info!(airline_id = airline.id, code = %airline.code, "airline created");
    created(&airline)
}

/// PUT /api/airlines/{id}/
async fn update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "update")?;
    load(&state, id).await?;
    let input = body.parse::<AirlineInput>()?.normalized();
    save(&state, id, input).await
}

/// PATCH /api/airlines/{id}/
async fn partial_update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "partial_update")?;
    let current = load(&state, id).await?;
    let input = body.parse::<AirlinePatch>()?.apply(&current).normalized();
    save(&state, id, input).await
}

async fn save(state: &AppState, id: i64, input: AirlineInput) -> Result<Response, AppError> {
    input.validate_fields().into_result()?;
    let airline = state
        .airlines
        .update(id, &input)
        .await?
        .ok_or_else(|| AppError::not_found("Airline"))?;
    state.cache.invalidate(RESOURCE, Some(id)).await;
    ok(&airline)
}

/// DELETE /api/airlines/{id}/
async fn destroy(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "destroy")?;
    if !state.airlines.delete(id).await? {
        return Err(AppError::not_found("Airline"));
    }
    state.cache.invalidate(RESOURCE, Some(id)).await;
    info!(airline_id = id, "airline deleted");
    Ok(no_content())
}

#[derive(Debug, Deserialize)]
struct DuplicateRequest {
    #[serde(default)]
    new_code: Option<String>,
    #[serde(default)]
    new_name: Option<String>,
}

/// POST /api/airlines/{id}/duplicate/
///
/// Copies the logo of an existing airline under a new code and name.
async fn duplicate(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "duplicate")?;
    let source = load(&state, id).await?;
    let req = body.parse::<DuplicateRequest>()?;
    let (Some(code), Some(name)) = (
        req.new_code.filter(|c| !c.trim().is_empty()),
        req.new_name.filter(|n| !n.trim().is_empty()),
    ) else {
        return Err(AppError::BadRequest("new_code and new_name are required".into()));
    };

    let input = AirlineInput {
        code,
        name,
        logo_url: source.logo_url.clone(),
    }
    .normalized();
    input.validate_fields().into_result()?;

    let airline = state.airlines.insert(&input).await?;
    state.cache.invalidate(RESOURCE, Some(airline.id)).await;
    info!(source_id = id, airline_id = airline.id, "airline duplicated");
    created(&airline)
}
