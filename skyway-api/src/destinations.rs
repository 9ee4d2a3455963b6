use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use skyway_core::access::Resource;
use skyway_core::cache::CacheKind;
use skyway_core::models::{
    Coordinates, Destination, DestinationDetail, DestinationInput, DestinationPatch,
    DestinationSummary,
};
use skyway_core::repository::DestinationQuery;
use skyway_core::validation::FieldErrors;
use std::collections::BTreeMap;
use tracing::info;

use crate::error::AppError;
use crate::extract::{JsonBody, RowId};
use crate::middleware::Identity;
use crate::params::{Paginated, Params};
use crate::response::{cached, created, no_content, ok, to_json};
use crate::state::AppState;

const RESOURCE: Resource = Resource::Destinations;
const DEFAULT_RADIUS_KM: f64 = 100.0;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/destinations/", get(list).post(create))
        .route("/destinations/active/", get(active))
        .route("/destinations/by-province/", get(by_province))
        .route(
            "/destinations/{id}/",
            get(retrieve).put(update).patch(partial_update).delete(destroy),
        )
        .route("/destinations/{id}/toggle-active/", post(toggle_active))
        .route("/destinations/{id}/nearby/", get(nearby))
}

/// `province` (contains), `is_active`, and `active_only=true`.
fn query(params: &Params) -> Result<DestinationQuery, AppError> {
    let mut is_active = params.flag("is_active")?;
    if params.flag("active_only")? == Some(true) {
        is_active = Some(true);
    }
    Ok(DestinationQuery {
        search: params.search(),
        province: params.string("province"),
        is_active,
        ordering: params.ordering(),
    })
}

async fn load(state: &AppState, id: i64) -> Result<Destination, AppError> {
    state
        .destinations
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Destination"))
}

// ============================================================================
// Reads
// ============================================================================

/// GET /api/destinations/
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
    let query = query(params)?;
    let request = params.page_request(state.page_size)?;
    let page = state.destinations.list(&query, Some(request)).await?;
    to_json(&Paginated::new(
        params,
        request,
        page.map(|d| DestinationSummary::from(&d)),
    )?)
}

/// GET /api/destinations/{id}/
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
    let destination = load(state, id).await?;
    to_json(&DestinationDetail::from(&destination))
}

/// GET /api/destinations/active/
async fn active(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "active")?;
    let key = state
        .cache
        .key(RESOURCE, CacheKind::View("active"), identity.caller(), params.pairs());
    cached(&state, key, || render_active(&state, &params)).await
}

async fn render_active(state: &AppState, params: &Params) -> Result<String, AppError> {
    let query = DestinationQuery {
        is_active: Some(true),
        ..query(params)?
    };
    let page = state.destinations.list(&query, None).await?;
    let rows: Vec<DestinationSummary> = page.items.iter().map(DestinationSummary::from).collect();
    to_json(&rows)
}

/// GET /api/destinations/by-province/
///
/// Destinations grouped under their province name.
async fn by_province(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "by_province")?;
    let key = state.cache.key(
        RESOURCE,
        CacheKind::View("by_province"),
        identity.caller(),
        params.pairs(),
    );
    cached(&state, key, || render_by_province(&state, &params)).await
}

async fn render_by_province(state: &AppState, params: &Params) -> Result<String, AppError> {
    let page = state.destinations.list(&query(params)?, None).await?;
    let mut grouped: BTreeMap<String, Vec<DestinationSummary>> = BTreeMap::new();
    for destination in &page.items {
        grouped
            .entry(destination.province.clone())
            .or_default()
            .push(DestinationSummary::from(destination));
    }
    to_json(&grouped)
}

#[derive(Debug, Serialize)]
struct NearbyDestination {
    #[serde(flatten)]
    destination: DestinationSummary,
    coordinates: Coordinates,
    distance_km: f64,
}

#[derive(Debug, Serialize)]
struct NearbyResponse {
    destination: DestinationSummary,
    coordinates: Coordinates,
    radius_km: f64,
    results: Vec<NearbyDestination>,
}

/// GET /api/destinations/{id}/nearby/?radius_km=
///
/// Other active destinations within `radius_km` great-circle kilometres,
/// closest first.
async fn nearby(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "nearby")?;
    let name = format!("nearby:{}", id);
    let key = state
        .cache
        .key(RESOURCE, CacheKind::View(&name), identity.caller(), params.pairs());
    cached(&state, key, || render_nearby(&state, id, &params)).await
}

async fn render_nearby(state: &AppState, id: i64, params: &Params) -> Result<String, AppError> {
    let origin = load(state, id).await?;
    let radius_km = match params.get("radius_km") {
        None => DEFAULT_RADIUS_KM,
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|r| r.is_finite() && *r >= 0.0)
            .ok_or_else(|| {
                AppError::Validation(FieldErrors::single("radius_km", "A valid non-negative number is required."))
            })?,
    };
    let Some(center) = origin.coordinates() else {
        return Err(AppError::BadRequest(
            "This destination doesn't have coordinates".into(),
        ));
    };

    let candidates = state
        .destinations
        .list(&DestinationQuery::active(), None)
        .await?;
    let mut results: Vec<NearbyDestination> = candidates
        .items
        .iter()
        .filter(|d| d.id != origin.id)
        .filter_map(|d| {
            let coordinates = d.coordinates()?;
            let distance_km = center.distance_km(&coordinates);
            (distance_km <= radius_km).then(|| NearbyDestination {
                destination: DestinationSummary::from(d),
                coordinates,
                distance_km: (distance_km * 100.0).round() / 100.0,
            })
        })
        .collect();
    results.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

    to_json(&NearbyResponse {
        destination: DestinationSummary::from(&origin),
        coordinates: center,
        radius_km,
        results,
    })
}

// ============================================================================
// Writes
// ============================================================================

/// POST /api/destinations/
async fn create(
    State(state): State<AppState>,
    identity: Identity,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "create")?;
    let input = body.parse::<DestinationInput>()?.normalized();
    input.validate_fields().into_result()?;

    let destination = state.destinations.insert(&input).await?;
    state.cache.invalidate(RESOURCE, Some(destination.id)).await;
    info!(destination_id = destination.id, code = %destination.code, "destination created");
    created(&DestinationDetail::from(&destination))
}

/// PUT /api/destinations/{id}/
async fn update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "update")?;
    load(&state, id).await?;
    let input = body.parse::<DestinationInput>()?.normalized();
    save(&state, id, input).await
}

/// PATCH /api/destinations/{id}/
async fn partial_update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "partial_update")?;
    let current = load(&state, id).await?;
    let input = body
        .parse::<DestinationPatch>()?
        .apply(&current)
        .normalized();
    save(&state, id, input).await
}

async fn save(state: &AppState, id: i64, input: DestinationInput) -> Result<Response, AppError> {
    input.validate_fields().into_result()?;
    let destination = state
        .destinations
        .update(id, &input)
        .await?
        .ok_or_else(|| AppError::not_found("Destination"))?;
    state.cache.invalidate(RESOURCE, Some(id)).await;
    ok(&DestinationDetail::from(&destination))
}

/// DELETE /api/destinations/{id}/
///
/// Refused while flight requests still point at the destination.
async fn destroy(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "destroy")?;
    if !state.destinations.delete(id).await? {
        return Err(AppError::not_found("Destination"));
    }
    state.cache.invalidate(RESOURCE, Some(id)).await;
    info!(destination_id = id, "destination deleted");
    Ok(no_content())
}

/// POST /api/destinations/{id}/toggle-active/
async fn toggle_active(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "toggle_active")?;
    let current = load(&state, id).await?;
    let destination = state
        .destinations
        .set_active(id, !current.is_active)
        .await?
        .ok_or_else(|| AppError::not_found("Destination"))?;
    state.cache.invalidate(RESOURCE, Some(id)).await;
    info!(destination_id = id, is_active = destination.is_active, "destination toggled");
    ok(&DestinationDetail::from(&destination))
}
