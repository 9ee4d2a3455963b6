use axum::{extract::State, response::Response, routing::get, Router};
use skyway_core::access::Resource;
use skyway_core::cache::CacheKind;
use skyway_core::models::{Airline, Flight, FlightDetail, FlightInput, FlightPatch, FlightStatus, FlightSummary};
use skyway_core::repository::{FlightQuery, Page};
use std::collections::HashMap;
use tracing::info;

use crate::error::AppError;
use crate::extract::{JsonBody, RowId};
use crate::middleware::Identity;
use crate::params::{Paginated, Params};
use crate::response::{cached, created, no_content, ok, to_json};
use crate::state::AppState;

const RESOURCE: Resource = Resource::Flights;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/flights/", get(list).post(create))
        .route("/flights/search-route/", get(search_route))
        .route("/flights/available/", get(available))
        .route("/flights/by-airline/", get(by_airline))
        .route(
            "/flights/{id}/",
            get(retrieve).put(update).patch(partial_update).delete(destroy),
        )
}

fn query(params: &Params) -> Result<FlightQuery, AppError> {
    Ok(FlightQuery {
        search: params.search(),
        status: params.parse::<FlightStatus>("status")?,
        airline: params.id("airline")?,
        origin: params.string("origin"),
        destination: params.string("destination"),
        available_only: false,
        ordering: params.ordering(),
    })
}

async fn load(state: &AppState, id: i64) -> Result<Flight, AppError> {
    state
        .flights
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("Flight"))
}

async fn airline_of(state: &AppState, flight: &Flight) -> Result<Airline, AppError> {
    state.airlines.get(flight.airline_id).await?.ok_or_else(|| {
        AppError::Internal(format!(
            "flight {} references missing airline {}",
            flight.id, flight.airline_id
        ))
    })
}

/// Summaries with their airline embedded, one airline lookup per batch.
async fn summaries(state: &AppState, flights: Vec<Flight>) -> Result<Vec<FlightSummary>, AppError> {
    let mut ids: Vec<i64> = flights.iter().map(|f| f.airline_id).collect();
    ids.sort_unstable();
    ids.dedup();
    let airlines: HashMap<i64, Airline> = state
        .airlines
        .get_many(&ids)
        .await?
        .into_iter()
        .map(|a| (a.id, a))
        .collect();

    flights
        .iter()
        .map(|f| {
            airlines
                .get(&f.airline_id)
                .map(|a| FlightSummary::new(f, a))
                .ok_or_else(|| {
                    AppError::Internal(format!("flight {} references missing airline", f.id))
                })
        })
        .collect()
}

/// Unpaginated view over the list filters, narrowed by `narrow`.
async fn render_rows(
    state: &AppState,
    params: &Params,
    narrow: impl FnOnce(FlightQuery) -> FlightQuery,
) -> Result<String, AppError> {
    let query = narrow(query(params)?);
    let page = state.flights.list(&query, None).await?;
    to_json(&summaries(state, page.items).await?)
}

// ============================================================================
// Reads
// ============================================================================

/// GET /api/flights/
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
    let page = state.flights.list(&query, Some(request)).await?;
    let page = Page {
        count: page.count,
        items: summaries(state, page.items).await?,
    };
    to_json(&Paginated::new(params, request, page)?)
}

/// GET /api/flights/{id}/
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
    let flight = load(state, id).await?;
    let airline = airline_of(state, &flight).await?;
    to_json(&FlightDetail::new(&flight, &airline))
}

/// GET /api/flights/search-route/?origin=&destination=
async fn search_route(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "search_route")?;
    params.required("origin")?;
    params.required("destination")?;
    let key = state.cache.key(
        RESOURCE,
        CacheKind::View("search_route"),
        identity.caller(),
        params.pairs(),
    );
    cached(&state, key, || render_rows(&state, &params, |q| q)).await
}

/// GET /api/flights/available/
///
/// Scheduled flights with seats left.
async fn available(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "available")?;
    let key = state.cache.key(
        RESOURCE,
        CacheKind::View("available"),
        identity.caller(),
        params.pairs(),
    );
    cached(&state, key, || {
        render_rows(&state, &params, |q| FlightQuery {
            available_only: true,
            ..q
        })
    })
    .await
}

/// GET /api/flights/by-airline/?airline_id=
async fn by_airline(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "by_airline")?;
    let airline = params
        .id("airline_id")?
        .ok_or_else(|| AppError::BadRequest("airline_id is required".into()))?;
    let key = state.cache.key(
        RESOURCE,
        CacheKind::View("by_airline"),
        identity.caller(),
        params.pairs(),
    );
    cached(&state, key, || {
        render_rows(&state, &params, move |q| FlightQuery {
            airline: Some(airline),
            ..q
        })
    })
    .await
}

// ============================================================================
// Writes
// ============================================================================

/// POST /api/flights/
async fn create(
    State(state): State<AppState>,
    identity: Identity,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "create")?;
    let input = body.parse::<FlightInput>()?.normalized();
    input.validate_fields().into_result()?;

    let flight = state.flights.insert(&input).await?;
    state.cache.invalidate(RESOURCE, Some(flight.id)).await;
    info!(flight_id = flight.id, flight_code = %flight.flight_code, "flight created");
    let airline = airline_of(&state, &flight).await?;
    created(&FlightDetail::new(&flight, &airline))
}

/// PUT /api/flights/{id}/
async fn update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "update")?;
    load(&state, id).await?;
    let input = body.parse::<FlightInput>()?.normalized();
    save(&state, id, input).await
}

/// PATCH /api/flights/{id}/
async fn partial_update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "partial_update")?;
    let current = load(&state, id).await?;
    let input = body.parse::<FlightPatch>()?.apply(&current).normalized();
    save(&state, id, input).await
}

async fn save(state: &AppState, id: i64, input: FlightInput) -> Result<Response, AppError> {
    input.validate_fields().into_result()?;
    let flight = state
        .flights
        .update(id, &input)
        .await?
        .ok_or_else(|| AppError::not_found("Flight"))?;
    state.cache.invalidate(RESOURCE, Some(id)).await;
    let airline = airline_of(state, &flight).await?;
    ok(&FlightDetail::new(&flight, &airline))
}

/// DELETE /api/flights/{id}/
async fn destroy(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "destroy")?;
    if !state.flights.delete(id).await? {
        return Err(AppError::not_found("Flight"));
    }
    state.cache.invalidate(RESOURCE, Some(id)).await;
    info!(flight_id = id, "flight deleted");
    Ok(no_content())
}
