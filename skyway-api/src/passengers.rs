use axum::{
    extract::State,
    http::StatusCode,
    response::Response,
    routing::{get, patch, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use skyway_core::access::{check_owner, Resource, Scope};
use skyway_core::cache::CacheKind;
use skyway_core::models::passenger::normalize_seat;
use skyway_core::models::{
    PassengerCategory, PassengerDetail, PassengerInput, PassengerPatch, PassengerSummary,
    PassengerType, ReservationPassenger, Gender,
};
use skyway_core::repository::{Page, PassengerQuery, StoreError};
use skyway_core::validation::FieldErrors;
use skyway_shared::Masked;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::AppError;
use crate::extract::{JsonBody, RowId};
use crate::middleware::Identity;
use crate::params::{Paginated, Params};
use crate::response::{cached, created, json_response, no_content, ok, to_json};
use crate::state::AppState;

const RESOURCE: Resource = Resource::ReservationPassengers;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reservation-passengers/", get(list).post(create))
        .route("/reservation-passengers/by-reservation/", get(by_reservation))
        .route("/reservation-passengers/main-passengers/", get(main_passengers))
        .route("/reservation-passengers/companions/", get(companions))
        .route("/reservation-passengers/adults/", get(adults))
        .route("/reservation-passengers/children/", get(children))
        .route("/reservation-passengers/statistics/", get(statistics))
        .route("/reservation-passengers/search-by-document/", get(search_by_document))
        .route("/reservation-passengers/by-reservation-code/", get(by_reservation_code))
        .route("/reservation-passengers/unassigned-seats/", get(unassigned_seats))
        .route("/reservation-passengers/bulk-assign-seats/", post(bulk_assign_seats))
        .route("/reservation-passengers/bulk-create/", post(bulk_create))
        .route(
            "/reservation-passengers/{id}/",
            get(retrieve).put(update).patch(partial_update).delete(destroy),
        )
        .route("/reservation-passengers/{id}/assign-seat/", patch(assign_seat))
        .route("/reservation-passengers/{id}/update-category/", patch(update_category))
}

fn query(params: &Params) -> Result<PassengerQuery, AppError> {
    Ok(PassengerQuery {
        search: params.search(),
        reservation: params.id("reservation")?,
        passenger_type: params.parse::<PassengerType>("passenger_type")?,
        passenger_category: params.parse::<PassengerCategory>("passenger_category")?,
        gender: params.parse::<Gender>("gender")?,
        document: None,
        reservation_code: None,
        unassigned_only: false,
        ordering: params.ordering(),
    })
}

fn seat_taken_error(seat: &str) -> AppError {
    AppError::Validation(FieldErrors::single(
        "seat_number",
        format!("Seat {} is already taken on this reservation.", seat),
    ))
}

// ============================================================================
// Rendering
// ============================================================================

/// Codes of the reservations owning `passengers`, read within `scope`.
async fn codes(
    state: &AppState,
    scope: Scope,
    passengers: &[ReservationPassenger],
) -> Result<HashMap<i64, String>, AppError> {
    let mut ids: Vec<i64> = passengers.iter().map(|p| p.reservation_id).collect();
    ids.sort_unstable();
    ids.dedup();
    Ok(state
        .reservations
        .get_many(scope, &ids)
        .await?
        .into_iter()
        .map(|r| (r.id, r.reservation_code))
        .collect())
}

async fn summaries(
    state: &AppState,
    scope: Scope,
    passengers: Vec<ReservationPassenger>,
) -> Result<Vec<PassengerSummary>, AppError> {
    let codes = codes(state, scope, &passengers).await?;
    Ok(passengers
        .iter()
        .map(|p| {
            let code = codes.get(&p.reservation_id).map(String::as_str).unwrap_or_default();
            PassengerSummary::new(p, code)
        })
        .collect())
}

async fn details(
    state: &AppState,
    scope: Scope,
    passengers: &[ReservationPassenger],
) -> Result<Vec<PassengerDetail>, AppError> {
    let codes = codes(state, scope, passengers).await?;
    Ok(passengers
        .iter()
        .map(|p| {
            let code = codes.get(&p.reservation_id).map(String::as_str).unwrap_or_default();
            PassengerDetail::new(p, code)
        })
        .collect())
}

async fn detail(
    state: &AppState,
    scope: Scope,
    passenger: &ReservationPassenger,
) -> Result<PassengerDetail, AppError> {
    let mut rows = details(state, scope, std::slice::from_ref(passenger)).await?;
    rows.pop()
        .ok_or_else(|| AppError::Internal("passenger detail rendered nothing".into()))
}

/// 404 for a missing row, 403 for one outside the caller's scope.
async fn load_owned(
    state: &AppState,
    scope: Scope,
    id: i64,
) -> Result<ReservationPassenger, AppError> {
    let owner = state
        .passengers
        .owner_of(id)
        .await?
        .ok_or_else(|| AppError::not_found("Passenger"))?;
    check_owner(scope, owner)?;
    state
        .passengers
        .get(scope, id)
        .await?
        .ok_or_else(|| AppError::not_found("Passenger"))
}

async fn render_rows(
    state: &AppState,
    scope: Scope,
    query: Result<PassengerQuery, AppError>,
) -> Result<String, AppError> {
    let page = state.passengers.list(scope, &query?, None).await?;
    to_json(&summaries(state, scope, page.items).await?)
}

/// Cached unpaginated view over the list filters, narrowed by `narrow`.
async fn view(
    state: &AppState,
    identity: Identity,
    params: &Params,
    name: &str,
    narrow: impl FnOnce(PassengerQuery) -> PassengerQuery,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, name)?;
    let key = state
        .cache
        .key(RESOURCE, CacheKind::View(name), identity.caller(), params.pairs());
    let query = query(params).map(narrow);
    cached(state, key, || render_rows(state, identity.scope(), query)).await
}

// ============================================================================
// Reads
// ============================================================================

/// GET /api/reservation-passengers/
async fn list(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "list")?;
    let key = state
        .cache
        .key(RESOURCE, CacheKind::List, identity.caller(), params.pairs());
    cached(&state, key, || render_list(&state, identity.scope(), &params)).await
}

async fn render_list(state: &AppState, scope: Scope, params: &Params) -> Result<String, AppError> {
    let query = query(params)?;
    let request = params.page_request(state.page_size)?;
    let page = state.passengers.list(scope, &query, Some(request)).await?;
    let page = Page {
        count: page.count,
        items: summaries(state, scope, page.items).await?,
    };
    to_json(&Paginated::new(params, request, page)?)
}

/// GET /api/reservation-passengers/{id}/
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
    cached(&state, key, || render_detail(&state, identity.scope(), id)).await
}

async fn render_detail(state: &AppState, scope: Scope, id: i64) -> Result<String, AppError> {
    let passenger = load_owned(state, scope, id).await?;
    to_json(&detail(state, scope, &passenger).await?)
}

/// GET /api/reservation-passengers/by-reservation/?reservation_id=
async fn by_reservation(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "by_reservation")?;
    let reservation = params
        .id("reservation_id")?
        .ok_or_else(|| AppError::BadRequest("reservation_id is required".into()))?;
    view(&state, identity, &params, "by_reservation", |q| PassengerQuery {
        reservation: Some(reservation),
        ..q
    })
    .await
}

/// GET /api/reservation-passengers/main-passengers/
async fn main_passengers(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    view(&state, identity, &params, "main_passengers", |q| PassengerQuery {
        passenger_type: Some(PassengerType::Main),
        ..q
    })
    .await
}

/// GET /api/reservation-passengers/companions/
async fn companions(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    view(&state, identity, &params, "companions", |q| PassengerQuery {
        passenger_type: Some(PassengerType::Companion),
        ..q
    })
    .await
}

/// GET /api/reservation-passengers/adults/
async fn adults(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    view(&state, identity, &params, "adults", |q| PassengerQuery {
        passenger_category: Some(PassengerCategory::Adult),
        ..q
    })
    .await
}

/// GET /api/reservation-passengers/children/
async fn children(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    view(&state, identity, &params, "children", |q| PassengerQuery {
        passenger_category: Some(PassengerCategory::Child),
        ..q
    })
    .await
}

/// GET /api/reservation-passengers/search-by-document/?document=
async fn search_by_document(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "search_by_document")?;
    let document = params.required("document")?.to_string();
    debug!(document = %Masked(&document), "passenger document search");
    view(&state, identity, &params, "search_by_document", |q| PassengerQuery {
        document: Some(document),
        ..q
    })
    .await
}

/// GET /api/reservation-passengers/by-reservation-code/?code=
async fn by_reservation_code(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "by_reservation_code")?;
    let code = params.required("code")?.to_uppercase();
    view(&state, identity, &params, "by_reservation_code", |q| PassengerQuery {
        reservation_code: Some(code),
        ..q
    })
    .await
}

/// GET /api/reservation-passengers/unassigned-seats/
async fn unassigned_seats(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    view(&state, identity, &params, "unassigned_seats", |q| PassengerQuery {
        unassigned_only: true,
        ..q
    })
    .await
}

/// GET /api/reservation-passengers/statistics/
async fn statistics(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "statistics")?;
    let key = state.cache.key(
        RESOURCE,
        CacheKind::View("statistics"),
        identity.caller(),
        params.pairs(),
    );
    cached(&state, key, || render_statistics(&state, identity.scope())).await
}

async fn render_statistics(state: &AppState, scope: Scope) -> Result<String, AppError> {
    to_json(&state.passengers.statistics(scope).await?)
}

// ============================================================================
// Writes
// ============================================================================

/// Normalizes and validates `input` and checks it can be stored: the
/// reservation must be visible in `scope` and the seat free on it.
async fn prepare(
    state: &AppState,
    scope: Scope,
    input: PassengerInput,
    except: Option<i64>,
) -> Result<PassengerInput, AppError> {
    let input = input.normalized();
    input
        .validate_fields(Utc::now().date_naive())
        .into_result()?;

    match state.reservations.owner_of(input.reservation).await? {
        Some(owner) if scope.permits(owner) => {}
        _ => {
            return Err(AppError::Validation(FieldErrors::single(
                "reservation",
                "Invalid pk - object does not exist.",
            )))
        }
    }
    if let Some(seat) = input.seat_number.as_deref() {
        if state
            .passengers
            .seat_taken(input.reservation, seat, except)
            .await?
        {
            return Err(seat_taken_error(seat));
        }
    }
    Ok(input)
}

/// POST /api/reservation-passengers/
async fn create(
    State(state): State<AppState>,
    identity: Identity,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "create")?;
    let input = prepare(&state, identity.scope(), body.parse::<PassengerInput>()?, None).await?;
    let passenger = state.passengers.insert(&input).await?;
    state.cache.invalidate(RESOURCE, Some(passenger.id)).await;
    info!(
        passenger_id = passenger.id,
        reservation_id = passenger.reservation_id,
        document = %Masked(&passenger.identity_document),
        "passenger created"
    );
    created(&detail(&state, identity.scope(), &passenger).await?)
}

/// PUT /api/reservation-passengers/{id}/
async fn update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "update")?;
    load_owned(&state, identity.scope(), id).await?;
    let input = body.parse::<PassengerInput>()?;
    save(&state, identity.scope(), id, input).await
}

/// PATCH /api/reservation-passengers/{id}/
async fn partial_update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "partial_update")?;
    let current = load_owned(&state, identity.scope(), id).await?;
    let input = body.parse::<PassengerPatch>()?.apply(&current);
    save(&state, identity.scope(), id, input).await
}

async fn save(
    state: &AppState,
    scope: Scope,
    id: i64,
    input: PassengerInput,
) -> Result<Response, AppError> {
    let input = prepare(state, scope, input, Some(id)).await?;
    let passenger = state
        .passengers
        .update(id, &input)
        .await?
        .ok_or_else(|| AppError::not_found("Passenger"))?;
    state.cache.invalidate(RESOURCE, Some(id)).await;
    ok(&detail(state, scope, &passenger).await?)
}

/// DELETE /api/reservation-passengers/{id}/
async fn destroy(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "destroy")?;
    if !state.passengers.delete(id).await? {
        return Err(AppError::not_found("Passenger"));
    }
    state.cache.invalidate(RESOURCE, Some(id)).await;
    info!(passenger_id = id, "passenger deleted");
    Ok(no_content())
}

#[derive(Debug, Deserialize)]
struct SeatRequest {
    #[serde(default)]
    seat_number: Option<String>,
}

/// Re-checks the seat and writes it. A unique violation from storage means
/// another request took the seat in between.
async fn write_seat(
    state: &AppState,
    passenger: &ReservationPassenger,
    seat: &str,
) -> Result<ReservationPassenger, AppError> {
    if state
        .passengers
        .seat_taken(passenger.reservation_id, seat, Some(passenger.id))
        .await?
    {
        return Err(seat_taken_error(seat));
    }
    match state.passengers.set_seat(passenger.id, Some(seat)).await {
        Ok(Some(updated)) => Ok(updated),
        Ok(None) => Err(AppError::not_found("Passenger")),
        Err(StoreError::UniqueViolation { .. }) => Err(seat_taken_error(seat)),
        Err(e) => Err(e.into()),
    }
}

/// PATCH /api/reservation-passengers/{id}/assign-seat/
async fn assign_seat(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "assign_seat")?;
    let passenger = load_owned(&state, identity.scope(), id).await?;
    let seat = normalize_seat(body.parse::<SeatRequest>()?.seat_number)
        .ok_or_else(|| AppError::BadRequest("seat_number is required".into()))?;

    let updated = write_seat(&state, &passenger, &seat).await?;
    state.cache.invalidate(RESOURCE, Some(id)).await;
    info!(passenger_id = id, seat = %seat, "seat assigned");
    ok(&detail(&state, identity.scope(), &updated).await?)
}

#[derive(Debug, Deserialize)]
struct SeatAssignment {
    passenger_id: i64,
    #[serde(default)]
    seat_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkAssignRequest {
    #[serde(default)]
    assignments: Vec<SeatAssignment>,
}

#[derive(Debug, Serialize)]
struct BulkAssignResponse {
    updated: Vec<PassengerDetail>,
    errors: Vec<String>,
    total_updated: usize,
}

/// POST /api/reservation-passengers/bulk-assign-seats/
///
/// Applies every assignment it can and reports the rest.
async fn bulk_assign_seats(
    State(state): State<AppState>,
    identity: Identity,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "bulk_assign_seats")?;
    let scope = identity.scope();
    let req = body.parse::<BulkAssignRequest>()?;
    if req.assignments.is_empty() {
        return Err(AppError::BadRequest("assignments is required".into()));
    }

    let mut updated = Vec::new();
    let mut errors = Vec::new();
    for assignment in req.assignments {
        let Some(passenger) = state.passengers.get(scope, assignment.passenger_id).await? else {
            errors.push(format!("Passenger {} not found", assignment.passenger_id));
            continue;
        };
        let Some(seat) = normalize_seat(assignment.seat_number) else {
            errors.push(format!("Passenger {}: seat_number is required", passenger.id));
            continue;
        };
        match write_seat(&state, &passenger, &seat).await {
            Ok(row) => updated.push(row),
            Err(AppError::Validation(_)) => {
                errors.push(format!("Seat {} is already taken on this reservation.", seat))
            }
            Err(e) => return Err(e),
        }
    }

    if !updated.is_empty() {
        state.cache.invalidate(RESOURCE, None).await;
    }
    info!(updated = updated.len(), failed = errors.len(), "bulk seat assignment");
    ok(&BulkAssignResponse {
        total_updated: updated.len(),
        updated: details(&state, scope, &updated).await?,
        errors,
    })
}

#[derive(Debug, Deserialize)]
struct BulkCreateRequest {
    #[serde(default)]
    passengers: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct RejectedPassenger {
    data: Value,
    errors: FieldErrors,
}

#[derive(Debug, Serialize)]
struct BulkCreateResponse {
    created: Vec<PassengerDetail>,
    errors: Vec<RejectedPassenger>,
    total_created: usize,
    total_errors: usize,
}

/// POST /api/reservation-passengers/bulk-create/
///
/// 201 when at least one passenger was stored, otherwise 400. Rejected
/// entries come back with their field errors.
async fn bulk_create(
    State(state): State<AppState>,
    identity: Identity,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "bulk_create")?;
    let scope = identity.scope();
    let req = body.parse::<BulkCreateRequest>()?;
    if req.passengers.is_empty() {
        return Err(AppError::BadRequest("passengers is required".into()));
    }

    let mut stored = Vec::new();
    let mut errors = Vec::new();
    for data in req.passengers {
        match create_one(&state, scope, &data).await {
            Ok(passenger) => stored.push(passenger),
            Err(AppError::Validation(fields)) => errors.push(RejectedPassenger { data, errors: fields }),
            Err(AppError::BadRequest(message)) => errors.push(RejectedPassenger {
                data,
                errors: FieldErrors::single("non_field_errors", message),
            }),
            Err(e) => return Err(e),
        }
    }

    if !stored.is_empty() {
        state.cache.invalidate(RESOURCE, None).await;
    }
    info!(created = stored.len(), failed = errors.len(), "bulk passenger create");
    let status = if stored.is_empty() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::CREATED
    };
    let body = BulkCreateResponse {
        total_created: stored.len(),
        total_errors: errors.len(),
        created: details(&state, scope, &stored).await?,
        errors,
    };
    Ok(json_response(status, to_json(&body)?))
}

async fn create_one(
    state: &AppState,
    scope: Scope,
    data: &Value,
) -> Result<ReservationPassenger, AppError> {
    let input = JsonBody(serde_json::to_vec(data)?.into()).parse::<PassengerInput>()?;
    let input = prepare(state, scope, input, None).await?;
    Ok(state.passengers.insert(&input).await?)
}

#[derive(Debug, Deserialize)]
struct CategoryChange {
    #[serde(default)]
    passenger_category: Option<String>,
}

/// PATCH /api/reservation-passengers/{id}/update-category/
///
/// Owner of the reservation or admin.
async fn update_category(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "update_category")?;
    load_owned(&state, identity.scope(), id).await?;
    let raw = body
        .parse::<CategoryChange>()?
        .passenger_category
        .unwrap_or_default();
    let category = raw
        .trim()
        .to_lowercase()
        .parse::<PassengerCategory>()
        .map_err(|msg| AppError::Validation(FieldErrors::single("passenger_category", msg)))?;

    let passenger = state
        .passengers
        .set_category(id, category)
        .await?
        .ok_or_else(|| AppError::not_found("Passenger"))?;
    state.cache.invalidate(RESOURCE, Some(id)).await;
    info!(passenger_id = id, category = category.as_str(), "passenger category updated");
    ok(&detail(&state, identity.scope(), &passenger).await?)
}
