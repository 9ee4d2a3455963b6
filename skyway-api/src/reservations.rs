use axum::{
    extract::State,
    response::Response,
    routing::{get, patch, post},
    Router,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use skyway_core::access::{check_owner, Resource, Scope};
use skyway_core::cache::CacheKind;
use skyway_core::models::reservation::amount_error;
use skyway_core::models::{
    Reservation, ReservationDetail, ReservationInput, ReservationPatch, ReservationStatus,
    ReservationSummary, User,
};
use skyway_core::repository::{NewReservation, Page, ReservationQuery};
use skyway_core::reservation_code;
use skyway_core::validation::FieldErrors;
use std::collections::HashMap;
use tracing::info;

use crate::error::AppError;
use crate::extract::{JsonBody, RowId};
use crate::middleware::Identity;
use crate::params::{Paginated, Params};
use crate::response::{cached, created, no_content, ok, to_json};
use crate::state::AppState;

const RESOURCE: Resource = Resource::Reservations;
const RECENT_DAYS: i64 = 30;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reservations/", get(list).post(create))
        .route("/reservations/my-reservations/", get(my_reservations))
        .route("/reservations/pending/", get(pending))
        .route("/reservations/confirmed/", get(confirmed))
        .route("/reservations/recent/", get(recent))
        .route("/reservations/by-flight/", get(by_flight))
        .route("/reservations/statistics/", get(statistics))
        .route(
            "/reservations/{id}/",
            get(retrieve).put(update).patch(partial_update).delete(destroy),
        )
        .route("/reservations/{id}/confirm/", post(confirm))
        .route("/reservations/{id}/cancel/", post(cancel))
        .route("/reservations/{id}/change-status/", post(change_status))
        .route("/reservations/{id}/update-amount/", patch(update_amount))
}

fn query(params: &Params) -> Result<ReservationQuery, AppError> {
    Ok(ReservationQuery {
        search: params.search(),
        status: params.parse::<ReservationStatus>("status")?,
        user: params.id("user")?,
        flight: params.id("flight")?,
        created_since: None,
        ordering: params.ordering(),
    })
}

// ============================================================================
// Rendering
// ============================================================================

async fn summaries(
    state: &AppState,
    reservations: Vec<Reservation>,
) -> Result<Vec<ReservationSummary>, AppError> {
    let mut ids: Vec<i64> = reservations.iter().map(|r| r.user_id).collect();
    ids.sort_unstable();
    ids.dedup();
    let users: HashMap<i64, User> = state
        .users
        .get_many(&ids)
        .await?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    Ok(reservations
        .iter()
        .map(|r| {
            let username = users.get(&r.user_id).map(|u| u.username.as_str()).unwrap_or_default();
            ReservationSummary::new(r, username)
        })
        .collect())
}

/// Detail with the booking user and the flight request embedded. The flight
/// request is read within the caller's scope.
async fn detail(
    state: &AppState,
    scope: Scope,
    reservation: &Reservation,
) -> Result<ReservationDetail, AppError> {
    let user = state.users.get(reservation.user_id).await?;
    let request = state
        .flight_requests
        .get(scope, reservation.flight_id)
        .await?;
    Ok(ReservationDetail::new(
        reservation,
        user.as_ref(),
        request.as_ref(),
    ))
}

/// 404 for a missing row, 403 for one outside the caller's scope.
async fn load_owned(state: &AppState, scope: Scope, id: i64) -> Result<Reservation, AppError> {
    let owner = state
        .reservations
        .owner_of(id)
        .await?
        .ok_or_else(|| AppError::not_found("Reservation"))?;
    check_owner(scope, owner)?;
    state
        .reservations
        .get(scope, id)
        .await?
        .ok_or_else(|| AppError::not_found("Reservation"))
}

async fn render_rows(
    state: &AppState,
    scope: Scope,
    query: Result<ReservationQuery, AppError>,
) -> Result<String, AppError> {
    let page = state.reservations.list(scope, &query?, None).await?;
    to_json(&summaries(state, page.items).await?)
}

fn view_key(state: &AppState, identity: &Identity, name: &str, params: &Params) -> String {
    state
        .cache
        .key(RESOURCE, CacheKind::View(name), identity.caller(), params.pairs())
}

// ============================================================================
// Reads
// ============================================================================

/// GET /api/reservations/
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
    let page = state.reservations.list(scope, &query, Some(request)).await?;
    let page = Page {
        count: page.count,
        items: summaries(state, page.items).await?,
    };
    to_json(&Paginated::new(params, request, page)?)
}

/// GET /api/reservations/{id}/
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
    let reservation = load_owned(state, scope, id).await?;
    to_json(&detail(state, scope, &reservation).await?)
}

/// GET /api/reservations/my-reservations/
async fn my_reservations(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "my_reservations")?;
    let caller = identity.require()?;
    let key = view_key(&state, &identity, "my_reservations", &params);
    cached(&state, key, || {
        render_rows(&state, Scope::OwnedBy(caller.user_id), query(&params))
    })
    .await
}

/// GET /api/reservations/pending/
async fn pending(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "pending")?;
    let key = view_key(&state, &identity, "pending", &params);
    let query = query(&params).map(|q| ReservationQuery {
        status: Some(ReservationStatus::Pending),
        ..q
    });
    cached(&state, key, || render_rows(&state, identity.scope(), query)).await
}

/// GET /api/reservations/confirmed/
async fn confirmed(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "confirmed")?;
    let key = view_key(&state, &identity, "confirmed", &params);
    let query = query(&params).map(|q| ReservationQuery {
        status: Some(ReservationStatus::Confirmed),
        ..q
    });
    cached(&state, key, || render_rows(&state, identity.scope(), query)).await
}

/// GET /api/reservations/recent/
///
/// Reservations created in the last thirty days.
async fn recent(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "recent")?;
    let key = view_key(&state, &identity, "recent", &params);
    let since = Utc::now() - Duration::days(RECENT_DAYS);
    let query = query(&params).map(|q| ReservationQuery {
        created_since: Some(since),
        ..q
    });
    cached(&state, key, || render_rows(&state, identity.scope(), query)).await
}

/// GET /api/reservations/by-flight/?flight_id=
async fn by_flight(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "by_flight")?;
    let flight = params
        .id("flight_id")?
        .ok_or_else(|| AppError::BadRequest("flight_id is required".into()))?;
    let key = view_key(&state, &identity, "by_flight", &params);
    let query = query(&params).map(|q| ReservationQuery {
        flight: Some(flight),
        ..q
    });
    cached(&state, key, || render_rows(&state, identity.scope(), query)).await
}

/// GET /api/reservations/statistics/
async fn statistics(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "statistics")?;
    let key = view_key(&state, &identity, "statistics", &params);
    cached(&state, key, || render_statistics(&state, identity.scope())).await
}

async fn render_statistics(state: &AppState, scope: Scope) -> Result<String, AppError> {
    to_json(&state.reservations.statistics(scope).await?)
}

// ============================================================================
// Writes
// ============================================================================

/// POST /api/reservations/
///
/// New reservations start pending under a generated code. Admins may book
/// for another user; everybody else books for themselves and only against
/// their own flight requests.
async fn create(
    State(state): State<AppState>,
    identity: Identity,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "create")?;
    let caller = identity.require()?;
    let input = body.parse::<ReservationInput>()?;
    input.validate_fields().into_result()?;

    let user_id = match input.user {
        Some(user) if caller.is_admin() => user,
        _ => caller.user_id,
    };
    ensure_request_in_scope(&state, identity.scope(), input.flight).await?;

    let draft = NewReservation {
        reservation_code: String::new(),
        user_id,
        flight_id: input.flight,
        reservation_date: input.reservation_date.unwrap_or_else(Utc::now),
        total_passengers: input.total_passengers,
        total_amount: input.total_amount,
        status: ReservationStatus::Pending,
    };
    let reservation = reservation_code::insert_with_unique_code(state.reservations.as_ref(), draft).await?;
    state.cache.invalidate(RESOURCE, Some(reservation.id)).await;
    info!(
        reservation_id = reservation.id,
        code = %reservation.reservation_code,
        user_id,
        "reservation created"
    );
    created(&detail(&state, identity.scope(), &reservation).await?)
}

/// The referenced flight request must exist and be visible to the caller.
async fn ensure_request_in_scope(state: &AppState, scope: Scope, request_id: i64) -> Result<(), AppError> {
    match state.flight_requests.owner_of(request_id).await? {
        Some(owner) if scope.permits(owner) => Ok(()),
        _ => Err(AppError::Validation(FieldErrors::single(
            "flight",
            "Invalid pk - object does not exist.",
        ))),
    }
}

/// PUT /api/reservations/{id}/
async fn update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "update")?;
    let current = load_owned(&state, identity.scope(), id).await?;
    let input = body.parse::<ReservationInput>()?;
    save_input(&state, identity.scope(), current, input).await
}

/// PATCH /api/reservations/{id}/
async fn partial_update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "partial_update")?;
    let current = load_owned(&state, identity.scope(), id).await?;
    let input = body.parse::<ReservationPatch>()?.apply(&current);
    save_input(&state, identity.scope(), current, input).await
}

async fn save_input(
    state: &AppState,
    scope: Scope,
    mut reservation: Reservation,
    input: ReservationInput,
) -> Result<Response, AppError> {
    input.validate_fields().into_result()?;
    if let Some(status) = input.status {
        reservation.transition(status)?;
    }
    reservation.flight_id = input.flight;
    reservation.user_id = input.user.unwrap_or(reservation.user_id);
    reservation.reservation_date = input.reservation_date.unwrap_or(reservation.reservation_date);
    reservation.total_passengers = input.total_passengers;
    reservation.total_amount = input.total_amount;

    let saved = persist(state, &reservation).await?;
    ok(&detail(state, scope, &saved).await?)
}

async fn persist(state: &AppState, reservation: &Reservation) -> Result<Reservation, AppError> {
    let saved = state
        .reservations
        .save(reservation)
        .await?
        .ok_or_else(|| AppError::not_found("Reservation"))?;
    state.cache.invalidate(RESOURCE, Some(reservation.id)).await;
    Ok(saved)
}

/// DELETE /api/reservations/{id}/
async fn destroy(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "destroy")?;
    if !state.reservations.delete(id).await? {
        return Err(AppError::not_found("Reservation"));
    }
    state.cache.invalidate(RESOURCE, Some(id)).await;
    info!(reservation_id = id, "reservation deleted");
    Ok(no_content())
}

/// POST /api/reservations/{id}/confirm/
///
/// Pending reservations only; confirmed and cancelled ones are rejected.
async fn confirm(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "confirm")?;
    let mut reservation = load_owned(&state, identity.scope(), id).await?;
    reservation.confirm()?;
    let saved = persist(&state, &reservation).await?;
    info!(reservation_id = id, "reservation confirmed");
    ok(&detail(&state, identity.scope(), &saved).await?)
}

/// POST /api/reservations/{id}/cancel/
///
/// Owner or admin. Cancelling twice leaves the row untouched.
async fn cancel(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "cancel")?;
    let mut reservation = load_owned(&state, identity.scope(), id).await?;
    if reservation.cancel() {
        reservation = persist(&state, &reservation).await?;
        info!(reservation_id = id, "reservation cancelled");
    }
    ok(&detail(&state, identity.scope(), &reservation).await?)
}

#[derive(Debug, Deserialize)]
struct StatusChange {
    #[serde(default)]
    status: Option<String>,
}

/// POST /api/reservations/{id}/change-status/
async fn change_status(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "change_status")?;
    let mut reservation = load_owned(&state, identity.scope(), id).await?;
    let raw = body
        .parse::<StatusChange>()?
        .status
        .ok_or_else(|| AppError::Validation(FieldErrors::single("status", "This field is required.")))?;
    let next = raw
        .trim()
        .to_lowercase()
        .parse::<ReservationStatus>()
        .map_err(|msg| AppError::Validation(FieldErrors::single("status", msg)))?;

    if reservation.transition(next)? {
        reservation = persist(&state, &reservation).await?;
        info!(reservation_id = id, status = next.as_str(), "reservation status changed");
    }
    ok(&detail(&state, identity.scope(), &reservation).await?)
}

#[derive(Debug, Deserialize)]
struct AmountChange {
    #[serde(default)]
    total_amount: Option<Decimal>,
}

/// PATCH /api/reservations/{id}/update-amount/
async fn update_amount(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "update_amount")?;
    let mut reservation = load_owned(&state, identity.scope(), id).await?;
    let amount = body
        .parse::<AmountChange>()?
        .total_amount
        .ok_or_else(|| AppError::BadRequest("total_amount is required".into()))?;
    if let Some(message) = amount_error(amount) {
        return Err(AppError::Validation(FieldErrors::single("total_amount", message)));
    }

    reservation.total_amount = amount;
    let saved = persist(&state, &reservation).await?;
    info!(reservation_id = id, %amount, "reservation amount updated");
    ok(&detail(&state, identity.scope(), &saved).await?)
}
