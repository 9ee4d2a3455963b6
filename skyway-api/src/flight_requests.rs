use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use skyway_core::access::{check_owner, Resource, Scope};
use skyway_core::cache::CacheKind;
use skyway_core::models::{
    Destination, FlightRequest, FlightRequestDetail, FlightRequestInput, FlightRequestPatch,
    FlightRequestSummary, RequestContext, RequestStatus, RowRef, User,
};
use skyway_core::repository::{FlightRequestQuery, Page};
use std::collections::HashMap;
use tracing::info;

use crate::error::AppError;
use crate::extract::{JsonBody, RowId};
use crate::middleware::Identity;
use crate::params::{Paginated, Params};
use crate::response::{cached, created, no_content, ok, to_json};
use crate::state::AppState;

const RESOURCE: Resource = Resource::FlightRequests;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/flight-requests/", get(list).post(create))
        .route("/flight-requests/my-requests/", get(my_requests))
        .route("/flight-requests/pending/", get(pending))
        .route(
            "/flight-requests/{id}/",
            get(retrieve).put(update).patch(partial_update).delete(destroy),
        )
        .route("/flight-requests/{id}/confirm/", post(confirm))
        .route("/flight-requests/{id}/cancel/", post(cancel))
}

fn query(params: &Params) -> Result<FlightRequestQuery, AppError> {
    Ok(FlightRequestQuery {
        search: params.search(),
        status: params.parse::<RequestStatus>("status")?,
        destination: params.id("destination")?,
        origin: params.id("origin")?,
        user: params.id("user")?,
        ordering: params.ordering(),
    })
}

// ============================================================================
// Rendering
// ============================================================================

/// Users and destinations referenced by a batch of requests.
struct Related {
    users: HashMap<i64, User>,
    destinations: HashMap<i64, Destination>,
}

impl Related {
    async fn load(state: &AppState, requests: &[FlightRequest]) -> Result<Self, AppError> {
        let mut user_ids: Vec<i64> = requests
            .iter()
            .flat_map(|r| std::iter::once(r.user_id).chain(r.reserved_by))
            .collect();
        user_ids.sort_unstable();
        user_ids.dedup();

        let mut destination_ids: Vec<i64> = requests
            .iter()
            .flat_map(|r| std::iter::once(r.destination_id).chain(r.origin_id))
            .collect();
        destination_ids.sort_unstable();
        destination_ids.dedup();

        let users = state.users.get_many(&user_ids).await?;
        let destinations = state.destinations.get_many(&destination_ids).await?;
        Ok(Self {
            users: users.into_iter().map(|u| (u.id, u)).collect(),
            destinations: destinations.into_iter().map(|d| (d.id, d)).collect(),
        })
    }

    fn row_ref(&self, id: i64) -> Option<RowRef> {
        self.destinations.get(&id).map(|d| RowRef {
            id: d.id,
            code: d.code.clone(),
            name: d.name.clone(),
        })
    }

    fn context(&self, r: &FlightRequest) -> Result<RequestContext<'_>, AppError> {
        let username = self
            .users
            .get(&r.user_id)
            .map(|u| u.username.as_str())
            .ok_or_else(|| AppError::Internal(format!("flight request {} has no user row", r.id)))?;
        let destination = self.row_ref(r.destination_id).ok_or_else(|| {
            AppError::Internal(format!("flight request {} has no destination row", r.id))
        })?;
        Ok(RequestContext {
            username,
            destination,
            origin: r.origin_id.and_then(|id| self.row_ref(id)),
            reserved_by_username: r
                .reserved_by
                .and_then(|id| self.users.get(&id))
                .map(|u| u.username.as_str()),
        })
    }
}

async fn summaries(
    state: &AppState,
    requests: Vec<FlightRequest>,
) -> Result<Vec<FlightRequestSummary>, AppError> {
    let related = Related::load(state, &requests).await?;
    requests
        .iter()
        .map(|r| Ok(FlightRequestSummary::new(r, related.context(r)?)))
        .collect()
}

async fn detail(state: &AppState, request: &FlightRequest) -> Result<FlightRequestDetail, AppError> {
    let related = Related::load(state, std::slice::from_ref(request)).await?;
    Ok(FlightRequestDetail::new(request, related.context(request)?))
}

/// Existence probe followed by the ownership gate: 404 for a missing row,
/// 403 for a row outside the caller's scope.
async fn load_owned(state: &AppState, scope: Scope, id: i64) -> Result<FlightRequest, AppError> {
    let owner = state
        .flight_requests
        .owner_of(id)
        .await?
        .ok_or_else(|| AppError::not_found("Flight request"))?;
    check_owner(scope, owner)?;
    state
        .flight_requests
        .get(scope, id)
        .await?
        .ok_or_else(|| AppError::not_found("Flight request"))
}

async fn render_rows(
    state: &AppState,
    scope: Scope,
    query: Result<FlightRequestQuery, AppError>,
) -> Result<String, AppError> {
    let page = state.flight_requests.list(scope, &query?, None).await?;
    to_json(&summaries(state, page.items).await?)
}

// ============================================================================
// Reads
// ============================================================================

/// GET /api/flight-requests/
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
    let page = state.flight_requests.list(scope, &query, Some(request)).await?;
    let page = Page {
        count: page.count,
        items: summaries(state, page.items).await?,
    };
    to_json(&Paginated::new(params, request, page)?)
}

/// GET /api/flight-requests/{id}/
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
    let request = load_owned(state, scope, id).await?;
    to_json(&detail(state, &request).await?)
}

/// GET /api/flight-requests/my-requests/
async fn my_requests(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "my_requests")?;
    let caller = identity.require()?;
    let key = state.cache.key(
        RESOURCE,
        CacheKind::View("my_requests"),
        identity.caller(),
        params.pairs(),
    );
    cached(&state, key, || {
        render_rows(&state, Scope::OwnedBy(caller.user_id), query(&params))
    })
    .await
}

/// GET /api/flight-requests/pending/
async fn pending(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "pending")?;
    let key = state.cache.key(
        RESOURCE,
        CacheKind::View("pending"),
        identity.caller(),
        params.pairs(),
    );
    let query = query(&params).map(|q| FlightRequestQuery {
        status: Some(RequestStatus::Pending),
        ..q
    });
    cached(&state, key, || render_rows(&state, identity.scope(), query)).await
}

// ============================================================================
// Writes
// ============================================================================

/// POST /api/flight-requests/
///
/// Requests always belong to the caller. Only admins may pick the initial
/// status.
async fn create(
    State(state): State<AppState>,
    identity: Identity,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "create")?;
    let caller = identity.require()?;
    let mut input = body.parse::<FlightRequestInput>()?.normalized();
    if !caller.is_admin() {
        input.status = None;
    }
    input.validate_fields().into_result()?;

    let request = state.flight_requests.insert(caller.user_id, &input).await?;
    state.cache.invalidate(RESOURCE, Some(request.id)).await;
    info!(request_id = request.id, user_id = caller.user_id, "flight request created");
    created(&detail(&state, &request).await?)
}

/// PUT /api/flight-requests/{id}/
async fn update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "update")?;
    load_owned(&state, identity.scope(), id).await?;
    let input = body.parse::<FlightRequestInput>()?.normalized();
    save(&state, id, input).await
}

/// PATCH /api/flight-requests/{id}/
async fn partial_update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "partial_update")?;
    let current = load_owned(&state, identity.scope(), id).await?;
    let input = body
        .parse::<FlightRequestPatch>()?
        .apply(&current)
        .normalized();
    save(&state, id, input).await
}

async fn save(state: &AppState, id: i64, input: FlightRequestInput) -> Result<Response, AppError> {
    input.validate_fields().into_result()?;
    let request = state
        .flight_requests
        .update(id, &input)
        .await?
        .ok_or_else(|| AppError::not_found("Flight request"))?;
    state.cache.invalidate(RESOURCE, Some(id)).await;
    ok(&detail(state, &request).await?)
}

/// DELETE /api/flight-requests/{id}/
///
/// Also removes the reservations booked against the request.
async fn destroy(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "destroy")?;
    if !state.flight_requests.delete(id).await? {
        return Err(AppError::not_found("Flight request"));
    }
    state.cache.invalidate(RESOURCE, Some(id)).await;
    info!(request_id = id, "flight request deleted");
    Ok(no_content())
}

/// POST /api/flight-requests/{id}/confirm/
///
/// Marks the request confirmed by the calling operator.
async fn confirm(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "confirm")?;
    let caller = identity.require()?;
    let mut request = load_owned(&state, identity.scope(), id).await?;
    request.confirm(caller.user_id, Utc::now());
    let request = persist_state(&state, &request).await?;
    info!(request_id = id, operator = caller.user_id, "flight request confirmed");
    ok(&detail(&state, &request).await?)
}

/// POST /api/flight-requests/{id}/cancel/
async fn cancel(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "cancel")?;
    let mut request = load_owned(&state, identity.scope(), id).await?;
    request.cancel();
    let request = persist_state(&state, &request).await?;
    info!(request_id = id, "flight request cancelled");
    ok(&detail(&state, &request).await?)
}

async fn persist_state(state: &AppState, request: &FlightRequest) -> Result<FlightRequest, AppError> {
    let saved = state
        .flight_requests
        .save_state(request)
        .await?
        .ok_or_else(|| AppError::not_found("Flight request"))?;
    state.cache.invalidate(RESOURCE, Some(request.id)).await;
    Ok(saved)
}
