use axum::{extract::State, response::Response, routing::get, Router};
use chrono::Utc;
use serde::Serialize;
use skyway_core::access::{Caller, Resource};
use skyway_core::cache::CacheKind;
use skyway_core::models::{User, UserDetail, UserInput, UserPatch, UserPublic};
use skyway_core::repository::UserQuery;
use skyway_shared::{Masked, NotificationTask};
use tracing::{error, info};

use crate::error::AppError;
use crate::extract::{JsonBody, RowId};
use crate::middleware::Identity;
use crate::params::{Paginated, Params};
use crate::response::{cached, created, no_content, ok, to_json};
use crate::state::AppState;

const RESOURCE: Resource = Resource::Users;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users/", get(list).post(create))
        .route("/users/me/", get(me))
        .route(
            "/users/{id}/",
            get(retrieve).put(update).patch(partial_update).delete(destroy),
        )
}

/// Admins and the account holder see the full record; everyone else gets
/// the public profile.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum UserView {
    Full(UserDetail),
    Public(UserPublic),
}

impl UserView {
    fn for_caller(user: &User, caller: Option<&Caller>) -> Self {
        match caller {
            Some(c) if c.is_admin() || c.user_id == user.id => {
                UserView::Full(UserDetail::new(user, Utc::now().date_naive()))
            }
            _ => UserView::Public(UserPublic::from(user)),
        }
    }
}

// ============================================================================
// Reads
// ============================================================================

/// GET /api/users/
async fn list(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "list")?;
    let key = state
        .cache
        .key(RESOURCE, CacheKind::List, identity.caller(), params.pairs());
    cached(&state, key, || render_list(&state, identity, &params)).await
}

async fn render_list(state: &AppState, identity: Identity, params: &Params) -> Result<String, AppError> {
    let query = UserQuery {
        search: params.search(),
        is_operator: params.flag("is_operator")?,
        is_staff: params.flag("is_staff")?,
        is_active: params.flag("is_active")?,
        ordering: params.ordering(),
    };
    let request = params.page_request(state.page_size)?;
    let page = state.users.list(&query, Some(request)).await?;
    to_json(&Paginated::new(
        params,
        request,
        page.map(|u| UserView::for_caller(&u, identity.caller())),
    )?)
}

/// GET /api/users/{id}/
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
    cached(&state, key, || render_detail(&state, identity, id)).await
}

async fn render_detail(state: &AppState, identity: Identity, id: i64) -> Result<String, AppError> {
    let user = load(state, id).await?;
    to_json(&UserView::for_caller(&user, identity.caller()))
}

/// GET /api/users/me/
async fn me(
    State(state): State<AppState>,
    identity: Identity,
    params: Params,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "me")?;
    let caller = identity.require()?;
    let key = state
        .cache
        .key(RESOURCE, CacheKind::View("me"), identity.caller(), params.pairs());
    cached(&state, key, || render_detail(&state, identity, caller.user_id)).await
}

async fn load(state: &AppState, id: i64) -> Result<User, AppError> {
    state
        .users
        .get(id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))
}

// ============================================================================
// Writes
// ============================================================================

fn prepare(input: UserInput) -> Result<UserInput, AppError> {
    let input = input.normalized();
    input
        .validate_fields(Utc::now().date_naive())
        .into_result()?;
    Ok(input)
}

/// POST /api/users/
///
/// Queues the welcome email once the row is stored. A queue failure is
/// logged and does not fail the request.
async fn create(
    State(state): State<AppState>,
    identity: Identity,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "create")?;
    let input = prepare(body.parse::<UserInput>()?)?;
    let user = state.users.insert(&input).await?;
    state.cache.invalidate(RESOURCE, Some(user.id)).await;
    info!(user_id = user.id, email = %Masked(&user.email), "user created");

    if let Err(e) = state
        .queue
        .enqueue(NotificationTask::WelcomeEmail { user_id: user.id })
        .await
    {
        error!(user_id = user.id, error = %e, "failed to queue welcome email");
    }
    created(&UserView::for_caller(&user, identity.caller()))
}

/// PUT /api/users/{id}/
async fn update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "update")?;
    load(&state, id).await?;
    let input = body.parse::<UserInput>()?;
    save(&state, identity, id, input).await
}

/// PATCH /api/users/{id}/
async fn partial_update(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
    body: JsonBody,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "partial_update")?;
    let current = load(&state, id).await?;
    let input = body.parse::<UserPatch>()?.apply(&current);
    save(&state, identity, id, input).await
}

async fn save(
    state: &AppState,
    identity: Identity,
    id: i64,
    input: UserInput,
) -> Result<Response, AppError> {
    let input = prepare(input)?;
    let user = state
        .users
        .update(id, &input)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    state.cache.invalidate(RESOURCE, Some(id)).await;
    info!(user_id = id, email = %Masked(&user.email), "user updated");
    ok(&UserView::for_caller(&user, identity.caller()))
}

/// DELETE /api/users/{id}/
async fn destroy(
    State(state): State<AppState>,
    identity: Identity,
    RowId(id): RowId,
) -> Result<Response, AppError> {
    identity.authorize(RESOURCE, "destroy")?;
    if !state.users.delete(id).await? {
        return Err(AppError::not_found("User"));
    }
    state.cache.invalidate(RESOURCE, Some(id)).await;
    info!(user_id = id, "user deleted");
    Ok(no_content())
}
