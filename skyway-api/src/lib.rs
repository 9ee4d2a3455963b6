use axum::{http::Method, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod airlines;
pub mod destinations;
pub mod error;
pub mod extract;
pub mod flight_requests;
pub mod flights;
pub mod middleware;
pub mod params;
pub mod passengers;
pub mod reservations;
pub mod response;
pub mod state;
pub mod users;

pub use state::AppState;

/// Every resource router under `/api`, behind token authentication.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    let api = Router::new()
        .merge(airlines::routes())
        .merge(destinations::routes())
        .merge(flights::routes())
        .merge(flight_requests::routes())
        .merge(reservations::routes())
        .merge(passengers::routes())
        .merge(users::routes());

    Router::new()
        .nest("/api", api)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
