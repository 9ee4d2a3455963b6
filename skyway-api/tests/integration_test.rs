use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, NaiveDate, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use skyway_api::middleware::Claims;
use skyway_api::state::{AppState, AuthConfig};
use skyway_api::app;
use skyway_core::access::Scope;
use skyway_core::cache::{MemoryCache, ResponseCache};
use skyway_core::models::{
    DestinationInput, FlightRequestInput, Reservation, ReservationStatus, User, UserInput,
};
use skyway_core::notify::RecordingQueue;
use skyway_core::repository::{
    DestinationRepository, FlightRequestRepository, NewReservation, ReservationRepository,
    UserRepository,
};
use skyway_core::reservation_code::insert_with_unique_code;
use skyway_shared::NotificationTask;
use skyway_store::MemoryStore;
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "integration-secret";

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    cache: Arc<MemoryCache>,
    queue: Arc<RecordingQueue>,
}

fn setup() -> TestApp {
    setup_over(Arc::new(MemoryStore::new()), true)
}

/// App over `store`; with `cached` false every read is computed.
fn setup_over(store: Arc<MemoryStore>, cached: bool) -> TestApp {
    let cache = Arc::new(MemoryCache::new());
    let queue = Arc::new(RecordingQueue::new());
    let responses = if cached {
        ResponseCache::new(cache.clone(), "test", std::time::Duration::from_secs(60))
    } else {
        ResponseCache::disabled(cache.clone())
    };
    let state = AppState::with_store(
        store.clone(),
        responses,
        queue.clone(),
        AuthConfig {
            secret: SECRET.to_string(),
        },
        10,
    );
    TestApp {
        router: app(state),
        store,
        cache,
        queue,
    }
}

fn token(user_id: i64, role: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        email: None,
        role: role.to_string(),
        exp: (Utc::now() + Duration::hours(1)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn call(
    app: &TestApp,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    let body = match body {
        Some(v) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

async fn call_json(
    app: &TestApp,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let (status, bytes) = call(app, method, uri, token, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn user(store: &MemoryStore, name: &str) -> User {
    UserRepository::insert(
        store,
        &UserInput {
            email: format!("{name}@example.com"),
            username: name.to_string(),
            first_name: name.to_string(),
            last_name: "Traveller".to_string(),
            phone: None,
            is_operator: false,
            is_staff: false,
            is_active: true,
            date_of_birth: None,
            country: None,
            city: None,
            profile_image_url: None,
        },
    )
    .await
    .unwrap()
}

async fn destination(store: &MemoryStore, code: &str) -> i64 {
    DestinationRepository::insert(
        store,
        &DestinationInput {
            code: code.to_string(),
            name: format!("Destination {code}"),
            province: "Guayas".to_string(),
            latitude: None,
            longitude: None,
            is_active: true,
            image_url: None,
        },
    )
    .await
    .unwrap()
    .id
}

async fn booking(store: &MemoryStore, owner: i64, destination: i64) -> Reservation {
    let request = FlightRequestRepository::insert(
        store,
        owner,
        &FlightRequestInput {
            destination,
            origin: None,
            travel_date: NaiveDate::from_ymd_opt(2030, 3, 14).unwrap(),
            status: None,
            companions: 1,
            notes: None,
        },
    )
    .await
    .unwrap();
    insert_with_unique_code(
        store,
        NewReservation {
            reservation_code: String::new(),
            user_id: owner,
            flight_id: request.id,
            reservation_date: Utc::now(),
            total_passengers: 2,
            total_amount: Decimal::new(48000, 2),
            status: ReservationStatus::Pending,
        },
    )
    .await
    .unwrap()
}

fn passenger(reservation: i64, name: &str, seat: &str) -> Value {
    json!({
        "reservation": reservation,
        "first_name": name,
        "last_name": "Traveller",
        "country_of_residence": "Ecuador",
        "identity_document": format!("ID-{name}"),
        "date_of_birth": "1988-06-01",
        "gender": "F",
        "seat_number": seat,
    })
}

// ============================================================================
// Authentication and roles
// ============================================================================

#[tokio::test]
async fn test_flight_catalog_is_readable_anonymously() {
    let app = setup();
    let (status, body) = call_json(&app, Method::GET, "/api/flights/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    let app = setup();
    let (status, _) = call(&app, Method::GET, "/api/airlines/", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_anonymous_write_is_unauthenticated() {
    let app = setup();
    let body = json!({"code": "LA", "name": "LATAM"});
    let (status, _) = call(&app, Method::POST, "/api/airlines/", None, Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_regular_user_cannot_manage_catalog() {
    let app = setup();
    let ana = user(&app.store, "ana").await;
    let body = json!({"code": "LA", "name": "LATAM"});
    let (status, body) = call_json(
        &app,
        Method::POST,
        "/api/airlines/",
        Some(&token(ana.id, "USER")),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn test_reservations_require_authentication() {
    let app = setup();
    let (status, _) = call(&app, Method::GET, "/api/reservations/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&app, Method::GET, "/api/airlines/", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Catalog
// ============================================================================

#[tokio::test]
async fn test_airline_code_is_uppercased() {
    let app = setup();
    let admin = token(1, "ADMIN");
    let body = json!({"code": " la ", "name": "LATAM Airlines"});
    let (status, body) =
        call_json(&app, Method::POST, "/api/airlines/", Some(&admin), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["code"], "LA");

    let dup = json!({"code": "la", "name": "Another"});
    let (status, body) =
        call_json(&app, Method::POST, "/api/airlines/", Some(&admin), Some(dup)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["code"].is_array());
}

#[tokio::test]
async fn test_missing_required_field_is_a_field_error() {
    let app = setup();
    let admin = token(1, "ADMIN");
    let (status, body) = call_json(
        &app,
        Method::POST,
        "/api/airlines/",
        Some(&admin),
        Some(json!({"name": "No Code"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["fields"]["code"][0], "This field is required.");
}

#[tokio::test]
async fn test_coordinates_come_in_pairs() {
    let app = setup();
    let admin = token(1, "ADMIN");
    let half = json!({"code": "GPS", "name": "Galapagos", "province": "Galapagos", "latitude": -0.9});
    let (status, body) =
        call_json(&app, Method::POST, "/api/destinations/", Some(&admin), Some(half)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["longitude"].is_array());

    let both = json!({
        "code": "GPS",
        "name": "Galapagos",
        "province": "Galapagos",
        "latitude": -0.9,
        "longitude": -89.6,
    });
    let (status, body) =
        call_json(&app, Method::POST, "/api/destinations/", Some(&admin), Some(both)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["code"], "GPS");
}

#[tokio::test]
async fn test_page_beyond_last_is_not_found() {
    let app = setup();
    let (status, _) = call(&app, Method::GET, "/api/flights/?page=3", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Flight requests and reservations
// ============================================================================

#[tokio::test]
async fn test_too_many_companions_is_rejected() {
    let app = setup();
    let ana = user(&app.store, "ana").await;
    let dest = destination(&app.store, "GYE").await;
    let body = json!({"destination": dest, "travel_date": "2030-03-14", "companions": 11});
    let (status, body) = call_json(
        &app,
        Method::POST,
        "/api/flight-requests/",
        Some(&token(ana.id, "USER")),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["companions"].is_array());
}

#[tokio::test]
async fn test_cannot_cancel_someone_elses_reservation() {
    let app = setup();
    let ana = user(&app.store, "ana").await;
    let ben = user(&app.store, "ben").await;
    let dest = destination(&app.store, "UIO").await;
    let reservation = booking(&app.store, ana.id, dest).await;

    let uri = format!("/api/reservations/{}/cancel/", reservation.id);
    let (status, _) = call(&app, Method::POST, &uri, Some(&token(ben.id, "USER")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let stored = ReservationRepository::get(app.store.as_ref(), Scope::All, reservation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ReservationStatus::Pending);
}

#[tokio::test]
async fn test_owner_cancels_reservation() {
    let app = setup();
    let ana = user(&app.store, "ana").await;
    let dest = destination(&app.store, "UIO").await;
    let reservation = booking(&app.store, ana.id, dest).await;

    let uri = format!("/api/reservations/{}/cancel/", reservation.id);
    let ana_token = token(ana.id, "USER");
    let (status, body) = call_json(&app, Method::POST, &uri, Some(&ana_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let confirm = format!("/api/reservations/{}/confirm/", reservation.id);
    let (status, _) = call(&app, Method::POST, &confirm, Some(&token(1, "ADMIN")), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancelling_twice_is_a_no_op() {
    let app = setup();
    let ana = user(&app.store, "ana").await;
    let dest = destination(&app.store, "UIO").await;
    let reservation = booking(&app.store, ana.id, dest).await;
    let uri = format!("/api/reservations/{}/cancel/", reservation.id);
    let ana_token = token(ana.id, "USER");

    let (status, first) = call_json(&app, Method::POST, &uri, Some(&ana_token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, second) = call_json(&app, Method::POST, &uri, Some(&ana_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "cancelled");
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_cancelled_reservation_cannot_be_reopened() {
    let app = setup();
    let ana = user(&app.store, "ana").await;
    let dest = destination(&app.store, "UIO").await;
    let reservation = booking(&app.store, ana.id, dest).await;
    let admin = token(1, "ADMIN");

    let cancel = format!("/api/reservations/{}/cancel/", reservation.id);
    let (status, _) = call(&app, Method::POST, &cancel, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);

    let change = format!("/api/reservations/{}/change-status/", reservation.id);
    let (status, body) = call_json(
        &app,
        Method::POST,
        &change,
        Some(&admin),
        Some(json!({"status": "pending"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["status"].is_array());

    let stored = ReservationRepository::get(app.store.as_ref(), Scope::All, reservation.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ReservationStatus::Cancelled);
}

// ============================================================================
// Passengers
// ============================================================================

#[tokio::test]
async fn test_seat_cannot_be_taken_twice_on_a_reservation() {
    let app = setup();
    let ana = user(&app.store, "ana").await;
    let dest = destination(&app.store, "CUE").await;
    let reservation = booking(&app.store, ana.id, dest).await;
    let ana_token = token(ana.id, "USER");

    let (status, body) = call_json(
        &app,
        Method::POST,
        "/api/reservation-passengers/",
        Some(&ana_token),
        Some(passenger(reservation.id, "Ana", "12a")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["seat_number"], "12A");
    assert_eq!(body["reservation_code"], reservation.reservation_code.as_str());

    let (status, body) = call_json(
        &app,
        Method::POST,
        "/api/reservation-passengers/",
        Some(&ana_token),
        Some(passenger(reservation.id, "Eva", "12A")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["fields"]["seat_number"].is_array());
}

#[tokio::test]
async fn test_bulk_create_reports_rejected_entries() {
    let app = setup();
    let ana = user(&app.store, "ana").await;
    let dest = destination(&app.store, "MEC").await;
    let reservation = booking(&app.store, ana.id, dest).await;

    let mut bad = passenger(reservation.id, "Eva", "3C");
    bad["date_of_birth"] = json!("2999-01-01");
    let body = json!({"passengers": [passenger(reservation.id, "Ana", "3B"), bad]});
    let (status, body) = call_json(
        &app,
        Method::POST,
        "/api/reservation-passengers/bulk-create/",
        Some(&token(ana.id, "ADMIN")),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["total_created"], 1);
    assert_eq!(body["total_errors"], 1);
    assert!(body["errors"][0]["errors"]["date_of_birth"].is_array());
}

// ============================================================================
// Response cache
// ============================================================================

#[tokio::test]
async fn test_cached_reads_are_identical_and_invalidated_on_write() {
    let app = setup();
    let admin = token(1, "ADMIN");
    let (_, created) = call_json(
        &app,
        Method::POST,
        "/api/airlines/",
        Some(&admin),
        Some(json!({"code": "AV", "name": "Avianca"})),
    )
    .await;
    let id = created["id"].as_i64().unwrap();
    let reader = token(7, "USER");

    let (_, first) = call(&app, Method::GET, "/api/airlines/", Some(&reader), None).await;
    assert!(!app.cache.keys().is_empty());
    let (_, second) = call(&app, Method::GET, "/api/airlines/", Some(&reader), None).await;
    assert_eq!(first, second);

    let uri = format!("/api/airlines/{}/", id);
    let (status, _) = call(
        &app,
        Method::PATCH,
        &uri,
        Some(&admin),
        Some(json!({"name": "Avianca Ecuador"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, after) = call_json(&app, Method::GET, "/api/airlines/", Some(&reader), None).await;
    assert_eq!(after["results"][0]["name"], "Avianca Ecuador");
}

#[tokio::test]
async fn test_cached_and_uncached_responses_match() {
    let store = Arc::new(MemoryStore::new());
    let cached = setup_over(store.clone(), true);
    let direct = setup_over(store, false);
    let admin = token(1, "ADMIN");
    let reader = token(7, "USER");

    async fn same(cached: &TestApp, direct: &TestApp, uri: &str, token: &str) {
        let hit = call(cached, Method::GET, uri, Some(token), None).await;
        let fresh = call(direct, Method::GET, uri, Some(token), None).await;
        assert_eq!(hit, fresh, "GET {uri}");
    }

    let (status, created) = call_json(
        &cached,
        Method::POST,
        "/api/airlines/",
        Some(&admin),
        Some(json!({"code": "AV", "name": "Avianca"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let detail = format!("/api/airlines/{}/", created["id"]);
    let reads = [
        "/api/airlines/",
        "/api/airlines/?search=avi&search=zzz",
        "/api/airlines/?search=zzz&search=avi",
        "/api/airlines/?page=2",
        detail.as_str(),
    ];

    for _ in 0..2 {
        for uri in reads {
            same(&cached, &direct, uri, &reader).await;
        }
    }

    let (status, _) = call(
        &cached,
        Method::PATCH,
        &detail,
        Some(&admin),
        Some(json!({"name": "Avianca Ecuador"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    for uri in reads {
        same(&cached, &direct, uri, &reader).await;
    }

    let (status, _) = call(&cached, Method::DELETE, &detail, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    for uri in reads {
        same(&cached, &direct, uri, &reader).await;
    }
}

#[tokio::test]
async fn test_destination_rename_reaches_cached_flight_requests() {
    let app = setup();
    let ana = user(&app.store, "ana").await;
    let dest = destination(&app.store, "SCY").await;
    booking(&app.store, ana.id, dest).await;
    let ana_token = token(ana.id, "USER");

    let (_, before) =
        call_json(&app, Method::GET, "/api/flight-requests/", Some(&ana_token), None).await;
    assert_eq!(before["results"][0]["destination"]["name"], "Destination SCY");

    let uri = format!("/api/destinations/{}/", dest);
    let (status, _) = call(
        &app,
        Method::PATCH,
        &uri,
        Some(&token(1, "ADMIN")),
        Some(json!({"name": "San Cristobal"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, after) =
        call_json(&app, Method::GET, "/api/flight-requests/", Some(&ana_token), None).await;
    assert_eq!(after["results"][0]["destination"]["name"], "San Cristobal");
}

#[tokio::test]
async fn test_cached_lists_are_isolated_per_user() {
    let app = setup();
    let ana = user(&app.store, "ana").await;
    let ben = user(&app.store, "ben").await;
    let dest = destination(&app.store, "GPS").await;
    booking(&app.store, ana.id, dest).await;

    let (_, for_ana) = call_json(
        &app,
        Method::GET,
        "/api/reservations/",
        Some(&token(ana.id, "USER")),
        None,
    )
    .await;
    let (_, for_ben) = call_json(
        &app,
        Method::GET,
        "/api/reservations/",
        Some(&token(ben.id, "USER")),
        None,
    )
    .await;
    assert_eq!(for_ana["count"], 1);
    assert_eq!(for_ben["count"], 0);
}

// ============================================================================
// Users
// ============================================================================

#[tokio::test]
async fn test_creating_a_user_queues_welcome_email() {
    let app = setup();
    let body = json!({"email": "Nia@Example.com", "username": "nia"});
    let (status, body) =
        call_json(&app, Method::POST, "/api/users/", Some(&token(1, "ADMIN")), Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["email"], "nia@example.com");

    let id = body["id"].as_i64().unwrap();
    assert_eq!(
        app.queue.tasks(),
        vec![NotificationTask::WelcomeEmail { user_id: id }]
    );
}

#[tokio::test]
async fn test_other_users_see_public_profile() {
    let app = setup();
    let ana = user(&app.store, "ana").await;
    let ben = user(&app.store, "ben").await;
    let uri = format!("/api/users/{}/", ana.id);

    let (_, own) = call_json(&app, Method::GET, &uri, Some(&token(ana.id, "USER")), None).await;
    assert_eq!(own["email"], "ana@example.com");

    let (_, other) = call_json(&app, Method::GET, &uri, Some(&token(ben.id, "USER")), None).await;
    assert_eq!(other["username"], "ana");
    assert!(other.get("email").is_none());
}

#[tokio::test]
async fn test_me_returns_the_caller() {
    let app = setup();
    let ana = user(&app.store, "ana").await;
    let (status, body) = call_json(
        &app,
        Method::GET,
        "/api/users/me/",
        Some(&token(ana.id, "USER")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], ana.id);
}
