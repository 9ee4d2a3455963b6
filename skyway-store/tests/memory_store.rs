use chrono::{Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use skyway_core::access::Scope;
use skyway_core::models::{
    DestinationInput, FlightRequest, FlightRequestInput, Gender, PassengerCategory, PassengerInput,
    PassengerType, RequestStatus, Reservation, ReservationStatus, User, UserInput,
};
use skyway_core::notify::RecordingQueue;
use skyway_core::reminders::{enqueue_due_reminders, LEAD_DAYS};
use skyway_core::repository::{
    DestinationRepository, FlightRequestQuery, FlightRequestRepository, NewReservation, PageRequest, PassengerQuery,
    PassengerRepository, ReservationQuery, ReservationRepository, Sort, StoreError, UserRepository,
};
use skyway_core::reservation_code::{self, generate_with, insert_with_rng};
use skyway_shared::NotificationTask;
use skyway_store::MemoryStore;

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

async fn request(store: &MemoryStore, owner: i64, travel_date: NaiveDate) -> FlightRequest {
    let code = format!("D{}", travel_date.format("%j"));
    let destination = match DestinationRepository::insert(
        store,
        &DestinationInput {
            code: code.clone(),
            name: format!("Destination {code}"),
            province: "Guayas".to_string(),
            latitude: None,
            longitude: None,
            is_active: true,
            image_url: None,
        },
    )
    .await
    {
        Ok(d) => d,
        Err(_) => DestinationRepository::list(store, &Default::default(), None)
            .await
            .unwrap()
            .items
            .into_iter()
            .find(|d| d.code == code)
            .unwrap(),
    };
    FlightRequestRepository::insert(
        store,
        owner,
        &FlightRequestInput {
            destination: destination.id,
            origin: None,
            travel_date,
            status: None,
            companions: 1,
            notes: None,
        },
    )
    .await
    .unwrap()
}

fn draft(user_id: i64, flight_id: i64, status: ReservationStatus) -> NewReservation {
    NewReservation {
        reservation_code: String::new(),
        user_id,
        flight_id,
        reservation_date: Utc::now(),
        total_passengers: 2,
        total_amount: Decimal::new(48000, 2),
        status,
    }
}

async fn book(store: &MemoryStore, user_id: i64, flight_id: i64, status: ReservationStatus) -> Reservation {
    reservation_code::insert_with_unique_code(store, draft(user_id, flight_id, status))
        .await
        .unwrap()
}

fn passenger(reservation: i64, name: &str, kind: PassengerType, seat: Option<&str>) -> PassengerInput {
    PassengerInput {
        reservation,
        passenger_type: kind,
        passenger_category: PassengerCategory::Adult,
        first_name: name.to_string(),
        last_name: "Traveller".to_string(),
        country_of_residence: "Ecuador".to_string(),
        identity_document: format!("ID-{name}"),
        date_of_birth: NaiveDate::from_ymd_opt(1988, 6, 1).unwrap(),
        gender: Gender::O,
        seat_number: seat.map(str::to_string),
    }
}

#[tokio::test]
async fn code_generation_skips_taken_codes() {
    let store = MemoryStore::new();
    let ana = user(&store, "ana").await;
    let req = request(&store, ana.id, NaiveDate::from_ymd_opt(2026, 11, 2).unwrap()).await;

    let mut rng = StdRng::seed_from_u64(42);
    let first = generate_with(&mut rng.clone());
    let mut taken = draft(ana.id, req.id, ReservationStatus::Pending);
    taken.reservation_code = first.clone();
    ReservationRepository::insert(&store, &taken).await.unwrap();

    let booked = insert_with_rng(&store, draft(ana.id, req.id, ReservationStatus::Pending), &mut rng)
        .await
        .unwrap();
    assert_ne!(booked.reservation_code, first);
    assert!(reservation_code::is_valid(&booked.reservation_code));
}

#[tokio::test]
async fn duplicate_code_is_a_unique_violation() {
    let store = MemoryStore::new();
    let ana = user(&store, "ana").await;
    let req = request(&store, ana.id, NaiveDate::from_ymd_opt(2026, 11, 2).unwrap()).await;
    let mut new = draft(ana.id, req.id, ReservationStatus::Pending);
    new.reservation_code = "RES-ABC123".to_string();
    ReservationRepository::insert(&store, &new).await.unwrap();

    let err = ReservationRepository::insert(&store, &new).await.unwrap_err();
    assert_eq!(
        err,
        StoreError::UniqueViolation {
            field: "reservation_code".to_string()
        }
    );
}

#[tokio::test]
async fn reservation_reads_are_scoped_to_owner() {
    let store = MemoryStore::new();
    let ana = user(&store, "ana").await;
    let bea = user(&store, "bea").await;
    let date = NaiveDate::from_ymd_opt(2026, 11, 2).unwrap();
    let ana_req = request(&store, ana.id, date).await;
    let bea_req = request(&store, bea.id, date).await;
    let mine = book(&store, ana.id, ana_req.id, ReservationStatus::Pending).await;
    let theirs = book(&store, bea.id, bea_req.id, ReservationStatus::Confirmed).await;

    let scope = Scope::OwnedBy(ana.id);
    let page = ReservationRepository::list(&store, scope, &ReservationQuery::default(), None)
        .await
        .unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(page.items[0].id, mine.id);
    assert!(ReservationRepository::get(&store, scope, theirs.id).await.unwrap().is_none());
    assert_eq!(
        ReservationRepository::owner_of(&store, theirs.id).await.unwrap(),
        Some(bea.id)
    );

    let stats = ReservationRepository::statistics(&store, Scope::All).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.confirmed, 1);
    assert_eq!(stats.total_amount, Decimal::new(48000, 2));
    assert_eq!(stats.total_passengers, 2);
    let nothing = ReservationRepository::statistics(&store, Scope::Nothing).await.unwrap();
    assert_eq!(nothing.total, 0);
}

#[tokio::test]
async fn listing_orders_and_pages() {
    let store = MemoryStore::new();
    let ana = user(&store, "ana").await;
    let req = request(&store, ana.id, NaiveDate::from_ymd_opt(2026, 11, 2).unwrap()).await;
    for amount in [300, 100, 200] {
        let mut d = draft(ana.id, req.id, ReservationStatus::Pending);
        d.total_amount = Decimal::from(amount);
        reservation_code::insert_with_unique_code(&store, d).await.unwrap();
    }

    let query = ReservationQuery {
        ordering: Sort::parse("-total_amount"),
        ..Default::default()
    };
    let page = ReservationRepository::list(&store, Scope::All, &query, Some(PageRequest { page: 1, size: 2 }))
        .await
        .unwrap();
    assert_eq!(page.count, 3);
    let amounts: Vec<Decimal> = page.items.iter().map(|r| r.total_amount).collect();
    assert_eq!(amounts, vec![Decimal::from(300), Decimal::from(200)]);
}

#[tokio::test]
async fn seats_are_unique_within_a_reservation() {
    let store = MemoryStore::new();
    let ana = user(&store, "ana").await;
    let req = request(&store, ana.id, NaiveDate::from_ymd_opt(2026, 11, 2).unwrap()).await;
    let res = book(&store, ana.id, req.id, ReservationStatus::Pending).await;
    let other = book(&store, ana.id, req.id, ReservationStatus::Pending).await;

    PassengerRepository::insert(&store, &passenger(res.id, "Ana", PassengerType::Main, Some("12A")))
        .await
        .unwrap();
    let clash = PassengerRepository::insert(&store, &passenger(res.id, "Bea", PassengerType::Companion, Some("12A")))
        .await
        .unwrap_err();
    assert!(matches!(clash, StoreError::UniqueViolation { ref field } if field == "seat_number"));

    // Same seat on a different reservation is fine.
    PassengerRepository::insert(&store, &passenger(other.id, "Cid", PassengerType::Main, Some("12A")))
        .await
        .unwrap();
    assert!(PassengerRepository::seat_taken(&store, res.id, "12A", None).await.unwrap());
    assert!(!PassengerRepository::seat_taken(&store, res.id, "12B", None).await.unwrap());
}

#[tokio::test]
async fn passengers_default_to_companions_first_and_filter_by_code() {
    let store = MemoryStore::new();
    let ana = user(&store, "ana").await;
    let req = request(&store, ana.id, NaiveDate::from_ymd_opt(2026, 11, 2).unwrap()).await;
    let res = book(&store, ana.id, req.id, ReservationStatus::Pending).await;
    let other = book(&store, ana.id, req.id, ReservationStatus::Pending).await;

    PassengerRepository::insert(&store, &passenger(res.id, "Main", PassengerType::Main, None))
        .await
        .unwrap();
    PassengerRepository::insert(&store, &passenger(res.id, "Comp", PassengerType::Companion, None))
        .await
        .unwrap();
    PassengerRepository::insert(&store, &passenger(other.id, "Else", PassengerType::Main, None))
        .await
        .unwrap();

    let query = PassengerQuery {
        reservation_code: Some(res.reservation_code.clone()),
        ..Default::default()
    };
    let page = PassengerRepository::list(&store, Scope::All, &query, None).await.unwrap();
    let names: Vec<&str> = page.items.iter().map(|p| p.first_name.as_str()).collect();
    assert_eq!(names, vec!["Comp", "Main"]);

    let stats = PassengerRepository::statistics(&store, Scope::OwnedBy(ana.id)).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_type.companion, 1);
    assert_eq!(stats.without_seat_assigned, 3);
}

#[tokio::test]
async fn reminder_scan_enqueues_due_work() {
    let store = MemoryStore::new();
    let queue = RecordingQueue::new();
    let ana = user(&store, "ana").await;
    let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
    let due = today + Duration::days(LEAD_DAYS);

    let pending = request(&store, ana.id, due).await;
    let mut confirmed_req = request(&store, ana.id, due).await;
    confirmed_req.confirm(ana.id, Utc::now());
    FlightRequestRepository::save_state(&store, &confirmed_req).await.unwrap();
    let later = request(&store, ana.id, due + Duration::days(1)).await;

    let booked = book(&store, ana.id, confirmed_req.id, ReservationStatus::Confirmed).await;
    book(&store, ana.id, confirmed_req.id, ReservationStatus::Pending).await;
    book(&store, ana.id, later.id, ReservationStatus::Confirmed).await;

    let run = enqueue_due_reminders(&store, &store, &queue, today).await.unwrap();
    assert_eq!(run.request_reminders, 1);
    assert_eq!(run.reservation_reminders, 1);
    assert_eq!(run.failed, 0);

    let tasks = queue.tasks();
    assert!(tasks.contains(&NotificationTask::FlightRequestReminder { request_id: pending.id }));
    assert!(tasks.contains(&NotificationTask::FlightReminder { reservation_id: booked.id }));
    assert_eq!(
        FlightRequestRepository::get(&store, Scope::All, confirmed_req.id)
            .await
            .unwrap()
            .unwrap()
            .status,
        RequestStatus::Confirmed
    );
}

#[tokio::test]
async fn search_covers_related_names() {
    let store = MemoryStore::new();
    let ana = user(&store, "ana").await;
    let ben = user(&store, "benjamin").await;
    let date = NaiveDate::from_ymd_opt(2026, 11, 2).unwrap();
    let mine = request(&store, ana.id, date).await;
    let theirs = request(&store, ben.id, date).await;
    let booked = book(&store, ben.id, theirs.id, ReservationStatus::Pending).await;
    book(&store, ana.id, mine.id, ReservationStatus::Pending).await;

    let by_place = FlightRequestQuery {
        search: Some(format!("destination d{}", date.format("%j"))),
        ..Default::default()
    };
    let page = FlightRequestRepository::list(&store, Scope::All, &by_place, None)
        .await
        .unwrap();
    assert_eq!(page.count, 2);

    let nowhere = FlightRequestQuery {
        search: Some("atlantis".into()),
        ..Default::default()
    };
    let page = FlightRequestRepository::list(&store, Scope::All, &nowhere, None)
        .await
        .unwrap();
    assert_eq!(page.count, 0);

    for term in ["BENJAMIN", "benjamin@example"] {
        let query = ReservationQuery {
            search: Some(term.to_string()),
            ..Default::default()
        };
        let page = ReservationRepository::list(&store, Scope::All, &query, None)
            .await
            .unwrap();
        assert_eq!(page.count, 1, "search {term}");
        assert_eq!(page.items[0].id, booked.id);
    }
}
