//! In-process backend implementing every repository over plain maps.
//!
//! Mirrors the Postgres repositories closely enough for handler and scan
//! tests: unique columns, foreign keys, cascades and the default orderings
//! behave the same way.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use skyway_core::access::Scope;
use skyway_core::models::{
    Airline, AirlineInput, Destination, DestinationInput, Flight, FlightInput, FlightRequest,
    FlightRequestInput, PassengerCategory, PassengerInput, PassengerStatistics, RequestStatus,
    Reservation, ReservationPassenger, ReservationStatistics, ReservationStatus, User, UserInput,
};
use skyway_core::repository::{
    AirlineQuery, AirlineRepository, AirlineSort, DestinationQuery, DestinationRepository,
    DestinationSort, FlightQuery, FlightRepository, FlightRequestQuery, FlightRequestRepository,
    FlightRequestSort, FlightSort, NewReservation, Page, PageRequest, PassengerQuery,
    PassengerRepository, PassengerSort, ReservationQuery, ReservationRepository, ReservationSort,
    Sort, StoreError, StoreResult, UserQuery, UserRepository, UserSort,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Sequences {
    airline: i64,
    destination: i64,
    flight: i64,
    request: i64,
    reservation: i64,
    passenger: i64,
    user: i64,
}

fn next(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

#[derive(Default)]
struct Tables {
    seq: Sequences,
    airlines: BTreeMap<i64, Airline>,
    destinations: BTreeMap<i64, Destination>,
    flights: BTreeMap<i64, Flight>,
    requests: BTreeMap<i64, FlightRequest>,
    reservations: BTreeMap<i64, Reservation>,
    passengers: BTreeMap<i64, ReservationPassenger>,
    users: BTreeMap<i64, User>,
}

impl Tables {
    fn place_names(&self, r: &FlightRequest) -> Vec<&str> {
        std::iter::once(r.destination_id)
            .chain(r.origin_id)
            .filter_map(|id| self.destinations.get(&id))
            .map(|d| d.name.as_str())
            .collect()
    }

    fn owner_identity(&self, r: &Reservation) -> Vec<&str> {
        self.users
            .get(&r.user_id)
            .map(|u| vec![u.username.as_str(), u.email.as_str()])
            .unwrap_or_default()
    }

    fn passenger_owner(&self, p: &ReservationPassenger) -> Option<i64> {
        self.reservations.get(&p.reservation_id).map(|r| r.user_id)
    }

    /// Removes the given reservations and their passengers.
    fn drop_reservations(&mut self, ids: &[i64]) {
        self.passengers.retain(|_, p| !ids.contains(&p.reservation_id));
        self.reservations.retain(|id, _| !ids.contains(id));
    }

    fn seat_taken(&self, reservation_id: i64, seat: &str, except: Option<i64>) -> bool {
        self.passengers.values().any(|p| {
            p.reservation_id == reservation_id
                && p.seat_number.as_deref() == Some(seat)
                && Some(p.id) != except
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn unique(field: &str) -> StoreError {
    StoreError::UniqueViolation {
        field: field.to_string(),
    }
}

fn missing(field: &str) -> StoreError {
    StoreError::ForeignKeyViolation {
        field: field.to_string(),
    }
}

fn directed(ord: Ordering, descending: bool) -> Ordering {
    if descending {
        ord.reverse()
    } else {
        ord
    }
}

/// Orders `rows` by `cmp`, breaking ties on id in the same direction.
fn sorted<T>(
    mut rows: Vec<T>,
    id: impl Fn(&T) -> i64,
    descending: bool,
    cmp: impl Fn(&T, &T) -> Ordering,
) -> Vec<T> {
    rows.sort_by(|a, b| directed(cmp(a, b).then_with(|| id(a).cmp(&id(b))), descending));
    rows
}

fn paginate<T>(rows: Vec<T>, page: Option<PageRequest>) -> Page<T> {
    let count = rows.len() as u64;
    let items = match page {
        Some(p) => rows
            .into_iter()
            .skip(p.offset() as usize)
            .take(p.size as usize)
            .collect(),
        None => rows,
    };
    Page { count, items }
}

fn airline_cmp(field: AirlineSort) -> impl Fn(&Airline, &Airline) -> Ordering {
    move |a, b| match field {
        AirlineSort::Name => a.name.cmp(&b.name),
        AirlineSort::Code => a.code.cmp(&b.code),
        AirlineSort::CreatedAt => a.created_at.cmp(&b.created_at),
    }
}

fn destination_cmp(field: DestinationSort) -> impl Fn(&Destination, &Destination) -> Ordering {
    move |a, b| match field {
        DestinationSort::Name => a.name.cmp(&b.name),
        DestinationSort::Code => a.code.cmp(&b.code),
        DestinationSort::Province => a.province.cmp(&b.province),
        DestinationSort::CreatedAt => a.created_at.cmp(&b.created_at),
    }
}

fn flight_cmp(field: FlightSort) -> impl Fn(&Flight, &Flight) -> Ordering {
    move |a, b| match field {
        FlightSort::Departure => a.departure_datetime.cmp(&b.departure_datetime),
        FlightSort::AdultPrice => a.adult_price.cmp(&b.adult_price),
        FlightSort::AvailableSeats => a.available_seats.cmp(&b.available_seats),
        FlightSort::CreatedAt => a.created_at.cmp(&b.created_at),
    }
}

fn request_cmp(field: FlightRequestSort) -> impl Fn(&FlightRequest, &FlightRequest) -> Ordering {
    move |a, b| match field {
        FlightRequestSort::CreatedAt => a.created_at.cmp(&b.created_at),
        FlightRequestSort::TravelDate => a.travel_date.cmp(&b.travel_date),
        FlightRequestSort::Status => a.status.as_str().cmp(b.status.as_str()),
    }
}

fn reservation_cmp(field: ReservationSort) -> impl Fn(&Reservation, &Reservation) -> Ordering {
    move |a, b| match field {
        ReservationSort::ReservationDate => a.reservation_date.cmp(&b.reservation_date),
        ReservationSort::TotalAmount => a.total_amount.cmp(&b.total_amount),
        ReservationSort::CreatedAt => a.created_at.cmp(&b.created_at),
    }
}

fn passenger_cmp(
    field: PassengerSort,
) -> impl Fn(&ReservationPassenger, &ReservationPassenger) -> Ordering {
    move |a, b| match field {
        PassengerSort::CreatedAt => a.created_at.cmp(&b.created_at),
        PassengerSort::PassengerType => a.passenger_type.as_str().cmp(b.passenger_type.as_str()),
        PassengerSort::DateOfBirth => a.date_of_birth.cmp(&b.date_of_birth),
    }
}

fn user_cmp(field: UserSort) -> impl Fn(&User, &User) -> Ordering {
    move |a, b| match field {
        UserSort::DateJoined => a.date_joined.cmp(&b.date_joined),
        UserSort::CreatedAt => a.created_at.cmp(&b.created_at),
        UserSort::Email => a.email.cmp(&b.email),
    }
}

#[async_trait]
impl AirlineRepository for MemoryStore {
    async fn list(&self, query: &AirlineQuery, page: Option<PageRequest>) -> StoreResult<Page<Airline>> {
        let tables = self.tables();
        let rows: Vec<Airline> = tables
            .airlines
            .values()
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        let sort = query.ordering.unwrap_or(Sort {
            field: AirlineSort::Name,
            descending: false,
        });
        let rows = sorted(rows, |a| a.id, sort.descending, airline_cmp(sort.field));
        Ok(paginate(rows, page))
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Airline>> {
        Ok(self.tables().airlines.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[i64]) -> StoreResult<Vec<Airline>> {
        let tables = self.tables();
        Ok(ids.iter().filter_map(|id| tables.airlines.get(id).cloned()).collect())
    }

    async fn insert(&self, input: &AirlineInput) -> StoreResult<Airline> {
        let mut tables = self.tables();
        check_airline_unique(&tables, input, None)?;
        let now = Utc::now();
        let airline = Airline {
            id: next(&mut tables.seq.airline),
            code: input.code.clone(),
            name: input.name.clone(),
            logo_url: input.logo_url.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.airlines.insert(airline.id, airline.clone());
        Ok(airline)
    }

    async fn update(&self, id: i64, input: &AirlineInput) -> StoreResult<Option<Airline>> {
        let mut tables = self.tables();
        check_airline_unique(&tables, input, Some(id))?;
        let Some(airline) = tables.airlines.get_mut(&id) else {
            return Ok(None);
        };
        airline.code = input.code.clone();
        airline.name = input.name.clone();
        airline.logo_url = input.logo_url.clone();
        airline.updated_at = Utc::now();
        Ok(Some(airline.clone()))
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables();
        if tables.airlines.remove(&id).is_none() {
            return Ok(false);
        }
        tables.flights.retain(|_, f| f.airline_id != id);
        Ok(true)
    }
}

fn check_airline_unique(tables: &Tables, input: &AirlineInput, except: Option<i64>) -> StoreResult<()> {
    let others = || tables.airlines.values().filter(|a| Some(a.id) != except);
    if others().any(|a| a.code == input.code) {
        return Err(unique("code"));
    }
    if others().any(|a| a.name == input.name) {
        return Err(unique("name"));
    }
    Ok(())
}

#[async_trait]
impl DestinationRepository for MemoryStore {
    async fn list(
        &self,
        query: &DestinationQuery,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<Destination>> {
        let tables = self.tables();
        let rows: Vec<Destination> = tables
            .destinations
            .values()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();
        let sort = query.ordering.unwrap_or(Sort {
            field: DestinationSort::Name,
            descending: false,
        });
        let rows = sorted(rows, |d| d.id, sort.descending, destination_cmp(sort.field));
        Ok(paginate(rows, page))
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Destination>> {
        Ok(self.tables().destinations.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[i64]) -> StoreResult<Vec<Destination>> {
        let tables = self.tables();
        Ok(ids
            .iter()
            .filter_map(|id| tables.destinations.get(id).cloned())
            .collect())
    }

    async fn insert(&self, input: &DestinationInput) -> StoreResult<Destination> {
        let mut tables = self.tables();
        check_destination_unique(&tables, input, None)?;
        let now = Utc::now();
        let destination = Destination {
            id: next(&mut tables.seq.destination),
            code: input.code.clone(),
            name: input.name.clone(),
            province: input.province.clone(),
            latitude: input.latitude,
            longitude: input.longitude,
            is_active: input.is_active,
            image_url: input.image_url.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.destinations.insert(destination.id, destination.clone());
        Ok(destination)
    }

    async fn update(&self, id: i64, input: &DestinationInput) -> StoreResult<Option<Destination>> {
        let mut tables = self.tables();
        check_destination_unique(&tables, input, Some(id))?;
        let Some(d) = tables.destinations.get_mut(&id) else {
            return Ok(None);
        };
        d.code = input.code.clone();
        d.name = input.name.clone();
        d.province = input.province.clone();
        d.latitude = input.latitude;
        d.longitude = input.longitude;
        d.is_active = input.is_active;
        d.image_url = input.image_url.clone();
        d.updated_at = Utc::now();
        Ok(Some(d.clone()))
    }

    async fn set_active(&self, id: i64, active: bool) -> StoreResult<Option<Destination>> {
        let mut tables = self.tables();
        Ok(tables.destinations.get_mut(&id).map(|d| {
            d.is_active = active;
            d.updated_at = Utc::now();
            d.clone()
        }))
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables();
        let referenced = tables
            .requests
            .values()
            .any(|r| r.destination_id == id || r.origin_id == Some(id));
        if referenced {
            return Err(StoreError::Restricted {
                field: "flight_requests".to_string(),
            });
        }
        Ok(tables.destinations.remove(&id).is_some())
    }
}

fn check_destination_unique(
    tables: &Tables,
    input: &DestinationInput,
    except: Option<i64>,
) -> StoreResult<()> {
    let others = || tables.destinations.values().filter(|d| Some(d.id) != except);
    if others().any(|d| d.code == input.code) {
        return Err(unique("code"));
    }
    if others().any(|d| d.name == input.name) {
        return Err(unique("name"));
    }
    Ok(())
}

#[async_trait]
impl FlightRepository for MemoryStore {
    async fn list(&self, query: &FlightQuery, page: Option<PageRequest>) -> StoreResult<Page<Flight>> {
        let tables = self.tables();
        let rows: Vec<Flight> = tables
            .flights
            .values()
            .filter(|f| query.matches(f))
            .cloned()
            .collect();
        let sort = query.ordering.unwrap_or(Sort {
            field: FlightSort::Departure,
            descending: false,
        });
        let rows = sorted(rows, |f| f.id, sort.descending, flight_cmp(sort.field));
        Ok(paginate(rows, page))
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Flight>> {
        Ok(self.tables().flights.get(&id).cloned())
    }

    async fn insert(&self, input: &FlightInput) -> StoreResult<Flight> {
        let mut tables = self.tables();
        check_flight_write(&tables, input, None)?;
        let now = Utc::now();
        let flight = Flight {
            id: next(&mut tables.seq.flight),
            flight_code: input.flight_code.clone(),
            airline_id: input.airline,
            origin: input.origin.clone(),
            destination: input.destination.clone(),
            departure_datetime: input.departure_datetime,
            arrival_datetime: input.arrival_datetime,
            number_of_stops: input.number_of_stops,
            adult_price: input.adult_price,
            child_price: input.child_price,
            special_price: input.special_price,
            available_seats: input.available_seats,
            status: input.status,
            notes: input.notes.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.flights.insert(flight.id, flight.clone());
        Ok(flight)
    }

    async fn update(&self, id: i64, input: &FlightInput) -> StoreResult<Option<Flight>> {
        let mut tables = self.tables();
        check_flight_write(&tables, input, Some(id))?;
        let Some(f) = tables.flights.get_mut(&id) else {
            return Ok(None);
        };
        f.flight_code = input.flight_code.clone();
        f.airline_id = input.airline;
        f.origin = input.origin.clone();
        f.destination = input.destination.clone();
        f.departure_datetime = input.departure_datetime;
        f.arrival_datetime = input.arrival_datetime;
        f.number_of_stops = input.number_of_stops;
        f.adult_price = input.adult_price;
        f.child_price = input.child_price;
        f.special_price = input.special_price;
        f.available_seats = input.available_seats;
        f.status = input.status;
        f.notes = input.notes.clone();
        f.updated_at = Utc::now();
        Ok(Some(f.clone()))
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        Ok(self.tables().flights.remove(&id).is_some())
    }
}

fn check_flight_write(tables: &Tables, input: &FlightInput, except: Option<i64>) -> StoreResult<()> {
    if tables
        .flights
        .values()
        .any(|f| Some(f.id) != except && f.flight_code == input.flight_code)
    {
        return Err(unique("flight_code"));
    }
    if !tables.airlines.contains_key(&input.airline) {
        return Err(missing("airline"));
    }
    Ok(())
}

fn check_request_refs(tables: &Tables, user_id: i64, input: &FlightRequestInput) -> StoreResult<()> {
    if !tables.users.contains_key(&user_id) {
        return Err(missing("user"));
    }
    if !tables.destinations.contains_key(&input.destination) {
        return Err(missing("destination"));
    }
    if let Some(origin) = input.origin {
        if !tables.destinations.contains_key(&origin) {
            return Err(missing("origin"));
        }
    }
    Ok(())
}

#[async_trait]
impl FlightRequestRepository for MemoryStore {
    async fn list(
        &self,
        scope: Scope,
        query: &FlightRequestQuery,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<FlightRequest>> {
        let tables = self.tables();
        let rows: Vec<FlightRequest> = tables
            .requests
            .values()
            .filter(|r| scope.permits(r.user_id) && query.matches(r, &tables.place_names(r)))
            .cloned()
            .collect();
        let sort = query.ordering.unwrap_or(Sort {
            field: FlightRequestSort::CreatedAt,
            descending: true,
        });
        let rows = sorted(rows, |r| r.id, sort.descending, request_cmp(sort.field));
        Ok(paginate(rows, page))
    }

    async fn get(&self, scope: Scope, id: i64) -> StoreResult<Option<FlightRequest>> {
        Ok(self
            .tables()
            .requests
            .get(&id)
            .filter(|r| scope.permits(r.user_id))
            .cloned())
    }

    async fn owner_of(&self, id: i64) -> StoreResult<Option<i64>> {
        Ok(self.tables().requests.get(&id).map(|r| r.user_id))
    }

    async fn get_many(&self, scope: Scope, ids: &[i64]) -> StoreResult<Vec<FlightRequest>> {
        let tables = self.tables();
        Ok(ids
            .iter()
            .filter_map(|id| tables.requests.get(id))
            .filter(|r| scope.permits(r.user_id))
            .cloned()
            .collect())
    }

    async fn insert(&self, user_id: i64, input: &FlightRequestInput) -> StoreResult<FlightRequest> {
        let mut tables = self.tables();
        check_request_refs(&tables, user_id, input)?;
        let now = Utc::now();
        let request = FlightRequest {
            id: next(&mut tables.seq.request),
            user_id,
            destination_id: input.destination,
            origin_id: input.origin,
            travel_date: input.travel_date,
            status: input.status.unwrap_or_default(),
            reservation_code: None,
            reserved_by: None,
            reserved_at: None,
            notes: input.notes.clone(),
            companions: input.companions,
            created_at: now,
            updated_at: now,
        };
        tables.requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn update(&self, id: i64, input: &FlightRequestInput) -> StoreResult<Option<FlightRequest>> {
        let mut tables = self.tables();
        let Some(owner) = tables.requests.get(&id).map(|r| r.user_id) else {
            return Ok(None);
        };
        check_request_refs(&tables, owner, input)?;
        let Some(r) = tables.requests.get_mut(&id) else {
            return Ok(None);
        };
        r.destination_id = input.destination;
        r.origin_id = input.origin;
        r.travel_date = input.travel_date;
        if let Some(status) = input.status {
            r.status = status;
        }
        r.notes = input.notes.clone();
        r.companions = input.companions;
        r.updated_at = Utc::now();
        Ok(Some(r.clone()))
    }

    async fn save_state(&self, request: &FlightRequest) -> StoreResult<Option<FlightRequest>> {
        let mut tables = self.tables();
        if let Some(operator) = request.reserved_by {
            if !tables.users.contains_key(&operator) {
                return Err(missing("reserved_by"));
            }
        }
        Ok(tables.requests.get_mut(&request.id).map(|r| {
            r.status = request.status;
            r.reserved_by = request.reserved_by;
            r.reserved_at = request.reserved_at;
            r.updated_at = Utc::now();
            r.clone()
        }))
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables();
        if tables.requests.remove(&id).is_none() {
            return Ok(false);
        }
        let booked: Vec<i64> = tables
            .reservations
            .values()
            .filter(|r| r.flight_id == id)
            .map(|r| r.id)
            .collect();
        tables.drop_reservations(&booked);
        Ok(true)
    }

    async fn pending_for_travel_date(&self, date: NaiveDate) -> StoreResult<Vec<FlightRequest>> {
        Ok(self
            .tables()
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending && r.travel_date == date)
            .cloned()
            .collect())
    }
}

fn check_reservation_refs(tables: &Tables, user_id: i64, flight_id: i64) -> StoreResult<()> {
    if !tables.requests.contains_key(&flight_id) {
        return Err(missing("flight"));
    }
    if !tables.users.contains_key(&user_id) {
        return Err(missing("user"));
    }
    Ok(())
}

#[async_trait]
impl ReservationRepository for MemoryStore {
    async fn list(
        &self,
        scope: Scope,
        query: &ReservationQuery,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<Reservation>> {
        let tables = self.tables();
        let rows: Vec<Reservation> = tables
            .reservations
            .values()
            .filter(|r| scope.permits(r.user_id) && query.matches(r, &tables.owner_identity(r)))
            .cloned()
            .collect();
        let sort = query.ordering.unwrap_or(Sort {
            field: ReservationSort::CreatedAt,
            descending: true,
        });
        let rows = sorted(rows, |r| r.id, sort.descending, reservation_cmp(sort.field));
        Ok(paginate(rows, page))
    }

    async fn get(&self, scope: Scope, id: i64) -> StoreResult<Option<Reservation>> {
        Ok(self
            .tables()
            .reservations
            .get(&id)
            .filter(|r| scope.permits(r.user_id))
            .cloned())
    }

    async fn owner_of(&self, id: i64) -> StoreResult<Option<i64>> {
        Ok(self.tables().reservations.get(&id).map(|r| r.user_id))
    }

    async fn get_many(&self, scope: Scope, ids: &[i64]) -> StoreResult<Vec<Reservation>> {
        let tables = self.tables();
        Ok(ids
            .iter()
            .filter_map(|id| tables.reservations.get(id))
            .filter(|r| scope.permits(r.user_id))
            .cloned()
            .collect())
    }

    async fn code_exists(&self, code: &str) -> StoreResult<bool> {
        Ok(self
            .tables()
            .reservations
            .values()
            .any(|r| r.reservation_code == code))
    }

    async fn insert(&self, new: &NewReservation) -> StoreResult<Reservation> {
        let mut tables = self.tables();
        if tables
            .reservations
            .values()
            .any(|r| r.reservation_code == new.reservation_code)
        {
            return Err(unique("reservation_code"));
        }
        check_reservation_refs(&tables, new.user_id, new.flight_id)?;
        let now = Utc::now();
        let reservation = Reservation {
            id: next(&mut tables.seq.reservation),
            reservation_code: new.reservation_code.clone(),
            user_id: new.user_id,
            flight_id: new.flight_id,
            reservation_date: new.reservation_date,
            total_passengers: new.total_passengers,
            total_amount: new.total_amount,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        tables.reservations.insert(reservation.id, reservation.clone());
        Ok(reservation)
    }

    async fn save(&self, reservation: &Reservation) -> StoreResult<Option<Reservation>> {
        let mut tables = self.tables();
        if !tables.reservations.contains_key(&reservation.id) {
            return Ok(None);
        }
        check_reservation_refs(&tables, reservation.user_id, reservation.flight_id)?;
        Ok(tables.reservations.get_mut(&reservation.id).map(|r| {
            r.user_id = reservation.user_id;
            r.flight_id = reservation.flight_id;
            r.reservation_date = reservation.reservation_date;
            r.total_passengers = reservation.total_passengers;
            r.total_amount = reservation.total_amount;
            r.status = reservation.status;
            r.updated_at = Utc::now();
            r.clone()
        }))
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables();
        if !tables.reservations.contains_key(&id) {
            return Ok(false);
        }
        tables.drop_reservations(&[id]);
        Ok(true)
    }

    async fn statistics(&self, scope: Scope) -> StoreResult<ReservationStatistics> {
        let tables = self.tables();
        let mut stats = ReservationStatistics::default();
        for r in tables.reservations.values().filter(|r| scope.permits(r.user_id)) {
            stats.total += 1;
            match r.status {
                ReservationStatus::Pending => stats.pending += 1,
                ReservationStatus::Confirmed => {
                    stats.confirmed += 1;
                    stats.total_amount += r.total_amount;
                    stats.total_passengers += i64::from(r.total_passengers);
                }
                ReservationStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    async fn confirmed_for_travel_date(&self, date: NaiveDate) -> StoreResult<Vec<Reservation>> {
        let tables = self.tables();
        Ok(tables
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Confirmed)
            .filter(|r| {
                tables
                    .requests
                    .get(&r.flight_id)
                    .is_some_and(|req| req.travel_date == date)
            })
            .cloned()
            .collect())
    }
}

fn check_passenger_write(tables: &Tables, input: &PassengerInput, except: Option<i64>) -> StoreResult<()> {
    if !tables.reservations.contains_key(&input.reservation) {
        return Err(missing("reservation"));
    }
    if let Some(seat) = input.seat_number.as_deref() {
        if tables.seat_taken(input.reservation, seat, except) {
            return Err(unique("seat_number"));
        }
    }
    Ok(())
}

#[async_trait]
impl PassengerRepository for MemoryStore {
    async fn list(
        &self,
        scope: Scope,
        query: &PassengerQuery,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<ReservationPassenger>> {
        let tables = self.tables();
        let wanted_reservation = match query.reservation_code.as_deref() {
            Some(code) => Some(
                tables
                    .reservations
                    .values()
                    .find(|r| r.reservation_code == code)
                    .map(|r| r.id),
            ),
            None => None,
        };
        let rows: Vec<ReservationPassenger> = tables
            .passengers
            .values()
            .filter(|p| tables.passenger_owner(p).is_some_and(|o| scope.permits(o)))
            .filter(|p| wanted_reservation.is_none_or(|r| r == Some(p.reservation_id)))
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        let rows = match query.ordering {
            Some(sort) => sorted(rows, |p| p.id, sort.descending, passenger_cmp(sort.field)),
            None => {
                let mut rows = rows;
                rows.sort_by(|a, b| {
                    a.passenger_type
                        .as_str()
                        .cmp(b.passenger_type.as_str())
                        .then_with(|| b.created_at.cmp(&a.created_at))
                        .then_with(|| b.id.cmp(&a.id))
                });
                rows
            }
        };
        Ok(paginate(rows, page))
    }

    async fn get(&self, scope: Scope, id: i64) -> StoreResult<Option<ReservationPassenger>> {
        let tables = self.tables();
        Ok(tables
            .passengers
            .get(&id)
            .filter(|p| tables.passenger_owner(p).is_some_and(|o| scope.permits(o)))
            .cloned())
    }

    async fn owner_of(&self, id: i64) -> StoreResult<Option<i64>> {
        let tables = self.tables();
        Ok(tables.passengers.get(&id).and_then(|p| tables.passenger_owner(p)))
    }

    async fn insert(&self, input: &PassengerInput) -> StoreResult<ReservationPassenger> {
        let mut tables = self.tables();
        check_passenger_write(&tables, input, None)?;
        let passenger = ReservationPassenger {
            id: next(&mut tables.seq.passenger),
            reservation_id: input.reservation,
            passenger_type: input.passenger_type,
            passenger_category: input.passenger_category,
            first_name: input.first_name.clone(),
            last_name: input.last_name.clone(),
            country_of_residence: input.country_of_residence.clone(),
            identity_document: input.identity_document.clone(),
            date_of_birth: input.date_of_birth,
            gender: input.gender,
            seat_number: input.seat_number.clone(),
            created_at: Utc::now(),
        };
        tables.passengers.insert(passenger.id, passenger.clone());
        Ok(passenger)
    }

    async fn update(&self, id: i64, input: &PassengerInput) -> StoreResult<Option<ReservationPassenger>> {
        let mut tables = self.tables();
        if !tables.passengers.contains_key(&id) {
            return Ok(None);
        }
        check_passenger_write(&tables, input, Some(id))?;
        Ok(tables.passengers.get_mut(&id).map(|p| {
            p.reservation_id = input.reservation;
            p.passenger_type = input.passenger_type;
            p.passenger_category = input.passenger_category;
            p.first_name = input.first_name.clone();
            p.last_name = input.last_name.clone();
            p.country_of_residence = input.country_of_residence.clone();
            p.identity_document = input.identity_document.clone();
            p.date_of_birth = input.date_of_birth;
            p.gender = input.gender;
            p.seat_number = input.seat_number.clone();
            p.clone()
        }))
    }

    async fn set_seat(&self, id: i64, seat: Option<&str>) -> StoreResult<Option<ReservationPassenger>> {
        let mut tables = self.tables();
        let Some(reservation_id) = tables.passengers.get(&id).map(|p| p.reservation_id) else {
            return Ok(None);
        };
        if let Some(seat) = seat {
            if tables.seat_taken(reservation_id, seat, Some(id)) {
                return Err(unique("seat_number"));
            }
        }
        Ok(tables.passengers.get_mut(&id).map(|p| {
            p.seat_number = seat.map(str::to_string);
            p.clone()
        }))
    }

    async fn set_category(
        &self,
        id: i64,
        category: PassengerCategory,
    ) -> StoreResult<Option<ReservationPassenger>> {
        let mut tables = self.tables();
        Ok(tables.passengers.get_mut(&id).map(|p| {
            p.passenger_category = category;
            p.clone()
        }))
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        Ok(self.tables().passengers.remove(&id).is_some())
    }

    async fn seat_taken(&self, reservation_id: i64, seat: &str, except: Option<i64>) -> StoreResult<bool> {
        Ok(self.tables().seat_taken(reservation_id, seat, except))
    }

    async fn statistics(&self, scope: Scope) -> StoreResult<PassengerStatistics> {
        let tables = self.tables();
        let mut stats = PassengerStatistics::default();
        for p in tables.passengers.values() {
            if tables.passenger_owner(p).is_some_and(|o| scope.permits(o)) {
                stats.record(p);
            }
        }
        Ok(stats)
    }
}

fn check_user_unique(tables: &Tables, input: &UserInput, except: Option<i64>) -> StoreResult<()> {
    let others = || tables.users.values().filter(|u| Some(u.id) != except);
    if others().any(|u| u.email == input.email) {
        return Err(unique("email"));
    }
    if others().any(|u| u.username == input.username) {
        return Err(unique("username"));
    }
    Ok(())
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn list(&self, query: &UserQuery, page: Option<PageRequest>) -> StoreResult<Page<User>> {
        let tables = self.tables();
        let rows: Vec<User> = tables
            .users
            .values()
            .filter(|u| query.matches(u))
            .cloned()
            .collect();
        let sort = query.ordering.unwrap_or(Sort {
            field: UserSort::CreatedAt,
            descending: true,
        });
        let rows = sorted(rows, |u| u.id, sort.descending, user_cmp(sort.field));
        Ok(paginate(rows, page))
    }

    async fn get(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.tables().users.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[i64]) -> StoreResult<Vec<User>> {
        let tables = self.tables();
        Ok(ids.iter().filter_map(|id| tables.users.get(id).cloned()).collect())
    }

    async fn insert(&self, input: &UserInput) -> StoreResult<User> {
        let mut tables = self.tables();
        check_user_unique(&tables, input, None)?;
        let now = Utc::now();
        let user = User {
            id: next(&mut tables.seq.user),
            username: input.username.clone(),
            email: input.email.clone(),
            first_name: input.first_name.clone(),
            last_name: input.last_name.clone(),
            phone: input.phone.clone(),
            is_operator: input.is_operator,
            is_staff: input.is_staff,
            is_active: input.is_active,
            date_of_birth: input.date_of_birth,
            country: input.country.clone(),
            city: input.city.clone(),
            profile_image_url: input.profile_image_url.clone(),
            date_joined: now,
            created_at: now,
            updated_at: now,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, id: i64, input: &UserInput) -> StoreResult<Option<User>> {
        let mut tables = self.tables();
        check_user_unique(&tables, input, Some(id))?;
        let Some(u) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        u.username = input.username.clone();
        u.email = input.email.clone();
        u.first_name = input.first_name.clone();
        u.last_name = input.last_name.clone();
        u.phone = input.phone.clone();
        u.is_operator = input.is_operator;
        u.is_staff = input.is_staff;
        u.is_active = input.is_active;
        u.date_of_birth = input.date_of_birth;
        u.country = input.country.clone();
        u.city = input.city.clone();
        u.profile_image_url = input.profile_image_url.clone();
        u.updated_at = Utc::now();
        Ok(Some(u.clone()))
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables();
        if tables.users.remove(&id).is_none() {
            return Ok(false);
        }
        let owned_requests: Vec<i64> = tables
            .requests
            .values()
            .filter(|r| r.user_id == id)
            .map(|r| r.id)
            .collect();
        let doomed: Vec<i64> = tables
            .reservations
            .values()
            .filter(|r| r.user_id == id || owned_requests.contains(&r.flight_id))
            .map(|r| r.id)
            .collect();
        tables.drop_reservations(&doomed);
        tables.requests.retain(|_, r| r.user_id != id);
        for r in tables.requests.values_mut() {
            if r.reserved_by == Some(id) {
                r.reserved_by = None;
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use skyway_core::models::{Gender, PassengerType};

    fn user_input(name: &str) -> UserInput {
        UserInput {
            email: format!("{name}@example.com"),
            username: name.to_string(),
            first_name: name.to_string(),
            last_name: "Test".to_string(),
            phone: None,
            is_operator: false,
            is_staff: false,
            is_active: true,
            date_of_birth: None,
            country: None,
            city: None,
            profile_image_url: None,
        }
    }

    fn destination_input(code: &str) -> DestinationInput {
        DestinationInput {
            code: code.to_string(),
            name: format!("City {code}"),
            province: "Pichincha".to_string(),
            latitude: None,
            longitude: None,
            is_active: true,
            image_url: None,
        }
    }

    #[tokio::test]
    async fn unique_columns_are_enforced() {
        let store = MemoryStore::new();
        UserRepository::insert(&store, &user_input("ana")).await.unwrap();
        let mut dup = user_input("bea");
        dup.email = "ana@example.com".into();
        let err = UserRepository::insert(&store, &dup).await.unwrap_err();
        assert_eq!(err, unique("email"));
    }

    #[tokio::test]
    async fn destination_in_use_cannot_be_deleted() {
        let store = MemoryStore::new();
        let user = UserRepository::insert(&store, &user_input("ana")).await.unwrap();
        let uio = DestinationRepository::insert(&store, &destination_input("UIO")).await.unwrap();
        let input = FlightRequestInput {
            destination: uio.id,
            origin: None,
            travel_date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
            status: None,
            companions: 1,
            notes: None,
        };
        FlightRequestRepository::insert(&store, user.id, &input).await.unwrap();
        let err = DestinationRepository::delete(&store, uio.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Restricted { .. }));
    }

    #[tokio::test]
    async fn deleting_a_user_cascades() {
        let store = MemoryStore::new();
        let user = UserRepository::insert(&store, &user_input("ana")).await.unwrap();
        let uio = DestinationRepository::insert(&store, &destination_input("UIO")).await.unwrap();
        let input = FlightRequestInput {
            destination: uio.id,
            origin: None,
            travel_date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
            status: None,
            companions: 1,
            notes: None,
        };
        let request = FlightRequestRepository::insert(&store, user.id, &input).await.unwrap();
        let reservation = ReservationRepository::insert(
            &store,
            &NewReservation {
                reservation_code: "RES-AAAAAA".into(),
                user_id: user.id,
                flight_id: request.id,
                reservation_date: Utc::now(),
                total_passengers: 1,
                total_amount: Decimal::new(25000, 2),
                status: ReservationStatus::Pending,
            },
        )
        .await
        .unwrap();
        PassengerRepository::insert(
            &store,
            &PassengerInput {
                reservation: reservation.id,
                passenger_type: PassengerType::Main,
                passenger_category: PassengerCategory::Adult,
                first_name: "Ana".into(),
                last_name: "Test".into(),
                country_of_residence: "EC".into(),
                identity_document: "X1".into(),
                date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
                gender: Gender::F,
                seat_number: Some("1A".into()),
            },
        )
        .await
        .unwrap();

        assert!(UserRepository::delete(&store, user.id).await.unwrap());
        let stats = PassengerRepository::statistics(&store, Scope::All).await.unwrap();
        assert_eq!(stats.total, 0);
        assert!(!ReservationRepository::code_exists(&store, "RES-AAAAAA").await.unwrap());
        assert_eq!(FlightRequestRepository::owner_of(&store, request.id).await.unwrap(), None);
    }
}
