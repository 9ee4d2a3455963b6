use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::access::Scope;
use crate::models::{
    Airline, AirlineInput, Destination, DestinationInput, Flight, FlightInput, FlightRequest,
    FlightRequestInput, FlightStatus, Gender, PassengerCategory, PassengerInput,
    PassengerStatistics, PassengerType, RequestStatus, Reservation, ReservationPassenger,
    ReservationStatistics, ReservationStatus, User, UserInput,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("a row with this {field} already exists")]
    UniqueViolation { field: String },
    #[error("the referenced {field} does not exist")]
    ForeignKeyViolation { field: String },
    #[error("this row is still referenced by {field}")]
    Restricted { field: String },
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// 1-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub size: u64,
}

impl PageRequest {
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.size)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Rows matching the filter, ignoring the window.
    pub count: u64,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            items: self.items.into_iter().map(f).collect(),
        }
    }
}

/// Columns a listing may be ordered by.
pub trait SortField: Copy + Send + Sync + 'static {
    fn parse(name: &str) -> Option<Self>;
    fn column(self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort<F> {
    pub field: F,
    pub descending: bool,
}

impl<F: SortField> Sort<F> {
    /// Parses `name` or `-name`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (descending, name) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        F::parse(name).map(|field| Sort { field, descending })
    }

    pub fn sql(&self) -> String {
        format!(
            "{} {}",
            self.field.column(),
            if self.descending { "DESC" } else { "ASC" }
        )
    }
}

macro_rules! sort_fields {
    ($name:ident { $($variant:ident => $key:literal : $column:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl SortField for $name {
            fn parse(name: &str) -> Option<Self> {
                match name {
                    $($key => Some($name::$variant),)+
                    _ => None,
                }
            }

            fn column(self) -> &'static str {
                match self {
                    $($name::$variant => $column),+
                }
            }
        }
    };
}

sort_fields!(AirlineSort {
    Name => "name": "name",
    Code => "code": "code",
    CreatedAt => "created_at": "created_at",
});

sort_fields!(DestinationSort {
    Name => "name": "name",
    Code => "code": "code",
    Province => "province": "province",
    CreatedAt => "created_at": "created_at",
});

sort_fields!(FlightSort {
    Departure => "departure_datetime": "departure_datetime",
    AdultPrice => "adult_price": "adult_price",
    AvailableSeats => "available_seats": "available_seats",
    CreatedAt => "created_at": "created_at",
});

sort_fields!(FlightRequestSort {
    CreatedAt => "created_at": "createdat",
    TravelDate => "travel_date": "traveldate",
    Status => "status": "status",
});

sort_fields!(ReservationSort {
    ReservationDate => "reservation_date": "reservation_date",
    TotalAmount => "total_amount": "total_amount",
    CreatedAt => "created_at": "created_at",
});

sort_fields!(PassengerSort {
    CreatedAt => "created_at": "created_at",
    PassengerType => "passenger_type": "passenger_type",
    DateOfBirth => "date_of_birth": "date_of_birth",
});

sort_fields!(UserSort {
    DateJoined => "date_joined": "date_joined",
    CreatedAt => "created_at": "created_at",
    Email => "email": "email",
});

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn search_hits<'a>(search: &Option<String>, fields: impl IntoIterator<Item = &'a str>) -> bool {
    match search.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(term) => fields.into_iter().any(|f| contains_ci(f, term)),
    }
}

#[derive(Debug, Clone, Default)]
pub struct AirlineQuery {
    pub search: Option<String>,
    pub ordering: Option<Sort<AirlineSort>>,
}

impl AirlineQuery {
    pub fn matches(&self, a: &Airline) -> bool {
        search_hits(&self.search, [a.name.as_str(), a.code.as_str()])
    }
}

#[derive(Debug, Clone, Default)]
pub struct DestinationQuery {
    pub search: Option<String>,
    pub province: Option<String>,
    pub is_active: Option<bool>,
    pub ordering: Option<Sort<DestinationSort>>,
}

impl DestinationQuery {
    pub fn active() -> Self {
        Self {
            is_active: Some(true),
            ..Self::default()
        }
    }

    pub fn matches(&self, d: &Destination) -> bool {
        search_hits(
            &self.search,
            [d.name.as_str(), d.code.as_str(), d.province.as_str()],
        ) && self
            .province
            .as_deref()
            .is_none_or(|p| contains_ci(&d.province, p))
            && self.is_active.is_none_or(|active| d.is_active == active)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlightQuery {
    pub search: Option<String>,
    pub status: Option<FlightStatus>,
    pub airline: Option<i64>,
    pub origin: Option<String>,
    pub destination: Option<String>,
    /// Seats left and scheduled.
    pub available_only: bool,
    pub ordering: Option<Sort<FlightSort>>,
}

impl FlightQuery {
    pub fn matches(&self, f: &Flight) -> bool {
        search_hits(
            &self.search,
            [f.flight_code.as_str(), f.origin.as_str(), f.destination.as_str()],
        ) && self.status.is_none_or(|s| f.status == s)
            && self.airline.is_none_or(|a| f.airline_id == a)
            && self
                .origin
                .as_deref()
                .is_none_or(|o| contains_ci(&f.origin, o))
            && self
                .destination
                .as_deref()
                .is_none_or(|d| contains_ci(&f.destination, d))
            && (!self.available_only || f.is_available())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlightRequestQuery {
    pub search: Option<String>,
    pub status: Option<RequestStatus>,
    pub destination: Option<i64>,
    pub origin: Option<i64>,
    pub user: Option<i64>,
    pub ordering: Option<Sort<FlightRequestSort>>,
}

impl FlightRequestQuery {
    /// `places` holds the destination and origin names, which the search
    /// also covers.
    pub fn matches(&self, r: &FlightRequest, places: &[&str]) -> bool {
        search_hits(
            &self.search,
            [
                r.reservation_code.as_deref().unwrap_or(""),
                r.notes.as_deref().unwrap_or(""),
            ]
            .into_iter()
            .chain(places.iter().copied()),
        ) && self.status.is_none_or(|s| r.status == s)
            && self.destination.is_none_or(|d| r.destination_id == d)
            && self.origin.is_none_or(|o| r.origin_id == Some(o))
            && self.user.is_none_or(|u| r.user_id == u)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReservationQuery {
    pub search: Option<String>,
    pub status: Option<ReservationStatus>,
    pub user: Option<i64>,
    pub flight: Option<i64>,
    pub created_since: Option<DateTime<Utc>>,
    pub ordering: Option<Sort<ReservationSort>>,
}

impl ReservationQuery {
    /// `user` holds the owner's username and email, which the search also
    /// covers.
    pub fn matches(&self, r: &Reservation, user: &[&str]) -> bool {
        search_hits(
            &self.search,
            std::iter::once(r.reservation_code.as_str()).chain(user.iter().copied()),
        )
            && self.status.is_none_or(|s| r.status == s)
            && self.user.is_none_or(|u| r.user_id == u)
            && self.flight.is_none_or(|f| r.flight_id == f)
            && self.created_since.is_none_or(|t| r.created_at >= t)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PassengerQuery {
    pub search: Option<String>,
    pub reservation: Option<i64>,
    pub passenger_type: Option<PassengerType>,
    pub passenger_category: Option<PassengerCategory>,
    pub gender: Option<Gender>,
    /// Case-insensitive substring of the identity document.
    pub document: Option<String>,
    /// Exact code of the owning reservation.
    pub reservation_code: Option<String>,
    pub unassigned_only: bool,
    pub ordering: Option<Sort<PassengerSort>>,
}

impl PassengerQuery {
    /// `reservation_code` is resolved by the backend through the owning
    /// reservation and is not checked here.
    pub fn matches(&self, p: &ReservationPassenger) -> bool {
        search_hits(
            &self.search,
            [
                p.first_name.as_str(),
                p.last_name.as_str(),
                p.identity_document.as_str(),
                p.seat_number.as_deref().unwrap_or(""),
            ],
        ) && self.reservation.is_none_or(|r| p.reservation_id == r)
            && self.passenger_type.is_none_or(|t| p.passenger_type == t)
            && self.passenger_category.is_none_or(|c| p.passenger_category == c)
            && self.gender.is_none_or(|g| p.gender == g)
            && self
                .document
                .as_deref()
                .is_none_or(|d| contains_ci(&p.identity_document, d))
            && (!self.unassigned_only || !p.has_seat())
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserQuery {
    pub search: Option<String>,
    pub is_operator: Option<bool>,
    pub is_staff: Option<bool>,
    pub is_active: Option<bool>,
    pub ordering: Option<Sort<UserSort>>,
}

impl UserQuery {
    pub fn matches(&self, u: &User) -> bool {
        search_hits(
            &self.search,
            [
                u.username.as_str(),
                u.email.as_str(),
                u.first_name.as_str(),
                u.last_name.as_str(),
            ],
        ) && self.is_operator.is_none_or(|v| u.is_operator == v)
            && self.is_staff.is_none_or(|v| u.is_staff == v)
            && self.is_active.is_none_or(|v| u.is_active == v)
    }
}

/// Row handed to storage when booking. The code is filled in per attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReservation {
    pub reservation_code: String,
    pub user_id: i64,
    pub flight_id: i64,
    pub reservation_date: DateTime<Utc>,
    pub total_passengers: i32,
    pub total_amount: Decimal,
    pub status: ReservationStatus,
}

#[async_trait]
pub trait AirlineRepository: Send + Sync {
    async fn list(&self, query: &AirlineQuery, page: Option<PageRequest>) -> StoreResult<Page<Airline>>;
    async fn get(&self, id: i64) -> StoreResult<Option<Airline>>;
    async fn get_many(&self, ids: &[i64]) -> StoreResult<Vec<Airline>>;
    async fn insert(&self, input: &AirlineInput) -> StoreResult<Airline>;
    async fn update(&self, id: i64, input: &AirlineInput) -> StoreResult<Option<Airline>>;
    async fn delete(&self, id: i64) -> StoreResult<bool>;
}

#[async_trait]
pub trait DestinationRepository: Send + Sync {
    async fn list(
        &self,
        query: &DestinationQuery,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<Destination>>;
    async fn get(&self, id: i64) -> StoreResult<Option<Destination>>;
    async fn get_many(&self, ids: &[i64]) -> StoreResult<Vec<Destination>>;
    async fn insert(&self, input: &DestinationInput) -> StoreResult<Destination>;
    async fn update(&self, id: i64, input: &DestinationInput) -> StoreResult<Option<Destination>>;
    async fn set_active(&self, id: i64, active: bool) -> StoreResult<Option<Destination>>;
    async fn delete(&self, id: i64) -> StoreResult<bool>;
}

#[async_trait]
pub trait FlightRepository: Send + Sync {
    async fn list(&self, query: &FlightQuery, page: Option<PageRequest>) -> StoreResult<Page<Flight>>;
    async fn get(&self, id: i64) -> StoreResult<Option<Flight>>;
    async fn insert(&self, input: &FlightInput) -> StoreResult<Flight>;
    async fn update(&self, id: i64, input: &FlightInput) -> StoreResult<Option<Flight>>;
    async fn delete(&self, id: i64) -> StoreResult<bool>;
}

/// Owned rows: every read takes the caller's scope.
#[async_trait]
pub trait FlightRequestRepository: Send + Sync {
    async fn list(
        &self,
        scope: Scope,
        query: &FlightRequestQuery,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<FlightRequest>>;
    async fn get(&self, scope: Scope, id: i64) -> StoreResult<Option<FlightRequest>>;
    /// Existence probe: the owner of the row, without reading anything else.
    async fn owner_of(&self, id: i64) -> StoreResult<Option<i64>>;
    async fn get_many(&self, scope: Scope, ids: &[i64]) -> StoreResult<Vec<FlightRequest>>;
    async fn insert(&self, user_id: i64, input: &FlightRequestInput) -> StoreResult<FlightRequest>;
    async fn update(&self, id: i64, input: &FlightRequestInput) -> StoreResult<Option<FlightRequest>>;
    /// Persists status, reserved_by and reserved_at.
    async fn save_state(&self, request: &FlightRequest) -> StoreResult<Option<FlightRequest>>;
    async fn delete(&self, id: i64) -> StoreResult<bool>;
    async fn pending_for_travel_date(&self, date: NaiveDate) -> StoreResult<Vec<FlightRequest>>;
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn list(
        &self,
        scope: Scope,
        query: &ReservationQuery,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<Reservation>>;
    async fn get(&self, scope: Scope, id: i64) -> StoreResult<Option<Reservation>>;
    async fn owner_of(&self, id: i64) -> StoreResult<Option<i64>>;
    async fn get_many(&self, scope: Scope, ids: &[i64]) -> StoreResult<Vec<Reservation>>;
    async fn code_exists(&self, code: &str) -> StoreResult<bool>;
    async fn insert(&self, new: &NewReservation) -> StoreResult<Reservation>;
    /// Persists every mutable column of `reservation`.
    async fn save(&self, reservation: &Reservation) -> StoreResult<Option<Reservation>>;
    /// Deletes the reservation and its passengers.
    async fn delete(&self, id: i64) -> StoreResult<bool>;
    async fn statistics(&self, scope: Scope) -> StoreResult<ReservationStatistics>;
    async fn confirmed_for_travel_date(&self, date: NaiveDate) -> StoreResult<Vec<Reservation>>;
}

/// Passengers are owned through their reservation.
#[async_trait]
pub trait PassengerRepository: Send + Sync {
    async fn list(
        &self,
        scope: Scope,
        query: &PassengerQuery,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<ReservationPassenger>>;
    async fn get(&self, scope: Scope, id: i64) -> StoreResult<Option<ReservationPassenger>>;
    async fn owner_of(&self, id: i64) -> StoreResult<Option<i64>>;
    async fn insert(&self, input: &PassengerInput) -> StoreResult<ReservationPassenger>;
    async fn update(&self, id: i64, input: &PassengerInput) -> StoreResult<Option<ReservationPassenger>>;
    async fn set_seat(&self, id: i64, seat: Option<&str>) -> StoreResult<Option<ReservationPassenger>>;
    async fn set_category(
        &self,
        id: i64,
        category: PassengerCategory,
    ) -> StoreResult<Option<ReservationPassenger>>;
    async fn delete(&self, id: i64) -> StoreResult<bool>;
    /// Whether `seat` is held by another passenger of the same reservation.
    async fn seat_taken(&self, reservation_id: i64, seat: &str, except: Option<i64>) -> StoreResult<bool>;
    async fn statistics(&self, scope: Scope) -> StoreResult<PassengerStatistics>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn list(&self, query: &UserQuery, page: Option<PageRequest>) -> StoreResult<Page<User>>;
    async fn get(&self, id: i64) -> StoreResult<Option<User>>;
    async fn get_many(&self, ids: &[i64]) -> StoreResult<Vec<User>>;
    async fn insert(&self, input: &UserInput) -> StoreResult<User>;
    async fn update(&self, id: i64, input: &UserInput) -> StoreResult<Option<User>>;
    async fn delete(&self, id: i64) -> StoreResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ordering() {
        let sort = Sort::<AirlineSort>::parse("-created_at").unwrap();
        assert_eq!(sort.field, AirlineSort::CreatedAt);
        assert!(sort.descending);
        assert_eq!(sort.sql(), "created_at DESC");
        assert!(Sort::<AirlineSort>::parse("logo_url").is_none());
    }

    #[test]
    fn legacy_columns_back_request_ordering() {
        let sort = Sort::<FlightRequestSort>::parse("travel_date").unwrap();
        assert_eq!(sort.sql(), "traveldate ASC");
    }

    #[test]
    fn page_offsets() {
        assert_eq!(PageRequest { page: 1, size: 10 }.offset(), 0);
        assert_eq!(PageRequest { page: 3, size: 10 }.offset(), 20);
    }

    #[test]
    fn airline_search_is_case_insensitive() {
        let now = Utc::now();
        let airline = Airline {
            id: 1,
            code: "LA".into(),
            name: "LATAM Airlines".into(),
            logo_url: None,
            created_at: now,
            updated_at: now,
        };
        let hit = AirlineQuery {
            search: Some("latam".into()),
            ..Default::default()
        };
        let miss = AirlineQuery {
            search: Some("avianca".into()),
            ..Default::default()
        };
        assert!(hit.matches(&airline));
        assert!(!miss.matches(&airline));
        assert!(AirlineQuery::default().matches(&airline));
    }
}
