use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use skyway_core::models::{Flight, FlightInput};
use skyway_core::repository::{FlightQuery, FlightRepository, Page, PageRequest, StoreError, StoreResult};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::database::{backend, like_pattern, map_err, push_page, push_search};

const COLUMNS: &str = "id, flight_code, airline_id, origin, destination, departure_datetime, \
                       arrival_datetime, number_of_stops, adult_price, child_price, special_price, \
                       available_seats, status, notes, created_at, updated_at";
const WRITE_FIELDS: &[(&str, &str)] = &[("flight_code", "flight_code"), ("airline", "airline")];

pub struct PgFlightRepository {
    pool: PgPool,
}

impl PgFlightRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FlightRow {
    id: i64,
    flight_code: String,
    airline_id: i64,
    origin: String,
    destination: String,
    departure_datetime: DateTime<Utc>,
    arrival_datetime: DateTime<Utc>,
    number_of_stops: i32,
    adult_price: Decimal,
    child_price: Option<Decimal>,
    special_price: Option<Decimal>,
    available_seats: i32,
    status: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<FlightRow> for Flight {
    type Error = StoreError;

    fn try_from(row: FlightRow) -> Result<Self, Self::Error> {
        Ok(Flight {
            id: row.id,
            flight_code: row.flight_code,
            airline_id: row.airline_id,
            origin: row.origin,
            destination: row.destination,
            departure_datetime: row.departure_datetime,
            arrival_datetime: row.arrival_datetime,
            number_of_stops: row.number_of_stops,
            adult_price: row.adult_price,
            child_price: row.child_price,
            special_price: row.special_price,
            available_seats: row.available_seats,
            status: row.status.parse().map_err(StoreError::Backend)?,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &FlightQuery) {
    push_search(
        qb,
        &["flight_code", "origin", "destination"],
        query.search.as_deref(),
    );
    if let Some(status) = query.status {
        qb.push(" AND status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(airline) = query.airline {
        qb.push(" AND airline_id = ");
        qb.push_bind(airline);
    }
    if let Some(origin) = query.origin.as_deref() {
        qb.push(" AND origin ILIKE ");
        qb.push_bind(like_pattern(origin));
    }
    if let Some(destination) = query.destination.as_deref() {
        qb.push(" AND destination ILIKE ");
        qb.push_bind(like_pattern(destination));
    }
    if query.available_only {
        qb.push(" AND available_seats > 0 AND status = 'scheduled'");
    }
}

fn rows_to_flights(rows: Vec<FlightRow>) -> StoreResult<Vec<Flight>> {
    rows.into_iter().map(Flight::try_from).collect()
}

#[async_trait]
impl FlightRepository for PgFlightRepository {
    async fn list(&self, query: &FlightQuery, page: Option<PageRequest>) -> StoreResult<Page<Flight>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM flights WHERE TRUE");
        push_filters(&mut count, query);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM flights WHERE TRUE", COLUMNS));
        push_filters(&mut qb, query);
        let order = query
            .ordering
            .map(|s| s.sql())
            .unwrap_or_else(|| "departure_datetime ASC".to_string());
        qb.push(format!(" ORDER BY {}, id", order));
        push_page(&mut qb, page);

        let rows: Vec<FlightRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(Page {
            count: total as u64,
            items: rows_to_flights(rows)?,
        })
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Flight>> {
        let row = sqlx::query_as::<_, FlightRow>(&format!("SELECT {} FROM flights WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(Flight::try_from).transpose()
    }

    async fn insert(&self, input: &FlightInput) -> StoreResult<Flight> {
        let row = sqlx::query_as::<_, FlightRow>(&format!(
            r#"
            INSERT INTO flights (
                flight_code, airline_id, origin, destination, departure_datetime, arrival_datetime,
                number_of_stops, adult_price, child_price, special_price, available_seats, status,
                notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW(), NOW())
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(&input.flight_code)
        .bind(input.airline)
        .bind(&input.origin)
        .bind(&input.destination)
        .bind(input.departure_datetime)
        .bind(input.arrival_datetime)
        .bind(input.number_of_stops)
        .bind(input.adult_price)
        .bind(input.child_price)
        .bind(input.special_price)
        .bind(input.available_seats)
        .bind(input.status.as_str())
        .bind(&input.notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_err(e, WRITE_FIELDS))?;
        row.try_into()
    }

    async fn update(&self, id: i64, input: &FlightInput) -> StoreResult<Option<Flight>> {
        let row = sqlx::query_as::<_, FlightRow>(&format!(
            r#"
            UPDATE flights SET
                flight_code = $2, airline_id = $3, origin = $4, destination = $5,
                departure_datetime = $6, arrival_datetime = $7, number_of_stops = $8,
                adult_price = $9, child_price = $10, special_price = $11,
                available_seats = $12, status = $13, notes = $14, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(&input.flight_code)
        .bind(input.airline)
        .bind(&input.origin)
        .bind(&input.destination)
        .bind(input.departure_datetime)
        .bind(input.arrival_datetime)
        .bind(input.number_of_stops)
        .bind(input.adult_price)
        .bind(input.child_price)
        .bind(input.special_price)
        .bind(input.available_seats)
        .bind(input.status.as_str())
        .bind(&input.notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err(e, WRITE_FIELDS))?;
        row.map(Flight::try_from).transpose()
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM flights WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}
