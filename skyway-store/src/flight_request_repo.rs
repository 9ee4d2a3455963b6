use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use skyway_core::access::Scope;
use skyway_core::models::{FlightRequest, FlightRequestInput, RequestStatus};
use skyway_core::repository::{
    FlightRequestQuery, FlightRequestRepository, Page, PageRequest, StoreError, StoreResult,
};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::database::{backend, map_err, push_page, push_scope, push_search};

// The table keeps its legacy column names; everything is aliased to the
// field names used by the row struct.
const COLUMNS: &str = "id, userid AS user_id, destinationid AS destination_id, originid AS origin_id, \
                       traveldate AS travel_date, status, reservationcode AS reservation_code, \
                       reservedbyid AS reserved_by, reservedat AS reserved_at, notes, companions, \
                       createdat AS created_at, updatedat AS updated_at";
const WRITE_FIELDS: &[(&str, &str)] = &[
    ("destinationid", "destination"),
    ("originid", "origin"),
    ("userid", "user"),
    ("reservationcode", "reservation_code"),
];

/// Own text columns plus the destination and origin names.
const SEARCH_COLUMNS: &[&str] = &[
    "reservationcode",
    "notes",
    "(SELECT d.name FROM destinations d WHERE d.id = flightrequests.destinationid)",
    "(SELECT o.name FROM destinations o WHERE o.id = flightrequests.originid)",
];

pub struct PgFlightRequestRepository {
    pool: PgPool,
}

impl PgFlightRequestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct FlightRequestRow {
    id: i64,
    user_id: i64,
    destination_id: i64,
    origin_id: Option<i64>,
    travel_date: NaiveDate,
    status: String,
    reservation_code: Option<String>,
    reserved_by: Option<i64>,
    reserved_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    companions: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<FlightRequestRow> for FlightRequest {
    type Error = StoreError;

    fn try_from(row: FlightRequestRow) -> Result<Self, Self::Error> {
        Ok(FlightRequest {
            id: row.id,
            user_id: row.user_id,
            destination_id: row.destination_id,
            origin_id: row.origin_id,
            travel_date: row.travel_date,
            status: row.status.parse().map_err(StoreError::Backend)?,
            reservation_code: row.reservation_code,
            reserved_by: row.reserved_by,
            reserved_at: row.reserved_at,
            notes: row.notes,
            companions: row.companions,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn convert(rows: Vec<FlightRequestRow>) -> StoreResult<Vec<FlightRequest>> {
    rows.into_iter().map(FlightRequest::try_from).collect()
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &FlightRequestQuery) {
    push_search(qb, SEARCH_COLUMNS, query.search.as_deref());
    if let Some(status) = query.status {
        qb.push(" AND status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(destination) = query.destination {
        qb.push(" AND destinationid = ");
        qb.push_bind(destination);
    }
    if let Some(origin) = query.origin {
        qb.push(" AND originid = ");
        qb.push_bind(origin);
    }
    if let Some(user) = query.user {
        qb.push(" AND userid = ");
        qb.push_bind(user);
    }
}

#[async_trait]
impl FlightRequestRepository for PgFlightRequestRepository {
    async fn list(
        &self,
        scope: Scope,
        query: &FlightRequestQuery,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<FlightRequest>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM flightrequests WHERE TRUE");
        push_scope(&mut count, scope, "userid");
        push_filters(&mut count, query);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM flightrequests WHERE TRUE", COLUMNS));
        push_scope(&mut qb, scope, "userid");
        push_filters(&mut qb, query);
        let order = query
            .ordering
            .map(|s| s.sql())
            .unwrap_or_else(|| "createdat DESC".to_string());
        qb.push(format!(" ORDER BY {}, id DESC", order));
        push_page(&mut qb, page);

        let rows: Vec<FlightRequestRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(Page {
            count: total as u64,
            items: convert(rows)?,
        })
    }

    async fn get(&self, scope: Scope, id: i64) -> StoreResult<Option<FlightRequest>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM flightrequests WHERE id = ", COLUMNS));
        qb.push_bind(id);
        push_scope(&mut qb, scope, "userid");
        let row: Option<FlightRequestRow> = qb
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(FlightRequest::try_from).transpose()
    }

    async fn owner_of(&self, id: i64) -> StoreResult<Option<i64>> {
        sqlx::query_scalar("SELECT userid FROM flightrequests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }

    async fn get_many(&self, scope: Scope, ids: &[i64]) -> StoreResult<Vec<FlightRequest>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM flightrequests WHERE id = ANY(", COLUMNS));
        qb.push_bind(ids.to_vec());
        qb.push(")");
        push_scope(&mut qb, scope, "userid");
        let rows: Vec<FlightRequestRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        convert(rows)
    }

    async fn insert(&self, user_id: i64, input: &FlightRequestInput) -> StoreResult<FlightRequest> {
        let status = input.status.unwrap_or_default();
        let row = sqlx::query_as::<_, FlightRequestRow>(&format!(
            r#"
            INSERT INTO flightrequests
                (userid, destinationid, originid, traveldate, status, notes, companions, createdat, updatedat)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(user_id)
        .bind(input.destination)
        .bind(input.origin)
        .bind(input.travel_date)
        .bind(status.as_str())
        .bind(&input.notes)
        .bind(input.companions)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_err(e, WRITE_FIELDS))?;
        row.try_into()
    }

    async fn update(&self, id: i64, input: &FlightRequestInput) -> StoreResult<Option<FlightRequest>> {
        let row = sqlx::query_as::<_, FlightRequestRow>(&format!(
            r#"
            UPDATE flightrequests SET
                destinationid = $2, originid = $3, traveldate = $4,
                status = COALESCE($5, status), notes = $6, companions = $7, updatedat = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(input.destination)
        .bind(input.origin)
        .bind(input.travel_date)
        .bind(input.status.map(RequestStatus::as_str))
        .bind(&input.notes)
        .bind(input.companions)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err(e, WRITE_FIELDS))?;
        row.map(FlightRequest::try_from).transpose()
    }

    async fn save_state(&self, request: &FlightRequest) -> StoreResult<Option<FlightRequest>> {
        let row = sqlx::query_as::<_, FlightRequestRow>(&format!(
            r#"
            UPDATE flightrequests SET
                status = $2, reservedbyid = $3, reservedat = $4, updatedat = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(request.id)
        .bind(request.status.as_str())
        .bind(request.reserved_by)
        .bind(request.reserved_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(FlightRequest::try_from).transpose()
    }

    /// Deletes the request with its reservations and their passengers.
    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            "DELETE FROM reservation_passengers WHERE reservation_id IN \
             (SELECT id FROM reservations WHERE flight_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query("DELETE FROM reservations WHERE flight_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let result = sqlx::query("DELETE FROM flightrequests WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn pending_for_travel_date(&self, date: NaiveDate) -> StoreResult<Vec<FlightRequest>> {
        let rows = sqlx::query_as::<_, FlightRequestRow>(&format!(
            "SELECT {} FROM flightrequests WHERE status = 'PENDING' AND traveldate = $1 ORDER BY id",
            COLUMNS
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        convert(rows)
    }
}
