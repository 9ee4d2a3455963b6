use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use skyway_core::access::Scope;
use skyway_core::models::{Reservation, ReservationStatistics};
use skyway_core::repository::{
    NewReservation, Page, PageRequest, ReservationQuery, ReservationRepository, StoreError,
    StoreResult,
};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::database::{backend, map_err, push_page, push_scope, push_search};

const COLUMNS: &str = "id, reservation_code, user_id, flight_id, reservation_date, total_passengers, \
                       total_amount, status, created_at, updated_at";
const WRITE_FIELDS: &[(&str, &str)] = &[
    ("reservation_code", "reservation_code"),
    ("flight_id", "flight"),
    ("user_id", "user"),
];

/// Own code plus the owner's username and email.
const SEARCH_COLUMNS: &[&str] = &[
    "reservation_code",
    "(SELECT u.username FROM auth_user u WHERE u.id = reservations.user_id)",
    "(SELECT u.email FROM auth_user u WHERE u.id = reservations.user_id)",
];

pub struct PgReservationRepository {
    pool: PgPool,
}

impl PgReservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: i64,
    reservation_code: String,
    user_id: i64,
    flight_id: i64,
    reservation_date: DateTime<Utc>,
    total_passengers: i32,
    total_amount: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            id: row.id,
            reservation_code: row.reservation_code,
            user_id: row.user_id,
            flight_id: row.flight_id,
            reservation_date: row.reservation_date,
            total_passengers: row.total_passengers,
            total_amount: row.total_amount,
            status: row.status.parse().map_err(StoreError::Backend)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatisticsRow {
    total: i64,
    pending: i64,
    confirmed: i64,
    cancelled: i64,
    total_amount: Decimal,
    total_passengers: i64,
}

fn convert(rows: Vec<ReservationRow>) -> StoreResult<Vec<Reservation>> {
    rows.into_iter().map(Reservation::try_from).collect()
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &ReservationQuery) {
    push_search(qb, SEARCH_COLUMNS, query.search.as_deref());
    if let Some(status) = query.status {
        qb.push(" AND status = ");
        qb.push_bind(status.as_str());
    }
    if let Some(user) = query.user {
        qb.push(" AND user_id = ");
        qb.push_bind(user);
    }
    if let Some(flight) = query.flight {
        qb.push(" AND flight_id = ");
        qb.push_bind(flight);
    }
    if let Some(since) = query.created_since {
        qb.push(" AND created_at >= ");
        qb.push_bind(since);
    }
}

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    async fn list(
        &self,
        scope: Scope,
        query: &ReservationQuery,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<Reservation>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM reservations WHERE TRUE");
        push_scope(&mut count, scope, "user_id");
        push_filters(&mut count, query);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM reservations WHERE TRUE", COLUMNS));
        push_scope(&mut qb, scope, "user_id");
        push_filters(&mut qb, query);
        let order = query
            .ordering
            .map(|s| s.sql())
            .unwrap_or_else(|| "created_at DESC".to_string());
        qb.push(format!(" ORDER BY {}, id DESC", order));
        push_page(&mut qb, page);

        let rows: Vec<ReservationRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(Page {
            count: total as u64,
            items: convert(rows)?,
        })
    }

    async fn get(&self, scope: Scope, id: i64) -> StoreResult<Option<Reservation>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM reservations WHERE id = ", COLUMNS));
        qb.push_bind(id);
        push_scope(&mut qb, scope, "user_id");
        let row: Option<ReservationRow> = qb
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(Reservation::try_from).transpose()
    }

    async fn owner_of(&self, id: i64) -> StoreResult<Option<i64>> {
        sqlx::query_scalar("SELECT user_id FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }

    async fn get_many(&self, scope: Scope, ids: &[i64]) -> StoreResult<Vec<Reservation>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM reservations WHERE id = ANY(", COLUMNS));
        qb.push_bind(ids.to_vec());
        qb.push(")");
        push_scope(&mut qb, scope, "user_id");
        let rows: Vec<ReservationRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        convert(rows)
    }

    async fn code_exists(&self, code: &str) -> StoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM reservations WHERE reservation_code = $1)")
            .bind(code)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)
    }

    async fn insert(&self, new: &NewReservation) -> StoreResult<Reservation> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            INSERT INTO reservations
                (reservation_code, user_id, flight_id, reservation_date, total_passengers,
                 total_amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(&new.reservation_code)
        .bind(new.user_id)
        .bind(new.flight_id)
        .bind(new.reservation_date)
        .bind(new.total_passengers)
        .bind(new.total_amount)
        .bind(new.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_err(e, WRITE_FIELDS))?;
        row.try_into()
    }

    async fn save(&self, reservation: &Reservation) -> StoreResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            UPDATE reservations SET
                user_id = $2, flight_id = $3, reservation_date = $4, total_passengers = $5,
                total_amount = $6, status = $7, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(reservation.id)
        .bind(reservation.user_id)
        .bind(reservation.flight_id)
        .bind(reservation.reservation_date)
        .bind(reservation.total_passengers)
        .bind(reservation.total_amount)
        .bind(reservation.status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err(e, WRITE_FIELDS))?;
        row.map(Reservation::try_from).transpose()
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("DELETE FROM reservation_passengers WHERE reservation_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let result = sqlx::query("DELETE FROM reservations WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn statistics(&self, scope: Scope) -> StoreResult<ReservationStatistics> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'confirmed') AS confirmed,
                COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled,
                COALESCE(SUM(total_amount) FILTER (WHERE status = 'confirmed'), 0) AS total_amount,
                COALESCE(SUM(total_passengers) FILTER (WHERE status = 'confirmed'), 0)::BIGINT
                    AS total_passengers
            FROM reservations WHERE TRUE
            "#,
        );
        push_scope(&mut qb, scope, "user_id");
        let row: StatisticsRow = qb
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        Ok(ReservationStatistics {
            total: row.total,
            pending: row.pending,
            confirmed: row.confirmed,
            cancelled: row.cancelled,
            total_amount: row.total_amount,
            total_passengers: row.total_passengers,
        })
    }

    async fn confirmed_for_travel_date(&self, date: NaiveDate) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            r#"
            SELECT {} FROM reservations
            WHERE status = 'confirmed'
              AND flight_id IN (SELECT id FROM flightrequests WHERE traveldate = $1)
            ORDER BY id
            "#,
            COLUMNS
        ))
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        convert(rows)
    }
}
