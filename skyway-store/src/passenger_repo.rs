use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use skyway_core::access::Scope;
use skyway_core::models::passenger::{CategoryCounts, GenderCounts, TypeCounts};
use skyway_core::models::{
    PassengerCategory, PassengerInput, PassengerStatistics, ReservationPassenger,
};
use skyway_core::repository::{
    Page, PageRequest, PassengerQuery, PassengerRepository, StoreError, StoreResult,
};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::database::{backend, like_pattern, map_err, push_page, push_search};

const COLUMNS: &str = "id, reservation_id, passenger_type, passenger_category, first_name, last_name, \
                       country_of_residence, identity_document, date_of_birth, gender, seat_number, created_at";
const WRITE_FIELDS: &[(&str, &str)] = &[("seat", "seat_number"), ("reservation", "reservation")];

pub struct PgPassengerRepository {
    pool: PgPool,
}

impl PgPassengerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PassengerRow {
    id: i64,
    reservation_id: i64,
    passenger_type: String,
    passenger_category: String,
    first_name: String,
    last_name: String,
    country_of_residence: String,
    identity_document: String,
    date_of_birth: NaiveDate,
    gender: String,
    seat_number: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PassengerRow> for ReservationPassenger {
    type Error = StoreError;

    fn try_from(row: PassengerRow) -> Result<Self, Self::Error> {
        Ok(ReservationPassenger {
            id: row.id,
            reservation_id: row.reservation_id,
            passenger_type: row.passenger_type.parse().map_err(StoreError::Backend)?,
            passenger_category: row.passenger_category.parse().map_err(StoreError::Backend)?,
            first_name: row.first_name,
            last_name: row.last_name,
            country_of_residence: row.country_of_residence,
            identity_document: row.identity_document,
            date_of_birth: row.date_of_birth,
            gender: row.gender.parse().map_err(StoreError::Backend)?,
            seat_number: row.seat_number,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StatisticsRow {
    total: i64,
    main: i64,
    companion: i64,
    adult: i64,
    child: i64,
    infant: i64,
    male: i64,
    female: i64,
    other: i64,
    with_seat: i64,
}

fn convert(rows: Vec<PassengerRow>) -> StoreResult<Vec<ReservationPassenger>> {
    rows.into_iter().map(ReservationPassenger::try_from).collect()
}

/// Passengers are owned through the user of their reservation.
fn push_scope(qb: &mut QueryBuilder<'_, Postgres>, scope: Scope) {
    match scope {
        Scope::All => {}
        Scope::OwnedBy(user_id) => {
            qb.push(" AND reservation_id IN (SELECT id FROM reservations WHERE user_id = ");
            qb.push_bind(user_id);
            qb.push(")");
        }
        Scope::Nothing => {
            qb.push(" AND FALSE");
        }
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &PassengerQuery) {
    push_search(
        qb,
        &["first_name", "last_name", "identity_document", "seat_number"],
        query.search.as_deref(),
    );
    if let Some(reservation) = query.reservation {
        qb.push(" AND reservation_id = ");
        qb.push_bind(reservation);
    }
    if let Some(kind) = query.passenger_type {
        qb.push(" AND passenger_type = ");
        qb.push_bind(kind.as_str());
    }
    if let Some(category) = query.passenger_category {
        qb.push(" AND passenger_category = ");
        qb.push_bind(category.as_str());
    }
    if let Some(gender) = query.gender {
        qb.push(" AND gender = ");
        qb.push_bind(gender.as_str());
    }
    if let Some(document) = query.document.as_deref() {
        qb.push(" AND identity_document ILIKE ");
        qb.push_bind(like_pattern(document));
    }
    if let Some(code) = query.reservation_code.as_deref() {
        qb.push(" AND reservation_id IN (SELECT id FROM reservations WHERE reservation_code = ");
        qb.push_bind(code.to_string());
        qb.push(")");
    }
    if query.unassigned_only {
        qb.push(" AND (seat_number IS NULL OR seat_number = '')");
    }
}

#[async_trait]
impl PassengerRepository for PgPassengerRepository {
    async fn list(
        &self,
        scope: Scope,
        query: &PassengerQuery,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<ReservationPassenger>> {
        let mut count =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM reservation_passengers WHERE TRUE");
        push_scope(&mut count, scope);
        push_filters(&mut count, query);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM reservation_passengers WHERE TRUE",
            COLUMNS
        ));
        push_scope(&mut qb, scope);
        push_filters(&mut qb, query);
        let order = query
            .ordering
            .map(|s| s.sql())
            .unwrap_or_else(|| "passenger_type ASC, created_at DESC".to_string());
        qb.push(format!(" ORDER BY {}, id", order));
        push_page(&mut qb, page);

        let rows: Vec<PassengerRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(Page {
            count: total as u64,
            items: convert(rows)?,
        })
    }

    async fn get(&self, scope: Scope, id: i64) -> StoreResult<Option<ReservationPassenger>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM reservation_passengers WHERE id = ",
            COLUMNS
        ));
        qb.push_bind(id);
        push_scope(&mut qb, scope);
        let row: Option<PassengerRow> = qb
            .build_query_as()
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(ReservationPassenger::try_from).transpose()
    }

    async fn owner_of(&self, id: i64) -> StoreResult<Option<i64>> {
        sqlx::query_scalar(
            "SELECT r.user_id FROM reservation_passengers p \
             JOIN reservations r ON r.id = p.reservation_id WHERE p.id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)
    }

    async fn insert(&self, input: &PassengerInput) -> StoreResult<ReservationPassenger> {
        let row = sqlx::query_as::<_, PassengerRow>(&format!(
            r#"
            INSERT INTO reservation_passengers (
                reservation_id, passenger_type, passenger_category, first_name, last_name,
                country_of_residence, identity_document, date_of_birth, gender, seat_number, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(input.reservation)
        .bind(input.passenger_type.as_str())
        .bind(input.passenger_category.as_str())
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.country_of_residence)
        .bind(&input.identity_document)
        .bind(input.date_of_birth)
        .bind(input.gender.as_str())
        .bind(&input.seat_number)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_err(e, WRITE_FIELDS))?;
        row.try_into()
    }

    async fn update(&self, id: i64, input: &PassengerInput) -> StoreResult<Option<ReservationPassenger>> {
        let row = sqlx::query_as::<_, PassengerRow>(&format!(
            r#"
            UPDATE reservation_passengers SET
                reservation_id = $2, passenger_type = $3, passenger_category = $4,
                first_name = $5, last_name = $6, country_of_residence = $7,
                identity_document = $8, date_of_birth = $9, gender = $10, seat_number = $11
            WHERE id = $1
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(input.reservation)
        .bind(input.passenger_type.as_str())
        .bind(input.passenger_category.as_str())
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.country_of_residence)
        .bind(&input.identity_document)
        .bind(input.date_of_birth)
        .bind(input.gender.as_str())
        .bind(&input.seat_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err(e, WRITE_FIELDS))?;
        row.map(ReservationPassenger::try_from).transpose()
    }

    async fn set_seat(&self, id: i64, seat: Option<&str>) -> StoreResult<Option<ReservationPassenger>> {
        let row = sqlx::query_as::<_, PassengerRow>(&format!(
            "UPDATE reservation_passengers SET seat_number = $2 WHERE id = $1 RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(seat)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err(e, WRITE_FIELDS))?;
        row.map(ReservationPassenger::try_from).transpose()
    }

    async fn set_category(
        &self,
        id: i64,
        category: PassengerCategory,
    ) -> StoreResult<Option<ReservationPassenger>> {
        let row = sqlx::query_as::<_, PassengerRow>(&format!(
            "UPDATE reservation_passengers SET passenger_category = $2 WHERE id = $1 RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(category.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(ReservationPassenger::try_from).transpose()
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM reservation_passengers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn seat_taken(&self, reservation_id: i64, seat: &str, except: Option<i64>) -> StoreResult<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM reservation_passengers
                WHERE reservation_id = $1 AND seat_number = $2
                  AND ($3::BIGINT IS NULL OR id <> $3)
            )
            "#,
        )
        .bind(reservation_id)
        .bind(seat)
        .bind(except)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)
    }

    async fn statistics(&self, scope: Scope) -> StoreResult<PassengerStatistics> {
        let mut qb = QueryBuilder::<Postgres>::new(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE passenger_type = 'main') AS main,
                COUNT(*) FILTER (WHERE passenger_type = 'companion') AS companion,
                COUNT(*) FILTER (WHERE passenger_category = 'adult') AS adult,
                COUNT(*) FILTER (WHERE passenger_category = 'child') AS child,
                COUNT(*) FILTER (WHERE passenger_category = 'infant') AS infant,
                COUNT(*) FILTER (WHERE gender = 'M') AS male,
                COUNT(*) FILTER (WHERE gender = 'F') AS female,
                COUNT(*) FILTER (WHERE gender = 'O') AS other,
                COUNT(*) FILTER (WHERE COALESCE(seat_number, '') <> '') AS with_seat
            FROM reservation_passengers WHERE TRUE
            "#,
        );
        push_scope(&mut qb, scope);
        let row: StatisticsRow = qb
            .build_query_as()
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        Ok(PassengerStatistics {
            total: row.total,
            by_type: TypeCounts {
                main: row.main,
                companion: row.companion,
            },
            by_category: CategoryCounts {
                adult: row.adult,
                child: row.child,
                infant: row.infant,
            },
            by_gender: GenderCounts {
                male: row.male,
                female: row.female,
                other: row.other,
            },
            with_seat_assigned: row.with_seat,
            without_seat_assigned: row.total - row.with_seat,
        })
    }
}
