use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skyway_core::models::{Destination, DestinationInput};
use skyway_core::repository::{
    DestinationQuery, DestinationRepository, Page, PageRequest, StoreError, StoreResult,
};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::database::{backend, map_delete_err, map_err, push_page, push_search};

const COLUMNS: &str = "id, code, name, province, latitude::FLOAT8 AS latitude, \
                       longitude::FLOAT8 AS longitude, is_active, image_url, created_at, updated_at";
const UNIQUE_FIELDS: &[(&str, &str)] = &[("code", "code"), ("name", "name")];

pub struct PgDestinationRepository {
    pool: PgPool,
}

impl PgDestinationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DestinationRow {
    id: i64,
    code: String,
    name: String,
    province: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    is_active: bool,
    image_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DestinationRow> for Destination {
    fn from(row: DestinationRow) -> Self {
        Destination {
            id: row.id,
            code: row.code,
            name: row.name,
            province: row.province,
            latitude: row.latitude,
            longitude: row.longitude,
            is_active: row.is_active,
            image_url: row.image_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &DestinationQuery) {
    push_search(qb, &["name", "code", "province"], query.search.as_deref());
    if let Some(province) = query.province.as_deref() {
        qb.push(" AND province ILIKE ");
        qb.push_bind(crate::database::like_pattern(province));
    }
    if let Some(active) = query.is_active {
        qb.push(" AND is_active = ");
        qb.push_bind(active);
    }
}

#[async_trait]
impl DestinationRepository for PgDestinationRepository {
    async fn list(
        &self,
        query: &DestinationQuery,
        page: Option<PageRequest>,
    ) -> StoreResult<Page<Destination>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM destinations WHERE TRUE");
        push_filters(&mut count, query);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM destinations WHERE TRUE", COLUMNS));
        push_filters(&mut qb, query);
        let order = query
            .ordering
            .map(|s| s.sql())
            .unwrap_or_else(|| "name ASC".to_string());
        qb.push(format!(" ORDER BY {}, id", order));
        push_page(&mut qb, page);

        let rows: Vec<DestinationRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(Page {
            count: total as u64,
            items: rows.into_iter().map(Destination::from).collect(),
        })
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Destination>> {
        let row = sqlx::query_as::<_, DestinationRow>(&format!(
            "SELECT {} FROM destinations WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(Destination::from))
    }

    async fn get_many(&self, ids: &[i64]) -> StoreResult<Vec<Destination>> {
        let rows = sqlx::query_as::<_, DestinationRow>(&format!(
            "SELECT {} FROM destinations WHERE id = ANY($1)",
            COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(Destination::from).collect())
    }

    async fn insert(&self, input: &DestinationInput) -> StoreResult<Destination> {
        let row = sqlx::query_as::<_, DestinationRow>(&format!(
            r#"
            INSERT INTO destinations
                (code, name, province, latitude, longitude, is_active, image_url, created_at, updated_at)
            VALUES ($1, $2, $3, CAST($4 AS NUMERIC(9, 6)), CAST($5 AS NUMERIC(9, 6)), $6, $7, NOW(), NOW())
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(&input.code)
        .bind(&input.name)
        .bind(&input.province)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(input.is_active)
        .bind(&input.image_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_err(e, UNIQUE_FIELDS))?;
        Ok(row.into())
    }

    async fn update(&self, id: i64, input: &DestinationInput) -> StoreResult<Option<Destination>> {
        let row = sqlx::query_as::<_, DestinationRow>(&format!(
            r#"
            UPDATE destinations SET
                code = $2, name = $3, province = $4,
                latitude = CAST($5 AS NUMERIC(9, 6)), longitude = CAST($6 AS NUMERIC(9, 6)),
                is_active = $7, image_url = $8, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(&input.code)
        .bind(&input.name)
        .bind(&input.province)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(input.is_active)
        .bind(&input.image_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err(e, UNIQUE_FIELDS))?;
        Ok(row.map(Destination::from))
    }

    async fn set_active(&self, id: i64, active: bool) -> StoreResult<Option<Destination>> {
        let row = sqlx::query_as::<_, DestinationRow>(&format!(
            "UPDATE destinations SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            COLUMNS
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(Destination::from))
    }

    /// Refused while flight requests still point at the destination.
    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let referenced: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM flightrequests WHERE destinationid = $1 OR originid = $1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;
        if referenced {
            return Err(StoreError::Restricted {
                field: "flight_requests".to_string(),
            });
        }

        let result = sqlx::query("DELETE FROM destinations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_delete_err(e, "flight_requests"))?;
        Ok(result.rows_affected() > 0)
    }
}
