use async_trait::async_trait;
use chrono::{DateTime, Utc};
use skyway_core::models::{Airline, AirlineInput};
use skyway_core::repository::{AirlineQuery, AirlineRepository, Page, PageRequest, StoreResult};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::database::{backend, map_err, push_page, push_search};

const COLUMNS: &str = "id, code, name, logo_url, created_at, updated_at";
const UNIQUE_FIELDS: &[(&str, &str)] = &[("code", "code"), ("name", "name")];

pub struct PgAirlineRepository {
    pool: PgPool,
}

impl PgAirlineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AirlineRow {
    id: i64,
    code: String,
    name: String,
    logo_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AirlineRow> for Airline {
    fn from(row: AirlineRow) -> Self {
        Airline {
            id: row.id,
            code: row.code,
            name: row.name,
            logo_url: row.logo_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &AirlineQuery) {
    push_search(qb, &["name", "code"], query.search.as_deref());
}

#[async_trait]
impl AirlineRepository for PgAirlineRepository {
    async fn list(&self, query: &AirlineQuery, page: Option<PageRequest>) -> StoreResult<Page<Airline>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM airlines WHERE TRUE");
        push_filters(&mut count, query);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM airlines WHERE TRUE", COLUMNS));
        push_filters(&mut qb, query);
        let order = query
            .ordering
            .map(|s| s.sql())
            .unwrap_or_else(|| "name ASC".to_string());
        qb.push(format!(" ORDER BY {}, id", order));
        push_page(&mut qb, page);

        let rows: Vec<AirlineRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(Page {
            count: total as u64,
            items: rows.into_iter().map(Airline::from).collect(),
        })
    }

    async fn get(&self, id: i64) -> StoreResult<Option<Airline>> {
        let row = sqlx::query_as::<_, AirlineRow>(&format!("SELECT {} FROM airlines WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(Airline::from))
    }

    async fn get_many(&self, ids: &[i64]) -> StoreResult<Vec<Airline>> {
        let rows = sqlx::query_as::<_, AirlineRow>(&format!("SELECT {} FROM airlines WHERE id = ANY($1)", COLUMNS))
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(Airline::from).collect())
    }

    async fn insert(&self, input: &AirlineInput) -> StoreResult<Airline> {
        let row = sqlx::query_as::<_, AirlineRow>(&format!(
            r#"
            INSERT INTO airlines (code, name, logo_url, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(&input.code)
        .bind(&input.name)
        .bind(&input.logo_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_err(e, UNIQUE_FIELDS))?;
        Ok(row.into())
    }

    async fn update(&self, id: i64, input: &AirlineInput) -> StoreResult<Option<Airline>> {
        let row = sqlx::query_as::<_, AirlineRow>(&format!(
            r#"
            UPDATE airlines SET code = $2, name = $3, logo_url = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(&input.code)
        .bind(&input.name)
        .bind(&input.logo_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err(e, UNIQUE_FIELDS))?;
        Ok(row.map(Airline::from))
    }

    /// Deletes the airline together with its flights.
    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("DELETE FROM flights WHERE airline_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let result = sqlx::query("DELETE FROM airlines WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}
