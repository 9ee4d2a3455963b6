use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use skyway_core::models::{User, UserInput};
use skyway_core::repository::{Page, PageRequest, StoreResult, UserQuery, UserRepository};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::database::{backend, map_delete_err, map_err, push_page, push_search};

const COLUMNS: &str = "id, username, email, first_name, last_name, NULLIF(phone, '') AS phone, \
                       is_operator, is_staff, is_active, date_of_birday AS date_of_birth, country, city, \
                       profile_image_url, date_joined, created_at, updated_at";
const UNIQUE_FIELDS: &[(&str, &str)] = &[("email", "email"), ("username", "username")];

pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    first_name: String,
    last_name: String,
    phone: Option<String>,
    is_operator: bool,
    is_staff: bool,
    is_active: bool,
    date_of_birth: Option<NaiveDate>,
    country: Option<String>,
    city: Option<String>,
    profile_image_url: Option<String>,
    date_joined: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            is_operator: row.is_operator,
            is_staff: row.is_staff,
            is_active: row.is_active,
            date_of_birth: row.date_of_birth,
            country: row.country,
            city: row.city,
            profile_image_url: row.profile_image_url,
            date_joined: row.date_joined,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &UserQuery) {
    push_search(
        qb,
        &["username", "email", "first_name", "last_name"],
        query.search.as_deref(),
    );
    if let Some(v) = query.is_operator {
        qb.push(" AND is_operator = ");
        qb.push_bind(v);
    }
    if let Some(v) = query.is_staff {
        qb.push(" AND is_staff = ");
        qb.push_bind(v);
    }
    if let Some(v) = query.is_active {
        qb.push(" AND is_active = ");
        qb.push_bind(v);
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn list(&self, query: &UserQuery, page: Option<PageRequest>) -> StoreResult<Page<User>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM auth_user WHERE TRUE");
        push_filters(&mut count, query);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM auth_user WHERE TRUE", COLUMNS));
        push_filters(&mut qb, query);
        let order = query
            .ordering
            .map(|s| s.sql())
            .unwrap_or_else(|| "created_at DESC".to_string());
        qb.push(format!(" ORDER BY {}, id DESC", order));
        push_page(&mut qb, page);

        let rows: Vec<UserRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(Page {
            count: total as u64,
            items: rows.into_iter().map(User::from).collect(),
        })
    }

    async fn get(&self, id: i64) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM auth_user WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(User::from))
    }

    async fn get_many(&self, ids: &[i64]) -> StoreResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!("SELECT {} FROM auth_user WHERE id = ANY($1)", COLUMNS))
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    /// Accounts created here cannot log in until a password is set by the
    /// authentication service.
    async fn insert(&self, input: &UserInput) -> StoreResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO auth_user (
                password, is_superuser, username, email, first_name, last_name, phone,
                is_operator, is_staff, is_active, date_of_birday, country, city,
                profile_image_url, date_joined, created_at, updated_at
            )
            VALUES ('!', FALSE, $1, $2, $3, $4, COALESCE($5, ''), $6, $7, $8, $9, $10, $11, $12,
                    NOW(), NOW(), NOW())
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(&input.username)
        .bind(&input.email)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.phone)
        .bind(input.is_operator)
        .bind(input.is_staff)
        .bind(input.is_active)
        .bind(input.date_of_birth)
        .bind(&input.country)
        .bind(&input.city)
        .bind(&input.profile_image_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_err(e, UNIQUE_FIELDS))?;
        Ok(row.into())
    }

    async fn update(&self, id: i64, input: &UserInput) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE auth_user SET
                username = $2, email = $3, first_name = $4, last_name = $5,
                phone = COALESCE($6, ''), is_operator = $7, is_staff = $8, is_active = $9,
                date_of_birday = $10, country = $11, city = $12, profile_image_url = $13,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(&input.username)
        .bind(&input.email)
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(&input.phone)
        .bind(input.is_operator)
        .bind(input.is_staff)
        .bind(input.is_active)
        .bind(input.date_of_birth)
        .bind(&input.country)
        .bind(&input.city)
        .bind(&input.profile_image_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_err(e, UNIQUE_FIELDS))?;
        Ok(row.map(User::from))
    }

    /// Removes the user with everything they own: flight requests,
    /// reservations (their own and those hanging off their requests) and the
    /// passengers of those reservations. Requests they confirmed for others
    /// lose the operator reference.
    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query(
            r#"
            DELETE FROM reservation_passengers WHERE reservation_id IN (
                SELECT id FROM reservations
                WHERE user_id = $1
                   OR flight_id IN (SELECT id FROM flightrequests WHERE userid = $1)
            )
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query(
            "DELETE FROM reservations WHERE user_id = $1 \
             OR flight_id IN (SELECT id FROM flightrequests WHERE userid = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query("DELETE FROM flightrequests WHERE userid = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        sqlx::query("UPDATE flightrequests SET reservedbyid = NULL WHERE reservedbyid = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let result = sqlx::query("DELETE FROM auth_user WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_delete_err(e, "user"))?;

        tx.commit().await.map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }
}
