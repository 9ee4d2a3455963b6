use skyway_core::access::Scope;
use skyway_core::repository::{PageRequest, StoreError};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{error, info};

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }
}

/// Maps a sqlx error to a storage error. `fields` pairs a fragment of a
/// constraint name with the API field it guards; the first fragment found in
/// the violated constraint wins, so list more specific fragments first.
pub(crate) fn map_err(err: sqlx::Error, fields: &[(&str, &str)]) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        let field = constraint_field(db.constraint().unwrap_or_default(), fields);
        if db.is_unique_violation() {
            return StoreError::UniqueViolation { field };
        }
        if db.is_foreign_key_violation() {
            return StoreError::ForeignKeyViolation { field };
        }
    }
    error!(error = %err, "database error");
    StoreError::Backend(err.to_string())
}

/// API field guarded by `constraint`; unknown constraints are reported
/// against `non_field_errors`.
fn constraint_field(constraint: &str, fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .find(|(fragment, _)| constraint.contains(fragment))
        .map(|(_, field)| field.to_string())
        .unwrap_or_else(|| "non_field_errors".to_string())
}

/// Foreign-key failures while deleting mean the row is still referenced.
pub(crate) fn map_delete_err(err: sqlx::Error, referenced_by: &str) -> StoreError {
    match map_err(err, &[]) {
        StoreError::ForeignKeyViolation { .. } => StoreError::Restricted {
            field: referenced_by.to_string(),
        },
        other => other,
    }
}

pub(crate) fn backend(err: sqlx::Error) -> StoreError {
    map_err(err, &[])
}

/// `%term%` with LIKE wildcards in `term` escaped.
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Case-insensitive match of `term` against any of `columns`.
pub(crate) fn push_search(qb: &mut QueryBuilder<'_, Postgres>, columns: &[&str], term: Option<&str>) {
    let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) else {
        return;
    };
    let pattern = like_pattern(term);
    qb.push(" AND (");
    for (i, column) in columns.iter().enumerate() {
        if i > 0 {
            qb.push(" OR ");
        }
        qb.push(format!("COALESCE({}, '') ILIKE ", column));
        qb.push_bind(pattern.clone());
    }
    qb.push(")");
}

/// Restricts rows to the caller's scope; `owner_column` holds the owning user.
pub(crate) fn push_scope(qb: &mut QueryBuilder<'_, Postgres>, scope: Scope, owner_column: &str) {
    match scope {
        Scope::All => {}
        Scope::OwnedBy(user_id) => {
            qb.push(format!(" AND {} = ", owner_column));
            qb.push_bind(user_id);
        }
        Scope::Nothing => {
            qb.push(" AND FALSE");
        }
    }
}

pub(crate) fn push_page(qb: &mut QueryBuilder<'_, Postgres>, page: Option<PageRequest>) {
    if let Some(page) = page {
        qb.push(" LIMIT ");
        qb.push_bind(page.size.min(i64::MAX as u64) as i64);
        qb.push(" OFFSET ");
        qb.push_bind(page.offset().min(i64::MAX as u64) as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(like_pattern(" 50%_off "), "%50\\%\\_off%");
    }

    #[test]
    fn constraint_names_pick_the_guarded_field() {
        let fields = &[("destinationid", "destination"), ("originid", "origin")];
        assert_eq!(constraint_field("flightrequests_originid_fkey", fields), "origin");
        assert_eq!(
            constraint_field("flightrequests_reservedbyid_fkey", fields),
            "non_field_errors"
        );
        assert_eq!(constraint_field("", &[]), "non_field_errors");
    }
}
