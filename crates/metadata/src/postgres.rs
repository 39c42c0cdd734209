//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{
    AvailabilityLogRepo, AvailabilityRepo, ExternalIdRepo, LocationFilter, LocationRepo,
    MergeRepo, MergeStats,
};
use crate::store::MetadataStore;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres, QueryBuilder};
use std::str::FromStr;
use time::OffsetDateTime;
use univaf_core::config::PgSslMode;
use univaf_core::{ExternalId, LocationCursor, MergePlan, timestamp};
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters,
    /// so the password can come from its own environment variable.
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LocationRepo for PostgresStore {
    async fn create_location(&self, location: &LocationRow) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO locations (
                id, provider, location_type, name, address_lines, city, state,
                postal_code, county, latitude, longitude, info_phone, info_url,
                booking_phone, booking_url, description, meta, is_public,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(location.id)
        .bind(&location.provider)
        .bind(&location.location_type)
        .bind(&location.name)
        .bind(&location.address_lines)
        .bind(&location.city)
        .bind(&location.state)
        .bind(&location.postal_code)
        .bind(&location.county)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(&location.info_phone)
        .bind(&location.info_url)
        .bind(&location.booking_phone)
        .bind(&location.booking_url)
        .bind(&location.description)
        .bind(&location.meta)
        .bind(location.is_public)
        .bind(location.created_at)
        .bind(location.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::AlreadyExists(format!(
                "location {} already exists",
                location.id
            )));
        }
        Ok(())
    }

    async fn get_location(&self, id: Uuid) -> MetadataResult<Option<LocationRow>> {
        let row = sqlx::query_as::<_, LocationRow>("SELECT * FROM locations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_locations_by_external_ids(
        &self,
        ids: &[ExternalId],
    ) -> MetadataResult<Vec<LocationRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT * FROM locations WHERE id IN (SELECT location_id FROM external_ids WHERE ",
        );
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                query.push(" OR ");
            }
            query.push("(system = ");
            query.push_bind(id.system.clone());
            query.push(" AND value = ");
            query.push_bind(id.value.clone());
            query.push(")");
        }
        query.push(") ORDER BY created_at, id");

        let rows = query
            .build_query_as::<LocationRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn list_locations_after(
        &self,
        filter: &LocationFilter,
        after: Option<&LocationCursor>,
        limit: u32,
    ) -> MetadataResult<Vec<LocationRow>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM locations WHERE TRUE");

        if let Some(provider) = &filter.provider {
            query.push(" AND provider = ");
            query.push_bind(provider.clone());
        }
        if let Some(state) = &filter.state {
            query.push(" AND state = ");
            query.push_bind(state.clone());
        }
        if let Some(is_public) = filter.is_public {
            query.push(" AND is_public = ");
            query.push_bind(is_public);
        }
        if let Some(system) = &filter.external_id_system {
            query.push(
                " AND EXISTS (SELECT 1 FROM external_ids e WHERE e.location_id = locations.id AND e.system = ",
            );
            query.push_bind(system.clone());
            query.push(")");
        }
        if let Some(cursor) = after {
            query.push(" AND (created_at, id) > (");
            query.push_bind(cursor.created_at);
            query.push(", ");
            query.push_bind(cursor.id);
            query.push(")");
        }
        query.push(" ORDER BY created_at, id LIMIT ");
        query.push_bind(i64::from(limit));

        let rows = query
            .build_query_as::<LocationRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn touch_location(&self, id: Uuid, updated_at: OffsetDateTime) -> MetadataResult<()> {
        let result = sqlx::query("UPDATE locations SET updated_at = $1 WHERE id = $2")
            .bind(updated_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!("location {id} not found")));
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalIdRepo for PostgresStore {
    async fn add_external_ids(
        &self,
        location_id: Uuid,
        ids: &[ExternalId],
        created_at: OffsetDateTime,
    ) -> MetadataResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut added = 0;
        for id in ids {
            let result = sqlx::query(
                r#"
                INSERT INTO external_ids (location_id, system, value, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (location_id, system, value) DO NOTHING
                "#,
            )
            .bind(location_id)
            .bind(&id.system)
            .bind(&id.value)
            .bind(created_at)
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected();
        }
        tx.commit().await?;
        Ok(added)
    }

    async fn list_external_ids(&self, location_id: Uuid) -> MetadataResult<Vec<ExternalIdRow>> {
        let rows = sqlx::query_as::<_, ExternalIdRow>(
            "SELECT * FROM external_ids WHERE location_id = $1 ORDER BY id",
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_external_ids_for(
        &self,
        location_ids: &[Uuid],
    ) -> MetadataResult<Vec<ExternalIdRow>> {
        if location_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ExternalIdRow>(
            "SELECT * FROM external_ids WHERE location_id = ANY($1) ORDER BY id",
        )
        .bind(location_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl AvailabilityRepo for PostgresStore {
    async fn get_availability(
        &self,
        location_id: Uuid,
        source: &str,
    ) -> MetadataResult<Option<AvailabilityRow>> {
        let row = sqlx::query_as::<_, AvailabilityRow>(
            "SELECT * FROM availability WHERE location_id = $1 AND source = $2",
        )
        .bind(location_id)
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_availability(&self, location_id: Uuid) -> MetadataResult<Vec<AvailabilityRow>> {
        let rows = sqlx::query_as::<_, AvailabilityRow>(
            "SELECT * FROM availability WHERE location_id = $1 ORDER BY source",
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_availability(&self, row: &AvailabilityRow) -> MetadataResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO availability (
                location_id, source, available, available_count, products, doses,
                capacity, slots, meta, is_public, valid_at, checked_at, changed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (location_id, source) DO NOTHING
            "#,
        )
        .bind(row.location_id)
        .bind(&row.source)
        .bind(&row.available)
        .bind(row.available_count)
        .bind(&row.products)
        .bind(&row.doses)
        .bind(&row.capacity)
        .bind(&row.slots)
        .bind(&row.meta)
        .bind(row.is_public)
        .bind(row.valid_at)
        .bind(row.checked_at)
        .bind(row.changed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_availability_if_newer(
        &self,
        row: &AvailabilityRow,
        expected_checked_at: OffsetDateTime,
    ) -> MetadataResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE availability SET
                available = $1, available_count = $2, products = $3, doses = $4,
                capacity = $5, slots = $6, meta = $7, is_public = $8,
                valid_at = $9, checked_at = $10, changed_at = $11
            WHERE location_id = $12 AND source = $13 AND checked_at = $14 AND checked_at < $10
            "#,
        )
        .bind(&row.available)
        .bind(row.available_count)
        .bind(&row.products)
        .bind(&row.doses)
        .bind(&row.capacity)
        .bind(&row.slots)
        .bind(&row.meta)
        .bind(row.is_public)
        .bind(row.valid_at)
        .bind(row.checked_at)
        .bind(row.changed_at)
        .bind(row.location_id)
        .bind(&row.source)
        .bind(timestamp::normalize(expected_checked_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AvailabilityLogRepo for PostgresStore {
    async fn append_availability_log(&self, entry: &AvailabilityLogRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO availability_log (
                location_id, source, checked_at, valid_at, changed_at, available,
                available_count, products, doses, capacity, slots, meta, is_public
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(entry.location_id)
        .bind(&entry.source)
        .bind(entry.checked_at)
        .bind(entry.valid_at)
        .bind(entry.changed_at)
        .bind(&entry.available)
        .bind(entry.available_count)
        .bind(&entry.products)
        .bind(&entry.doses)
        .bind(&entry.capacity)
        .bind(&entry.slots)
        .bind(&entry.meta)
        .bind(entry.is_public)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_availability_log(
        &self,
        location_id: Uuid,
        source: Option<&str>,
    ) -> MetadataResult<Vec<AvailabilityLogRow>> {
        let rows = sqlx::query_as::<_, AvailabilityLogRow>(
            r#"
            SELECT * FROM availability_log
            WHERE location_id = $1 AND ($2::TEXT IS NULL OR source = $2)
            ORDER BY checked_at, id
            "#,
        )
        .bind(location_id)
        .bind(source)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl MergeRepo for PostgresStore {
    async fn execute_merge(
        &self,
        plan: &MergePlan,
        merged_at: OffsetDateTime,
    ) -> MetadataResult<MergeStats> {
        let target = plan.target;
        let mut stats = MergeStats::default();
        let mut tx = self.pool.begin().await?;

        let current_meta: Option<String> =
            sqlx::query_scalar("SELECT meta FROM locations WHERE id = $1 FOR UPDATE")
                .bind(target)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(current_meta) = current_meta else {
            return Err(MetadataError::NotFound(format!(
                "merge target {target} not found"
            )));
        };
        let columns = LocationUpdateColumns::from_update(&plan.update, &current_meta)?;

        // Fill-only: a value or meta key written to the target since
        // planning wins.
        let result = sqlx::query(
            r#"
            UPDATE locations SET
                location_type = COALESCE(location_type, $1),
                name = COALESCE(name, $2),
                address_lines = COALESCE(address_lines, $3),
                city = COALESCE(city, $4),
                state = COALESCE(state, $5),
                postal_code = COALESCE(postal_code, $6),
                county = COALESCE(county, $7),
                latitude = COALESCE(latitude, $8),
                longitude = COALESCE(longitude, $9),
                info_phone = COALESCE(info_phone, $10),
                info_url = COALESCE(info_url, $11),
                booking_phone = COALESCE(booking_phone, $12),
                booking_url = COALESCE(booking_url, $13),
                description = COALESCE(description, $14),
                meta = COALESCE($15, meta),
                is_public = COALESCE($16, is_public),
                updated_at = $17
            WHERE id = $18
            "#,
        )
        .bind(&plan.update.location_type)
        .bind(&plan.update.name)
        .bind(&columns.address_lines)
        .bind(&plan.update.city)
        .bind(&plan.update.state)
        .bind(&plan.update.postal_code)
        .bind(&plan.update.county)
        .bind(columns.latitude)
        .bind(columns.longitude)
        .bind(&plan.update.info_phone)
        .bind(&plan.update.info_url)
        .bind(&plan.update.booking_phone)
        .bind(&plan.update.booking_url)
        .bind(&plan.update.description)
        .bind(&columns.meta)
        .bind(plan.update.is_public)
        .bind(merged_at)
        .bind(target)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "merge target {target} not found"
            )));
        }

        for id in &plan.external_ids {
            let result = sqlx::query(
                r#"
                INSERT INTO external_ids (location_id, system, value, created_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (location_id, system, value) DO NOTHING
                "#,
            )
            .bind(target)
            .bind(&id.system)
            .bind(&id.value)
            .bind(merged_at)
            .execute(&mut *tx)
            .await?;
            stats.external_ids_added += result.rows_affected();
        }

        for id in &plan.removed_external_ids {
            let result = sqlx::query(
                "DELETE FROM external_ids WHERE location_id = $1 AND system = $2 AND value = $3",
            )
            .bind(target)
            .bind(&id.system)
            .bind(&id.value)
            .execute(&mut *tx)
            .await?;
            stats.external_ids_removed += result.rows_affected();
        }

        for donor in &plan.donors {
            let donor = *donor;
            // Lock the donor's rows so a concurrent reconcile cannot slip in
            // between the move and the delete.
            let rows = sqlx::query_as::<_, AvailabilityRow>(
                "SELECT * FROM availability WHERE location_id = $1 FOR UPDATE",
            )
            .bind(donor)
            .fetch_all(&mut *tx)
            .await?;

            for row in rows {
                let existing: Option<OffsetDateTime> = sqlx::query_scalar(
                    "SELECT checked_at FROM availability WHERE location_id = $1 AND source = $2 FOR UPDATE",
                )
                .bind(target)
                .bind(&row.source)
                .fetch_optional(&mut *tx)
                .await?;

                match existing {
                    Some(checked_at) if checked_at >= row.checked_at => {
                        stats.availability_discarded += 1;
                        continue;
                    }
                    Some(_) => {
                        sqlx::query("DELETE FROM availability WHERE location_id = $1 AND source = $2")
                            .bind(target)
                            .bind(&row.source)
                            .execute(&mut *tx)
                            .await?;
                        stats.availability_replaced += 1;
                    }
                    None => stats.availability_moved += 1,
                }

                sqlx::query(
                    "UPDATE availability SET location_id = $1 WHERE location_id = $2 AND source = $3",
                )
                .bind(target)
                .bind(donor)
                .bind(&row.source)
                .execute(&mut *tx)
                .await?;
            }

            sqlx::query("DELETE FROM availability WHERE location_id = $1")
                .bind(donor)
                .execute(&mut *tx)
                .await?;

            let result =
                sqlx::query("UPDATE availability_log SET location_id = $1 WHERE location_id = $2")
                    .bind(target)
                    .bind(donor)
                    .execute(&mut *tx)
                    .await?;
            stats.log_entries_moved += result.rows_affected();

            for id in &plan.removed_external_ids {
                sqlx::query(
                    "DELETE FROM external_ids WHERE location_id = $1 AND system = $2 AND value = $3",
                )
                .bind(donor)
                .bind(&id.system)
                .bind(&id.value)
                .execute(&mut *tx)
                .await?;
            }

            // Ids attached to the donor since planning move over too.
            let result = sqlx::query(
                r#"
                UPDATE external_ids SET location_id = $1
                WHERE location_id = $2 AND NOT EXISTS (
                    SELECT 1 FROM external_ids AS held
                    WHERE held.location_id = $1
                        AND held.system = external_ids.system
                        AND held.value = external_ids.value
                )
                "#,
            )
            .bind(target)
            .bind(donor)
            .execute(&mut *tx)
            .await?;
            stats.external_ids_added += result.rows_affected();

            sqlx::query("DELETE FROM external_ids WHERE location_id = $1")
                .bind(donor)
                .execute(&mut *tx)
                .await?;

            let result = sqlx::query("DELETE FROM locations WHERE id = $1")
                .bind(donor)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "merge donor {donor} not found"
                )));
            }
            stats.donors_deleted += 1;
        }

        tx.commit().await?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::postgres_schema_statements;

    #[test]
    fn postgres_schema_statements_skips_empty_and_comment_only() {
        let schema = r#"
            -- comment only

            CREATE TABLE foo (id int);
            ;
            -- another comment
            CREATE TABLE bar (id int);
        "#;

        let statements = postgres_schema_statements(schema);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("CREATE TABLE foo"));
        assert!(statements[1].contains("CREATE TABLE bar"));
    }

    #[test]
    fn embedded_schema_creates_every_table() {
        let statements = postgres_schema_statements(super::POSTGRES_SCHEMA);
        for table in ["locations", "external_ids", "availability", "availability_log"] {
            let create = format!("CREATE TABLE IF NOT EXISTS {table} (");
            assert!(
                statements.iter().any(|s| s.contains(&create)),
                "missing table {table}"
            );
        }
    }
}
