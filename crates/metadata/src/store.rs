//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{AvailabilityLogRepo, AvailabilityRepo, ExternalIdRepo, LocationRepo, MergeRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use univaf_core::timestamp;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    LocationRepo + ExternalIdRepo + AvailabilityRepo + AvailabilityLogRepo + MergeRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// Fixed-width UTC text form, so SQLite compares timestamps correctly as strings.
const SQLITE_TIMESTAMP: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
);

/// Render a timestamp for binding into a SQLite TEXT column.
pub(crate) fn ts(value: OffsetDateTime) -> MetadataResult<String> {
    timestamp::normalize(value)
        .format(SQLITE_TIMESTAMP)
        .map_err(|e| MetadataError::serialization("timestamp", e))
}

fn ts_opt(value: Option<OffsetDateTime>) -> MetadataResult<Option<String>> {
    value.map(ts).transpose()
}

/// Largest number of bound values put in one `IN (...)` list.
const MAX_IN_LIST: usize = 500;

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes writers; concurrent reconciles
            // still interleave between statements.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        if let Some(secs) = query_timeout_secs {
            tracing::debug!(
                query_timeout_secs = secs,
                "SQLite query timeout is advisory only; use PostgreSQL for enforced statement timeouts"
            );
        }

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use crate::repos::{LocationFilter, MergeStats};
    use sqlx::QueryBuilder;
    use univaf_core::{ExternalId, LocationCursor, MergePlan};
    use uuid::Uuid;

    #[async_trait]
    impl LocationRepo for SqliteStore {
        async fn create_location(&self, location: &LocationRow) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                INSERT INTO locations (
                    id, provider, location_type, name, address_lines, city, state,
                    postal_code, county, latitude, longitude, info_phone, info_url,
                    booking_phone, booking_url, description, meta, is_public,
                    created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
            .bind(ts(location.created_at)?)
            .bind(ts(location.updated_at)?)
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
            let row = sqlx::query_as::<_, LocationRow>("SELECT * FROM locations WHERE id = ?")
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
            let mut query = QueryBuilder::<Sqlite>::new(
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
            let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM locations WHERE 1=1");

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
                let created_at = ts(cursor.created_at)?;
                query.push(" AND (created_at > ");
                query.push_bind(created_at.clone());
                query.push(" OR (created_at = ");
                query.push_bind(created_at);
                query.push(" AND id > ");
                query.push_bind(cursor.id);
                query.push("))");
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
            let result = sqlx::query("UPDATE locations SET updated_at = ? WHERE id = ?")
                .bind(ts(updated_at)?)
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
    impl ExternalIdRepo for SqliteStore {
        async fn add_external_ids(
            &self,
            location_id: Uuid,
            ids: &[ExternalId],
            created_at: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let created_at = ts(created_at)?;
            let mut tx = self.pool.begin().await?;
            let mut added = 0;
            for id in ids {
                let result = sqlx::query(
                    r#"
                    INSERT INTO external_ids (location_id, system, value, created_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT (location_id, system, value) DO NOTHING
                    "#,
                )
                .bind(location_id)
                .bind(&id.system)
                .bind(&id.value)
                .bind(&created_at)
                .execute(&mut *tx)
                .await?;
                added += result.rows_affected();
            }
            tx.commit().await?;
            Ok(added)
        }

        async fn list_external_ids(&self, location_id: Uuid) -> MetadataResult<Vec<ExternalIdRow>> {
            let rows = sqlx::query_as::<_, ExternalIdRow>(
                "SELECT * FROM external_ids WHERE location_id = ? ORDER BY id",
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
            let mut rows = Vec::new();
            for chunk in location_ids.chunks(MAX_IN_LIST) {
                let mut query =
                    QueryBuilder::<Sqlite>::new("SELECT * FROM external_ids WHERE location_id IN (");
                let mut separated = query.separated(", ");
                for id in chunk {
                    separated.push_bind(*id);
                }
                separated.push_unseparated(") ORDER BY id");
                rows.extend(
                    query
                        .build_query_as::<ExternalIdRow>()
                        .fetch_all(&self.pool)
                        .await?,
                );
            }
            Ok(rows)
        }
    }

    #[async_trait]
    impl AvailabilityRepo for SqliteStore {
        async fn get_availability(
            &self,
            location_id: Uuid,
            source: &str,
        ) -> MetadataResult<Option<AvailabilityRow>> {
            let row = sqlx::query_as::<_, AvailabilityRow>(
                "SELECT * FROM availability WHERE location_id = ? AND source = ?",
            )
            .bind(location_id)
            .bind(source)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_availability(
            &self,
            location_id: Uuid,
        ) -> MetadataResult<Vec<AvailabilityRow>> {
            let rows = sqlx::query_as::<_, AvailabilityRow>(
                "SELECT * FROM availability WHERE location_id = ? ORDER BY source",
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
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
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
            .bind(ts(row.valid_at)?)
            .bind(ts(row.checked_at)?)
            .bind(ts(row.changed_at)?)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn update_availability_if_newer(
            &self,
            row: &AvailabilityRow,
            expected_checked_at: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let checked_at = ts(row.checked_at)?;
            let result = sqlx::query(
                r#"
                UPDATE availability SET
                    available = ?, available_count = ?, products = ?, doses = ?,
                    capacity = ?, slots = ?, meta = ?, is_public = ?,
                    valid_at = ?, checked_at = ?, changed_at = ?
                WHERE location_id = ? AND source = ? AND checked_at = ? AND checked_at < ?
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
            .bind(ts(row.valid_at)?)
            .bind(&checked_at)
            .bind(ts(row.changed_at)?)
            .bind(row.location_id)
            .bind(&row.source)
            .bind(ts(expected_checked_at)?)
            .bind(&checked_at)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        }
    }

    #[async_trait]
    impl AvailabilityLogRepo for SqliteStore {
        async fn append_availability_log(&self, entry: &AvailabilityLogRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO availability_log (
                    location_id, source, checked_at, valid_at, changed_at, available,
                    available_count, products, doses, capacity, slots, meta, is_public
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entry.location_id)
            .bind(&entry.source)
            .bind(ts(entry.checked_at)?)
            .bind(ts_opt(entry.valid_at)?)
            .bind(ts_opt(entry.changed_at)?)
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
            let rows = match source {
                Some(source) => {
                    sqlx::query_as::<_, AvailabilityLogRow>(
                        "SELECT * FROM availability_log WHERE location_id = ? AND source = ? ORDER BY checked_at, id",
                    )
                    .bind(location_id)
                    .bind(source)
                    .fetch_all(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_as::<_, AvailabilityLogRow>(
                        "SELECT * FROM availability_log WHERE location_id = ? ORDER BY checked_at, id",
                    )
                    .bind(location_id)
                    .fetch_all(&self.pool)
                    .await?
                }
            };
            Ok(rows)
        }
    }

    #[async_trait]
    impl MergeRepo for SqliteStore {
        async fn execute_merge(
            &self,
            plan: &MergePlan,
            merged_at: OffsetDateTime,
        ) -> MetadataResult<MergeStats> {
            let target = plan.target;
            let mut stats = MergeStats::default();
            let mut tx = self.pool.begin().await?;

            let current_meta: Option<String> =
                sqlx::query_scalar("SELECT meta FROM locations WHERE id = ?")
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
                    location_type = COALESCE(location_type, ?),
                    name = COALESCE(name, ?),
                    address_lines = COALESCE(address_lines, ?),
                    city = COALESCE(city, ?),
                    state = COALESCE(state, ?),
                    postal_code = COALESCE(postal_code, ?),
                    county = COALESCE(county, ?),
                    latitude = COALESCE(latitude, ?),
                    longitude = COALESCE(longitude, ?),
                    info_phone = COALESCE(info_phone, ?),
                    info_url = COALESCE(info_url, ?),
                    booking_phone = COALESCE(booking_phone, ?),
                    booking_url = COALESCE(booking_url, ?),
                    description = COALESCE(description, ?),
                    meta = COALESCE(?, meta),
                    is_public = COALESCE(?, is_public),
                    updated_at = ?
                WHERE id = ?
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
            .bind(ts(merged_at)?)
            .bind(target)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "merge target {target} not found"
                )));
            }

            let merged_ids = ts(merged_at)?;
            for id in &plan.external_ids {
                let result = sqlx::query(
                    r#"
                    INSERT INTO external_ids (location_id, system, value, created_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT (location_id, system, value) DO NOTHING
                    "#,
                )
                .bind(target)
                .bind(&id.system)
                .bind(&id.value)
                .bind(&merged_ids)
                .execute(&mut *tx)
                .await?;
                stats.external_ids_added += result.rows_affected();
            }

            for id in &plan.removed_external_ids {
                let result = sqlx::query(
                    "DELETE FROM external_ids WHERE location_id = ? AND system = ? AND value = ?",
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
                let rows = sqlx::query_as::<_, AvailabilityRow>(
                    "SELECT * FROM availability WHERE location_id = ?",
                )
                .bind(donor)
                .fetch_all(&mut *tx)
                .await?;

                for row in rows {
                    let existing: Option<OffsetDateTime> = sqlx::query_scalar(
                        "SELECT checked_at FROM availability WHERE location_id = ? AND source = ?",
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
                            sqlx::query(
                                "DELETE FROM availability WHERE location_id = ? AND source = ?",
                            )
                            .bind(target)
                            .bind(&row.source)
                            .execute(&mut *tx)
                            .await?;
                            stats.availability_replaced += 1;
                        }
                        None => stats.availability_moved += 1,
                    }

                    sqlx::query(
                        "UPDATE availability SET location_id = ? WHERE location_id = ? AND source = ?",
                    )
                    .bind(target)
                    .bind(donor)
                    .bind(&row.source)
                    .execute(&mut *tx)
                    .await?;
                }

                sqlx::query("DELETE FROM availability WHERE location_id = ?")
                    .bind(donor)
                    .execute(&mut *tx)
                    .await?;

                let result =
                    sqlx::query("UPDATE availability_log SET location_id = ? WHERE location_id = ?")
                        .bind(target)
                        .bind(donor)
                        .execute(&mut *tx)
                        .await?;
                stats.log_entries_moved += result.rows_affected();

                for id in &plan.removed_external_ids {
                    sqlx::query(
                        "DELETE FROM external_ids WHERE location_id = ? AND system = ? AND value = ?",
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
                    UPDATE external_ids SET location_id = ?
                    WHERE location_id = ? AND NOT EXISTS (
                        SELECT 1 FROM external_ids AS held
                        WHERE held.location_id = ?
                            AND held.system = external_ids.system
                            AND held.value = external_ids.value
                    )
                    "#,
                )
                .bind(target)
                .bind(donor)
                .bind(target)
                .execute(&mut *tx)
                .await?;
                stats.external_ids_added += result.rows_affected();

                sqlx::query("DELETE FROM external_ids WHERE location_id = ?")
                    .bind(donor)
                    .execute(&mut *tx)
                    .await?;

                let result = sqlx::query("DELETE FROM locations WHERE id = ?")
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
}

/// SQL schema for SQLite.
///
/// Timestamps are fixed-width UTC text (see [`ts`]); ids are 16-byte blobs.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS locations (
    id BLOB PRIMARY KEY,
    provider TEXT NOT NULL,
    location_type TEXT,
    name TEXT,
    address_lines TEXT,
    city TEXT,
    state TEXT,
    postal_code TEXT,
    county TEXT,
    latitude REAL,
    longitude REAL,
    info_phone TEXT,
    info_url TEXT,
    booking_phone TEXT,
    booking_url TEXT,
    description TEXT,
    meta TEXT NOT NULL DEFAULT '{}',
    is_public INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_locations_keyset ON locations(created_at, id);
CREATE INDEX IF NOT EXISTS idx_locations_provider ON locations(provider);
CREATE INDEX IF NOT EXISTS idx_locations_state ON locations(state);

CREATE TABLE IF NOT EXISTS external_ids (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    location_id BLOB NOT NULL REFERENCES locations(id),
    system TEXT NOT NULL,
    value TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(location_id, system, value)
);
CREATE INDEX IF NOT EXISTS idx_external_ids_system_value ON external_ids(system, value);

CREATE TABLE IF NOT EXISTS availability (
    location_id BLOB NOT NULL REFERENCES locations(id),
    source TEXT NOT NULL,
    available TEXT NOT NULL,
    available_count INTEGER,
    products TEXT,
    doses TEXT,
    capacity TEXT,
    slots TEXT,
    meta TEXT,
    is_public INTEGER NOT NULL DEFAULT 1,
    valid_at TEXT NOT NULL,
    checked_at TEXT NOT NULL,
    changed_at TEXT NOT NULL,
    PRIMARY KEY (location_id, source)
);

CREATE TABLE IF NOT EXISTS availability_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    location_id BLOB NOT NULL REFERENCES locations(id),
    source TEXT NOT NULL,
    checked_at TEXT NOT NULL,
    valid_at TEXT,
    changed_at TEXT,
    available TEXT,
    available_count INTEGER,
    products TEXT,
    doses TEXT,
    capacity TEXT,
    slots TEXT,
    meta TEXT,
    is_public INTEGER
);
CREATE INDEX IF NOT EXISTS idx_availability_log_location ON availability_log(location_id, source, checked_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_sqlite_timestamps_are_fixed_width() {
        let a = ts(datetime!(2021-05-14 06:00:00 UTC)).unwrap();
        let b = ts(datetime!(2021-05-14 06:00:00.5 UTC)).unwrap();
        let c = ts(datetime!(2021-05-14 08:00:00 +02:00)).unwrap();
        assert_eq!(a, "2021-05-14T06:00:00.000000Z");
        assert_eq!(b, "2021-05-14T06:00:00.500000Z");
        assert_eq!(c, a);
        assert!(a < b);
    }

    #[test]
    fn test_sqlite_timestamps_drop_nanoseconds() {
        let t = ts(datetime!(2021-05-14 06:00:00.123456789 UTC)).unwrap();
        assert_eq!(t, "2021-05-14T06:00:00.123456Z");
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("univaf.db"), None)
            .await
            .unwrap();
        store.migrate().await.unwrap();
        store.health_check().await.unwrap();
    }
}
