//! SQLite aggregate store implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Reads (list endpoints) do not block monitor task writes
//! - **Connection pooling**: Shared by all monitor tasks
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Layout
//!
//! The logical per-user aggregate is split into `users`, `watches`, `history` and
//! `alerts` tables. URL snapshots inside history/alert rows are stored as JSON.
//! Counter updates are `UPDATE ... WHERE version = ?` inside the same transaction as
//! the history/alert inserts, so one tick is applied completely or not at all.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{AggregateStore, HealthStatus, InsertOutcome, Retention, TickUpdate};
use super::error::{StorageError, StorageResult};
use crate::{AlertEvent, MonitoringAggregate, ProbeRecord, UrlSnapshot, UserId, WatchedUrl};

/// SQLite aggregate store
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
    retention: Retention,
}

impl SqliteBackend {
    /// Open (or create) the database and run migrations
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use httpmon::storage::{Retention, sqlite::SqliteBackend};
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./httpmon.db", Retention::default()).await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>, retention: Retention) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
            retention,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            StorageError::SerializationError(format!("timestamp out of range: {millis}"))
        })
    }

    fn watch_from_row(row: &SqliteRow) -> StorageResult<WatchedUrl> {
        Ok(WatchedUrl {
            url: row.try_get("url")?,
            threshold: row.try_get::<i64, _>("threshold")? as u32,
            consecutive_failures: row.try_get::<i64, _>("failed")? as u32,
            success_count: row.try_get::<i64, _>("succeeded")? as u64,
            version: row.try_get::<i64, _>("version")? as u64,
        })
    }

    fn record_from_row(row: &SqliteRow) -> StorageResult<ProbeRecord> {
        let snapshot: String = row.try_get("url_snapshot")?;

        Ok(ProbeRecord {
            url: serde_json::from_str(&snapshot)?,
            status_code: row
                .try_get::<Option<i64>, _>("status_code")?
                .map(|code| code as u16),
            requested_at: Self::millis_to_timestamp(row.try_get("requested_at")?)?,
            error: row.try_get("error")?,
        })
    }

    async fn fetch_log(
        &self,
        table: &'static str,
        user_id: &UserId,
    ) -> StorageResult<Vec<ProbeRecord>> {
        let sql = format!(
            "SELECT url_snapshot, status_code, requested_at, error FROM {table} \
             WHERE user_id = ? ORDER BY id ASC"
        );

        sqlx::query(&sql)
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(Self::record_from_row)
            .collect()
    }

    async fn insert_log_entry(
        conn: &mut SqliteConnection,
        table: &'static str,
        user_id: &UserId,
        snapshot: &UrlSnapshot,
        status_code: Option<u16>,
        requested_at: &DateTime<Utc>,
        error: Option<&str>,
    ) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO {table} (user_id, url, url_snapshot, status_code, requested_at, error) \
             VALUES (?, ?, ?, ?, ?, ?)"
        );

        sqlx::query(&sql)
            .bind(user_id.as_str())
            .bind(&snapshot.url)
            .bind(serde_json::to_string(snapshot)?)
            .bind(status_code.map(i64::from))
            .bind(Self::timestamp_to_millis(requested_at))
            .bind(error)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl AggregateStore for SqliteBackend {
    #[instrument(skip(self), fields(user = %user_id))]
    async fn load_aggregate(&self, user_id: &UserId) -> StorageResult<MonitoringAggregate> {
        let known: Option<(String,)> = sqlx::query_as("SELECT user_id FROM users WHERE user_id = ?")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        if known.is_none() {
            return Err(StorageError::NotFound(user_id.to_string()));
        }

        let urls = sqlx::query(
            r#"
            SELECT url, threshold, failed, succeeded, version
            FROM watches
            WHERE user_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(Self::watch_from_row)
        .collect::<StorageResult<Vec<_>>>()?;

        let history = self.fetch_log("history", user_id).await?;
        let alerts = self
            .fetch_log("alerts", user_id)
            .await?
            .into_iter()
            .map(AlertEvent::from)
            .collect();

        Ok(MonitoringAggregate {
            user_id: user_id.clone(),
            urls,
            history,
            alerts,
        })
    }

    async fn load_watch(&self, user_id: &UserId, url: &str) -> StorageResult<Option<WatchedUrl>> {
        sqlx::query(
            r#"
            SELECT url, threshold, failed, succeeded, version
            FROM watches
            WHERE user_id = ? AND url = ?
            "#,
        )
        .bind(user_id.as_str())
        .bind(url)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(Self::watch_from_row)
        .transpose()
    }

    #[instrument(skip(self))]
    async fn list_all_watches(&self) -> StorageResult<Vec<(UserId, WatchedUrl)>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, url, threshold, failed, succeeded, version
            FROM watches
            ORDER BY user_id ASC, position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let watches = rows
            .iter()
            .map(|row| {
                let user_id: String = row.try_get("user_id")?;
                Ok((UserId::new(user_id), Self::watch_from_row(row)?))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        debug!("found {} persisted watches", watches.len());
        Ok(watches)
    }

    #[instrument(skip(self))]
    async fn insert_watch(
        &self,
        user_id: &UserId,
        url: &str,
        threshold: u32,
        max_urls: usize,
    ) -> StorageResult<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT OR IGNORE INTO users (user_id, created_at) VALUES (?, ?)")
            .bind(user_id.as_str())
            .bind(Self::timestamp_to_millis(&Utc::now()))
            .execute(&mut *tx)
            .await?;

        let (count, last_position, duplicates): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(MAX(position), -1),
                   COALESCE(SUM(CASE WHEN url = ? THEN 1 ELSE 0 END), 0)
            FROM watches
            WHERE user_id = ?
            "#,
        )
        .bind(url)
        .bind(user_id.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if duplicates > 0 {
            return Ok(InsertOutcome::Duplicate);
        }

        if count as usize >= max_urls {
            return Ok(InsertOutcome::QuotaExceeded);
        }

        sqlx::query(
            r#"
            INSERT INTO watches (user_id, url, threshold, failed, succeeded, version, position)
            VALUES (?, ?, ?, 0, 0, 0, ?)
            "#,
        )
        .bind(user_id.as_str())
        .bind(url)
        .bind(i64::from(threshold))
        .bind(last_position + 1)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(InsertOutcome::Inserted(WatchedUrl::new(url, threshold)))
    }

    #[instrument(skip(self))]
    async fn remove_watch(&self, user_id: &UserId, url: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM watches WHERE user_id = ? AND url = ?")
            .bind(user_id.as_str())
            .bind(url)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, update), fields(user = %update.user_id, url = %update.url))]
    async fn append_probe_and_update_counters(&self, update: &TickUpdate) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE watches
            SET failed = ?, succeeded = ?, version = version + 1
            WHERE user_id = ? AND url = ? AND version = ?
            "#,
        )
        .bind(i64::from(update.counters.consecutive_failures))
        .bind(update.counters.success_count as i64)
        .bind(update.user_id.as_str())
        .bind(&update.url)
        .bind(update.expected_version as i64)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let current: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM watches WHERE user_id = ? AND url = ?")
                    .bind(update.user_id.as_str())
                    .bind(&update.url)
                    .fetch_optional(&mut *tx)
                    .await?;

            // dropping the transaction rolls it back
            return Err(match current {
                Some((actual,)) => StorageError::VersionConflict {
                    url: update.url.clone(),
                    expected: update.expected_version,
                    actual: actual as u64,
                },
                None => StorageError::WatchNotFound {
                    user_id: update.user_id.to_string(),
                    url: update.url.clone(),
                },
            });
        }

        let record = &update.record;
        Self::insert_log_entry(
            &mut tx,
            "history",
            &update.user_id,
            &record.url,
            record.status_code,
            &record.requested_at,
            record.error.as_deref(),
        )
        .await?;

        if let Some(limit) = self.retention.max_history_per_user {
            sqlx::query(
                r#"
                DELETE FROM history
                WHERE user_id = ? AND id <= (
                    SELECT id FROM history WHERE user_id = ?
                    ORDER BY id DESC LIMIT 1 OFFSET ?
                )
                "#,
            )
            .bind(update.user_id.as_str())
            .bind(update.user_id.as_str())
            .bind(limit as i64)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(alert) = &update.alert {
            Self::insert_log_entry(
                &mut tx,
                "alerts",
                &update.user_id,
                &alert.url,
                alert.status_code,
                &alert.requested_at,
                alert.error.as_deref(),
            )
            .await?;
        }

        tx.commit().await?;

        Ok(update.expected_version + 1)
    }

    #[instrument(skip(self, alert), fields(user = %user_id))]
    async fn append_alert(&self, user_id: &UserId, alert: AlertEvent) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;

        let known: Option<(String,)> = sqlx::query_as("SELECT user_id FROM users WHERE user_id = ?")
            .bind(user_id.as_str())
            .fetch_optional(&mut *conn)
            .await?;

        if known.is_none() {
            return Err(StorageError::NotFound(user_id.to_string()));
        }

        Self::insert_log_entry(
            &mut conn,
            "alerts",
            user_id,
            &alert.url,
            alert.status_code,
            &alert.requested_at,
            alert.error.as_deref(),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite backend operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
