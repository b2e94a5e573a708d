//! Job state persistence using SQLite with sqlx.
//!
//! One row per `(model, issuance_date, cycle)`. The row doubles as the
//! in-flight marker: moving it to `running` is a compare-and-swap on the
//! previously observed state, so two launches of the same job cannot both
//! win the claim.

use std::path::Path;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use forecast_common::{Cycle, IssuanceTime, Model};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, warn};

use crate::error::ImportResult;
use crate::orchestrator::{JobKey, JobState, Rearm};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    model TEXT NOT NULL,
    issuance_date TEXT NOT NULL,
    cycle INTEGER NOT NULL,
    state TEXT NOT NULL,
    attempt INTEGER NOT NULL DEFAULT 0,
    next_run_at INTEGER,
    claimed_at INTEGER,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (model, issuance_date, cycle)
)
"#;

/// A persisted job row.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub model: Model,
    pub issuance: IssuanceTime,
    pub state: JobState,
    pub attempt: u32,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: String,
}

impl JobRecord {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.model, self.issuance)
    }
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobStats {
    pub running: u64,
    pub succeeded: u64,
    pub scheduled_retry: u64,
    pub scheduled_long_retry: u64,
}

type JobRow = (String, String, i64, String, i64, Option<i64>, Option<String>, String);

/// Persistent job store.
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open or create the job database at the given path.
    pub async fn open(path: &Path) -> ImportResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::migrate(&pool).await?;
        info!(path = %path.display(), "Opened job store");
        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> ImportResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> ImportResult<()> {
        sqlx::query(SCHEMA).execute(pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state, next_run_at)")
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Try to move a job into `running`, creating its row if needed.
    ///
    /// Returns the attempt counter on entry, or `None` when the job is
    /// already running. Re-entry after a long cool-down (or of a job that
    /// already succeeded) starts the counter again from zero.
    pub async fn claim(&self, key: &JobKey, now: DateTime<Utc>) -> ImportResult<Option<u32>> {
        let (model, date, cycle) = key_columns(key);
        let stamp = now.to_rfc3339();

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO jobs (model, issuance_date, cycle, state, attempt, next_run_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(model)
        .bind(&date)
        .bind(cycle)
        .bind(JobState::ScheduledRetry.as_str())
        .bind(now.timestamp())
        .bind(&stamp)
        .bind(&stamp)
        .execute(&self.pool)
        .await?;

        let (state, attempt): (String, i64) = sqlx::query_as(
            "SELECT state, attempt FROM jobs WHERE model = ? AND issuance_date = ? AND cycle = ?",
        )
        .bind(model)
        .bind(&date)
        .bind(cycle)
        .fetch_one(&self.pool)
        .await?;

        let observed = JobState::from_db(&state);
        if observed == JobState::Running {
            debug!(job = %key, "Job already running");
            return Ok(None);
        }

        let entry_attempt = observed.entry_attempt(attempt.max(0) as u32);
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, attempt = ?, next_run_at = NULL, claimed_at = ?, updated_at = ?
            WHERE model = ? AND issuance_date = ? AND cycle = ? AND state = ?
            "#,
        )
        .bind(JobState::Running.as_str())
        .bind(entry_attempt as i64)
        .bind(now.timestamp())
        .bind(&stamp)
        .bind(model)
        .bind(&date)
        .bind(cycle)
        .bind(&state)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(Some(entry_attempt))
        } else {
            debug!(job = %key, "Lost claim race");
            Ok(None)
        }
    }

    pub async fn record_success(&self, key: &JobKey, now: DateTime<Utc>) -> ImportResult<()> {
        let (model, date, cycle) = key_columns(key);
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, next_run_at = NULL, last_error = NULL, updated_at = ?
            WHERE model = ? AND issuance_date = ? AND cycle = ?
            "#,
        )
        .bind(JobState::Succeeded.as_str())
        .bind(now.to_rfc3339())
        .bind(model)
        .bind(&date)
        .bind(cycle)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_failure(
        &self,
        key: &JobKey,
        rearm: &Rearm,
        error: &str,
        now: DateTime<Utc>,
    ) -> ImportResult<()> {
        let (model, date, cycle) = key_columns(key);
        sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, attempt = ?, next_run_at = ?, last_error = ?, updated_at = ?
            WHERE model = ? AND issuance_date = ? AND cycle = ?
            "#,
        )
        .bind(rearm.state.as_str())
        .bind(rearm.attempt as i64)
        .bind(rearm.next_run_at.timestamp())
        .bind(error)
        .bind(now.to_rfc3339())
        .bind(model)
        .bind(&date)
        .bind(cycle)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Jobs whose cool-down has expired.
    pub async fn due(&self, now: DateTime<Utc>) -> ImportResult<Vec<JobKey>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT model, issuance_date, cycle FROM jobs
            WHERE state IN (?, ?) AND next_run_at <= ?
            ORDER BY next_run_at
            "#,
        )
        .bind(JobState::ScheduledRetry.as_str())
        .bind(JobState::ScheduledLongRetry.as_str())
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(model, date, cycle)| parse_key(&model, &date, cycle))
            .collect())
    }

    /// Re-arm jobs left `running` by a previous process as due retries.
    pub async fn recover_interrupted(&self, now: DateTime<Utc>) -> ImportResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?, next_run_at = ?, updated_at = ? WHERE state = ?",
        )
        .bind(JobState::ScheduledRetry.as_str())
        .bind(now.timestamp())
        .bind(now.to_rfc3339())
        .bind(JobState::Running.as_str())
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!(count = recovered, "Re-armed jobs interrupted by a restart");
        }
        Ok(recovered)
    }

    /// Re-arm `running` rows claimed more than `max_run` ago.
    ///
    /// Covers runs whose outcome was never written back: a store error
    /// after the run, or a panicked task.
    pub async fn recover_stale(&self, now: DateTime<Utc>, max_run: Duration) -> ImportResult<u64> {
        let cutoff = (now - max_run).timestamp();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, next_run_at = ?, last_error = COALESCE(last_error, 'run abandoned'), updated_at = ?
            WHERE state = ? AND (claimed_at IS NULL OR claimed_at <= ?)
            "#,
        )
        .bind(JobState::ScheduledRetry.as_str())
        .bind(now.timestamp())
        .bind(now.to_rfc3339())
        .bind(JobState::Running.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            warn!(count = recovered, "Re-armed stale running jobs");
        }
        Ok(recovered)
    }

    pub async fn get(&self, key: &JobKey) -> ImportResult<Option<JobRecord>> {
        let (model, date, cycle) = key_columns(key);
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            SELECT model, issuance_date, cycle, state, attempt, next_run_at, last_error, updated_at
            FROM jobs WHERE model = ? AND issuance_date = ? AND cycle = ?
            "#,
        )
        .bind(model)
        .bind(&date)
        .bind(cycle)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(row_to_record))
    }

    /// Most recently updated jobs first.
    pub async fn list(&self, limit: u32) -> ImportResult<Vec<JobRecord>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT model, issuance_date, cycle, state, attempt, next_run_at, last_error, updated_at
            FROM jobs ORDER BY updated_at DESC LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(row_to_record).collect())
    }

    pub async fn stats(&self) -> ImportResult<JobStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = JobStats::default();
        for (state, count) in rows {
            let count = count.max(0) as u64;
            match JobState::from_db(&state) {
                JobState::Running => stats.running += count,
                JobState::Succeeded => stats.succeeded += count,
                JobState::ScheduledRetry => stats.scheduled_retry += count,
                JobState::ScheduledLongRetry => stats.scheduled_long_retry += count,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
impl JobStore {
    pub(crate) async fn execute_raw(&self, sql: &str) -> ImportResult<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }
}

fn key_columns(key: &JobKey) -> (&'static str, String, i64) {
    (
        key.model.as_str(),
        key.issuance.date_compact(),
        i64::from(key.issuance.cycle.hour()),
    )
}

fn parse_key(model: &str, date: &str, cycle: i64) -> Option<JobKey> {
    let model = model.parse::<Model>().ok()?;
    let date = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
    let cycle = u32::try_from(cycle).ok().and_then(Cycle::from_hour)?;
    Some(JobKey::new(model, IssuanceTime::new(date, cycle)))
}

fn row_to_record(row: JobRow) -> Option<JobRecord> {
    let (model, date, cycle, state, attempt, next_run_at, last_error, updated_at) = row;
    let key = parse_key(&model, &date, cycle)?;
    Some(JobRecord {
        model: key.model,
        issuance: key.issuance,
        state: JobState::from_db(&state),
        attempt: attempt.max(0) as u32,
        next_run_at: next_run_at.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        last_error,
        updated_at,
    })
}
