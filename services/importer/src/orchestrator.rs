//! Per-issuance job state machine.
//!
//! A job is one `(model, issuance)` pair. Entering `Running` requires a
//! claim on the job's row in the [`JobStore`]; the outcome of the run
//! re-arms the row with a `next_run_at` that the scheduler tick picks up.
//!
//! ```text
//! ScheduledRetry ──claim──▶ Running ──ok──▶ Succeeded
//!        ▲                    │
//!        └──── fail (≤ cap) ──┤
//!                             └── fail (> cap) ──▶ ScheduledLongRetry
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use forecast_common::{IssuanceTime, Model};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::ImporterConfig;
use crate::error::ImportResult;
use crate::pipeline::Pipeline;
use crate::planner::{plan, PlanRequest};
use crate::state::JobStore;
use crate::tiles::TilePool;

/// Identity of one ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub model: Model,
    pub issuance: IssuanceTime,
}

impl JobKey {
    pub fn new(model: Model, issuance: IssuanceTime) -> Self {
        Self { model, issuance }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.model, self.issuance)
    }
}

/// Persisted job state. A failed run is a transition into one of the
/// scheduled states, never a resting state of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Succeeded,
    ScheduledRetry,
    ScheduledLongRetry,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::ScheduledRetry => "scheduled_retry",
            JobState::ScheduledLongRetry => "scheduled_long_retry",
        }
    }

    /// Unknown values read back as a due retry.
    pub fn from_db(value: &str) -> Self {
        match value {
            "running" => JobState::Running,
            "succeeded" => JobState::Succeeded,
            "scheduled_long_retry" => JobState::ScheduledLongRetry,
            _ => JobState::ScheduledRetry,
        }
    }

    /// Attempt counter carried into a new `Running` entry from this state.
    pub fn entry_attempt(&self, stored: u32) -> u32 {
        match self {
            JobState::ScheduledLongRetry | JobState::Succeeded => 0,
            JobState::Running | JobState::ScheduledRetry => stored,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a failed job goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rearm {
    pub state: JobState,
    pub attempt: u32,
    pub next_run_at: DateTime<Utc>,
}

/// Cool-down rules for failed runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Failures tolerated on the short cool-down before switching to the long one.
    pub attempt_cap: u32,
    pub short_cooldown_secs: u64,
    pub long_cooldown_secs: u64,
    /// A `running` row older than this is considered abandoned and re-armed.
    pub max_run_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_cap: 15,
            short_cooldown_secs: 3 * 60,
            long_cooldown_secs: 30 * 60 * 60,
            max_run_secs: 6 * 60 * 60,
        }
    }
}

impl RetryPolicy {
    pub fn max_run(&self) -> Duration {
        seconds(self.max_run_secs)
    }

    /// Re-arm after a failure of the run that entered with `attempt`.
    pub fn on_failure(&self, attempt: u32, now: DateTime<Utc>) -> Rearm {
        let attempt = attempt.saturating_add(1);
        if attempt <= self.attempt_cap {
            Rearm {
                state: JobState::ScheduledRetry,
                attempt,
                next_run_at: now + seconds(self.short_cooldown_secs),
            }
        } else {
            Rearm {
                state: JobState::ScheduledLongRetry,
                attempt,
                next_run_at: now + seconds(self.long_cooldown_secs),
            }
        }
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}

/// Result of one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { staged: usize, skipped: usize },
    Rearmed(Rearm),
    /// Another run holds the claim.
    AlreadyRunning,
}

#[derive(Debug, Default, Clone, Copy)]
struct RunSummary {
    staged: usize,
    skipped: usize,
}

pub struct Orchestrator {
    config: Arc<ImporterConfig>,
    store: Arc<JobStore>,
    pipeline: Pipeline,
    pool: Arc<TilePool>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<ImporterConfig>,
        store: Arc<JobStore>,
        pipeline: Pipeline,
        pool: Arc<TilePool>,
    ) -> Self {
        Self {
            config,
            store,
            pipeline,
            pool,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<TilePool> {
        &self.pool
    }

    pub fn config(&self) -> &ImporterConfig {
        &self.config
    }

    /// Claim the job, run it and record the outcome.
    ///
    /// A failed run is reported as [`JobOutcome::Rearmed`]. Store errors are
    /// returned; when the outcome cannot be written the row is re-armed as a
    /// retry instead, and failing that it is left for
    /// [`JobStore::recover_stale`].
    #[instrument(skip(self), fields(job = %key))]
    pub async fn launch(&self, key: JobKey) -> ImportResult<JobOutcome> {
        let Some(attempt) = self.store.claim(&key, Utc::now()).await? else {
            warn!("Job already running, entry refused");
            metrics::counter!("importer_jobs_refused_total", "model" => key.model.as_str())
                .increment(1);
            return Ok(JobOutcome::AlreadyRunning);
        };
        info!(attempt, "Job started");

        let result = self.run(key).await;
        let now = Utc::now();
        let (outcome, recorded) = match result {
            Ok(summary) => {
                info!(
                    staged = summary.staged,
                    skipped = summary.skipped,
                    "Job succeeded"
                );
                metrics::counter!(
                    "importer_jobs_total",
                    "model" => key.model.as_str(),
                    "outcome" => "succeeded"
                )
                .increment(1);
                (
                    JobOutcome::Succeeded {
                        staged: summary.staged,
                        skipped: summary.skipped,
                    },
                    self.store.record_success(&key, now).await,
                )
            }
            Err(e) => {
                let rearm = self.config.retry.on_failure(attempt, now);
                error!(
                    error = %e,
                    kind = e.kind(),
                    attempt = rearm.attempt,
                    next_state = %rearm.state,
                    next_run_at = %rearm.next_run_at,
                    "Job failed"
                );
                metrics::counter!(
                    "importer_jobs_total",
                    "model" => key.model.as_str(),
                    "outcome" => "failed"
                )
                .increment(1);
                let recorded = self
                    .store
                    .record_failure(&key, &rearm, &e.to_string(), now)
                    .await;
                (JobOutcome::Rearmed(rearm), recorded)
            }
        };

        match recorded {
            Ok(()) => Ok(outcome),
            Err(store_err) => {
                error!(error = %store_err, "Failed to record job outcome, re-arming as retry");
                let rearm = self.config.retry.on_failure(attempt, now);
                if let Err(e) = self
                    .store
                    .record_failure(&key, &rearm, &store_err.to_string(), now)
                    .await
                {
                    error!(error = %e, "Re-arm failed, job left for stale recovery");
                }
                Err(store_err)
            }
        }
    }

    /// Plan and process every descriptor in order, handing staged units to
    /// the tile pool. The pool is not awaited.
    async fn run(&self, key: JobKey) -> ImportResult<RunSummary> {
        let settings = self.config.model(key.model);
        let descriptors = plan(&PlanRequest {
            model: key.model,
            issuance: key.issuance,
            forecast_step: self.config.forecast_step,
            max_forecast_step: self.config.max_forecast_step,
            parameters: &settings.parameters,
            gfs_url: &self.config.gfs_url,
        })?;
        info!(descriptors = descriptors.len(), "Planned job");

        let mut summary = RunSummary::default();
        for descriptor in &descriptors {
            match self.pipeline.process(key.model, key.issuance, descriptor).await {
                Ok(unit) => {
                    self.pool.submit(unit);
                    summary.staged += 1;
                }
                Err(e) if e.is_soft() => {
                    warn!(
                        parameter = %descriptor.parameter,
                        step = descriptor.step,
                        error = %e,
                        "No tile produced"
                    );
                    summary.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use field_decoder::{DecodeResult, FieldDecoder};
    use forecast_common::{FieldSelector, Parameter, RasterGrid};
    use test_utils::constant_grid;

    use crate::config::ModelSettings;
    use crate::download::Fetch;
    use crate::error::ImportError;
    use crate::pipeline::StagedUnit;
    use crate::planner::FetchSpec;
    use crate::tiles::TileGenerator;

    fn key() -> JobKey {
        JobKey::new(Model::Gfs, IssuanceTime::parse("20240301", "00").unwrap())
    }

    #[test]
    fn test_job_key_display() {
        assert_eq!(key().to_string(), "gfs/2024030100");
    }

    #[test]
    fn test_fifteen_failures_stay_short() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        let mut attempt = 0;
        for _ in 0..15 {
            let rearm = policy.on_failure(attempt, now);
            assert_eq!(rearm.state, JobState::ScheduledRetry);
            assert_eq!(rearm.next_run_at, now + Duration::minutes(3));
            attempt = rearm.state.entry_attempt(rearm.attempt);
        }
        assert_eq!(attempt, 15);

        let rearm = policy.on_failure(attempt, now);
        assert_eq!(rearm.state, JobState::ScheduledLongRetry);
        assert_eq!(rearm.next_run_at, now + Duration::hours(30));
        assert_eq!(rearm.state.entry_attempt(rearm.attempt), 0);
    }

    #[test]
    fn test_state_round_trips_through_db_text() {
        for state in [
            JobState::Running,
            JobState::Succeeded,
            JobState::ScheduledRetry,
            JobState::ScheduledLongRetry,
        ] {
            assert_eq!(JobState::from_db(state.as_str()), state);
        }
        assert_eq!(JobState::from_db("failed"), JobState::ScheduledRetry);
    }

    struct FlakyFetcher {
        fail: bool,
    }

    #[async_trait]
    impl Fetch for FlakyFetcher {
        async fn fetch(&self, spec: &FetchSpec, dest: &Path) -> ImportResult<()> {
            if self.fail {
                return Err(ImportError::retrieval(spec.to_string(), "HTTP status 503"));
            }
            std::fs::write(dest, b"grib")?;
            Ok(())
        }
    }

    struct FixedDecoder;

    impl FieldDecoder for FixedDecoder {
        fn read_field(&self, _path: &Path, _selector: FieldSelector) -> DecodeResult<Option<RasterGrid>> {
            Ok(Some(constant_grid(4, 2, 55.0)))
        }
    }

    struct CountingGenerator(AtomicUsize);

    #[async_trait]
    impl TileGenerator for CountingGenerator {
        async fn generate(&self, _unit: &StagedUnit) -> ImportResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn orchestrator(
        dir: &Path,
        fail: bool,
    ) -> (Orchestrator, Arc<CountingGenerator>) {
        let mut config = ImporterConfig {
            tiles_path: dir.join("tiles"),
            temp_dir: dir.join("tmp"),
            max_forecast_step: 6,
            ..ImporterConfig::default()
        };
        config.models.gfs = ModelSettings {
            enabled: true,
            parameters: vec![Parameter::Humidity],
        };

        let store = Arc::new(JobStore::open_memory().await.unwrap());
        let generator = Arc::new(CountingGenerator(AtomicUsize::new(0)));
        let pool = Arc::new(TilePool::new(generator.clone(), 2));
        let pipeline = Pipeline::new(
            Arc::new(FlakyFetcher { fail }),
            Arc::new(FixedDecoder),
            config.temp_dir.clone(),
            config.tiles_path.clone(),
        );
        (
            Orchestrator::new(Arc::new(config), store, pipeline, pool),
            generator,
        )
    }

    #[tokio::test]
    async fn test_successful_run_submits_every_step() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, generator) = orchestrator(dir.path(), false).await;

        let outcome = orch.launch(key()).await.unwrap();
        assert_eq!(outcome, JobOutcome::Succeeded { staged: 2, skipped: 0 });

        orch.pool().drain().await;
        assert_eq!(generator.0.load(Ordering::SeqCst), 2);

        let record = orch.store().get(&key()).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_run_is_rearmed_and_counts_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, generator) = orchestrator(dir.path(), true).await;

        let JobOutcome::Rearmed(first) = orch.launch(key()).await.unwrap() else {
            panic!("expected a rearm");
        };
        assert_eq!(first.state, JobState::ScheduledRetry);
        assert_eq!(first.attempt, 1);

        // Re-entry does not wait for the cool-down when launched directly
        let JobOutcome::Rearmed(second) = orch.launch(key()).await.unwrap() else {
            panic!("expected a rearm");
        };
        assert_eq!(second.attempt, 2);
        assert_eq!(generator.0.load(Ordering::SeqCst), 0);

        let record = orch.store().get(&key()).await.unwrap().unwrap();
        assert!(record.last_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_unrecorded_success_rearms_job() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, _) = orchestrator(dir.path(), false).await;
        orch.store()
            .execute_raw(
                "CREATE TRIGGER reject_success BEFORE UPDATE OF state ON jobs \
                 WHEN NEW.state = 'succeeded' BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
            )
            .await
            .unwrap();

        assert!(orch.launch(key()).await.is_err());

        let record = orch.store().get(&key()).await.unwrap().unwrap();
        assert_eq!(record.state, JobState::ScheduledRetry);
        assert_eq!(record.attempt, 1);
        let retry_at = Utc::now() + Duration::minutes(3);
        assert_eq!(orch.store().due(retry_at).await.unwrap(), vec![key()]);
    }

    #[tokio::test]
    async fn test_second_entry_is_refused_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let (orch, _) = orchestrator(dir.path(), false).await;

        orch.store().claim(&key(), Utc::now()).await.unwrap();
        assert_eq!(orch.launch(key()).await.unwrap(), JobOutcome::AlreadyRunning);
    }
}
