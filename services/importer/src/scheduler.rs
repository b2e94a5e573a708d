//! Daily triggers, the janitor clock and the due-job tick.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use forecast_common::{Cycle, IssuanceTime};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::hhmm;
use crate::janitor;
use crate::orchestrator::{JobKey, JobOutcome, Orchestrator};

/// A daily trigger: at `at` (UTC) import `cycle` of the date `latency_minutes` ago.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(with = "hhmm")]
    pub at: NaiveTime,
    pub cycle: Cycle,
    pub latency_minutes: i64,
}

impl TriggerConfig {
    fn new(hour: u32, minute: u32, cycle: Cycle, latency_minutes: i64) -> Self {
        Self {
            at: NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN),
            cycle,
            latency_minutes,
        }
    }

    pub fn issuance(&self, now: DateTime<Utc>) -> IssuanceTime {
        IssuanceTime::from_latency(now, Duration::minutes(self.latency_minutes), self.cycle)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub triggers: Vec<TriggerConfig>,
    #[serde(with = "hhmm")]
    pub janitor_at: NaiveTime,
    pub tick_millis: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            triggers: vec![
                TriggerConfig::new(4, 25, Cycle::H18, 10 * 60 + 25),
                TriggerConfig::new(10, 55, Cycle::H00, 10 * 60 + 55),
                TriggerConfig::new(16, 25, Cycle::H06, 10 * 60 + 25),
                TriggerConfig::new(22, 55, Cycle::H12, 10 * 60 + 55),
            ],
            janitor_at: NaiveTime::from_hms_opt(3, 5, 0).unwrap_or(NaiveTime::MIN),
            tick_millis: 1000,
        }
    }
}

/// Fires at most once per UTC day, on the first poll at or after `at`.
#[derive(Debug, Clone)]
pub struct DailyClock {
    at: NaiveTime,
    last_fired: Option<NaiveDate>,
}

impl DailyClock {
    /// A clock created after today's firing time waits for tomorrow.
    pub fn new(at: NaiveTime, now: DateTime<Utc>) -> Self {
        let last_fired = (now.time() >= at).then(|| now.date_naive());
        Self { at, last_fired }
    }

    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if now.time() >= self.at && self.last_fired != Some(today) {
            self.last_fired = Some(today);
            true
        } else {
            false
        }
    }
}

pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Tick until `shutdown` fires. Jobs are spawned, never awaited.
    pub async fn run_forever(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let config = self.orchestrator.config();
        let now = Utc::now();
        let mut triggers: Vec<(TriggerConfig, DailyClock)> = config
            .schedule
            .triggers
            .iter()
            .map(|t| (t.clone(), DailyClock::new(t.at, now)))
            .collect();
        let mut janitor_clock = DailyClock::new(config.schedule.janitor_at, now);
        let tick = StdDuration::from_millis(config.schedule.tick_millis.max(10));

        info!(
            triggers = triggers.len(),
            janitor_at = %config.schedule.janitor_at,
            "Scheduler started"
        );

        loop {
            let now = Utc::now();

            for (trigger, clock) in triggers.iter_mut() {
                if clock.poll(now) {
                    let issuance = trigger.issuance(now);
                    info!(cycle = %trigger.cycle, issuance = %issuance, "Trigger fired");
                    for model in config.enabled_models() {
                        self.spawn_job(JobKey::new(model, issuance));
                    }
                }
            }

            if janitor_clock.poll(now) {
                self.spawn_janitor();
            }

            let max_run = config.retry.max_run();
            if let Err(e) = self.orchestrator.store().recover_stale(now, max_run).await {
                warn!(error = %e, "Failed to re-arm stale jobs");
            }

            match self.orchestrator.store().due(now).await {
                Ok(due) => {
                    for key in due {
                        debug!(job = %key, "Re-entering due job");
                        self.spawn_job(key);
                    }
                }
                Err(e) => warn!(error = %e, "Failed to read due jobs"),
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Shutting down scheduler");
                    break;
                }
                _ = tokio::time::sleep(tick) => {}
            }
        }

        Ok(())
    }

    fn spawn_job(&self, key: JobKey) {
        spawn_job(self.orchestrator.clone(), key);
    }

    fn spawn_janitor(&self) {
        let config = self.orchestrator.config();
        let root = config.tiles_path.clone();
        let models = config.enabled_models();
        let days = config.retention_days;

        tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || janitor::sweep_models(&root, &models, days))
                .await
            {
                // sweep_models owns the summary log and the deletion counter
                Ok(_) => {}
                Err(e) => error!(error = %e, "Janitor task panicked"),
            }
        });
    }
}

/// Launch a job in the background and log its outcome.
pub fn spawn_job(orchestrator: Arc<Orchestrator>, key: JobKey) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match orchestrator.launch(key).await {
            Ok(JobOutcome::AlreadyRunning) => {}
            Ok(outcome) => debug!(job = %key, outcome = ?outcome, "Job finished"),
            Err(e) => error!(job = %key, error = %e, "Job store error"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, hh, mm, 0).unwrap()
    }

    #[test]
    fn test_clock_fires_once_per_day() {
        let janitor = NaiveTime::from_hms_opt(3, 5, 0).unwrap();
        let mut clock = DailyClock::new(janitor, at(2024, 3, 1, 1, 0));

        assert!(!clock.poll(at(2024, 3, 1, 3, 4)));
        assert!(clock.poll(at(2024, 3, 1, 3, 5)));
        assert!(!clock.poll(at(2024, 3, 1, 3, 6)));
        assert!(!clock.poll(at(2024, 3, 1, 23, 59)));
        assert!(clock.poll(at(2024, 3, 2, 3, 5)));
    }

    #[test]
    fn test_clock_created_late_waits_for_tomorrow() {
        let janitor = NaiveTime::from_hms_opt(3, 5, 0).unwrap();
        let mut clock = DailyClock::new(janitor, at(2024, 3, 1, 12, 0));

        assert!(!clock.poll(at(2024, 3, 1, 12, 1)));
        assert!(clock.poll(at(2024, 3, 2, 4, 0)));
    }

    #[test]
    fn test_default_triggers() {
        let schedule = ScheduleConfig::default();
        let cycles: Vec<Cycle> = schedule.triggers.iter().map(|t| t.cycle).collect();
        assert_eq!(cycles, vec![Cycle::H18, Cycle::H00, Cycle::H06, Cycle::H12]);
        assert_eq!(schedule.janitor_at, NaiveTime::from_hms_opt(3, 5, 0).unwrap());
    }

    #[test]
    fn test_trigger_issuance_uses_latency_date() {
        let schedule = ScheduleConfig::default();

        // 04:25 fires for the previous day's 18z run
        let early = &schedule.triggers[0];
        assert_eq!(
            early.issuance(at(2024, 3, 2, 4, 25)),
            IssuanceTime::parse("20240301", "18").unwrap()
        );

        // 10:55 fires for the same day's 00z run
        let midday = &schedule.triggers[1];
        assert_eq!(
            midday.issuance(at(2024, 3, 2, 10, 55)),
            IssuanceTime::parse("20240302", "00").unwrap()
        );

        let late = &schedule.triggers[3];
        assert_eq!(
            late.issuance(at(2024, 1, 1, 22, 55)),
            IssuanceTime::parse("20240101", "12").unwrap()
        );
    }
}
