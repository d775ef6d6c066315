//! Cron scheduler.
//!
//! One task per job, fire times computed in the project timezone. A
//! one-hour misfire grace runs a missed job exactly once at startup,
//! driven by the persisted per-job watermark; a job instance never
//! overlaps itself (the same-entity sync locks also guard the data paths
//! underneath).

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use tracing::{info, warn};

use galley_db::{sched_watermark_get, sched_watermark_set};
use galley_flows::FlowDeps;
use galley_schemas::SyncTrigger;

pub const MISFIRE_GRACE: ChronoDuration = ChronoDuration::hours(1);

/// Cron expressions (sec min hour dom mon dow), evaluated in the project
/// timezone.
pub const DAILY_CHAIN_CRON: &str = "0 0 7 * * *";
pub const EVENING_REPORT_CRON: &str = "0 0 22 * * *";
pub const NEGATIVE_TRANSFER_CRON: &str = "0 0 23 * * *";
pub const WRITEOFF_SWEEP_CRON: &str = "0 30 * * * *";

type JobFn = Arc<
    dyn Fn(Arc<FlowDeps>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
>;

pub struct Job {
    pub name: &'static str,
    pub cron: &'static str,
    run: JobFn,
}

impl Job {
    fn new<F, Fut>(name: &'static str, cron: &'static str, run: F) -> Self
    where
        F: Fn(Arc<FlowDeps>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name,
            cron,
            run: Arc::new(move |deps| Box::pin(run(deps))),
        }
    }
}

pub fn standard_jobs() -> Vec<Job> {
    vec![
        Job::new("daily_chain", DAILY_CHAIN_CRON, |deps| async move {
            galley_flows::jobs::run_daily_chain(&deps, SyncTrigger::Schedule).await
        }),
        Job::new("evening_report", EVENING_REPORT_CRON, |deps| async move {
            galley_flows::jobs::run_evening_stoplist_report(&deps).await
        }),
        Job::new("negative_transfer", NEGATIVE_TRANSFER_CRON, |deps| async move {
            galley_flows::transfer::run_negative_transfer(&deps).await
        }),
        Job::new("writeoff_sweep", WRITEOFF_SWEEP_CRON, |deps| async move {
            galley_flows::jobs::sweep_expired_writeoffs(&deps).await.map(|_| ())
        }),
    ]
}

/// Decide whether a missed fire should run now: the most recent scheduled
/// fire is within the grace window and newer than the last recorded run.
pub fn misfire_due(
    now: DateTime<Utc>,
    last_fire_before_now: Option<DateTime<Utc>>,
    watermark: Option<DateTime<Utc>>,
) -> bool {
    let Some(fire) = last_fire_before_now else {
        return false;
    };
    if now - fire > MISFIRE_GRACE {
        return false;
    }
    match watermark {
        Some(w) => w < fire,
        None => true,
    }
}

/// Most recent scheduled fire time strictly before `now`, if any fire
/// falls inside the grace lookback.
fn previous_fire(schedule: &Schedule, tz: chrono_tz::Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lookback = (now - MISFIRE_GRACE).with_timezone(&tz);
    schedule
        .after(&lookback)
        .map(|t| t.with_timezone(&Utc))
        .take_while(|t| *t < now)
        .last()
}

/// Spawn one scheduling task per job; returns immediately.
pub fn spawn_scheduler(deps: Arc<FlowDeps>, jobs: Vec<Job>) -> Result<()> {
    let tz = deps.clock.tz();

    for job in jobs {
        let schedule =
            Schedule::from_str(job.cron).with_context(|| format!("bad cron for {}", job.name))?;
        let deps = Arc::clone(&deps);
        let name = job.name;
        let run = Arc::clone(&job.run);

        tokio::spawn(async move {
            // Misfire grace: catch up one missed fire from before boot.
            match sched_watermark_get(&deps.pool, name).await {
                Ok(watermark) => {
                    let now = deps.clock.now_utc();
                    let prev = previous_fire(&schedule, tz, now);
                    if misfire_due(now, prev, watermark) {
                        info!(job = name, "running missed fire within grace window");
                        execute(&deps, name, &run).await;
                    }
                }
                Err(e) => warn!(job = name, error = %e, "watermark read failed"),
            }

            loop {
                let now_local = deps.clock.now();
                let Some(next) = schedule.after(&now_local).next() else {
                    warn!(job = name, "schedule yields no future fires; stopping");
                    return;
                };
                let wait = (next.with_timezone(&Utc) - deps.clock.now_utc())
                    .to_std()
                    .unwrap_or_default();
                tokio::time::sleep(wait).await;

                execute(&deps, name, &run).await;
            }
        });
    }

    Ok(())
}

async fn execute(deps: &Arc<FlowDeps>, name: &'static str, run: &JobFn) {
    let started = deps.clock.now_utc();
    info!(job = name, "job started");

    if let Err(e) = run(Arc::clone(deps)).await {
        warn!(job = name, error = %e, "job failed");
    }
    if let Err(e) = sched_watermark_set(&deps.pool, name, started).await {
        warn!(job = name, error = %e, "watermark write failed");
    }

    info!(job = name, "job finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn missed_fire_within_grace_and_unrun_is_due()  {
        // Fired 07:00, process booted 07:40, never run.
        assert!(misfire_due(
            t("2025-03-14T05:40:00Z"),
            Some(t("2025-03-14T05:00:00Z")),
            None
        ));
    }

    #[test]
    fn fire_outside_grace_is_skipped() {
        assert!(!misfire_due(
            t("2025-03-14T07:30:00Z"),
            Some(t("2025-03-14T05:00:00Z")),
            None
        ));
    }

    #[test]
    fn already_run_fire_is_not_repeated() {
        assert!(!misfire_due(
            t("2025-03-14T05:40:00Z"),
            Some(t("2025-03-14T05:00:00Z")),
            Some(t("2025-03-14T05:01:00Z"))
        ));
    }

    #[test]
    fn standard_cron_expressions_parse() {
        for job in standard_jobs() {
            assert!(Schedule::from_str(job.cron).is_ok(), "{}", job.name);
        }
    }

    #[test]
    fn previous_fire_finds_recent_daily_fire() {
        let schedule = Schedule::from_str(DAILY_CHAIN_CRON).unwrap();
        let tz = chrono_tz::Europe::Kaliningrad;
        // 07:20 local = 05:20 UTC; the 07:00 local fire was 20 min ago.
        let now = t("2025-03-14T05:20:00Z");
        let prev = previous_fire(&schedule, tz, now).unwrap();
        assert_eq!(prev, t("2025-03-14T05:00:00Z"));
    }

    #[test]
    fn previous_fire_empty_when_no_fire_in_lookback() {
        let schedule = Schedule::from_str(DAILY_CHAIN_CRON).unwrap();
        let tz = chrono_tz::Europe::Kaliningrad;
        // Midday: the 07:00 fire is far outside the one-hour lookback.
        let now = t("2025-03-14T10:00:00Z");
        assert_eq!(previous_fire(&schedule, tz, now), None);
    }
}
