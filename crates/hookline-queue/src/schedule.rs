//! Recurring jobs driven by cron expressions.
//!
//! Each firing enqueues an independent job whose dedupe key is derived from
//! the schedule name and firing time, so several instances running the same
//! schedule produce one job per firing between them.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use hookline_config::MaintenanceSchedule;
use hookline_core::job::{JobKind, JobOptions, Priority, QueueName};
use serde_json::json;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::manager::QueueManager;
use crate::{QueueError, QueueResult};

/// Parse a cron expression. Classic five-field expressions
/// (minute hour day-of-month month day-of-week) fire at second zero.
pub fn parse_cron(expression: &str) -> QueueResult<Schedule> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| QueueError::InvalidCron {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

pub(crate) fn dedupe_key(name: &str, fire_at: DateTime<Utc>) -> String {
    format!("schedule:{}:{}", name, fire_at.timestamp())
}

/// One registered recurring schedule.
#[derive(Debug, Clone)]
pub(crate) struct Recurring {
    pub name: String,
    pub queue: QueueName,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub schedule: Schedule,
}

impl Recurring {
    /// Sleep until each firing and enqueue it, until shutdown or close.
    pub async fn run(self, manager: QueueManager, mut shutdown: watch::Receiver<bool>) {
        info!(schedule = %self.name, queue = %self.queue, kind = %self.kind, "Recurring schedule started");

        loop {
            let Some(fire_at) = self.schedule.after(&Utc::now()).next() else {
                info!(schedule = %self.name, "Schedule has no further firings");
                break;
            };
            let wait = (fire_at - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                _ = sleep(wait) => {}
                _ = shutdown.changed() => break,
            }

            let options = JobOptions::default()
                .with_priority(Priority::Low)
                .with_dedupe_key(dedupe_key(&self.name, fire_at));
            match manager
                .enqueue(self.queue, self.kind, self.payload.clone(), options)
                .await
            {
                Ok(job) => debug!(schedule = %self.name, job_id = %job.id, %fire_at, "Recurring job enqueued"),
                Err(QueueError::Closed) => break,
                Err(e) => error!(schedule = %self.name, error = %e, "Failed to enqueue recurring job"),
            }
        }
    }
}

/// Register every maintenance schedule on the maintenance queue.
pub async fn register_maintenance(
    manager: &QueueManager,
    schedules: &[MaintenanceSchedule],
) -> QueueResult<()> {
    for schedule in schedules {
        let payload = json!({
            "graceHours": schedule.grace_hours,
            "retainDays": schedule.retain_days,
        });
        manager
            .enqueue_recurring(
                QueueName::Maintenance,
                schedule.kind,
                payload,
                &schedule.cron,
                schedule.kind.as_str(),
            )
            .await?;
    }
    Ok(())
}
