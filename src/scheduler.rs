//! Cron-driven daemon loop.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::ConfigError;
use crate::pipeline::Pipeline;

pub fn parse_schedule(expr: &str) -> Result<Schedule, ConfigError> {
    Schedule::from_str(expr).map_err(|e| ConfigError::InvalidValue {
        key: "CV_INTAKE_SCHEDULE".into(),
        message: format!("invalid cron: {e}"),
    })
}

/// Next fire time strictly after `after`.
pub fn next_fire(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Run `run_daily` at every fire time until Ctrl-C.
///
/// A failed batch is logged (and alerted by the pipeline) and the loop
/// waits for the next fire time.
pub async fn run_daemon(pipeline: Arc<Pipeline>, schedule: Schedule) {
    loop {
        let Some(next) = next_fire(&schedule, Utc::now()) else {
            tracing::warn!("Schedule has no upcoming fire times, stopping");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tracing::info!(next = %next, wait_secs = wait.as_secs(), "Next pipeline run scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                return;
            }
        }

        if let Err(e) = pipeline.run_daily().await {
            tracing::error!(error = %e, "Scheduled run failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daily_schedule_fires_next_morning() {
        let schedule = parse_schedule("0 0 7 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        assert_eq!(
            next_fire(&schedule, now),
            Some(Utc.with_ymd_and_hms(2026, 3, 3, 7, 0, 0).unwrap())
        );
    }

    #[test]
    fn invalid_schedule_is_config_error() {
        assert!(matches!(
            parse_schedule("not a cron"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
