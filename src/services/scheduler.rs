//! Background timers
//!
//! Fixed-period loops (the catalog staleness poll) and wall-clock cron
//! schedules evaluated in the display zone (the daily EPG refresh).

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use lazy_static::lazy_static;
use std::future::Future;
use std::ops::ControlFlow;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};

/// Every day at 03:00
pub const DEFAULT_EPG_REFRESH_CRON: &str = "0 0 3 * * *";

lazy_static! {
    static ref DEFAULT_SCHEDULE: Schedule = Schedule::from_str(DEFAULT_EPG_REFRESH_CRON).unwrap();
}

/// Parse a six/seven-field cron expression, falling back to the daily default
pub fn parse_schedule(expression: &str) -> Schedule {
    match Schedule::from_str(expression) {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::warn!(
                "Invalid cron expression '{}': {} - using '{}'",
                expression,
                e,
                DEFAULT_EPG_REFRESH_CRON
            );
            DEFAULT_SCHEDULE.clone()
        }
    }
}

/// Next fire time strictly after `now`, with the schedule read in `tz`
pub fn next_fire_after(schedule: &Schedule, tz: Tz, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&now.with_timezone(&tz))
        .next()
        .map(|at| at.with_timezone(&Utc))
}

/// Run `job` every `period`. The first run happens one full period after
/// the call. Returning `Break` ends the loop.
pub async fn run_every<F, Fut>(period: Duration, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ControlFlow<()>>,
{
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        if job().await.is_break() {
            break;
        }
    }
}

/// Run `job` at every fire time of `schedule` in `tz`, until it returns `Break`
/// or the schedule has no further fire times.
pub async fn run_on_schedule<F, Fut>(schedule: Schedule, tz: Tz, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ControlFlow<()>>,
{
    loop {
        let now = Utc::now();
        let Some(next) = next_fire_after(&schedule, tz, now) else {
            tracing::warn!("Schedule has no upcoming fire times, stopping");
            return;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tracing::debug!("Next scheduled run at {} (in {}s)", next, wait.as_secs());

        time::sleep(wait).await;
        if job().await.is_break() {
            return;
        }
    }
}
