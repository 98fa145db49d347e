//! Cron-driven timing for background jobs.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;

/// Time to wait until the schedule's next fire, plus up to `max_jitter`
/// of random delay. `None` if the schedule never fires again.
pub fn next_delay(schedule: &cron::Schedule, max_jitter: Duration) -> Option<Duration> {
    let next = schedule.upcoming(Utc).next()?;
    let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Some(wait + jitter(max_jitter))
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
}
