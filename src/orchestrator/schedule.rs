//! Wall-clock triggers and the unattended scheduling loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveTime, Utc, Weekday};
use log::{info, warn};

use crate::schema::{ArtifactMode, ScheduleConfig};

use super::{Orchestrator, RunOutcome};

/// Next instant strictly after `after` at time-of-day `at` (UTC).
pub fn next_daily(after: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = after.date_naive().and_time(at).and_utc();
    if today > after {
        today
    } else {
        let tomorrow = after.date_naive() + Days::new(1);
        tomorrow.and_time(at).and_utc()
    }
}

/// Next instant strictly after `after` on `weekday` at `at` (UTC).
pub fn next_weekly(after: DateTime<Utc>, weekday: Weekday, at: NaiveTime) -> DateTime<Utc> {
    let today = after.date_naive();
    let ahead = (7 + weekday.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
    let candidate = (today + Days::new(u64::from(ahead))).and_time(at).and_utc();
    if candidate > after {
        candidate
    } else {
        (today + Days::new(u64::from(ahead) + 7))
            .and_time(at)
            .and_utc()
    }
}

/// The next trigger after `after`. When the daily and weekly triggers fall
/// on the same instant only the weekly one fires.
pub fn next_trigger(after: DateTime<Utc>, config: &ScheduleConfig) -> (DateTime<Utc>, ArtifactMode) {
    let daily = next_daily(after, config.daily_at);
    let weekly = next_weekly(after, config.weekly_on, config.weekly_at);
    if weekly <= daily {
        (weekly, ArtifactMode::Weekly)
    } else {
        (daily, ArtifactMode::Daily)
    }
}

/// Drives an orchestrator from the wall clock until stopped.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            stop: Arc::new(AtomicBool::new(false)),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Handle that stops the loop when set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Fire triggers as they come due, each on its own thread.
    ///
    /// Returns once the stop flag is set and in-flight runs have finished.
    pub fn run_until_stopped<C>(&self, clock: C)
    where
        C: Fn() -> DateTime<Utc>,
    {
        let config = self.orchestrator.config().schedule.clone();
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let (mut due, mut mode) = next_trigger(clock(), &config);
        info!("Next trigger: {} at {}", mode, due);

        while !self.stop.load(Ordering::Relaxed) {
            let now = clock();
            if now >= due {
                handles.retain(|h| !h.is_finished());
                handles.push(self.fire(mode));
                (due, mode) = next_trigger(due, &config);
                info!("Next trigger: {} at {}", mode, due);
                continue;
            }
            thread::sleep(self.poll_interval);
        }

        for handle in handles {
            if handle.join().is_err() {
                warn!("A scheduled run panicked");
            }
        }
    }

    fn fire(&self, mode: ArtifactMode) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        thread::spawn(move || {
            let report = orchestrator.run(mode);
            match &report.outcome {
                RunOutcome::Rejected => {
                    warn!("{} trigger rejected: previous {} run still in progress", mode, mode)
                }
                outcome => info!("{} run finished: {:?}", mode, outcome),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{InMemoryProvider, MemorySink};
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_next_daily() {
        let before = Utc.with_ymd_and_hms(2026, 3, 4, 1, 0, 0).unwrap();
        assert_eq!(
            next_daily(before, at(3, 0)),
            Utc.with_ymd_and_hms(2026, 3, 4, 3, 0, 0).unwrap()
        );
        let exactly = Utc.with_ymd_and_hms(2026, 3, 4, 3, 0, 0).unwrap();
        assert_eq!(
            next_daily(exactly, at(3, 0)),
            Utc.with_ymd_and_hms(2026, 3, 5, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_weekly() {
        // 2026-03-04 is a Wednesday.
        let wed = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
        assert_eq!(
            next_weekly(wed, Weekday::Sun, at(4, 0)),
            Utc.with_ymd_and_hms(2026, 3, 8, 4, 0, 0).unwrap()
        );
        let sunday_late = Utc.with_ymd_and_hms(2026, 3, 8, 5, 0, 0).unwrap();
        assert_eq!(
            next_weekly(sunday_late, Weekday::Sun, at(4, 0)),
            Utc.with_ymd_and_hms(2026, 3, 15, 4, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_daily_before_weekly_on_sunday() {
        let config = ScheduleConfig::default();
        let sat_night = Utc.with_ymd_and_hms(2026, 3, 7, 23, 0, 0).unwrap();
        let (due, mode) = next_trigger(sat_night, &config);
        assert_eq!(mode, ArtifactMode::Daily);
        assert_eq!(due, Utc.with_ymd_and_hms(2026, 3, 8, 3, 0, 0).unwrap());

        let (due, mode) = next_trigger(due, &config);
        assert_eq!(mode, ArtifactMode::Weekly);
        assert_eq!(due, Utc.with_ymd_and_hms(2026, 3, 8, 4, 0, 0).unwrap());
    }

    #[test]
    fn test_stop_handle_ends_loop() {
        let orchestrator = Orchestrator::new(
            crate::schema::EngineConfig::default(),
            Arc::new(InMemoryProvider::new()),
            Arc::new(MemorySink::new()),
        )
        .unwrap();
        let scheduler =
            Scheduler::new(Arc::new(orchestrator)).with_poll_interval(Duration::from_millis(5));
        let stop = scheduler.stop_handle();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stop.store(true, Ordering::Relaxed);
        });

        // Frozen clock: no trigger ever comes due.
        let frozen = Utc.with_ymd_and_hms(2026, 3, 4, 1, 0, 0).unwrap();
        scheduler.run_until_stopped(|| frozen);
        stopper.join().unwrap();
    }

    #[test]
    fn test_coinciding_triggers_fire_weekly_only() {
        let config = ScheduleConfig {
            weekly_at: at(3, 0),
            ..Default::default()
        };
        let sat_night = Utc.with_ymd_and_hms(2026, 3, 7, 23, 0, 0).unwrap();
        let (due, mode) = next_trigger(sat_night, &config);
        assert_eq!(mode, ArtifactMode::Weekly);

        // The daily slot at the same instant is consumed.
        let (next_due, next_mode) = next_trigger(due, &config);
        assert_eq!(next_mode, ArtifactMode::Daily);
        assert_eq!(next_due, Utc.with_ymd_and_hms(2026, 3, 9, 3, 0, 0).unwrap());
    }
}
