//! Periodic job runner
//!
//! Runs the job once per tick, hands failures to the [`AlertCoordinator`],
//! sleeps for the interval and stops when the lifetime has passed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::alerts::config::{duration_serde, option_duration_serde};
use crate::alerts::{AlertCoordinator, AlertEvent, AlertSink, SinkError};

/// Error type jobs report failures with
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// A unit of work run once per tick
pub trait Job: Send + 'static {
    fn run(&mut self) -> Result<(), JobError>;
}

impl<F, E> Job for F
where
    F: FnMut() -> Result<(), E> + Send + 'static,
    E: Into<JobError>,
{
    fn run(&mut self) -> Result<(), JobError> {
        self().map_err(Into::into)
    }
}

/// When and for how long to run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Pause between runs; zero runs the job exactly once
    #[serde(default, with = "duration_serde")]
    pub interval: Duration,
    /// Stop once this much time has passed since the scheduler started
    #[serde(default, with = "option_duration_serde")]
    pub lifetime: Option<Duration>,
    /// Give up waiting for a run after this long; the run keeps going in the
    /// background and later ticks are skipped until it ends
    #[serde(default, with = "option_duration_serde")]
    pub job_timeout: Option<Duration>,
}

impl Schedule {
    /// Run exactly once
    pub fn once() -> Self {
        Self::default()
    }

    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn is_run_once(&self) -> bool {
        self.interval.is_zero()
    }
}

/// Result of one job execution
#[derive(Debug)]
enum Outcome {
    Succeeded,
    Failed(String),
    /// A timed-out run from an earlier tick is still going
    Skipped,
}

/// Periodic job runner
pub struct Scheduler<J> {
    schedule: Schedule,
    job: Arc<Mutex<J>>,
    /// Set while a run is executing on the blocking pool
    running: Arc<AtomicBool>,
    coordinator: AlertCoordinator,
}

impl<J: Job> Scheduler<J> {
    pub fn new(schedule: Schedule, job: J, coordinator: AlertCoordinator) -> Self {
        Self {
            schedule,
            job: Arc::new(Mutex::new(job)),
            running: Arc::new(AtomicBool::new(false)),
            coordinator,
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// The failure log, shared with the coordinator
    pub fn sink(&self) -> Arc<AlertSink> {
        Arc::clone(self.coordinator.sink())
    }

    /// Run until the schedule says stop.
    ///
    /// Job failures never come back out of here; they go to the alert
    /// channels. The only error is an alert sink that cannot be written while
    /// the sink policy is `Terminate`, after which no further runs happen.
    pub async fn run(mut self) -> Result<(), SchedulerError> {
        self.coordinator.prepare().await?;

        let started = Instant::now();
        tracing::info!(
            interval = ?self.schedule.interval,
            lifetime = ?self.schedule.lifetime,
            "Scheduler started"
        );

        let mut ticks: u64 = 0;
        loop {
            ticks += 1;
            self.tick(ticks).await?;

            if self.schedule.is_run_once() {
                break;
            }
            tokio::time::sleep(self.schedule.interval).await;

            if let Some(lifetime) = self.schedule.lifetime {
                if started.elapsed() > lifetime {
                    tracing::info!(elapsed = ?started.elapsed(), "Scheduler lifetime reached");
                    break;
                }
            }
        }

        tracing::info!(ticks, "Scheduler stopped");
        Ok(())
    }

    async fn tick(&self, tick: u64) -> Result<(), SinkError> {
        match self.execute().await {
            Outcome::Succeeded => {
                tracing::debug!(tick, "Job succeeded");
            }
            Outcome::Failed(failure) => {
                tracing::warn!(tick, error = %failure, "Job failed");
                self.coordinator.notify(&failure).await?;
            }
            Outcome::Skipped => {
                tracing::warn!(tick, "Previous run still in progress, skipping");
                self.coordinator.record(&AlertEvent::SkippedOverlap)?;
            }
        }
        Ok(())
    }

    async fn execute(&self) -> Outcome {
        if self.running.swap(true, Ordering::SeqCst) {
            return Outcome::Skipped;
        }

        // Runs on the blocking pool so the page server and mail tasks keep going.
        let job = Arc::clone(&self.job);
        let running = Arc::clone(&self.running);
        let handle = tokio::task::spawn_blocking(move || {
            let _running = RunningGuard(running);
            job.lock().run()
        });

        let joined = match self.schedule.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => return Outcome::Failed(AlertEvent::JobTimeout(limit).to_string()),
            },
            None => handle.await,
        };

        match joined {
            Ok(Ok(())) => Outcome::Succeeded,
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(e) => Outcome::Failed(format!("job panicked: {}", e)),
        }
    }
}

/// Clears the running flag when a run ends, panics included
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Scheduler errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("alert sink unavailable, no fallback left: {0}")]
    Unrecoverable(#[from] SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{AlertSink, SinkFailurePolicy};
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn records(path: &Path) -> Vec<String> {
        match std::fs::read_to_string(path) {
            Ok(content) => content.lines().map(|l| l[20..].to_string()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// A job that counts its runs and fails with `error` when set
    fn counting_job(
        error: Option<&'static str>,
    ) -> (Arc<AtomicUsize>, impl FnMut() -> Result<(), &'static str> + Send + 'static) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let job = move || {
            counter.fetch_add(1, Ordering::SeqCst);
            match error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        };
        (calls, job)
    }

    #[test]
    fn test_schedule_json() {
        let schedule: Schedule =
            serde_json::from_str(r#"{"interval": {"secs": 60}, "lifetime": {"secs": 30}}"#)
                .unwrap();
        assert_eq!(
            schedule,
            Schedule::every(Duration::from_secs(60)).with_lifetime(Duration::from_secs(30))
        );

        let schedule: Schedule = serde_json::from_str("{}").unwrap();
        assert!(schedule.is_run_once());
        assert!(schedule.lifetime.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_once_with_temporary_sink() {
        let (calls, job) = counting_job(Some("disk full"));
        let scheduler = Scheduler::new(
            Schedule::once(),
            job,
            AlertCoordinator::new(AlertSink::temporary()),
        );
        let sink = scheduler.sink();

        let started = Instant::now();
        scheduler.run().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);

        let path = sink.path().unwrap();
        assert_eq!(records(&path), vec!["disk full"]);
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifetime_shorter_than_interval_runs_once() {
        let dir = TempDir::new().unwrap();
        let (calls, job) = counting_job(None);
        let scheduler = Scheduler::new(
            Schedule::every(Duration::from_secs(60)).with_lifetime(Duration::from_secs(30)),
            job,
            AlertCoordinator::new(AlertSink::new(dir.path().join("alerts.log"))),
        );

        let started = Instant::now();
        scheduler.run().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifetime_measured_from_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.log");
        let (calls, job) = counting_job(Some("disk full"));
        let scheduler = Scheduler::new(
            Schedule::every(Duration::from_secs(10)).with_lifetime(Duration::from_secs(35)),
            job,
            AlertCoordinator::new(AlertSink::new(&path)),
        );

        scheduler.run().await.unwrap();

        // Runs at 0s, 10s, 20s, 30s; the check after the 40s wake-up stops it.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(records(&path), vec!["disk full"; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.log");
        let (calls, job) = counting_job(None);
        let scheduler = Scheduler::new(
            Schedule::every(Duration::from_secs(1)).with_lifetime(Duration::from_millis(2500)),
            job,
            AlertCoordinator::new(AlertSink::new(&path)),
        );

        scheduler.run().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(records(&path).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_stops_scheduler() {
        let dir = TempDir::new().unwrap();
        let (calls, job) = counting_job(Some("disk full"));
        let scheduler = Scheduler::new(
            Schedule::every(Duration::from_secs(1)),
            job,
            AlertCoordinator::new(AlertSink::new(dir.path().join("nope").join("alerts.log"))),
        );

        let err = scheduler.run().await.unwrap_err();
        assert!(matches!(err, SchedulerError::Unrecoverable(SinkError::Open { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_degraded_keeps_running() {
        let dir = TempDir::new().unwrap();
        let (calls, job) = counting_job(Some("disk full"));
        let scheduler = Scheduler::new(
            Schedule::every(Duration::from_secs(1)).with_lifetime(Duration::from_millis(1500)),
            job,
            AlertCoordinator::new(AlertSink::new(dir.path().join("nope").join("alerts.log")))
                .with_sink_policy(SinkFailurePolicy::Stderr),
        );

        scheduler.run().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_job_timeout_then_skip_overlap() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.log");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let job = move || -> Result<(), JobError> {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        };

        let scheduler = Scheduler::new(
            Schedule::every(Duration::from_millis(100))
                .with_lifetime(Duration::from_millis(220))
                .with_job_timeout(Duration::from_millis(50)),
            job,
            AlertCoordinator::new(AlertSink::new(&path)),
        );
        scheduler.run().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            records(&path),
            vec![
                "job did not finish within 50ms",
                "skipped run: previous run still in progress",
            ]
        );
    }

    #[tokio::test]
    async fn test_page_served_while_job_runs() {
        use crate::alerts::browser::tests::RecordingOpener;
        use crate::alerts::{BrowserConfig, BrowserNotifier};

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.log");
        let opener = Arc::new(RecordingOpener::default());
        let browser = BrowserNotifier::with_opener(
            BrowserConfig::new("127.0.0.1:0", "Reminder"),
            opener.clone(),
        );
        let mut coordinator = AlertCoordinator::new(AlertSink::new(&path)).with_browser(browser);
        coordinator.prepare().await.unwrap();
        let url = coordinator.browser().and_then(|b| b.url()).unwrap();

        let job = || -> Result<(), JobError> {
            std::thread::sleep(Duration::from_secs(1));
            Err("disk full".into())
        };

        let fetch = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let started = Instant::now();
            let response = reqwest::get(&url).await.unwrap();
            (response.status(), started.elapsed())
        });

        Scheduler::new(Schedule::once(), job, coordinator)
            .run()
            .await
            .unwrap();

        let (status, took) = fetch.await.unwrap();
        assert_eq!(status, reqwest::StatusCode::OK);
        assert!(took < Duration::from_millis(500), "page took {:?}", took);
        assert_eq!(opener.opened.lock().len(), 1);
        assert_eq!(records(&path), vec!["disk full"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_job_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.log");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let job = move || -> Result<(), JobError> {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("boom");
            }
            Ok(())
        };

        let scheduler = Scheduler::new(
            Schedule::every(Duration::from_millis(10)).with_lifetime(Duration::from_millis(15)),
            job,
            AlertCoordinator::new(AlertSink::new(&path)),
        );
        scheduler.run().await.unwrap();

        // The second tick runs again instead of being skipped.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let lines = records(&path);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("job panicked"));
    }

    #[tokio::test]
    async fn test_job_timeout_not_reached() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alerts.log");
        let (calls, job) = counting_job(Some("disk full"));
        let scheduler = Scheduler::new(
            Schedule::once().with_job_timeout(Duration::from_secs(5)),
            job,
            AlertCoordinator::new(AlertSink::new(&path)),
        );

        scheduler.run().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(records(&path), vec!["disk full"]);
    }
}
