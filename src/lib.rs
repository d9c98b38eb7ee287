//! Cronwatch: run a job periodically and make sure its failures are seen
//!
//! Every failed run is appended to a local log file, which is always
//! available, and optionally announced by mail and through a browser
//! notification. Failures of those channels are logged too, so nothing is
//! dropped silently.
//!
//! # Features
//!
//! - **Fixed-interval scheduling**: run once, or every interval until a lifetime passes
//! - **Durable failure log**: append-only, falls back to a temporary file
//! - **Browser notifications**: a local page that raises a desktop notification
//! - **Mail alerts**: plain SMTP, bounded to ten seconds per failure
//! - **Job timeouts**: optional, with overlapping runs skipped
//!
//! # Example
//!
//! ```no_run
//! use cronwatch::alerts::{AlertCoordinator, AlertSink, BrowserConfig, BrowserNotifier};
//! use cronwatch::scheduler::{Schedule, Scheduler};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = AlertCoordinator::new(AlertSink::temporary()).with_browser(
//!     BrowserNotifier::new(BrowserConfig::new("localhost:8082", "Sync reminder")),
//! );
//!
//! // Run once, leave the page up for a while, then exit.
//! let schedule = Schedule::every(Duration::from_secs(60)).with_lifetime(Duration::from_secs(30));
//! let job = || Err::<(), _>("remember to sync the photo backup");
//!
//! Scheduler::new(schedule, job, coordinator).run().await?;
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod api;
pub mod config;
pub mod job;
pub mod scheduler;

// Re-export commonly used types
pub use alerts::{AlertCoordinator, AlertEvent, AlertSink, SinkError};
pub use config::{ConfigError, WatchConfig};
pub use job::CommandJob;
pub use scheduler::{Job, JobError, Schedule, Scheduler, SchedulerError};
