//! Alert channels for failed runs
//!
//! A durable log that always gets the failure, plus optional mail and
//! browser notifications whose own failures land in the log too.

pub mod browser;
pub mod config;
pub mod coordinator;
pub mod mail;
pub mod sink;

pub use browser::{BrowserError, BrowserNotifier, SystemOpener, UrlOpener};
pub use config::{BrowserConfig, MailConfig, SinkConfig, SinkFailurePolicy};
pub use coordinator::{AlertCoordinator, AlertEvent, MAIL_TIMEOUT};
pub use mail::{Envelope, MailError, MailNotifier, MailTransport, SmtpTransport};
pub use sink::{AlertSink, SinkError};
