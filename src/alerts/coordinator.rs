//! Failure fan-out
//!
//! For every failed run the coordinator tries the browser, records the
//! failure, then tries mail under a time budget. Anything that goes wrong on
//! the way is recorded in the sink as well; only a sink failure can make it
//! out of here.

use std::sync::Arc;
use std::time::Duration;

use super::browser::{BrowserError, BrowserNotifier};
use super::config::SinkFailurePolicy;
use super::mail::{MailError, MailNotifier};
use super::sink::{AlertSink, SinkError};

/// Upper bound on how long a failed run waits for mail delivery
pub const MAIL_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything that ends up as a line in the failure log
#[derive(Debug, thiserror::Error)]
pub enum AlertEvent {
    /// The job's own error
    #[error("{0}")]
    JobFailure(String),

    #[error("job did not finish within {0:?}")]
    JobTimeout(Duration),

    #[error("skipped run: previous run still in progress")]
    SkippedOverlap,

    #[error("could not start notification endpoint: {0}")]
    EndpointFailure(#[source] BrowserError),

    #[error("could not open notification: {0}")]
    BrowserFailure(#[source] BrowserError),

    #[error("could not send mail alert {message:?}: {source}")]
    MailFailure {
        message: String,
        #[source]
        source: MailError,
    },

    /// Mail did not finish within the budget; distinct from a failure
    #[error("timed out sending mail alert {0:?}")]
    MailTimeout(String),
}

/// Coordinates the alert channels for failed runs
#[derive(Debug)]
pub struct AlertCoordinator {
    sink: Arc<AlertSink>,
    browser: Option<BrowserNotifier>,
    mail: Option<MailNotifier>,
    mail_timeout: Duration,
    policy: SinkFailurePolicy,
}

impl AlertCoordinator {
    /// Create a coordinator that only writes to `sink`
    pub fn new(sink: AlertSink) -> Self {
        Self {
            sink: Arc::new(sink),
            browser: None,
            mail: None,
            mail_timeout: MAIL_TIMEOUT,
            policy: SinkFailurePolicy::default(),
        }
    }

    pub fn with_browser(mut self, browser: BrowserNotifier) -> Self {
        self.browser = Some(browser);
        self
    }

    pub fn with_mail(mut self, mail: MailNotifier) -> Self {
        self.mail = Some(mail);
        self
    }

    pub fn with_mail_timeout(mut self, timeout: Duration) -> Self {
        self.mail_timeout = timeout;
        self
    }

    pub fn with_sink_policy(mut self, policy: SinkFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn sink(&self) -> &Arc<AlertSink> {
        &self.sink
    }

    pub fn browser(&self) -> Option<&BrowserNotifier> {
        self.browser.as_ref()
    }

    /// One-time setup before the first run: pin the sink location and start
    /// the notification page. An endpoint that cannot start is recorded and
    /// left stopped, so every later browser send fails and is recorded too.
    pub async fn prepare(&mut self) -> Result<(), SinkError> {
        if let Err(err) = self.sink.resolve() {
            self.escalate(err, "could not resolve alert file")?;
        }

        if let Some(browser) = self.browser.as_mut() {
            if let Err(e) = browser.start().await {
                tracing::warn!(error = %e, "Notification endpoint failed to start");
                let event = AlertEvent::EndpointFailure(e);
                self.record(&event)?;
            }
        }
        Ok(())
    }

    /// Fan a job failure out to every configured channel.
    ///
    /// Record order per event: browser failure, job failure, mail failure or
    /// timeout. Returns an error only when the sink cannot be written and the
    /// policy is `Terminate`.
    pub async fn notify(&self, failure: &str) -> Result<(), SinkError> {
        if let Some(browser) = &self.browser {
            if let Err(e) = browser.send(failure).await {
                tracing::warn!(error = %e, "Browser notification failed");
                self.record(&AlertEvent::BrowserFailure(e))?;
            }
        }

        self.record(&AlertEvent::JobFailure(failure.to_string()))?;

        if let Some(mail) = &self.mail {
            self.dispatch_mail(mail, failure).await?;
        }
        Ok(())
    }

    /// Race mail delivery against the budget.
    ///
    /// The delivery task is never aborted. If the timer wins, the handle is
    /// dropped and whatever the task returns later goes nowhere, so each
    /// event gets at most one mail record.
    async fn dispatch_mail(&self, mail: &MailNotifier, failure: &str) -> Result<(), SinkError> {
        let message = mail.render(failure);
        let mut delivery = tokio::spawn(mail.send(failure));

        let outcome = tokio::select! {
            joined = &mut delivery => match joined {
                Ok(Ok(())) => None,
                Ok(Err(source)) => Some(AlertEvent::MailFailure { message, source }),
                Err(e) => Some(AlertEvent::MailFailure {
                    message,
                    source: MailError::Aborted(e.to_string()),
                }),
            },
            _ = tokio::time::sleep(self.mail_timeout) => {
                tracing::warn!(timeout = ?self.mail_timeout, "Mail alert timed out");
                Some(AlertEvent::MailTimeout(message))
            }
        };

        match outcome {
            Some(event) => {
                if let AlertEvent::MailFailure { source, .. } = &event {
                    tracing::warn!(error = %source, "Mail alert failed");
                }
                self.record(&event)
            }
            None => {
                tracing::debug!("Mail alert sent");
                Ok(())
            }
        }
    }

    /// Append an event to the sink, applying the sink failure policy
    pub fn record(&self, event: &AlertEvent) -> Result<(), SinkError> {
        let text = event.to_string();
        match self.sink.append(&text) {
            Ok(()) => Ok(()),
            Err(err) => self.escalate(err, &text),
        }
    }

    fn escalate(&self, err: SinkError, lost: &str) -> Result<(), SinkError> {
        tracing::error!(error = %err, record = %lost, "Alert sink unavailable");
        match self.policy {
            SinkFailurePolicy::Terminate => Err(err),
            SinkFailurePolicy::Stderr => {
                eprintln!("cronwatch: {}: {}", err, lost);
                Ok(())
            }
        }
    }
}
