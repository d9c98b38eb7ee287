//! Program configuration
//!
//! Loaded from an optional JSON file named by `CRONWATCH_CONFIG`, then
//! overridden by environment variables:
//!
//! - CRONWATCH_COMMAND: shell command to run each tick
//! - CRONWATCH_INTERVAL: pause between runs, `0` runs once (default: 0)
//! - CRONWATCH_LIFETIME: stop after this long
//! - CRONWATCH_JOB_TIMEOUT: stop waiting for a run after this long
//! - CRONWATCH_SINK_PATH: failure log (default: a new temporary file)
//! - CRONWATCH_SINK_POLICY: `terminate` or `stderr`
//! - CRONWATCH_SMTP, CRONWATCH_MAIL_FROM, CRONWATCH_MAIL_TO (comma separated),
//!   CRONWATCH_MAIL_SUBJECT: mail alerts, enabled by CRONWATCH_SMTP
//! - CRONWATCH_NOTIFY_ADDR, CRONWATCH_NOTIFY_MSG, CRONWATCH_NOTIFY_TIMEOUT:
//!   browser notifications, enabled by CRONWATCH_NOTIFY_ADDR
//!
//! Durations accept `250ms`, `30s`, `5m`, `1h` or a bare number of seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::alerts::{
    AlertCoordinator, AlertSink, BrowserConfig, BrowserNotifier, MailConfig, MailNotifier,
    SinkConfig, SinkFailurePolicy,
};
use crate::scheduler::Schedule;

const DEFAULT_NOTIFY_MSG: &str = "cronwatch reminder";

/// Everything the host program needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub mail: Option<MailConfig>,
    #[serde(default)]
    pub browser: Option<BrowserConfig>,
    #[serde(default)]
    pub sink: SinkConfig,
    /// Shell command run as the job
    #[serde(default)]
    pub command: Option<String>,
}

impl WatchConfig {
    /// Load from the process environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `env` to look up variables
    pub fn from_lookup<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match env("CRONWATCH_CONFIG") {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(&env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let duration = |key: &'static str| -> Result<Option<Duration>, ConfigError> {
            env(key)
                .map(|v| parse_duration(&v).map_err(|reason| ConfigError::invalid(key, reason)))
                .transpose()
        };

        if let Some(command) = env("CRONWATCH_COMMAND") {
            self.command = Some(command);
        }
        if let Some(interval) = duration("CRONWATCH_INTERVAL")? {
            self.schedule.interval = interval;
        }
        if let Some(lifetime) = duration("CRONWATCH_LIFETIME")? {
            self.schedule.lifetime = Some(lifetime);
        }
        if let Some(timeout) = duration("CRONWATCH_JOB_TIMEOUT")? {
            self.schedule.job_timeout = Some(timeout);
        }

        if let Some(path) = env("CRONWATCH_SINK_PATH") {
            self.sink.path = Some(PathBuf::from(path));
        }
        if let Some(policy) = env("CRONWATCH_SINK_POLICY") {
            self.sink.on_failure = match policy.trim().to_ascii_lowercase().as_str() {
                "terminate" => SinkFailurePolicy::Terminate,
                "stderr" => SinkFailurePolicy::Stderr,
                other => {
                    return Err(ConfigError::invalid(
                        "CRONWATCH_SINK_POLICY",
                        format!("unknown policy {:?}", other),
                    ))
                }
            };
        }

        if let Some(smtp) = env("CRONWATCH_SMTP") {
            let mail = self
                .mail
                .get_or_insert_with(|| MailConfig::new(smtp.clone(), String::new()));
            mail.smtp = smtp;
        }
        if let Some(mail) = self.mail.as_mut() {
            if let Some(from) = env("CRONWATCH_MAIL_FROM") {
                mail.from = from;
            }
            if let Some(to) = env("CRONWATCH_MAIL_TO") {
                mail.to = to
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
            if let Some(subject) = env("CRONWATCH_MAIL_SUBJECT") {
                mail.subject = subject;
            }
        }

        if let Some(addr) = env("CRONWATCH_NOTIFY_ADDR") {
            let browser = self
                .browser
                .get_or_insert_with(|| BrowserConfig::new(addr.clone(), DEFAULT_NOTIFY_MSG));
            browser.addr = addr;
        }
        if let Some(browser) = self.browser.as_mut() {
            if let Some(message) = env("CRONWATCH_NOTIFY_MSG") {
                browser.message = message;
            }
            if let Some(timeout) = duration("CRONWATCH_NOTIFY_TIMEOUT")? {
                browser.timeout = Some(timeout);
            }
        }

        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(mail) = &self.mail {
            if mail.from.trim().is_empty() {
                return Err(ConfigError::Missing("mail sender (CRONWATCH_MAIL_FROM)"));
            }
            if mail.to.is_empty() {
                return Err(ConfigError::Missing("mail recipients (CRONWATCH_MAIL_TO)"));
            }
        }
        if let (Some(lifetime), false) = (self.schedule.lifetime, self.schedule.is_run_once()) {
            if lifetime.is_zero() {
                return Err(ConfigError::invalid("lifetime", "must be greater than zero"));
            }
        }
        Ok(())
    }

    /// Build the alert pipeline described by this configuration
    pub fn coordinator(&self) -> AlertCoordinator {
        let mut coordinator = AlertCoordinator::new(AlertSink::from_config(&self.sink))
            .with_sink_policy(self.sink.on_failure);
        if let Some(mail) = &self.mail {
            coordinator = coordinator.with_mail(MailNotifier::new(mail.clone()));
        }
        if let Some(browser) = &self.browser {
            coordinator = coordinator.with_browser(BrowserNotifier::new(browser.clone()));
        }
        coordinator
    }
}

/// Parse `250ms`, `30s`, `5m`, `1h` or bare seconds; fractions are allowed
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    let (number, unit_secs, per_unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1.0, 1000.0)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1.0, 1.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60.0, 1.0)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600.0, 1.0)
    } else {
        (s, 1.0, 1.0)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration {:?}", input))?;
    Duration::try_from_secs_f64(value * unit_secs / per_unit)
        .map_err(|_| format!("invalid duration {:?}", input))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("missing {0}")]
    Missing(&'static str),
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}
