//! Alert channel configuration types

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Mail channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailConfig {
    /// Subject line of every alert mail
    pub subject: String,
    /// Envelope and header sender
    pub from: String,
    /// Recipients, one RCPT per entry
    pub to: Vec<String>,
    /// SMTP relay as host:port
    pub smtp: String,
}

impl MailConfig {
    pub fn new(smtp: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            subject: "cronwatch alert".to_string(),
            from: from.into(),
            to: Vec::new(),
            smtp: smtp.into(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_recipient(mut self, rcpt: impl Into<String>) -> Self {
        self.to.push(rcpt.into());
        self
    }
}

/// Browser notification settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Listen address of the notification page; port 0 picks a free port
    pub addr: String,
    /// Title shown in the page heading and the OS notification
    pub message: String,
    /// How long the page and the notification stay up before closing themselves
    #[serde(default, with = "option_duration_serde")]
    pub timeout: Option<Duration>,
}

impl BrowserConfig {
    pub fn new(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            message: message.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// What to do when the failure log itself cannot be written
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkFailurePolicy {
    /// Stop the scheduler and hand the error to the host
    #[default]
    Terminate,
    /// Print the lost record on stderr and keep going
    Stderr,
}

/// Failure log settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Log file; a temporary file is created on first use when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub on_failure: SinkFailurePolicy,
}

/// Duration serialization helper
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    pub(super) struct DurationHelper {
        pub secs: u64,
        #[serde(default)]
        pub nanos: u32,
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        DurationHelper {
            secs: duration.as_secs(),
            nanos: duration.subsec_nanos(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let helper = DurationHelper::deserialize(deserializer)?;
        Ok(Duration::new(helper.secs, helper.nanos))
    }
}

/// Same as `duration_serde` for optional fields
pub(crate) mod option_duration_serde {
    use super::duration_serde::DurationHelper;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration
            .map(|d| DurationHelper {
                secs: d.as_secs(),
                nanos: d.subsec_nanos(),
            })
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let helper = Option::<DurationHelper>::deserialize(deserializer)?;
        Ok(helper.map(|h| Duration::new(h.secs, h.nanos)))
    }
}
