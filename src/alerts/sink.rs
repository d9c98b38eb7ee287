//! Append-only failure log
//!
//! The sink is the last line of defense for a failure signal: every record
//! is appended to a plain text file that is opened, written and closed again
//! on each call. When no path was configured, a temporary file is created on
//! first use and reused for the rest of the process.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::config::SinkConfig;

/// Timestamp prefix of every record
const RECORD_TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// Durable failure log
#[derive(Debug)]
pub struct AlertSink {
    /// Resolved target; `None` until the first append when no path was configured.
    /// Holding the lock across a write keeps records from interleaving.
    path: Mutex<Option<PathBuf>>,
}

impl AlertSink {
    /// Create a sink writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Mutex::new(Some(path.into())),
        }
    }

    /// Create a sink that picks a temporary file on first use
    pub fn temporary() -> Self {
        Self {
            path: Mutex::new(None),
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        match &config.path {
            Some(path) if !path.as_os_str().is_empty() => Self::new(path.clone()),
            _ => Self::temporary(),
        }
    }

    /// Resolve the backing file, creating a temporary one if needed.
    ///
    /// Idempotent: once resolved the path never changes.
    pub fn resolve(&self) -> Result<PathBuf, SinkError> {
        let mut path = self.path.lock();
        Self::resolve_locked(&mut path).map(Path::to_path_buf)
    }

    /// The backing file, if already resolved
    pub fn path(&self) -> Option<PathBuf> {
        self.path.lock().clone()
    }

    /// Append one record
    pub fn append(&self, message: &str) -> Result<(), SinkError> {
        let mut guard = self.path.lock();
        let path = Self::resolve_locked(&mut guard)?;

        let mut file = open_for_append(path).map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        let stamp = chrono::Local::now().format(RECORD_TIME_FORMAT);
        let record = format_record(&stamp.to_string(), message);

        file.write_all(record.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|source| SinkError::Write {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "Alert record written");
        Ok(())
    }

    fn resolve_locked(slot: &mut Option<PathBuf>) -> Result<&Path, SinkError> {
        let path = match slot.take() {
            Some(path) => path,
            None => {
                let (_, path) = tempfile::Builder::new()
                    .prefix("cronwatch")
                    .suffix(".log")
                    .tempfile()
                    .and_then(|f| f.keep().map_err(|e| e.error))
                    .map_err(SinkError::TempFile)?;
                tracing::info!(path = %path.display(), "Writing alerts to temporary file");
                path
            }
        };
        Ok(slot.insert(path).as_path())
    }
}

/// One record per event: continuation lines of a multi-line message are
/// indented with a tab so only the first line starts with a timestamp.
fn format_record(stamp: &str, message: &str) -> String {
    let mut record = format!("{} ", stamp);
    for (i, line) in message.trim_end_matches(['\r', '\n']).lines().enumerate() {
        if i > 0 {
            record.push_str("\n\t");
        }
        record.push_str(line);
    }
    record.push('\n');
    record
}

fn open_for_append(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.append(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Failure log errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("could not create temporary alert file: {0}")]
    TempFile(#[source] std::io::Error),

    #[error("could not open or create alert file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write alert file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
