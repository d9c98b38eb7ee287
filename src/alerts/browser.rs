//! Browser notifications
//!
//! A small local web page asks the browser for notification permission and
//! shows the failure text. Each send updates the page and asks the desktop
//! to open its URL.

use std::net::SocketAddr;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::net::TcpListener;
use tokio::process::Command;

use super::config::BrowserConfig;
use crate::api::{spawn_server, PageState};

/// Opens a URL in the user's browser
pub trait UrlOpener: Send + Sync {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), BrowserError>>;
}

/// Uses the desktop's default URL handler
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemOpener;

impl SystemOpener {
    fn command(url: &str) -> (&'static str, Command) {
        if cfg!(target_os = "macos") {
            let mut cmd = Command::new("open");
            cmd.arg(url);
            ("open", cmd)
        } else if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", "start", "", url]);
            ("cmd", cmd)
        } else {
            let mut cmd = Command::new("xdg-open");
            cmd.arg(url);
            ("xdg-open", cmd)
        }
    }
}

impl UrlOpener for SystemOpener {
    fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), BrowserError>> {
        async move {
            let (program, mut cmd) = Self::command(url);
            let status = cmd
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .status()
                .await
                .map_err(|source| BrowserError::Launch { program, source })?;

            if status.success() {
                Ok(())
            } else {
                Err(BrowserError::OpenFailed { program, status })
            }
        }
        .boxed()
    }
}

/// Browser notifier
pub struct BrowserNotifier {
    config: BrowserConfig,
    page: Arc<PageState>,
    opener: Arc<dyn UrlOpener>,
    addr: Option<SocketAddr>,
}

impl BrowserNotifier {
    pub fn new(config: BrowserConfig) -> Self {
        Self::with_opener(config, Arc::new(SystemOpener))
    }

    pub fn with_opener(config: BrowserConfig, opener: Arc<dyn UrlOpener>) -> Self {
        let page = Arc::new(PageState::from_config(&config));
        Self {
            config,
            page,
            opener,
            addr: None,
        }
    }

    /// Start the notification page server.
    ///
    /// Returns once the listener is bound, so a send right after this cannot
    /// race the server. Calling it again returns the existing address.
    pub async fn start(&mut self) -> Result<SocketAddr, BrowserError> {
        if let Some(addr) = self.addr {
            return Ok(addr);
        }

        let listener = TcpListener::bind(&self.config.addr)
            .await
            .map_err(|source| BrowserError::Bind {
                addr: self.config.addr.clone(),
                source,
            })?;
        let addr = spawn_server(listener, Arc::clone(&self.page)).map_err(|source| {
            BrowserError::Bind {
                addr: self.config.addr.clone(),
                source,
            }
        })?;

        self.addr = Some(addr);
        Ok(addr)
    }

    /// Address the page is served on, once started
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn url(&self) -> Option<String> {
        self.addr.map(|addr| format!("http://{}/", addr))
    }

    pub fn page(&self) -> &Arc<PageState> {
        &self.page
    }

    /// Show `failure` on the page and open it
    pub async fn send(&self, failure: &str) -> Result<(), BrowserError> {
        let url = self.url().ok_or(BrowserError::NotStarted)?;
        self.page.set_body(failure);
        self.opener.open(&url).await
    }
}

impl std::fmt::Debug for BrowserNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserNotifier")
            .field("config", &self.config)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// Browser notification errors
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("notification page is not running")]
    NotStarted,

    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not run {program}: {source}")]
    Launch {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    OpenFailed {
        program: &'static str,
        status: ExitStatus,
    },
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records opened URLs; fails every call when `fail` is set
    #[derive(Default)]
    pub(crate) struct RecordingOpener {
        pub opened: Mutex<Vec<String>>,
        pub fail: bool,
    }

    impl UrlOpener for RecordingOpener {
        fn open<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<(), BrowserError>> {
            async move {
                self.opened.lock().push(url.to_string());
                if self.fail {
                    Err(BrowserError::Launch {
                        program: "xdg-open",
                        source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                    })
                } else {
                    Ok(())
                }
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_send_before_start() {
        let notifier = BrowserNotifier::with_opener(
            BrowserConfig::new("127.0.0.1:0", "Reminder"),
            Arc::new(RecordingOpener::default()),
        );
        let err = notifier.send("disk full").await.unwrap_err();
        assert!(matches!(err, BrowserError::NotStarted));
    }

    #[tokio::test]
    async fn test_start_then_send_serves_failure() {
        let opener = Arc::new(RecordingOpener::default());
        let mut notifier = BrowserNotifier::with_opener(
            BrowserConfig::new("127.0.0.1:0", "Reminder"),
            opener.clone(),
        );

        let addr = notifier.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(notifier.start().await.unwrap(), addr);

        notifier.send("disk full").await.unwrap();
        let url = format!("http://{}/", addr);
        assert_eq!(*opener.opened.lock(), vec![url.clone()]);

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[reqwest::header::SERVER],
            crate::api::SERVER_ID
        );
        let html = response.text().await.unwrap();
        assert!(html.contains("disk full"));

        let missing = reqwest::get(format!("http://{}/other", addr)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_opener_failure_is_returned() {
        let opener = Arc::new(RecordingOpener {
            fail: true,
            ..Default::default()
        });
        let mut notifier = BrowserNotifier::with_opener(
            BrowserConfig::new("127.0.0.1:0", "Reminder"),
            opener,
        );
        notifier.start().await.unwrap();

        let err = notifier.send("disk full").await.unwrap_err();
        assert!(matches!(err, BrowserError::Launch { .. }));
        assert_eq!(notifier.page().body(), "disk full");
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let mut notifier = BrowserNotifier::with_opener(
            BrowserConfig::new(addr, "Reminder"),
            Arc::new(RecordingOpener::default()),
        );
        let err = notifier.start().await.unwrap_err();
        assert!(matches!(err, BrowserError::Bind { .. }));
        assert!(notifier.addr().is_none());
    }
}
