//! Mail alerts
//!
//! One mail per failure, delivered with a plain SMTP dialogue (no TLS, no
//! auth) to the configured relay.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::config::MailConfig;

/// A message ready for the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub from: String,
    pub to: Vec<String>,
    /// Headers and body, `\n` separated
    pub data: String,
}

/// Something that can deliver an envelope
pub trait MailTransport: Send + Sync {
    fn deliver<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), MailError>>;
}

/// Mail notifier
pub struct MailNotifier {
    config: MailConfig,
    transport: Arc<dyn MailTransport>,
}

impl MailNotifier {
    /// Create a notifier delivering through `config.smtp`
    pub fn new(config: MailConfig) -> Self {
        let transport = Arc::new(SmtpTransport::new(config.smtp.clone()));
        Self { config, transport }
    }

    /// Create a notifier with a custom transport
    pub fn with_transport(config: MailConfig, transport: Arc<dyn MailTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &MailConfig {
        &self.config
    }

    /// Render the mail text for a failure
    pub fn render(&self, failure: &str) -> String {
        format!(
            "Subject: {}\nFrom: {}\n\n{}",
            self.config.subject, self.config.from, failure
        )
    }

    pub fn envelope(&self, failure: &str) -> Envelope {
        Envelope {
            from: self.config.from.clone(),
            to: self.config.to.clone(),
            data: self.render(failure),
        }
    }

    /// Build the delivery future for a failure.
    ///
    /// The future owns everything it needs so it can be spawned and outlive
    /// the caller.
    pub fn send(&self, failure: &str) -> BoxFuture<'static, Result<(), MailError>> {
        let transport = Arc::clone(&self.transport);
        let envelope = self.envelope(failure);
        async move { transport.deliver(&envelope).await }.boxed()
    }
}

impl std::fmt::Debug for MailNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailNotifier")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// SMTP delivery to a relay
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    addr: String,
}

impl SmtpTransport {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    async fn session(&self, envelope: &Envelope) -> Result<(), MailError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| MailError::Connect {
                addr: self.addr.clone(),
                source,
            })?;
        let (read, write) = stream.into_split();
        let mut smtp = SmtpConn {
            reader: BufReader::new(read),
            writer: write,
        };

        smtp.read_reply("greeting", &[220]).await?;
        if smtp.command("EHLO localhost", &[250]).await.is_err() {
            smtp.command("HELO localhost", &[250]).await?;
        }
        smtp.command(&format!("MAIL FROM:<{}>", envelope.from), &[250])
            .await?;
        for rcpt in &envelope.to {
            smtp.command(&format!("RCPT TO:<{}>", rcpt), &[250, 251])
                .await?;
        }
        smtp.command("DATA", &[354]).await?;
        smtp.write_raw(&encode_data(&envelope.data)).await?;
        smtp.read_reply("end of data", &[250]).await?;
        smtp.command("QUIT", &[221]).await?;

        tracing::debug!(addr = %self.addr, recipients = envelope.to.len(), "Alert mail delivered");
        Ok(())
    }
}

impl MailTransport for SmtpTransport {
    fn deliver<'a>(&'a self, envelope: &'a Envelope) -> BoxFuture<'a, Result<(), MailError>> {
        self.session(envelope).boxed()
    }
}

struct SmtpConn<R, W> {
    reader: R,
    writer: W,
}

impl<R, W> SmtpConn<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    async fn command(&mut self, line: &str, accept: &[u16]) -> Result<String, MailError> {
        self.write_raw(&format!("{}\r\n", line)).await?;
        let verb = line.split(':').next().unwrap_or(line);
        self.read_reply(verb, accept).await
    }

    async fn write_raw(&mut self, data: &str) -> Result<(), MailError> {
        self.writer.write_all(data.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read one (possibly multi-line) reply and check its code
    async fn read_reply(&mut self, stage: &str, accept: &[u16]) -> Result<String, MailError> {
        let mut text = String::new();
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line).await? == 0 {
                return Err(MailError::Closed);
            }
            let line = line.trim_end();
            let code: u16 = line
                .get(..3)
                .and_then(|c| c.parse().ok())
                .ok_or_else(|| MailError::Malformed(line.to_string()))?;
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(line.get(4..).unwrap_or(""));

            if line.as_bytes().get(3) == Some(&b'-') {
                continue;
            }
            if accept.contains(&code) {
                return Ok(text);
            }
            return Err(MailError::Rejected {
                stage: stage.to_string(),
                code,
                reply: text,
            });
        }
    }
}

/// CRLF line endings, dot-stuffing and the terminating dot line
fn encode_data(data: &str) -> String {
    let mut out = String::with_capacity(data.len() + 8);
    for line in data.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.push_str(".\r\n");
    out
}

/// Mail delivery errors
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("dial {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("smtp i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("{stage} rejected: {code} {reply}")]
    Rejected {
        stage: String,
        code: u16,
        reply: String,
    },

    #[error("malformed smtp reply: {0:?}")]
    Malformed(String),

    #[error("smtp server closed the connection")]
    Closed,

    #[error("mail task aborted: {0}")]
    Aborted(String),
}
