//! Notification collaborator
//!
//! Outbound notifications (the reminder action's email) behind a
//! trait: a recording mock for tests and an SMTP sender for
//! production. Sends are fire-and-forget once ownership is confirmed;
//! a delivery failure is logged, never turned into a request failure.

use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::warn;

use crate::connection::{Capability, Connection, Response};
use crate::errors::PipelineError;
use crate::pipeline::{BoxFuture, Terminal};

/// Result type for notification sends.
pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("invalid address: {0}")]
    Address(String),

    #[error("delivery failed: {0}")]
    Transport(String),
}

/// An outbound notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Reminder {
        to: String,
        subject: String,
        body: String,
    },
}

/// Notification sender boundary.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: Notification) -> NotifyResult<()>;
}

/// Recording sender for tests.
#[derive(Debug, Default)]
pub struct MockNotifier {
    sent: RwLock<Vec<Notification>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().unwrap().len()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.read().unwrap().clone()
    }
}

impl Notifier for MockNotifier {
    fn send(&self, notification: Notification) -> NotifyResult<()> {
        self.sent.write().unwrap().push(notification);
        Ok(())
    }
}

/// SMTP configuration for the production sender.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1025,
            user: String::new(),
            password: String::new(),
            from_email: "noreply@flowline.local".to_string(),
            from_name: "Flowline".to_string(),
        }
    }
}

/// SMTP notification sender.
pub struct SmtpNotifier {
    config: SmtpConfig,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }
}

impl Notifier for SmtpNotifier {
    fn send(&self, notification: Notification) -> NotifyResult<()> {
        use lettre::{
            message::header::ContentType, transport::smtp::authentication::Credentials, Message,
            SmtpTransport, Transport,
        };

        let Notification::Reminder { to, subject, body } = notification;

        let email = Message::builder()
            .from(
                format!("{} <{}>", self.config.from_name, self.config.from_email)
                    .parse()
                    .map_err(|e| NotifyError::Address(format!("invalid from address: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| NotifyError::Address(format!("invalid to address: {}", e)))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| NotifyError::Transport(format!("failed to build message: {}", e)))?;

        let mailer = if self.config.user.is_empty() {
            // Unauthenticated transport for local development servers.
            SmtpTransport::builder_dangerous(&self.config.host)
                .port(self.config.port)
                .build()
        } else {
            let creds = Credentials::new(self.config.user.clone(), self.config.password.clone());
            SmtpTransport::relay(&self.config.host)
                .map_err(|e| NotifyError::Transport(format!("smtp relay error: {}", e)))?
                .credentials(creds)
                .port(self.config.port)
                .build()
        };

        mailer
            .send(&email)
            .map(|_| ())
            .map_err(|e| NotifyError::Transport(e.to_string()))
    }
}

type NotificationBuilder = Box<dyn Fn(&Connection) -> Notification + Send + Sync>;

/// Terminal that sends a notification built from the connection and
/// responds `{"message": "<text>"}`. The send is fire-and-forget.
pub struct NotifyTerminal {
    notifier: Arc<dyn Notifier>,
    message: String,
    requires: Vec<Capability>,
    build: NotificationBuilder,
}

impl NotifyTerminal {
    pub fn new<F>(notifier: Arc<dyn Notifier>, message: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Connection) -> Notification + Send + Sync + 'static,
    {
        Self {
            notifier,
            message: message.into(),
            requires: Vec::new(),
            build: Box::new(build),
        }
    }

    pub fn requiring(mut self, caps: &[Capability]) -> Self {
        self.requires.extend_from_slice(caps);
        self
    }
}

impl Terminal for NotifyTerminal {
    fn name(&self) -> &str {
        "notify"
    }

    fn requires(&self) -> &[Capability] {
        &self.requires
    }

    fn respond(&self, conn: Connection) -> BoxFuture<'_, Result<Response, PipelineError>> {
        Box::pin(async move {
            let notification = (self.build)(&conn);
            if let Err(err) = self.notifier.send(notification) {
                warn!(error = %err, "notification delivery failed; responding anyway");
            }
            Ok(Response::json(
                200,
                &serde_json::json!({ "message": self.message }),
            ))
        })
    }
}
