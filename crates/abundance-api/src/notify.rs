//! Verification email delivery
//!
//! Handlers hand a [`VerificationEmail`] to the [`NotificationQueue`] and move
//! on. One background worker drains the bounded channel and passes each message
//! to a [`Mailer`]. Enqueueing never waits: a full or closed queue drops the
//! message with a warning. Delivery failures are logged and not retried.
//!
//! [`LogMailer`] is the local-dev mailer and only logs. [`HttpMailer`] posts to
//! a transactional email provider.

use std::sync::Arc;
use std::time::Duration;

use abundance_core::EmailConfig;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::middleware::ApiMetrics;

/// A verification message for one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationEmail {
    pub to: String,
    pub token: String,
    pub link: String,
}

impl VerificationEmail {
    /// Build the message, appending the token to `verify_url`
    pub fn new(to: &str, token: String, verify_url: &str) -> Self {
        let separator = if verify_url.contains('?') { '&' } else { '?' };
        Self {
            to: to.to_string(),
            link: format!("{verify_url}{separator}token={token}"),
            token,
        }
    }

    pub fn subject(&self) -> &'static str {
        "Verify your email address"
    }

    pub fn html_body(&self) -> String {
        format!(
            "<p>Welcome to Abundance!</p>\
             <p>Please confirm your email address by clicking the link below:</p>\
             <p><a href=\"{link}\">Verify email</a></p>\
             <p>If you did not create an account, you can ignore this email.</p>",
            link = self.link
        )
    }
}

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("email transport failed: {0}")]
    Transport(String),

    #[error("email provider rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Email delivery abstraction used by the notification worker
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &VerificationEmail) -> Result<(), MailerError>;
}

/// Local dev mailer that logs the link instead of sending
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &VerificationEmail) -> Result<(), MailerError> {
        info!(to = %email.to, link = %email.link, "verification email (log only)");
        Ok(())
    }
}

#[derive(Serialize)]
struct ProviderMessage<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: String,
}

/// Mailer for JSON-over-HTTP transactional email providers
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    from_address: String,
}

impl HttpMailer {
    pub fn new(
        api_url: impl Into<String>,
        api_key: Option<String>,
        from_address: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            api_key,
            from_address: from_address.into(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &VerificationEmail) -> Result<(), MailerError> {
        let message = ProviderMessage {
            from: &self.from_address,
            to: [&email.to],
            subject: email.subject(),
            html: email.html_body(),
        };

        let mut request = self.client.post(&self.api_url).json(&message);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MailerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(to = %email.to, "verification email accepted by provider");
        Ok(())
    }
}

/// Pick the mailer for this configuration
pub fn mailer_from_config(config: &EmailConfig) -> anyhow::Result<Arc<dyn Mailer>> {
    match &config.api_url {
        Some(url) => Ok(Arc::new(HttpMailer::new(
            url.clone(),
            config.api_key.clone(),
            config.from_address.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => {
            warn!("EMAIL_API_URL not set, verification emails will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

/// Handle for fire-and-forget notification dispatch
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<VerificationEmail>,
    metrics: ApiMetrics,
}

impl NotificationQueue {
    /// Create the queue and spawn its worker on the current runtime
    pub fn spawn(
        mailer: Arc<dyn Mailer>,
        capacity: usize,
        metrics: ApiMetrics,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(rx, mailer, metrics.clone()));
        (Self { tx, metrics }, worker)
    }

    /// Queue a message without waiting; returns `false` if it was dropped
    pub fn enqueue(&self, email: VerificationEmail) -> bool {
        match self.tx.try_send(email) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(email)) => {
                warn!(to = %email.to, "notification queue full, dropping verification email");
                self.metrics.record_notification("dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(email)) => {
                warn!(to = %email.to, "notification worker stopped, dropping verification email");
                self.metrics.record_notification("dropped");
                false
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<VerificationEmail>,
    mailer: Arc<dyn Mailer>,
    metrics: ApiMetrics,
) {
    while let Some(email) = rx.recv().await {
        match mailer.send(&email).await {
            Ok(()) => {
                info!(to = %email.to, "verification email sent");
                metrics.record_notification("sent");
            }
            Err(e) => {
                error!(to = %email.to, error = %e, "error sending verification email");
                metrics.record_notification("failed");
            }
        }
    }
    debug!("notification worker exiting");
}

/// Mailer that keeps every message in memory
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: std::sync::Mutex<Vec<VerificationEmail>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered so far
    pub fn sent(&self) -> Vec<VerificationEmail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Wait until at least `count` messages were delivered or `timeout` passes
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<VerificationEmail> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sent = self.sent();
            if sent.len() >= count || tokio::time::Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: &VerificationEmail) -> Result<(), MailerError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(email.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingMailer;

    #[async_trait]
    impl Mailer for FailingMailer {
        async fn send(&self, _email: &VerificationEmail) -> Result<(), MailerError> {
            Err(MailerError::Transport("connection refused".to_string()))
        }
    }

    /// Never finishes a send, so the queue backs up
    struct StuckMailer;

    #[async_trait]
    impl Mailer for StuckMailer {
        async fn send(&self, _email: &VerificationEmail) -> Result<(), MailerError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn email(to: &str) -> VerificationEmail {
        VerificationEmail::new(to, "tok".to_string(), "http://api/verify")
    }

    #[test]
    fn test_link_building() {
        let e = VerificationEmail::new("a@example.com", "abc".into(), "http://api/verify");
        assert_eq!(e.link, "http://api/verify?token=abc");

        let e = VerificationEmail::new("a@example.com", "abc".into(), "http://api/verify?x=1");
        assert_eq!(e.link, "http://api/verify?x=1&token=abc");
        assert!(e.html_body().contains(&e.link));
    }

    #[tokio::test]
    async fn test_worker_delivers_in_order() {
        let mailer = Arc::new(MemoryMailer::new());
        let metrics = ApiMetrics::new().unwrap();
        let (queue, _worker) = NotificationQueue::spawn(mailer.clone(), 8, metrics.clone());

        assert!(queue.enqueue(email("a@example.com")));
        assert!(queue.enqueue(email("b@example.com")));

        let sent = mailer.wait_for(2, Duration::from_secs(2)).await;
        let recipients: Vec<_> = sent.iter().map(|e| e.to.as_str()).collect();
        assert_eq!(recipients, vec!["a@example.com", "b@example.com"]);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_retried() {
        let metrics = ApiMetrics::new().unwrap();
        let (queue, _worker) = NotificationQueue::spawn(Arc::new(FailingMailer), 4, metrics.clone());

        assert!(queue.enqueue(email("a@example.com")));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while metrics.notifications_total.with_label_values(&["failed"]).get() == 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            metrics.notifications_total.with_label_values(&["failed"]).get(),
            1
        );
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let metrics = ApiMetrics::new().unwrap();
        let (queue, _worker) = NotificationQueue::spawn(Arc::new(StuckMailer), 1, metrics.clone());

        // The worker takes at most one message and stalls on it, the channel holds one more
        let accepted = (0..5)
            .map(|i| queue.enqueue(email(&format!("u{i}@example.com"))))
            .filter(|ok| *ok)
            .count();

        assert!(accepted <= 2);
        assert!(metrics.notifications_total.with_label_values(&["dropped"]).get() >= 3);
    }
}
