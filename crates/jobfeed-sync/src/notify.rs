//! FIFO notification queue, alert e-mail rendering and the drain dispatcher.

use std::sync::Arc;
use std::time::Duration;

use askama::Template;
use async_trait::async_trait;
use jobfeed_core::{FailureClass, NotificationTask};
use jobfeed_storage::{EphemeralError, EphemeralStore};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::SmtpConfig;

pub const QUEUE_KEY: &str = "email_queue";
pub const MAX_DRAIN_BATCH: usize = 5;
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Ephemeral(#[from] EphemeralError),
    #[error("encoding notification: {0}")]
    Encode(serde_json::Error),
    #[error("decoding queued notification: {0}")]
    Decode(serde_json::Error),
}

impl QueueError {
    pub fn class(&self) -> FailureClass {
        match self {
            QueueError::Ephemeral(err) => err.class(),
            QueueError::Encode(_) | QueueError::Decode(_) => FailureClass::Parse,
        }
    }
}

#[derive(Clone)]
pub struct NotificationQueue {
    store: Arc<dyn EphemeralStore>,
    key: String,
}

impl NotificationQueue {
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self {
            store,
            key: QUEUE_KEY.to_string(),
        }
    }

    pub async fn enqueue(&self, task: &NotificationTask) -> Result<(), QueueError> {
        let payload = serde_json::to_string(task).map_err(QueueError::Encode)?;
        self.store.push_back(&self.key, &payload).await?;
        info!(
            to_email = %task.to_email,
            alert = %task.alert_name,
            jobs = task.jobs.len(),
            "notification queued"
        );
        Ok(())
    }

    pub async fn size(&self) -> Result<usize, QueueError> {
        Ok(self.store.list_len(&self.key).await?)
    }

    /// Oldest `count` entries without removing them. Undecodable entries are left out.
    pub async fn peek(&self, count: usize) -> Result<Vec<NotificationTask>, QueueError> {
        let raw = self.store.list_head(&self.key, count).await?;
        Ok(raw
            .iter()
            .filter_map(|payload| match serde_json::from_str(payload) {
                Ok(task) => Some(task),
                Err(err) => {
                    warn!(error = %err, "undecodable entry in notification queue");
                    None
                }
            })
            .collect())
    }

    /// Removes the oldest entry. A malformed entry is consumed and reported as `Decode`.
    pub async fn dequeue_one(&self) -> Result<Option<NotificationTask>, QueueError> {
        match self.store.pop_front(&self.key).await? {
            Some(payload) => serde_json::from_str(&payload)
                .map(Some)
                .map_err(QueueError::Decode),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid mailbox {address:?}: {source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },
    #[error("rendering alert e-mail: {0}")]
    Render(#[from] askama::Error),
    #[error("building message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

impl MailError {
    pub fn class(&self) -> FailureClass {
        match self {
            MailError::Address { .. } => FailureClass::Configuration,
            MailError::Render(_) | MailError::Message(_) => FailureClass::Parse,
            MailError::Smtp(_) => FailureClass::Transport,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Transport credentials are not configured.
    Skipped,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, task: &NotificationTask) -> Result<Delivery, MailError>;
}

struct JobView {
    title: String,
    company: String,
    location: String,
    job_type: String,
    source: String,
    link: String,
}

#[derive(Template)]
#[template(path = "job_alert.html")]
struct JobAlertTemplate {
    alert_name: String,
    jobs: Vec<JobView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

pub fn render_alert_email(task: &NotificationTask) -> Result<RenderedEmail, MailError> {
    let template = JobAlertTemplate {
        alert_name: task.alert_name.clone(),
        jobs: task
            .jobs
            .iter()
            .map(|job| JobView {
                title: job.title.clone(),
                company: job.company.clone(),
                location: job.location.clone().unwrap_or_else(|| "N/A".to_string()),
                job_type: job.job_type.clone(),
                source: job.source.clone(),
                link: job.apply_url.clone().unwrap_or_default(),
            })
            .collect(),
    };
    Ok(RenderedEmail {
        subject: format!(
            "Job Alert: {} - {} new match(es)",
            task.alert_name,
            task.jobs.len()
        ),
        html: template.render()?,
    })
}

fn mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|source| MailError::Address {
        address: address.to_string(),
        source,
    })
}

/// STARTTLS submission with login. Unconfigured credentials turn every delivery into a skip.
pub struct SmtpMailer {
    transport: Option<(AsyncSmtpTransport<Tokio1Executor>, Mailbox)>,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let (Some(user), Some(password), Some(from)) =
            (&config.user, &config.password, &config.from)
        else {
            return Ok(Self { transport: None });
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            .port(config.port)
            .credentials(Credentials::new(user.clone(), password.clone()))
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Ok(Self {
            transport: Some((transport, mailbox(from)?)),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(&self, task: &NotificationTask) -> Result<Delivery, MailError> {
        let Some((transport, from)) = &self.transport else {
            warn!(to_email = %task.to_email, "smtp credentials not configured; skipping e-mail");
            return Ok(Delivery::Skipped);
        };

        let rendered = render_alert_email(task)?;
        let message = Message::builder()
            .from(from.clone())
            .to(mailbox(&task.to_email)?)
            .subject(rendered.subject)
            .header(ContentType::TEXT_HTML)
            .body(rendered.html)?;
        transport.send(message).await?;
        info!(to_email = %task.to_email, jobs = task.jobs.len(), "alert e-mail sent");
        Ok(Delivery::Sent)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `None` when the queue could not be measured.
    pub remaining: Option<usize>,
}

/// Pops at most `batch` tasks per drain. Failed deliveries are not re-queued.
pub struct Dispatcher {
    queue: NotificationQueue,
    mailer: Arc<dyn Mailer>,
    batch: usize,
}

impl Dispatcher {
    pub fn new(queue: NotificationQueue, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            queue,
            mailer,
            batch: MAX_DRAIN_BATCH,
        }
    }

    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }

    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        for _ in 0..self.batch {
            let task = match self.queue.dequeue_one().await {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(err @ QueueError::Decode(_)) => {
                    warn!(error = %err, "dropping malformed notification");
                    report.processed += 1;
                    report.failed += 1;
                    continue;
                }
                Err(err) => {
                    warn!(class = %err.class(), error = %err, "notification queue unavailable");
                    break;
                }
            };

            report.processed += 1;
            match self.mailer.deliver(&task).await {
                Ok(Delivery::Sent) => report.sent += 1,
                Ok(Delivery::Skipped) => report.skipped += 1,
                Err(err) => {
                    error!(
                        to_email = %task.to_email,
                        alert = %task.alert_name,
                        class = %err.class(),
                        error = %err,
                        "alert delivery failed"
                    );
                    report.failed += 1;
                }
            }
        }

        report.remaining = self.queue.size().await.ok();
        if report.processed > 0 {
            info!(
                processed = report.processed,
                sent = report.sent,
                skipped = report.skipped,
                failed = report.failed,
                "notification queue drained"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobfeed_core::JobSnapshot;
    use jobfeed_storage::MemoryEphemeralStore;
    use tokio::sync::Mutex;

    fn task(name: &str, jobs: usize) -> NotificationTask {
        NotificationTask {
            to_email: "dev@example.test".to_string(),
            alert_name: name.to_string(),
            jobs: (0..jobs)
                .map(|i| JobSnapshot {
                    title: format!("Engineer {i}"),
                    company: "Acme Corp".to_string(),
                    location: None,
                    job_type: "full-time".to_string(),
                    source: "career_page".to_string(),
                    apply_url: Some(format!("https://careers.acme.test/jobs/{i}")),
                })
                .collect(),
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        delivered: Mutex<Vec<String>>,
        fail_for: Option<&'static str>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn deliver(&self, task: &NotificationTask) -> Result<Delivery, MailError> {
            if self.fail_for == Some(task.alert_name.as_str()) {
                return Err(mailbox("not an address").unwrap_err());
            }
            self.delivered.lock().await.push(task.alert_name.clone());
            Ok(Delivery::Sent)
        }
    }

    #[tokio::test]
    async fn queue_is_fifo_with_peek() {
        let queue = NotificationQueue::new(Arc::new(MemoryEphemeralStore::new()));
        queue.enqueue(&task("first", 1)).await.unwrap();
        queue.enqueue(&task("second", 2)).await.unwrap();

        assert_eq!(queue.size().await.unwrap(), 2);
        let peeked = queue.peek(5).await.unwrap();
        assert_eq!(peeked.len(), 2);
        assert_eq!(peeked[0].alert_name, "first");
        assert_eq!(queue.size().await.unwrap(), 2);

        assert_eq!(queue.dequeue_one().await.unwrap().unwrap(), task("first", 1));
        assert_eq!(queue.dequeue_one().await.unwrap().unwrap().alert_name, "second");
        assert!(queue.dequeue_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn drain_caps_batch_and_counts_failures_as_processed() {
        let store = Arc::new(MemoryEphemeralStore::new());
        let queue = NotificationQueue::new(store.clone());
        for i in 0..7 {
            queue.enqueue(&task(&format!("alert {i}"), 1)).await.unwrap();
        }
        store.push_back(QUEUE_KEY, "{not json").await.unwrap();

        let mailer = Arc::new(RecordingMailer {
            fail_for: Some("alert 1"),
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(queue.clone(), mailer.clone());

        let first = dispatcher.drain().await;
        assert_eq!(first.processed, MAX_DRAIN_BATCH);
        assert_eq!(first.sent, 4);
        assert_eq!(first.failed, 1);
        assert_eq!(first.remaining, Some(3));

        let second = dispatcher.drain().await;
        assert_eq!(second.processed, 3);
        assert_eq!(second.sent, 2);
        assert_eq!(second.failed, 1);
        assert_eq!(second.remaining, Some(0));

        let delivered = mailer.delivered.lock().await.clone();
        assert_eq!(delivered.len(), 6);
        assert!(!delivered.contains(&"alert 1".to_string()));
    }

    #[tokio::test]
    async fn unconfigured_smtp_skips_delivery() {
        let mailer = SmtpMailer::new(&SmtpConfig {
            host: "smtp.example.test".to_string(),
            port: 587,
            user: Some("user".to_string()),
            password: None,
            from: Some("alerts@example.test".to_string()),
        })
        .unwrap();
        assert!(!mailer.is_configured());
        assert_eq!(mailer.deliver(&task("any", 1)).await.unwrap(), Delivery::Skipped);
    }

    #[test]
    fn rendered_body_lists_jobs_and_escapes_markup() {
        let mut task = task("Rust <roles>", 2);
        task.jobs[0].company = "Acme & Sons".to_string();
        task.jobs[1].location = Some("Remote".to_string());
        task.jobs[1].apply_url = None;

        let rendered = render_alert_email(&task).unwrap();
        assert_eq!(rendered.subject, "Job Alert: Rust <roles> - 2 new match(es)");
        assert!(rendered.html.contains("Rust &lt;roles&gt;"));
        assert!(rendered.html.contains("Acme &amp; Sons"));
        assert!(rendered.html.contains("<strong>Location:</strong> N/A"));
        assert!(rendered.html.contains("<strong>Location:</strong> Remote"));
        assert_eq!(rendered.html.matches("View Job").count(), 1);
    }
}
