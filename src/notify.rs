use crate::config::NotifyConfig;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("notification endpoint answered {0}")]
    Status(StatusCode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

/// Publishes lifecycle messages to an ntfy-compatible topic.
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    endpoint: Option<String>,
}

impl Notifier {
    pub fn new(cfg: &NotifyConfig) -> Self {
        let client = Client::builder()
            .user_agent(concat!("gamestatd/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        let endpoint = cfg.is_enabled().then(|| topic_url(&cfg.server, &cfg.topic));
        Self { client, endpoint }
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Fire-and-forget delivery. Failures are logged, never returned; the
    /// handle is only for callers that must not exit before delivery.
    pub fn send(&self, title: &str, message: String, priority: Priority) -> Option<JoinHandle<()>> {
        let endpoint = self.endpoint.clone()?;
        let client = self.client.clone();
        let title = format!("[Game Server] {title}");
        Some(tokio::spawn(async move {
            match deliver(&client, &endpoint, &title, message, priority).await {
                Ok(()) => debug!(title = %title, "notification delivered"),
                Err(err) => warn!(title = %title, error = %err, "notification delivery failed"),
            }
        }))
    }
}

async fn deliver(
    client: &Client,
    endpoint: &str,
    title: &str,
    message: String,
    priority: Priority,
) -> Result<(), NotifyError> {
    let response = client
        .post(endpoint)
        .header("Title", title)
        .header("Priority", priority.as_str())
        .header("Tags", "gaming,web,interface")
        .body(message)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(NotifyError::Status(status));
    }
    Ok(())
}

fn topic_url(server: &str, topic: &str) -> String {
    format!(
        "{}/{}",
        server.trim().trim_end_matches('/'),
        topic.trim().trim_start_matches('/')
    )
}
