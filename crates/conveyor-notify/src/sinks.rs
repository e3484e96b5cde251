//! Status sink implementations.

use async_trait::async_trait;
use conveyor_core::change::SourceStamp;
use conveyor_core::config::{GithubReporterConfig, ReporterConfig, WebhookReporterConfig};
use conveyor_core::ports::{StatusSink, StatusState, StatusUpdate};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// GitHub rejects longer descriptions.
const GITHUB_DESCRIPTION_LIMIT: usize = 140;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Sink not configured: {0}")]
    NotConfigured(String),
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

impl From<NotifyError> for conveyor_core::Error {
    fn from(e: NotifyError) -> Self {
        conveyor_core::Error::Reporting(e.to_string())
    }
}

fn http_client(timeout_seconds: u64) -> Result<reqwest::Client, NotifyError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .user_agent(concat!("conveyor/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

async fn check(response: reqwest::Response, sink: &str) -> Result<(), NotifyError> {
    if response.status().is_success() {
        return Ok(());
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::DeliveryFailed(format!(
        "{} returned {}: {}",
        sink, status, body
    )))
}

/// GitHub commit status API sink.
pub struct GithubStatusSink {
    api_url: String,
    token: String,
    client: reqwest::Client,
}

impl GithubStatusSink {
    /// Reads the API token from the environment variable named in `config`.
    pub fn new(config: &GithubReporterConfig) -> Result<Self, NotifyError> {
        let token = std::env::var(&config.token_env).map_err(|_| {
            NotifyError::NotConfigured(format!(
                "github reporter needs a token in ${}",
                config.token_env
            ))
        })?;
        Self::with_token(config, token)
    }

    pub fn with_token(
        config: &GithubReporterConfig,
        token: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        Ok(Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: token.into(),
            client: http_client(config.timeout_seconds)?,
        })
    }

    fn statuses_url(&self, update: &StatusUpdate) -> Result<String, NotifyError> {
        let stamp = SourceStamp::new(&update.repository, "", &update.revision);
        let full_name = stamp.full_name().ok_or_else(|| {
            NotifyError::DeliveryFailed(format!(
                "cannot derive owner/repo from {}",
                update.repository
            ))
        })?;
        Ok(format!(
            "{}/repos/{}/statuses/{}",
            self.api_url, full_name, update.revision
        ))
    }

    fn build_body(update: &StatusUpdate) -> serde_json::Value {
        let state = match update.state {
            StatusState::Started => "pending",
            StatusState::Success => "success",
            StatusState::Failure => "failure",
        };
        let description: String = update
            .description
            .chars()
            .take(GITHUB_DESCRIPTION_LIMIT)
            .collect();

        let mut body = serde_json::json!({
            "state": state,
            "context": update.context,
            "description": description,
        });
        if let Some(url) = &update.target_url {
            body["target_url"] = serde_json::Value::String(url.clone());
        }
        body
    }

    async fn send(&self, update: &StatusUpdate) -> Result<(), NotifyError> {
        let url = self.statuses_url(update)?;
        debug!(url = %url, context = %update.context, "Pushing GitHub commit status");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .json(&Self::build_body(update))
            .send()
            .await?;
        check(response, "GitHub").await
    }
}

#[async_trait]
impl StatusSink for GithubStatusSink {
    fn name(&self) -> &str {
        "github"
    }

    async fn push(&self, update: &StatusUpdate) -> conveyor_core::Result<()> {
        Ok(self.send(update).await?)
    }
}

/// Posts every status update as JSON to a fixed URL.
pub struct WebhookSink {
    config: WebhookReporterConfig,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(config: WebhookReporterConfig) -> Result<Self, NotifyError> {
        let client = http_client(config.timeout_seconds)?;
        Ok(Self { config, client })
    }

    async fn send(&self, update: &StatusUpdate) -> Result<(), NotifyError> {
        debug!(url = %self.config.url, "Sending webhook status");

        let mut request = self.client.post(&self.config.url);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }
        let response = request.json(update).send().await?;
        check(response, "Webhook").await
    }
}

#[async_trait]
impl StatusSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn push(&self, update: &StatusUpdate) -> conveyor_core::Result<()> {
        Ok(self.send(update).await?)
    }
}

/// Writes status updates to the log only.
pub struct LogSink;

#[async_trait]
impl StatusSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn push(&self, update: &StatusUpdate) -> conveyor_core::Result<()> {
        info!(
            job_id = %update.job_id,
            context = %update.context,
            state = update.state.as_str(),
            revision = %update.revision,
            "{}",
            update.description
        );
        Ok(())
    }
}

/// Create a sink for a reporter configuration.
pub fn create_sink(config: &ReporterConfig) -> Result<Arc<dyn StatusSink>, NotifyError> {
    Ok(match config {
        ReporterConfig::Github(c) => Arc::new(GithubStatusSink::new(c)?),
        ReporterConfig::Webhook(c) => Arc::new(WebhookSink::new(c.clone())?),
        ReporterConfig::Log => Arc::new(LogSink),
    })
}
