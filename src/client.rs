//! HTTP client for the kiosk's remote feedback API.
//!
//! This module provides the [`FeedbackTransport`] seam used by the delivery
//! coordinator and its reqwest-backed implementation, [`FeedbackClient`].
//! The client makes exactly one attempt per call: retrying is the
//! coordinator's job, driven by the durable queue.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::event::{FeedbackEvent, SatisfactionGrade};

/// Body of a feedback submission.
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackRequest {
    pub grau_satisfacao: SatisfactionGrade,

    /// Locally generated id, sent so the server can correlate retries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    #[serde(rename = "clientTimestamp")]
    pub client_timestamp: DateTime<Utc>,
}

impl From<&FeedbackEvent> for FeedbackRequest {
    fn from(event: &FeedbackEvent) -> Self {
        Self {
            grau_satisfacao: event.grade,
            id: event.local_id,
            client_timestamp: event.created_at,
        }
    }
}

/// Identifier assigned by the server: numeric from the REST API, a document
/// id string from the document-store backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ServerId {
    Numeric(u64),
    Text(String),
}

impl std::fmt::Display for ServerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerId::Numeric(id) => write!(f, "{}", id),
            ServerId::Text(id) => f.write_str(id),
        }
    }
}

/// Acknowledgement of a submitted feedback event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub success: bool,

    /// Human-readable confirmation
    #[serde(default)]
    pub message: Option<String>,

    /// Identifier assigned by the server
    #[serde(default)]
    pub id: Option<ServerId>,
}

/// Error body returned by the API on failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(default)]
    pub details: Option<String>,
}

/// Per-grade counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GradeCounts {
    #[serde(default)]
    pub muito_satisfeito: u64,
    #[serde(default)]
    pub satisfeito: u64,
    #[serde(default)]
    pub insatisfeito: u64,
}

impl GradeCounts {
    pub fn get(&self, grade: SatisfactionGrade) -> u64 {
        match grade {
            SatisfactionGrade::VerySatisfied => self.muito_satisfeito,
            SatisfactionGrade::Satisfied => self.satisfeito,
            SatisfactionGrade::Unsatisfied => self.insatisfeito,
        }
    }

    pub fn total(&self) -> u64 {
        self.muito_satisfeito + self.satisfeito + self.insatisfeito
    }
}

/// Public summary shown on the kiosk screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PublicSummary {
    #[serde(default)]
    pub date: String,

    #[serde(default)]
    pub today: GradeCounts,

    #[serde(rename = "todayTotal", default)]
    pub today_total: u64,

    #[serde(default)]
    pub total: u64,

    #[serde(rename = "lastId", default)]
    pub last_id: Option<ServerId>,
}

/// Errors that can occur during HTTP client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Server error ({code}): {message}")]
    Status { code: StatusCode, message: String },

    /// Failed to parse response body
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Request timeout
    #[error("Request timed out")]
    Timeout,

    /// Client configuration error
    #[error("Client configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

impl ClientError {
    /// The endpoint could not be reached or did not answer in time.
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, ClientError::Request(_) | ClientError::Timeout)
    }

    /// Failures worth retrying later from the durable queue: transport
    /// faults, server errors (5xx) and rate limiting (429).
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Request(_) | ClientError::Timeout => true,
            ClientError::Status { code, .. } => {
                code.is_server_error() || *code == StatusCode::TOO_MANY_REQUESTS
            }
            ClientError::Parse(_) => false,
            ClientError::Config(_) => false,
        }
    }
}

/// Remote side of feedback delivery.
#[async_trait]
pub trait FeedbackTransport: Send + Sync {
    /// Submit one event. `Ok` means the endpoint acknowledged it.
    async fn submit(&self, event: &FeedbackEvent) -> Result<SubmitResponse, ClientError>;

    /// Fetch the public summary.
    async fn summary(&self) -> Result<PublicSummary, ClientError>;

    /// Check that the API is reachable.
    async fn health(&self) -> Result<(), ClientError>;
}

/// reqwest-backed client for the feedback API.
///
/// # Example
///
/// ```no_run
/// use kiosk_feedback::client::{FeedbackClient, FeedbackTransport};
/// use kiosk_feedback::config::Config;
/// use kiosk_feedback::event::{FeedbackEvent, SatisfactionGrade};
///
/// #[tokio::main]
/// async fn main() {
///     let client = FeedbackClient::new(&Config::default()).expect("Failed to create client");
///     let event = FeedbackEvent::new(SatisfactionGrade::VerySatisfied);
///
///     match client.submit(&event).await {
///         Ok(response) => println!("Recorded as {:?}", response.id),
///         Err(e) => eprintln!("Failed to submit: {}", e),
///     }
/// }
/// ```
pub struct FeedbackClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    feedback_url: String,
    summary_url: String,
    health_url: String,

    /// Request timeout duration
    timeout: Duration,
}

impl FeedbackClient {
    /// Create a new client from the service configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(&config.api_url, config.request_timeout)
    }

    /// Create a client for the API rooted at `api_url`.
    pub fn with_settings(api_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        let api_url = api_url.trim_end_matches('/');

        Ok(Self {
            client,
            feedback_url: format!("{}/api/feedback", api_url),
            summary_url: format!("{}/api/public/summary", api_url),
            health_url: format!("{}/api/health", api_url),
            timeout,
        })
    }

    pub fn feedback_url(&self) -> &str {
        &self.feedback_url
    }

    pub fn summary_url(&self) -> &str {
        &self.summary_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Turn a non-success response into `ClientError::Status`, using the
    /// API's `error` field when the body carries one.
    async fn status_error(response: reqwest::Response) -> ClientError {
        let code = response.status();
        let body = response.text().await.unwrap_or_default();

        let message = match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(ErrorResponse {
                error,
                details: Some(details),
            }) => format!("{} ({})", error, details),
            Ok(ErrorResponse { error, .. }) => error,
            Err(_) if body.is_empty() => "Unknown error".to_string(),
            Err(_) => body,
        };

        ClientError::Status { code, message }
    }
}

#[async_trait]
impl FeedbackTransport for FeedbackClient {
    async fn submit(&self, event: &FeedbackEvent) -> Result<SubmitResponse, ClientError> {
        debug!(
            grade = %event.grade,
            local_id = ?event.local_id,
            url = %self.feedback_url,
            "Submitting feedback"
        );

        let response = self
            .client
            .post(&self.feedback_url)
            .json(&FeedbackRequest::from(event))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        // The event is acknowledged by the status alone; an odd body must not
        // cause a resend.
        let body = response.text().await?;
        match serde_json::from_str::<SubmitResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!(error = %e, "Unreadable feedback acknowledgement, accepting status");
                Ok(SubmitResponse {
                    success: true,
                    ..SubmitResponse::default()
                })
            }
        }
    }

    async fn summary(&self) -> Result<PublicSummary, ClientError> {
        let response = self.client.get(&self.summary_url).send().await?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ClientError::Parse(e.to_string()))
    }

    async fn health(&self) -> Result<(), ClientError> {
        let response = self.client.get(&self.health_url).send().await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::status_error(response).await)
        }
    }
}
