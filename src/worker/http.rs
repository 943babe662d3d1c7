// src/worker/http.rs — Worker that POSTs work requests to an HTTP endpoint
//
// The endpoint receives the `WorkRequest` as JSON and answers with a
// `WorkOutput`. 429 maps to `WorkError::RateLimited` (honouring a
// `retry-after` header in seconds); any other non-success status is a
// domain failure.

use std::time::Duration;

use async_trait::async_trait;

use super::{UnitOfWork, WorkError};
use crate::core::types::{WorkOutput, WorkRequest};

/// Used when a 429 carries no usable `retry-after` header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

pub struct HttpWorker {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpWorker {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, WorkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkError::failed(format!("Cannot build HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

/// Parse a `retry-after` header given in whole seconds.
fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Duration {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[async_trait]
impl UnitOfWork for HttpWorker {
    fn id(&self) -> &str {
        "http"
    }

    async fn perform(&self, request: &WorkRequest) -> Result<WorkOutput, WorkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| WorkError::failed(format!("Cannot reach {}: {}", self.endpoint, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers().get(reqwest::header::RETRY_AFTER));
            return Err(WorkError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WorkError::failed(format!("HTTP {}: {}", status, body)));
        }

        response
            .json::<WorkOutput>()
            .await
            .map_err(|e| WorkError::failed(format!("Failed to parse worker response: {}", e)))
    }
}
