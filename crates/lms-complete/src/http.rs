//! Async HTTP client wrapping reqwest, used for AICC/HACP submissions.
//!
//! Posts are never retried: a HACP `PutParam` is not idempotent from the
//! LMS's point of view, so one attempt is made and its outcome reported.

use std::time::Duration;

use crate::error::DriverError;

/// Response from a form post.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client shared by every driver in a session.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("lms-complete/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// POST `fields` as `application/x-www-form-urlencoded`.
    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<HttpResponse, DriverError> {
        let resp = self
            .client
            .post(url)
            .timeout(timeout)
            .form(fields)
            .send()
            .await
            .map_err(|e| transport(url, e))?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp.text().await.map_err(|e| transport(url, e))?;
        Ok(HttpResponse {
            final_url,
            status,
            body,
        })
    }
}

fn transport(url: &str, e: reqwest::Error) -> DriverError {
    if e.is_timeout() {
        DriverError::Transport(format!("POST {url} timed out"))
    } else {
        DriverError::Transport(format!("POST {url} failed: {e}"))
    }
}
