use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{PocketError, Result};

/// Rate-limit headers reported by the POKTscan API on a 429.
pub const RATE_LIMIT_HEADERS: [&str; 7] = [
    "Retry-After",
    "X-RateLimit-Limit",
    "X-RateLimit-Remaining",
    "X-RateLimit-Reset",
    "X-Long-RateLimit-Limit",
    "X-Long-RateLimit-Remaining",
    "X-Long-RateLimit-Consumed-Points",
];

// ─── RetryPolicy ──────────────────────────────────────────────────────────

/// How many times a request is repeated and how long to wait in between.
///
/// Backoff doubles from `min_backoff` on every attempt and is capped at
/// `max_backoff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn with_backoff(mut self, min: Duration, max: Duration) -> Self {
        self.min_backoff = min;
        self.max_backoff = max.max(min);
        self
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.min_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// What to do with a response, decided from its status alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Done,
    Retry,
    Fail,
}

/// Success is final. Rate limits and malformed requests are never repeated:
/// retrying a 429 only burns more credits and a 400 will not fix itself.
/// Everything else is treated as transient.
pub fn check_retry(status: StatusCode) -> RetryDecision {
    if status.is_success() {
        RetryDecision::Done
    } else if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::BAD_REQUEST {
        RetryDecision::Fail
    } else {
        RetryDecision::Retry
    }
}

// ─── HttpClient ───────────────────────────────────────────────────────────

/// A JSON-over-HTTP client with an optional credential, a per-request
/// timeout and a [`RetryPolicy`].
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
    timeout: Duration,
}

impl HttpClient {
    /// Build a client. `token` is sent verbatim in the `Authorization`
    /// header of every request.
    pub fn new(token: Option<&str>, policy: RetryPolicy, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(token)
                .map_err(|e| PocketError::InvalidHeader(e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            policy,
            timeout,
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// POST `body` as JSON, applying the retry policy. Returns the first
    /// successful response.
    pub async fn post_json<B>(&self, url: &str, body: &B) -> Result<Response>
    where
        B: Serialize + ?Sized,
    {
        let mut attempt = 0u32;
        loop {
            let resp = self.client.post(url).json(body).send().await?;
            let status = resp.status();
            match check_retry(status) {
                RetryDecision::Done => return Ok(resp),
                RetryDecision::Fail if status == StatusCode::TOO_MANY_REQUESTS => {
                    log_rate_limit(url, &resp);
                    return Err(PocketError::RateLimited {
                        url: url.to_string(),
                    });
                }
                RetryDecision::Fail => return Err(status_error(url, resp).await),
                RetryDecision::Retry if attempt >= self.policy.max_retries => {
                    return Err(status_error(url, resp).await);
                }
                RetryDecision::Retry => {
                    let wait = self.policy.backoff(attempt);
                    attempt += 1;
                    debug!(
                        url,
                        status = status.as_u16(),
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "retrying request"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// POST `body` and decode the JSON response into `T`.
    pub async fn post_for<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.post_json(url, body).await?;
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| PocketError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

async fn status_error(url: &str, resp: Response) -> PocketError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    PocketError::Status {
        url: url.to_string(),
        status,
        body,
    }
}

fn log_rate_limit(url: &str, resp: &Response) {
    let header = |name: &str| {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let limits: Vec<String> = RATE_LIMIT_HEADERS
        .iter()
        .map(|name| format!("{name}={}", header(name)))
        .collect();
    warn!(
        url,
        limits = %limits.join(" "),
        "hitting the API rate limit; consider lowering the query rate"
    );
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5);
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(10), Duration::from_secs(30));
        assert_eq!(policy.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn retry_decisions_follow_status() {
        assert_eq!(check_retry(StatusCode::OK), RetryDecision::Done);
        assert_eq!(check_retry(StatusCode::BAD_REQUEST), RetryDecision::Fail);
        assert_eq!(
            check_retry(StatusCode::TOO_MANY_REQUESTS),
            RetryDecision::Fail
        );
        assert_eq!(
            check_retry(StatusCode::INTERNAL_SERVER_ERROR),
            RetryDecision::Retry
        );
        assert_eq!(check_retry(StatusCode::BAD_GATEWAY), RetryDecision::Retry);
    }

    #[tokio::test]
    async fn sends_token_in_authorization_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/graphql")
            .match_header("authorization", "secret-token")
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let client =
            HttpClient::new(Some("secret-token"), fast_policy(0), Duration::from_secs(5))
                .unwrap();
        let value: serde_json::Value = client
            .post_for(&format!("{}/graphql", server.url()), &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(value["ok"], true);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retried_up_to_max() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rpc")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = HttpClient::new(None, fast_policy(2), Duration::from_secs(5)).unwrap();
        let err = client
            .post_json(&format!("{}/rpc", server.url()), &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PocketError::Status { status: 503, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn bad_request_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rpc")
            .match_body(Matcher::PartialJson(serde_json::json!({"a": 1})))
            .with_status(400)
            .with_body("bad payload")
            .expect(1)
            .create_async()
            .await;

        let client = HttpClient::new(None, fast_policy(3), Duration::from_secs(5)).unwrap();
        let err = client
            .post_json(&format!("{}/rpc", server.url()), &serde_json::json!({"a": 1}))
            .await
            .unwrap_err();
        match err {
            PocketError::Status { status, body, .. } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad payload");
            }
            other => panic!("expected status error, got {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/graphql")
            .with_status(429)
            .with_header("Retry-After", "12")
            .with_header("X-RateLimit-Remaining", "0")
            .expect(1)
            .create_async()
            .await;

        let client = HttpClient::new(Some("t"), fast_policy(3), Duration::from_secs(5)).unwrap();
        let err = client
            .post_json(&format!("{}/graphql", server.url()), &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PocketError::RateLimited { .. }));
        mock.assert_async().await;
    }

    #[test]
    fn invalid_token_is_rejected() {
        let err = HttpClient::new(Some("bad\ntoken"), fast_policy(0), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, PocketError::InvalidHeader(_)));
    }
}
