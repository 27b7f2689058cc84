// Resilient client - one retry/timeout policy for every outbound API
// Used by the gateway, classifier, spreadsheet and file storage clients

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::error::ApiError;

/// Attempt count, per-attempt timeout and pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    /// Zero means immediate retry.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            timeout: Duration::from_secs(10),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResilientClient {
    http: Client,
    policy: RetryPolicy,
}

impl ResilientClient {
    pub fn new(policy: RetryPolicy) -> Self {
        ResilientClient {
            http: Client::new(),
            policy,
        }
    }

    /// Send a request built by `build`, retrying retryable failures.
    ///
    /// `build` is called once per attempt because a `RequestBuilder` is
    /// consumed by `send`. Non-retryable failures (4xx other than 429) are
    /// returned after the first attempt.
    pub async fn send<F>(&self, service: &'static str, build: F) -> Result<Response, ApiError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut last = None;

        for attempt in 1..=attempts {
            match self.attempt(build(&self.http)).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(service, attempt, error = %e, "outbound call rejected");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(service, attempt, error = %e, "outbound call failed");
                    last = Some(e);
                }
            }

            if attempt < attempts && !self.policy.delay.is_zero() {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        Err(ApiError::Exhausted {
            service,
            attempts,
            last: Box::new(last.unwrap_or(ApiError::Timeout)),
        })
    }

    /// `send` followed by JSON decoding of the body.
    pub async fn send_json<T, F>(&self, service: &'static str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        let response = self.send(service, build).await?;
        let bytes = response.bytes().await.map_err(map_transport)?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn attempt(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request
            .timeout(self.policy.timeout)
            .send()
            .await
            .map_err(map_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status { status, body })
    }
}

/// Transport errors drop the request URL: query strings may carry credentials.
fn map_transport(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Http(e.without_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            timeout: Duration::from_millis(200),
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/send"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .expect(2)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/send"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        let client = ResilientClient::new(fast_policy());
        let url = format!("{}/send", server.uri());
        let response = client.send("test", |http| http.post(&url)).await.unwrap();

        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad token"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ResilientClient::new(fast_policy());
        let url = format!("{}/send", server.uri());
        let err = client.send("test", |http| http.post(&url)).await.unwrap_err();

        match err {
            ApiError::Status { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad token");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_after_three_attempts() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(600)))
            .expect(3)
            .mount(&server)
            .await;

        let client = ResilientClient::new(fast_policy());
        let url = format!("{}/slow", server.uri());
        let err = client.send("slow-api", |http| http.get(&url)).await.unwrap_err();

        match err {
            ApiError::Exhausted { service, attempts, last } => {
                assert_eq!(service, "slow-api");
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ApiError::Timeout));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_transport_errors_omit_the_url() {
        // Bind then release a port so the connection is refused
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = format!("http://127.0.0.1:{port}/send?token=s3cret");

        let client = ResilientClient::new(fast_policy());
        let err = client.send("test", |http| http.get(&url)).await.unwrap_err();

        assert!(matches!(err, ApiError::Exhausted { .. }));
        assert!(!format!("{err:?}").contains("s3cret"));
        assert!(!err.to_string().contains("s3cret"));
    }

    #[tokio::test]
    async fn test_send_json_reports_decode_errors() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = ResilientClient::new(fast_policy());
        let url = server.uri();
        let err = client
            .send_json::<serde_json::Value, _>("test", |http| http.get(&url))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Decode(_)));
    }
}
