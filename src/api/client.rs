use crate::api::circuit_breaker::CircuitBreaker;
use crate::config::HttpConfig;
use crate::error::{CounterError, CounterResult};
use crate::metrics::BackendMetrics;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Whether a request may be replayed after a transient failure.
///
/// Increments must never be replayed: a timeout does not tell us whether the
/// backend applied the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    Safe,
    Never,
}

/// HTTP plumbing shared by the REST backends: default headers, bounded retry,
/// status mapping, a circuit breaker, and per-backend metrics.
pub struct RestClient {
    client: Client,
    base_url: String,
    headers: HeaderMap,
    max_retries: u32,
    retry_delay: Duration,
    breaker: CircuitBreaker,
    metrics: Arc<BackendMetrics>,
}

impl RestClient {
    pub fn new(
        base_url: &str,
        headers: HeaderMap,
        http: &HttpConfig,
        metrics: Arc<BackendMetrics>,
    ) -> CounterResult<Self> {
        // Fail fast on an unusable URL
        let _ = reqwest::Url::parse(base_url)
            .map_err(|e| CounterError::InvalidArgument(format!("Invalid URL: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| CounterError::IoError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
            max_retries: http.max_retries,
            retry_delay: Duration::from_millis(http.retry_delay_ms),
            breaker: CircuitBreaker::new(
                http.breaker_threshold,
                Duration::from_secs(http.breaker_timeout_secs),
            ),
            metrics,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn metrics(&self) -> &Arc<BackendMetrics> {
        &self.metrics
    }

    /// Start a request against `path` (relative to the base URL) with the
    /// default headers applied.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, url)
            .headers(self.headers.clone())
    }

    /// Send a request built by `build`, retrying transient failures when
    /// `replay` allows it, and map non-success statuses to errors.
    pub async fn send<F>(
        &self,
        endpoint: &str,
        replay: Replay,
        build: F,
    ) -> CounterResult<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        if !self.breaker.allow() {
            self.metrics.record_failure(endpoint, "circuit open");
            return Err(CounterError::NotReady(format!(
                "Circuit open for {}",
                self.base_url
            )));
        }

        self.metrics.record_request(endpoint);
        let started = Instant::now();

        let result = self.execute_with_retry(endpoint, replay, build).await;
        let result = match result {
            Ok(response) => self.check_response(response).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => {
                self.metrics.record_success(endpoint, started.elapsed());
                if self.breaker.on_success() {
                    self.metrics.record_circuit_breaker_close();
                }
            }
            Err(e) => {
                self.metrics.record_failure(endpoint, &e.to_string());
                // Only an unreachable or failing backend trips the breaker
                let backend_fault = e.is_unavailable()
                    || matches!(e, CounterError::ApiError { status, .. } if *status >= 500);
                if backend_fault {
                    if self.breaker.on_failure() {
                        self.metrics.record_circuit_breaker_open();
                    }
                } else if self.breaker.on_success() {
                    self.metrics.record_circuit_breaker_close();
                }
            }
        }

        result
    }

    /// Execute request with automatic retry for transient failures
    async fn execute_with_retry<F>(
        &self,
        endpoint: &str,
        replay: Replay,
        build: F,
    ) -> CounterResult<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_retries = match replay {
            Replay::Safe => self.max_retries,
            Replay::Never => 0,
        };
        let mut last_error = None;

        for attempt in 0..=max_retries {
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() && attempt < max_retries {
                        warn!(
                            endpoint,
                            status = status.as_u16(),
                            attempt = attempt + 1,
                            "Server error, retrying"
                        );
                        self.metrics.record_retry(endpoint, attempt + 1);
                        sleep(self.retry_delay * (attempt + 1)).await;
                        continue;
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS && attempt < max_retries {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| self.retry_delay * (attempt + 1));

                        warn!(
                            endpoint,
                            status = status.as_u16(),
                            retry_after_secs = retry_after.as_secs(),
                            attempt = attempt + 1,
                            "Rate limited"
                        );
                        self.metrics.record_retry(endpoint, attempt + 1);
                        sleep(retry_after).await;
                        continue;
                    }

                    return Ok(response);
                }
                Err(e) => {
                    let error: CounterError = e.into();
                    if error.is_transient() && attempt < max_retries {
                        warn!(endpoint, attempt = attempt + 1, error = %error, "Retrying");
                        self.metrics.record_retry(endpoint, attempt + 1);
                        sleep(self.retry_delay * (attempt + 1)).await;
                        last_error = Some(error);
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| CounterError::NotReady("Retry limit exceeded".to_string())))
    }

    /// Helper to check response status and convert errors
    async fn check_response(&self, response: reqwest::Response) -> CounterResult<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let message = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                return Err(CounterError::NetworkError(format!(
                    "Failed to read error response body: {}",
                    e
                )));
            }
        };

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(CounterError::Unauthorized(format!(
                    "Backend rejected credentials: {}",
                    if message.is_empty() {
                        "Invalid credentials".to_string()
                    } else {
                        message
                    }
                )))
            }
            _ => {
                debug!(status = status.as_u16(), body = %message, "Backend returned error");
                Err(CounterError::ApiError {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }

    /// Generic GET request that returns JSON
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
    ) -> CounterResult<T> {
        let response = self
            .send(endpoint, Replay::Safe, || self.request(Method::GET, path))
            .await?;
        Ok(response.json().await?)
    }

    /// Generic POST request with JSON body that returns JSON
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        body: &B,
        replay: Replay,
    ) -> CounterResult<T> {
        let response = self
            .send(endpoint, replay, || {
                self.request(Method::POST, path).json(body)
            })
            .await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_http() -> HttpConfig {
        HttpConfig {
            timeout_secs: 5,
            max_retries: 2,
            retry_delay_ms: 1,
            breaker_threshold: 2,
            breaker_timeout_secs: 60,
        }
    }

    fn client_for(server: &MockServer) -> RestClient {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "secret".parse().unwrap());
        RestClient::new(
            &server.uri(),
            headers,
            &fast_http(),
            Arc::new(BackendMetrics::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result = RestClient::new(
            "not a url",
            HeaderMap::new(),
            &fast_http(),
            Arc::new(BackendMetrics::new()),
        );
        assert!(matches!(result, Err(CounterError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_default_headers_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let body: serde_json::Value = client.get_json("/ping", "/ping").await.unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_retry_on_server_error_when_replay_safe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(1)))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let value: u64 = client.get_json("/flaky", "/flaky").await.unwrap();
        assert_eq!(value, 1);
        assert_eq!(
            client
                .metrics()
                .retry_count
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_never_replay_sends_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/incr"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result: CounterResult<serde_json::Value> = client
            .post_json("/incr", "/incr", &serde_json::json!({}), Replay::Never)
            .await;
        assert!(matches!(
            result,
            Err(CounterError::ApiError { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let result: CounterResult<serde_json::Value> = client.get_json("/x", "/x").await;
        assert!(matches!(result, Err(CounterError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_breaker_opens_and_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        for _ in 0..2 {
            let result: CounterResult<serde_json::Value> = client
                .post_json("/w", "/w", &serde_json::json!({}), Replay::Never)
                .await;
            assert!(result.is_err());
        }

        // Third call never reaches the server
        let result: CounterResult<serde_json::Value> = client
            .post_json("/w", "/w", &serde_json::json!({}), Replay::Never)
            .await;
        assert!(matches!(result, Err(CounterError::NotReady(_))));
    }

    #[tokio::test]
    async fn test_client_errors_do_not_trip_breaker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
            .expect(3)
            .mount(&server)
            .await;

        let client = client_for(&server);
        for _ in 0..3 {
            let result: CounterResult<serde_json::Value> = client.get_json("/x", "/x").await;
            assert!(matches!(
                result,
                Err(CounterError::ApiError { status: 400, .. })
            ));
        }
    }
}
