//! API gateway: every remote call routes through here.
//!
//! Order of consultation per call: circuit breaker, deduplicator (safe
//! methods only), then the retry loop with a per-attempt timeout. Outcomes
//! feed back into the breaker and the metrics window. A breaker denial
//! fails immediately with the current breaker status and never touches
//! the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use relaydeck_core::circuit::{CircuitBreakerStatus, CircuitTransition};
use relaydeck_core::error::{ApiError, ApiResult};
use relaydeck_core::health::BackendHealthReport;
use relaydeck_core::metric::{ApiCallMetric, MetricsSummary};
use relaydeck_core::traits::AuthProvider;
use relaydeck_resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use relaydeck_resilience::dedup::{DedupConfig, DedupStats, RequestDeduplicator};
use relaydeck_resilience::metrics::MetricsCollector;
use relaydeck_resilience::retry::{RetryConfig, method_is_idempotent};

/// Cap on error-message bytes lifted from a response body.
const ERROR_BODY_LIMIT: usize = 256;

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Backend base URL, e.g. `https://api.relaydeck.app`.
    pub base_url: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// User agent string (`None` disables the header).
    pub user_agent: Option<String>,
    /// Headers attached to every request.
    pub headers: HashMap<String, String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(15),
            user_agent: Some(format!("Relaydeck/{}", env!("CARGO_PKG_VERSION"))),
            headers: HashMap::new(),
        }
    }
}

/// Parsed response body.
///
/// JSON when the content type says so, raw text otherwise, `Empty` for
/// bodyless responses.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Parsed JSON document.
    Json(Value),
    /// Non-JSON body, as text.
    Text(String),
    /// The response carried no body.
    Empty,
}

impl Payload {
    /// Deserialize a JSON payload into `T`.
    pub fn into_typed<T: DeserializeOwned>(self) -> ApiResult<T> {
        match self {
            Self::Json(value) => serde_json::from_value(value)
                .map_err(|err| ApiError::Validation(format!("unexpected body shape: {err}"))),
            Self::Text(_) => Err(ApiError::Validation("expected a JSON body".into())),
            Self::Empty => Err(ApiError::Validation("response body was empty".into())),
        }
    }
}

/// Outcome of one logical call, as shared through the deduplicator.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    /// HTTP status of the final attempt.
    pub status: u16,
    /// Parsed body.
    pub payload: Payload,
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// HTTP method (defaults to GET).
    pub method: Method,
    /// JSON request body.
    pub body: Option<Value>,
    /// Extra headers for this call.
    pub headers: HashMap<String, String>,
    /// Per-attempt timeout override.
    pub timeout: Option<Duration>,
    /// Retry cap override (`Some(0)` disables retries for this call).
    pub max_retries: Option<u32>,
    /// Opt a non-idempotent call into the retry loop.
    pub retry_non_idempotent: bool,
    /// Caller-side cancellation, honored at the next suspension point.
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    /// Options for a plain GET.
    pub fn get() -> Self {
        Self::default()
    }

    /// Options for a JSON POST.
    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::default()
        }
    }

    /// Options for a DELETE.
    pub fn delete() -> Self {
        Self {
            method: Method::DELETE,
            ..Self::default()
        }
    }

    /// Attach a cancellation token.
    pub fn cancellable(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

struct GatewayInner {
    http: reqwest::Client,
    base_url: Url,
    config: GatewayConfig,
    retry: RetryConfig,
    auth: Arc<dyn AuthProvider>,
    breaker: Mutex<CircuitBreaker>,
    dedup: RequestDeduplicator<GatewayResponse>,
    metrics: Arc<MetricsCollector>,
}

/// The orchestrating entry point for all backend calls.
///
/// Cheap to clone; clones share the breaker, deduplicator, and metrics
/// window.
#[derive(Clone)]
pub struct ApiGateway {
    inner: Arc<GatewayInner>,
}

impl std::fmt::Debug for ApiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiGateway")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl ApiGateway {
    /// Build a gateway from configuration and an auth provider.
    pub fn new(
        config: GatewayConfig,
        retry: RetryConfig,
        circuit: CircuitBreakerConfig,
        dedup: DedupConfig,
        auth: Arc<dyn AuthProvider>,
    ) -> ApiResult<Self> {
        let mut base_url = Url::parse(&config.base_url).map_err(|err| {
            ApiError::Configuration(format!("invalid base URL {:?}: {err}", config.base_url))
        })?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent);
        }
        let http = builder
            .build()
            .map_err(|err| ApiError::Configuration(err.to_string()))?;

        Ok(Self {
            inner: Arc::new(GatewayInner {
                http,
                base_url,
                config,
                retry,
                auth,
                breaker: Mutex::new(CircuitBreaker::new(circuit)),
                dedup: RequestDeduplicator::new(dedup),
                metrics: Arc::new(MetricsCollector::with_defaults()),
            }),
        })
    }

    /// Build a gateway with default configuration everywhere.
    pub fn with_defaults(auth: Arc<dyn AuthProvider>) -> ApiResult<Self> {
        Self::new(
            GatewayConfig::default(),
            RetryConfig::default(),
            CircuitBreakerConfig::default(),
            DedupConfig::default(),
            auth,
        )
    }

    /// Issue a call and deserialize the JSON response body.
    pub async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> ApiResult<T> {
        self.dispatch(path, options).await?.payload.into_typed()
    }

    /// Issue a call and return the parsed body without a target type.
    pub async fn request_raw(&self, path: &str, options: RequestOptions) -> ApiResult<Payload> {
        Ok(self.dispatch(path, options).await?.payload)
    }

    /// Reachability probe: `GET /health` with retries disabled.
    ///
    /// Goes through the breaker like any other call, so after the Open
    /// cooldown the probe itself becomes the half-open trial. Returns the
    /// round-trip latency in milliseconds.
    pub async fn ping(&self) -> ApiResult<u64> {
        let started = Instant::now();
        let options = RequestOptions {
            max_retries: Some(0),
            ..RequestOptions::default()
        };
        self.request_raw("health", options).await?;
        Ok(started.elapsed().as_millis() as u64)
    }

    /// Authenticated detailed health report with per-component status.
    pub async fn detailed_health(&self) -> ApiResult<BackendHealthReport> {
        let options = RequestOptions {
            max_retries: Some(0),
            ..RequestOptions::default()
        };
        self.request("health/detailed", options).await
    }

    /// Read-only projection over the rolling metrics window.
    pub fn metrics_summary(&self) -> MetricsSummary {
        self.inner.metrics.summary()
    }

    /// The most recent `n` call records.
    pub fn recent_metrics(&self, n: usize) -> Vec<ApiCallMetric> {
        self.inner.metrics.recent(n)
    }

    /// Current breaker snapshot.
    pub async fn breaker_status(&self) -> CircuitBreakerStatus {
        self.inner.breaker.lock().await.status()
    }

    /// Subscribe to breaker state transitions.
    pub async fn subscribe_breaker(&self) -> mpsc::Receiver<CircuitTransition> {
        self.inner.breaker.lock().await.subscribe()
    }

    /// Deduplicator statistics.
    pub fn dedup_stats(&self) -> DedupStats {
        self.inner.dedup.stats()
    }

    /// Route a call through the deduplicator when the method is safe,
    /// otherwise execute it directly.
    async fn dispatch(&self, path: &str, options: RequestOptions) -> ApiResult<GatewayResponse> {
        let method = options.method.clone();
        if !method_is_idempotent(method.as_str()) {
            return self.execute_with_retry(path, options).await;
        }

        let key = format!("{method} {path}");
        let started = Instant::now();
        let cancel = options.cancel.clone();

        let gateway = self.clone();
        let owned_path = path.to_string();
        // The producing call must not inherit one caller's cancellation:
        // a cancelled originator would poison every joiner.
        let mut producer_options = options;
        producer_options.cancel = None;

        let (call, joined) = self.inner.dedup.join_or_insert(&key, move || async move {
            gateway.execute_with_retry(&owned_path, producer_options).await
        });

        let result = match cancel {
            Some(token) => tokio::select! {
                () = token.cancelled() => Err(ApiError::Cancelled),
                outcome = call => outcome,
            },
            None => call.await,
        };

        if joined {
            // The originator records the real network metric; joiners
            // record their share so cache-hit rate stays meaningful.
            self.inner.metrics.record(ApiCallMetric {
                path: path.to_string(),
                method: method.to_string(),
                status: match &result {
                    Ok(response) => Some(response.status),
                    Err(err) => err.status(),
                },
                duration_ms: started.elapsed().as_millis() as u64,
                retry_count: 0,
                from_cache: true,
                timestamp: SystemTime::now(),
            });
        }
        result
    }

    /// Run the retry loop for one logical call and record its metric.
    async fn execute_with_retry(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> ApiResult<GatewayResponse> {
        let started = Instant::now();
        let mut retries = 0u32;
        let result = self.run_attempt_loop(path, &options, &mut retries).await;

        self.inner.metrics.record(ApiCallMetric {
            path: path.to_string(),
            method: options.method.to_string(),
            status: match &result {
                Ok(response) => Some(response.status),
                Err(err) => err.status(),
            },
            duration_ms: started.elapsed().as_millis() as u64,
            retry_count: retries,
            from_cache: false,
            timestamp: SystemTime::now(),
        });
        result
    }

    async fn run_attempt_loop(
        &self,
        path: &str,
        options: &RequestOptions,
        retries: &mut u32,
    ) -> ApiResult<GatewayResponse> {
        self.check_permission().await?;

        let url = self.join_url(path)?;
        let retry_allowed =
            method_is_idempotent(options.method.as_str()) || options.retry_non_idempotent;
        let max_retries = options.max_retries.unwrap_or(self.inner.retry.max_retries);

        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                let delay = self.inner.retry.calculate_backoff(attempt - 1);
                trace!(%url, attempt, ?delay, "backing off before retry");
                self.wait(delay, options.cancel.as_ref()).await?;
                // A trip mid-loop aborts immediately rather than burning
                // the remaining attempts against a known-bad backend.
                self.check_permission().await?;
                *retries += 1;
            }

            match self.perform_attempt(&url, options).await {
                Ok(response) => {
                    self.report_success().await;
                    return Ok(response);
                }
                Err(err) => {
                    if err.counts_as_breaker_failure() {
                        self.report_failure().await;
                    }
                    if err.is_retryable() && retry_allowed && attempt < max_retries {
                        debug!(%url, attempt, error = %err, "retryable failure");
                        attempt += 1;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// One network attempt, bounded by the per-attempt timeout and the
    /// caller's cancellation token.
    async fn perform_attempt(
        &self,
        url: &Url,
        options: &RequestOptions,
    ) -> ApiResult<GatewayResponse> {
        let mut request = self.inner.http.request(options.method.clone(), url.clone());
        for (name, value) in &self.inner.config.headers {
            request = request.header(name, value);
        }
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }
        if let Some(token) = self.inner.auth.bearer_token().await? {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        let timeout = options.timeout.unwrap_or(self.inner.config.timeout);
        let operation = format!("{} {}", options.method, url.path());

        let attempt = async {
            let response = request
                .send()
                .await
                .map_err(|err| classify_reqwest_error(&err, &operation, timeout))?;
            let status = response.status();
            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let body = response
                .text()
                .await
                .map_err(|err| classify_reqwest_error(&err, &operation, timeout))?;

            if !status.is_success() {
                return Err(ApiError::Http {
                    status: status.as_u16(),
                    message: error_message(status, &body),
                });
            }
            Ok(GatewayResponse {
                status: status.as_u16(),
                payload: parse_payload(&content_type, body)?,
            })
        };

        let bounded = tokio::time::timeout(timeout, attempt);
        let outcome = match options.cancel.as_ref() {
            Some(token) => tokio::select! {
                () = token.cancelled() => return Err(ApiError::Cancelled),
                outcome = bounded => outcome,
            },
            None => bounded.await,
        };
        match outcome {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout { operation, timeout }),
        }
    }

    async fn check_permission(&self) -> ApiResult<()> {
        let mut breaker = self.inner.breaker.lock().await;
        if breaker.is_call_permitted() {
            Ok(())
        } else {
            let status = breaker.status();
            debug!(state = %status.state, "call denied by circuit breaker");
            Err(ApiError::CircuitOpen(status))
        }
    }

    async fn report_success(&self) {
        self.inner.breaker.lock().await.on_success();
    }

    async fn report_failure(&self) {
        let tripped = self.inner.breaker.lock().await.on_error();
        if tripped {
            warn!("circuit breaker tripped open");
            self.inner.metrics.record_breaker_trip();
        }
    }

    async fn wait(&self, delay: Duration, cancel: Option<&CancellationToken>) -> ApiResult<()> {
        match cancel {
            Some(token) => tokio::select! {
                () = token.cancelled() => Err(ApiError::Cancelled),
                () = tokio::time::sleep(delay) => Ok(()),
            },
            None => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    fn join_url(&self, path: &str) -> ApiResult<Url> {
        self.inner
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ApiError::Configuration(format!("invalid request path {path:?}: {err}")))
    }
}

fn classify_reqwest_error(err: &reqwest::Error, operation: &str, timeout: Duration) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout {
            operation: operation.to_string(),
            timeout,
        }
    } else {
        ApiError::Transport(err.to_string())
    }
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    if body.is_empty() {
        status.canonical_reason().unwrap_or("unknown").to_string()
    } else {
        body.chars().take(ERROR_BODY_LIMIT).collect()
    }
}

fn parse_payload(content_type: &str, body: String) -> ApiResult<Payload> {
    if body.is_empty() {
        return Ok(Payload::Empty);
    }
    if content_type.starts_with("application/json") || content_type.contains("+json") {
        let value = serde_json::from_str(&body)
            .map_err(|err| ApiError::Validation(format!("malformed JSON body: {err}")))?;
        Ok(Payload::Json(value))
    } else {
        Ok(Payload::Text(body))
    }
}
