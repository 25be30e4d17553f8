//! Signed HTTP client with bounded retry, plus audit report storage.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::warn;
use unitmap_core::{ReconcileSettings, DEFAULT_BACKOFF_UNIT, DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT};
use url::Url;

pub mod report;
pub mod signing;

pub use report::{AuditReport, ReportError, DEFAULT_REPORT_PATH};
pub use signing::{ApiCredentials, CredentialsError, HmacSigner, RequestSigner};

pub const CRATE_NAME: &str = "unitmap-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Transport-level failures are worth another attempt; anything else is not.
pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Fixed attempt cap with linear backoff: attempt `n` failing waits `n * backoff_unit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("gave up after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
    #[error("attempt {attempt} failed: {source}")]
    Fatal {
        attempt: u32,
        #[source]
        source: E,
    },
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the attempt cap is hit.
///
/// `op` receives the 1-based attempt number. Every retried failure is logged; the final
/// failure is only returned.
pub async fn retry_with_backoff<T, E, Op, Fut, S, SFut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: Op,
    is_retryable: impl Fn(&E) -> bool,
    mut sleep: S,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + 'static,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    S: FnMut(Duration) -> SFut,
    SFut: Future<Output = ()>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(source) if !is_retryable(&source) => {
                return Err(RetryError::Fatal { attempt, source });
            }
            Err(source) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    source,
                });
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    request = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "request attempt failed; retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl HttpClientConfig {
    pub fn from_settings(settings: &ReconcileSettings) -> Self {
        Self {
            timeout: settings.request_timeout,
            user_agent: None,
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                backoff_unit: settings.backoff_unit,
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub json: Option<JsonValue>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: JsonValue) -> Self {
        self.json = Some(body);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A response that was received, whatever its status.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub url: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{method} {url} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        method: Method,
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} {url} failed: {source}")]
    Request {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("signing {method} {url}: {message}")]
    Signing {
        method: Method,
        url: String,
        message: String,
    },
    #[error("invalid url `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Signing(String),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(err) => classify_reqwest_error(err) == RetryDisposition::Retryable,
            Self::Signing(_) => false,
        }
    }
}

#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    timeout: Duration,
    retry: RetryPolicy,
    signer: Option<Arc<dyn RequestSigner>>,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            timeout: config.timeout,
            retry: config.retry,
            signer: None,
        })
    }

    /// Attaches a signer whose `Authorization` value is added to every attempt.
    pub fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<HttpResponse, TransportError> {
        self.send(Method::GET, url, options).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<HttpResponse, TransportError> {
        self.send(Method::POST, url, options).await
    }

    pub async fn put(&self, url: &str, options: RequestOptions) -> Result<HttpResponse, TransportError> {
        self.send(Method::PUT, url, options).await
    }

    /// Issues one logical request. Transport failures are retried per the retry policy;
    /// error statuses come back as a normal [`HttpResponse`].
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        let mut target = Url::parse(url).map_err(|source| TransportError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        if !options.query.is_empty() {
            target
                .query_pairs_mut()
                .extend_pairs(options.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        let timeout = options.timeout.unwrap_or(self.timeout);
        let label = format!("{method} {target}");

        let outcome = retry_with_backoff(
            &self.retry,
            &label,
            |_attempt| self.attempt(&method, &target, options.json.as_ref(), timeout),
            AttemptError::is_retryable,
            tokio::time::sleep,
        )
        .await;

        outcome.map_err(|err| {
            let url = target.to_string();
            let method = method.clone();
            match err {
                RetryError::Exhausted { attempts, source } => match source {
                    AttemptError::Http(source) => TransportError::Exhausted {
                        method,
                        url,
                        attempts,
                        source,
                    },
                    AttemptError::Signing(message) => TransportError::Signing { method, url, message },
                },
                RetryError::Fatal { source, .. } => match source {
                    AttemptError::Http(source) => TransportError::Request { method, url, source },
                    AttemptError::Signing(message) => TransportError::Signing { method, url, message },
                },
            }
        })
    }

    async fn attempt(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&JsonValue>,
        timeout: Duration,
    ) -> Result<HttpResponse, AttemptError> {
        let mut request = self.client.request(method.clone(), url.clone()).timeout(timeout);

        if let Some(signer) = &self.signer {
            let authorization = signer
                .authorization(method, url)
                .map_err(|err| AttemptError::Signing(format!("{err:#}")))?;
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request.send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        let body = resp.bytes().await?.to_vec();
        Ok(HttpResponse {
            status,
            url: final_url,
            body,
        })
    }
}
