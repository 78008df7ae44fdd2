//! The HTTP transport seam and its reqwest-backed implementation.

use crate::error::DbError;
use crate::retry::RetryConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use http::{HeaderMap, Method};
use std::time::Duration;

/// A streamed response body. Dropping it releases the underlying response.
pub type ResponseBody = BoxStream<'static, Result<Bytes, DbError>>;

/// An HTTP request described as plain data.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

/// The status and (possibly absent) body of a response.
pub struct TransportResponse {
    pub status: u16,
    pub body: Option<ResponseBody>,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl TransportResponse {
    /// Read the whole body as text, or `None` when the response has no body.
    pub async fn text(self) -> Result<Option<String>, DbError> {
        let Some(body) = self.body else {
            return Ok(None);
        };
        let bytes: Vec<u8> = body
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(&chunk);
                Ok(acc)
            })
            .await?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Performs HTTP requests for a [`Client`](crate::Client).
///
/// Implementations own connection management, TLS and any transport-level
/// retries. Status codes are returned as-is; mapping them to errors is the
/// client's job.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, DbError>;
}

/// Default transport built on a pooled `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
    retry: Option<RetryConfig>,
}

impl ReqwestTransport {
    /// Build a transport with an optional per-request timeout.
    pub fn new(timeout: Option<Duration>) -> Result<Self, DbError> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90));

        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            inner: builder.build()?,
            retry: None,
        })
    }

    /// Retry connection failures of idempotent requests (GET, DELETE).
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    async fn send_once(&self, request: &TransportRequest) -> Result<reqwest::Response, DbError> {
        let mut req = self
            .inner
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            req = req.body(body.clone());
        }

        Ok(req.send().await?)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, DbError> {
        let idempotent = matches!(request.method, Method::GET | Method::DELETE);
        let mut attempt = 0;
        let mut delay = Duration::ZERO;

        let resp = loop {
            match self.send_once(&request).await {
                Ok(resp) => break resp,
                Err(err) => match &self.retry {
                    Some(retry) if idempotent && err.is_retryable() && retry.should_retry(attempt) => {
                        delay = retry.next_backoff(attempt, delay);
                        attempt += 1;
                        #[cfg(feature = "tracing")]
                        tracing::warn!(method = %request.method, attempt, ?delay, error = %err, "retrying request");
                        tokio::time::sleep(delay).await;
                    }
                    _ => return Err(err),
                },
            }
        };

        let status = resp.status().as_u16();
        let body = if status == 204 || resp.content_length() == Some(0) {
            None
        } else {
            Some(resp.bytes_stream().map_err(DbError::from).boxed())
        };

        Ok(TransportResponse { status, body })
    }
}
