//! Database client, configuration and single-key operations.

use crate::codec::encode_component;
use crate::error::{check_status, DbError, InvalidHeaderError};
use crate::keys::KeyStream;
use crate::retry::RetryConfig;
use crate::transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
use crate::values::ValueStream;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::Method;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding the database URL.
pub const ENV_DB_URL: &str = "REPLIT_DB_URL";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A Replit Database client.
///
/// The client is cloneable and can be shared across tasks. Every clone
/// uses the same transport and therefore the same connection pool.
#[derive(Clone)]
pub struct Client {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) base_url: String,
    pub(crate) default_headers: HeaderMap,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The URL embeds the access token, so it is never printed.
        f.debug_struct("Client")
            .field("transport", &self.transport)
            .field("default_headers", &self.default_headers)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client for the given database URL with default settings.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client fails to build. Use `Client::builder()`
    /// for fallible construction.
    pub fn new(url: impl Into<String>) -> Self {
        ClientBuilder::new()
            .base_url(url)
            .build()
            .expect("Failed to build default HTTP client")
    }

    /// Create a client for the URL in `REPLIT_DB_URL`.
    pub fn from_env() -> Result<Self, DbError> {
        ClientBuilder::new().base_url_from_env().build()
    }

    /// Create a client builder for customization.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The database URL requests are made against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Set `key` to `value`, overwriting any previous value.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), DbError> {
        let body = format!("{}={}", encode_component(key), encode_component(value));
        let mut request = self.request(Method::POST, self.base_url.clone());
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        request.body = Some(Bytes::from(body));

        self.execute(request).await?;
        Ok(())
    }

    /// Get the value stored under `key`.
    ///
    /// A response without a body yields an empty string. Whether a missing
    /// key is reported as [`DbError::NotFound`] or as an empty value is up to
    /// the store; the client does not tell the two apart.
    ///
    /// The body is decoded as UTF-8; invalid sequences are replaced with
    /// U+FFFD rather than failing the call.
    pub async fn get(&self, key: &str) -> Result<String, DbError> {
        let request = self.request(Method::GET, self.key_url(key));
        let resp = self.execute(request).await?;
        Ok(resp.text().await?.unwrap_or_default())
    }

    /// Delete `key`.
    pub async fn delete(&self, key: &str) -> Result<(), DbError> {
        let request = self.request(Method::DELETE, self.key_url(key));
        self.execute(request).await?;
        Ok(())
    }

    /// List the keys starting with `prefix` (`""` lists everything).
    ///
    /// No network request is made until the first
    /// [`next_key`](KeyStream::next_key) call.
    pub fn list_keys(&self, prefix: impl Into<String>) -> KeyStream {
        KeyStream::new(self.clone(), prefix.into())
    }

    /// Iterate over the values of every key, in listing order.
    ///
    /// Each value is fetched when the stream is advanced.
    pub fn get_all_values(&self) -> ValueStream {
        ValueStream::new(self.clone(), self.list_keys(""))
    }

    pub(crate) fn key_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, encode_component(key))
    }

    pub(crate) fn list_url(&self, prefix: &str) -> String {
        format!(
            "{}?encode=true&prefix={}",
            self.base_url,
            encode_component(prefix)
        )
    }

    pub(crate) fn request(&self, method: Method, url: String) -> TransportRequest {
        let mut request = TransportRequest::new(method, url);
        request.headers = self.default_headers.clone();
        request
    }

    /// Send a request and map its status. The body is left unread.
    pub(crate) async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, DbError> {
        #[cfg(feature = "tracing")]
        tracing::debug!(method = %request.method, "sending request");

        let path = request
            .url
            .strip_prefix(self.base_url.as_str())
            .unwrap_or_default()
            .to_string();
        let resp = self.transport.send(request).await?;
        check_status(resp.status, &path)?;
        Ok(resp)
    }
}

/// Builder for configuring a Client.
#[must_use = "builders do nothing unless you call .build()"]
pub struct ClientBuilder {
    base_url: Option<String>,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    retry: Option<RetryConfig>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout: None,
            retry: None,
            transport: None,
        }
    }

    /// Set the database URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.base_url = Some(url.trim_end_matches('/').to_string());
        self
    }

    /// Take the database URL from `REPLIT_DB_URL`, if it is set.
    pub fn base_url_from_env(self) -> Self {
        match std::env::var(ENV_DB_URL) {
            Ok(url) if !url.is_empty() => self.base_url(url),
            _ => self,
        }
    }

    /// Add a default header for all requests.
    ///
    /// Invalid header names or values are silently ignored. Use
    /// [`try_default_header`](Self::try_default_header) if you need error handling.
    pub fn default_header(mut self, key: &str, value: &str) -> Self {
        if let (Ok(name), Ok(val)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.default_headers.insert(name, val);
        }
        self
    }

    /// Add a default header, returning an error if the name or value is invalid.
    pub fn try_default_header(
        mut self,
        key: &str,
        value: &str,
    ) -> std::result::Result<Self, InvalidHeaderError> {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| InvalidHeaderError::InvalidName(key.to_string()))?;
        let val = HeaderValue::from_str(value)
            .map_err(|_| InvalidHeaderError::InvalidValue(value.to_string()))?;
        self.default_headers.insert(name, val);
        Ok(self)
    }

    /// Set all default headers.
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    /// Set the request timeout of the default transport.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry connection failures of reads and deletes in the default transport.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Use a custom transport instead of reqwest.
    ///
    /// `timeout` and `retry` only configure the default transport and are
    /// ignored when one is supplied here.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Build the client.
    ///
    /// Fails with [`DbError::MissingBaseUrl`] if no URL was configured, or if
    /// the underlying HTTP client fails to build.
    pub fn build(self) -> Result<Client, DbError> {
        let base_url = self.base_url.ok_or(DbError::MissingBaseUrl)?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let mut transport = ReqwestTransport::new(self.timeout)?;
                if let Some(retry) = self.retry {
                    transport = transport.with_retry(retry);
                }
                Arc::new(transport)
            }
        };

        Ok(Client {
            transport,
            base_url,
            default_headers: self.default_headers,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
