//! In-process implementation of the database's HTTP contract.
//!
//! [`MemoryTransport`] answers the same requests a real database does,
//! backed by a sorted map, and records enough about each exchange to check
//! how the client behaves: which requests were sent and how many response
//! bodies are still alive. Failures and delays can be injected per method
//! or key.

use crate::client::Client;
use crate::codec::{decode_form_component, decode_key, encode_component};
use crate::error::DbError;
use crate::transport::{Transport, TransportRequest, TransportResponse};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use http::{HeaderMap, Method};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Base URL of a client returned by [`MemoryTransport::client`].
pub const MEMORY_URL: &str = "memory://replit-db";

/// An in-memory database reachable through the [`Transport`] trait.
///
/// Clones share the same store.
///
/// ```
/// use replit_db::MemoryTransport;
///
/// # tokio_test::block_on(async {
/// let store = MemoryTransport::new();
/// let client = store.client();
/// client.set("greeting", "hello").await.unwrap();
/// assert_eq!(client.get("greeting").await.unwrap(), "hello");
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<BTreeMap<String, String>>,
    requests: Mutex<Vec<TransportRequest>>,
    faults: Mutex<Vec<Fault>>,
    stalls: Mutex<Vec<Stall>>,
    listing_override: Mutex<Option<Vec<u8>>>,
    chunk_size: AtomicUsize,
    open_bodies: Arc<AtomicUsize>,
}

#[derive(Debug)]
struct Fault {
    method: Method,
    key: Option<String>,
    status: u16,
}

#[derive(Debug)]
struct Stall {
    method: Method,
    key: Option<String>,
    delay: Duration,
}

/// What a request addresses once the base URL is stripped.
enum Target {
    Base,
    Key(String),
    Listing { prefix: String },
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client talking to this store.
    pub fn client(&self) -> Client {
        Client {
            transport: Arc::new(self.clone()),
            base_url: MEMORY_URL.to_string(),
            default_headers: HeaderMap::new(),
        }
    }

    /// Store a value without going through a request.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.entries.lock().insert(key.into(), value.into());
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.inner.entries.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    /// Number of response bodies handed out and not yet dropped.
    pub fn open_bodies(&self) -> usize {
        self.inner.open_bodies.load(Ordering::SeqCst)
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.inner.requests.lock().clone()
    }

    pub fn clear_requests(&self) {
        self.inner.requests.lock().clear();
    }

    /// Answer every `method` request with `status` until faults are cleared.
    pub fn fail(&self, method: Method, status: u16) {
        self.inner.faults.lock().push(Fault {
            method,
            key: None,
            status,
        });
    }

    /// Answer `method` requests for `key` with `status` until faults are cleared.
    pub fn fail_key(&self, method: Method, key: impl Into<String>, status: u16) {
        self.inner.faults.lock().push(Fault {
            method,
            key: Some(key.into()),
            status,
        });
    }

    /// Hold every `method` request for `delay` before answering it.
    pub fn stall(&self, method: Method, delay: Duration) {
        self.inner.stalls.lock().push(Stall {
            method,
            key: None,
            delay,
        });
    }

    /// Hold `method` requests addressed to `key` for `delay` before answering.
    pub fn stall_key(&self, method: Method, key: impl Into<String>, delay: Duration) {
        self.inner.stalls.lock().push(Stall {
            method,
            key: Some(key.into()),
            delay,
        });
    }

    /// Remove injected failures and delays.
    pub fn clear_faults(&self) {
        self.inner.faults.lock().clear();
        self.inner.stalls.lock().clear();
    }

    /// Serve `body` verbatim for every listing request.
    pub fn override_listing(&self, body: impl Into<Vec<u8>>) {
        *self.inner.listing_override.lock() = Some(body.into());
    }

    /// Split response bodies into chunks of `size` bytes (0 sends one chunk).
    pub fn chunk_size(&self, size: usize) {
        self.inner.chunk_size.store(size, Ordering::SeqCst);
    }

    fn fault_for(&self, method: &Method, key: Option<&str>) -> Option<u16> {
        self.inner
            .faults
            .lock()
            .iter()
            .find(|f| &f.method == method && (f.key.is_none() || f.key.as_deref() == key))
            .map(|f| f.status)
    }

    fn stall_for(&self, request: &TransportRequest) -> Option<Duration> {
        let key = match parse_target(&request.url) {
            Ok(Some(Target::Key(key))) => Some(key),
            _ => None,
        };
        self.inner
            .stalls
            .lock()
            .iter()
            .find(|s| s.method == request.method && (s.key.is_none() || s.key == key))
            .map(|s| s.delay)
    }

    fn respond(&self, status: u16, body: Option<Vec<u8>>) -> TransportResponse {
        let Some(body) = body else {
            return TransportResponse { status, body: None };
        };

        let size = match self.inner.chunk_size.load(Ordering::SeqCst) {
            0 => body.len().max(1),
            n => n,
        };
        let chunks: Vec<Bytes> = body.chunks(size).map(Bytes::copy_from_slice).collect();

        let guard = BodyGuard::new(self.inner.open_bodies.clone());
        let body = stream::iter(chunks)
            .map(move |chunk| {
                let _alive = &guard;
                Ok(chunk)
            })
            .boxed();

        TransportResponse {
            status,
            body: Some(body),
        }
    }

    fn handle(&self, request: &TransportRequest) -> Result<TransportResponse, DbError> {
        let Some(target) = parse_target(&request.url)? else {
            return Ok(self.respond(404, Some(b"Not Found".to_vec())));
        };

        match (&request.method, target) {
            (&Method::POST, Target::Base) => {
                let form = request.body.as_deref().unwrap_or_default();
                let form = String::from_utf8_lossy(form);
                let (key, value) = form.split_once('=').unwrap_or((form.as_ref(), ""));
                let key = decode_form_component(key)?;
                let value = decode_form_component(value)?;

                if let Some(status) = self.fault_for(&Method::POST, Some(&key)) {
                    return Ok(self.respond(status, Some(b"injected failure".to_vec())));
                }
                self.inner.entries.lock().insert(key, value);
                Ok(self.respond(200, None))
            }
            (&Method::GET, Target::Key(key)) => {
                if let Some(status) = self.fault_for(&Method::GET, Some(&key)) {
                    return Ok(self.respond(status, Some(b"injected failure".to_vec())));
                }
                match self.inner.entries.lock().get(&key) {
                    Some(value) if value.is_empty() => Ok(self.respond(200, None)),
                    Some(value) => Ok(self.respond(200, Some(value.clone().into_bytes()))),
                    None => Ok(self.respond(404, Some(b"Not Found".to_vec()))),
                }
            }
            (&Method::DELETE, Target::Key(key)) => {
                if let Some(status) = self.fault_for(&Method::DELETE, Some(&key)) {
                    return Ok(self.respond(status, Some(b"injected failure".to_vec())));
                }
                self.inner.entries.lock().remove(&key);
                Ok(self.respond(200, None))
            }
            (&Method::GET, Target::Listing { prefix }) => {
                if let Some(status) = self.fault_for(&Method::GET, None) {
                    return Ok(self.respond(status, Some(b"injected failure".to_vec())));
                }
                if let Some(body) = self.inner.listing_override.lock().clone() {
                    return Ok(self.respond(200, Some(body)));
                }

                let body: String = self
                    .inner
                    .entries
                    .lock()
                    .keys()
                    .filter(|key| key.starts_with(&prefix))
                    .map(|key| format!("{}\n", encode_component(key)))
                    .collect();
                Ok(self.respond(200, (!body.is_empty()).then(|| body.into_bytes())))
            }
            _ => Ok(self.respond(400, Some(b"Bad Request".to_vec()))),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, DbError> {
        if let Some(delay) = self.stall_for(&request) {
            tokio::time::sleep(delay).await;
        }
        let response = self.handle(&request);
        self.inner.requests.lock().push(request);
        response
    }
}

fn parse_target(url: &str) -> Result<Option<Target>, DbError> {
    let Some(rest) = url.strip_prefix(MEMORY_URL) else {
        return Ok(None);
    };

    if rest.is_empty() {
        return Ok(Some(Target::Base));
    }
    if let Some(query) = rest.strip_prefix('?') {
        let mut prefix = String::new();
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("prefix=") {
                prefix = decode_key(value.as_bytes())?;
            }
        }
        return Ok(Some(Target::Listing { prefix }));
    }
    if let Some(key) = rest.strip_prefix('/') {
        return Ok(Some(Target::Key(decode_key(key.as_bytes())?)));
    }
    Ok(None)
}

/// Counts a live response body for as long as it exists.
struct BodyGuard(Arc<AtomicUsize>);

impl BodyGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for BodyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
