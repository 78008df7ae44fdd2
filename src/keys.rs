//! Streaming key listings.

use crate::client::Client;
use crate::codec::{decode_key, LineReader};
use crate::error::DbError;
use futures::Stream;
use http::Method;

/// A lazy listing of the keys matching a prefix.
///
/// The listing request is sent on the first call to
/// [`next_key`](Self::next_key); the response body is then decoded one line
/// per call, so only the current line is ever held in memory.
///
/// The response is released as soon as the listing is exhausted, fails,
/// is [closed](Self::close), or is dropped. Dropping a pending `next_key`
/// future releases it as well; the next call then fails with
/// [`DbError::Cancelled`] so the listing cannot pass for a complete one.
///
/// A `KeyStream` is single-use: call [`Client::list_keys`] again to list
/// the keys a second time.
pub struct KeyStream {
    client: Client,
    prefix: String,
    state: KeyState,
}

enum KeyState {
    /// No request sent yet
    Pending,
    /// Holding the open listing response
    Reading(LineReader),
    /// A request or read is awaiting; seen again only if that future was dropped
    InFlight,
    /// Exhausted or failed; nothing is held
    Done,
    /// Closed by the consumer; nothing is held
    Closed,
}

impl std::fmt::Debug for KeyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            KeyState::Pending => "pending",
            KeyState::Reading(_) => "reading",
            KeyState::InFlight => "in flight",
            KeyState::Done => "done",
            KeyState::Closed => "closed",
        };
        f.debug_struct("KeyStream")
            .field("prefix", &self.prefix)
            .field("state", &state)
            .finish()
    }
}

impl KeyStream {
    pub(crate) fn new(client: Client, prefix: String) -> Self {
        Self {
            client,
            prefix,
            state: KeyState::Pending,
        }
    }

    /// The prefix this listing filters on.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether a listing response is currently held open.
    pub fn is_open(&self) -> bool {
        matches!(self.state, KeyState::Reading(_))
    }

    /// Fetch the next key.
    ///
    /// Returns `Ok(None)` once the listing is exhausted, and after any error
    /// has been returned. Returns [`DbError::IteratorClosed`] after
    /// [`close`](Self::close), and [`DbError::Cancelled`] once if the
    /// previous call was dropped before it completed.
    pub async fn next_key(&mut self) -> Result<Option<String>, DbError> {
        loop {
            // The state stays `InFlight` across each await; the reader lives in
            // this future, so dropping it releases the response.
            match std::mem::replace(&mut self.state, KeyState::InFlight) {
                KeyState::Closed => {
                    self.state = KeyState::Closed;
                    return Err(DbError::IteratorClosed);
                }
                KeyState::Done => {
                    self.state = KeyState::Done;
                    return Ok(None);
                }
                KeyState::InFlight => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(prefix = %self.prefix, "key listing advance was cancelled");
                    self.state = KeyState::Done;
                    return Err(DbError::Cancelled);
                }
                KeyState::Pending => {
                    let opened = open(&self.client, &self.prefix).await;
                    self.state = KeyState::Done;
                    match opened? {
                        Some(reader) => self.state = KeyState::Reading(reader),
                        None => return Ok(None),
                    }
                }
                KeyState::Reading(mut reader) => {
                    let line = reader.next_line().await;
                    self.state = KeyState::Done;
                    let line = match line? {
                        Some(line) => line,
                        None => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!(prefix = %self.prefix, "key listing exhausted");
                            return Ok(None);
                        }
                    };
                    let key = decode_key(&line)?;
                    self.state = KeyState::Reading(reader);
                    return Ok(Some(key));
                }
            }
        }
    }

    /// Close the listing and release the response.
    pub fn close(&mut self) {
        #[cfg(feature = "tracing")]
        {
            if self.is_open() {
                tracing::debug!(prefix = %self.prefix, "key listing closed before exhaustion");
            }
        }
        self.state = KeyState::Closed;
    }

    /// Listings cannot be rewound; this always fails with
    /// [`DbError::ResetUnsupported`]. Start a new one with
    /// [`Client::list_keys`].
    pub fn reset(&mut self) -> Result<(), DbError> {
        Err(DbError::ResetUnsupported)
    }

    /// Adapt into a [`Stream`] of keys that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, DbError>> {
        futures::stream::unfold(self, |mut keys| async move {
            match keys.next_key().await {
                Ok(Some(key)) => Some((Ok(key), keys)),
                Ok(None) => None,
                Err(e) => Some((Err(e), keys)),
            }
        })
    }
}

// Borrows the fields rather than `&KeyStream`, which is not `Sync`.
async fn open(client: &Client, prefix: &str) -> Result<Option<LineReader>, DbError> {
    let request = client.request(Method::GET, client.list_url(prefix));
    let resp = client.execute(request).await?;

    #[cfg(feature = "tracing")]
    tracing::debug!(prefix, has_body = resp.body.is_some(), "key listing opened");

    Ok(resp.body.map(LineReader::new))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::transport::{Transport, TransportRequest, TransportResponse};
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::{stream, StreamExt, TryStreamExt};
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::{assert_err, assert_ok};

    /// Serves a listing body that stops mid-line and never finishes.
    #[derive(Debug)]
    struct HangingListing;

    #[async_trait]
    impl Transport for HangingListing {
        async fn send(&self, _request: TransportRequest) -> Result<TransportResponse, DbError> {
            let body = stream::iter([Ok::<_, DbError>(Bytes::from_static(b"a\nb"))])
                .chain(stream::pending())
                .boxed();
            Ok(TransportResponse {
                status: 200,
                body: Some(body),
            })
        }
    }

    async fn collect(mut keys: KeyStream) -> Result<Vec<String>, DbError> {
        let mut out = Vec::new();
        while let Some(key) = keys.next_key().await? {
            out.push(key);
        }
        Ok(out)
    }

    fn seeded(keys: &[&str]) -> MemoryTransport {
        let store = MemoryTransport::new();
        for key in keys {
            store.insert(*key, format!("value-{key}"));
        }
        store
    }

    #[tokio::test]
    async fn test_decodes_listing_body() {
        let store = MemoryTransport::new();
        store.override_listing("a%20b\nc\n");

        let keys = assert_ok!(collect(store.client().list_keys("")).await);
        assert_eq!(keys, vec!["a b", "c"]);
    }

    #[tokio::test]
    async fn test_prefix_filter_and_encoding() {
        let store = seeded(&["a&b/1", "a&b/2", "a&c", "b"]);
        let client = store.client();

        let keys = assert_ok!(collect(client.list_keys("a&b/")).await);
        assert_eq!(keys, vec!["a&b/1", "a&b/2"]);
        assert!(keys.iter().all(|k| k.starts_with("a&b/")));

        let url = &store.requests()[0].url;
        assert!(url.ends_with("?encode=true&prefix=a%26b%2F"), "{url}");
    }

    #[tokio::test]
    async fn test_lazy_until_first_advance() {
        let store = seeded(&["a"]);
        let mut keys = store.client().list_keys("");

        assert!(store.requests().is_empty());
        assert!(!keys.is_open());

        assert_eq!(assert_ok!(keys.next_key().await).as_deref(), Some("a"));
        assert_eq!(store.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_every_call_sends_a_fresh_request() {
        let store = seeded(&["a", "b"]);
        let client = store.client();

        assert_ok!(collect(client.list_keys("")).await);
        store.insert("c", "3");
        let keys = assert_ok!(collect(client.list_keys("")).await);

        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(store.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_no_body_is_empty_listing() {
        let store = MemoryTransport::new();
        let mut keys = store.client().list_keys("");

        assert_eq!(assert_ok!(keys.next_key().await), None);
        assert_eq!(assert_ok!(keys.next_key().await), None);
        assert_eq!(store.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_releases_response() {
        let store = seeded(&["a", "b", "c"]);
        store.chunk_size(2);
        let mut keys = store.client().list_keys("");

        assert_eq!(assert_ok!(keys.next_key().await).as_deref(), Some("a"));
        assert!(keys.is_open());
        assert_eq!(store.open_bodies(), 1);

        assert_ok!(keys.next_key().await);
        assert_ok!(keys.next_key().await);
        assert_eq!(assert_ok!(keys.next_key().await), None);

        assert!(!keys.is_open());
        assert_eq!(store.open_bodies(), 0);
        assert_eq!(assert_ok!(keys.next_key().await), None);
    }

    #[tokio::test]
    async fn test_independent_listings() {
        let store = seeded(&["a1", "a2", "b1"]);
        let client = store.client();
        let mut first = client.list_keys("a");
        let mut second = client.list_keys("");

        assert_eq!(assert_ok!(first.next_key().await).as_deref(), Some("a1"));
        assert_eq!(assert_ok!(second.next_key().await).as_deref(), Some("a1"));
        assert_eq!(store.open_bodies(), 2);

        let (rest_first, rest_second) = tokio::join!(collect(first), collect(second));
        assert_eq!(assert_ok!(rest_first), vec!["a2"]);
        assert_eq!(assert_ok!(rest_second), vec!["a2", "b1"]);
        assert_eq!(store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn test_close_releases_response() {
        let store = seeded(&["a", "b", "c"]);
        let mut keys = store.client().list_keys("");

        assert_ok!(keys.next_key().await);
        assert_eq!(store.open_bodies(), 1);

        keys.close();
        assert_eq!(store.open_bodies(), 0);
        assert!(matches!(keys.next_key().await, Err(DbError::IteratorClosed)));
        assert_eq!(store.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_releases_response() {
        let store = seeded(&["a", "b", "c"]);
        let mut keys = store.client().list_keys("");

        assert_ok!(keys.next_key().await);
        assert_eq!(store.open_bodies(), 1);

        drop(keys);
        assert_eq!(store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn test_status_error_terminates_listing() {
        let store = seeded(&["a"]);
        store.fail(Method::GET, 403);
        let mut keys = store.client().list_keys("");

        assert!(matches!(keys.next_key().await, Err(DbError::AccessDenied)));
        assert_eq!(store.open_bodies(), 0);

        store.clear_faults();
        assert_eq!(assert_ok!(keys.next_key().await), None);
        assert_eq!(store.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_bad_encoding_fails_the_advance() {
        let store = MemoryTransport::new();
        store.override_listing("good\nbad%zz\nlater\n");
        let mut keys = store.client().list_keys("");

        assert_eq!(assert_ok!(keys.next_key().await).as_deref(), Some("good"));
        let err = assert_err!(keys.next_key().await);
        assert!(matches!(err, DbError::Decode(_)));

        assert_eq!(store.open_bodies(), 0);
        assert_eq!(assert_ok!(keys.next_key().await), None);
    }

    #[tokio::test]
    async fn test_trailing_newline_yields_no_empty_key() {
        let store = MemoryTransport::new();
        store.override_listing("x\r\ny\r\n");
        store.chunk_size(1);

        let keys = assert_ok!(collect(store.client().list_keys("")).await);
        assert_eq!(keys, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_reset_is_refused() {
        let store = seeded(&["a"]);
        let mut keys = store.client().list_keys("");

        assert_ok!(keys.next_key().await);
        assert!(matches!(keys.reset(), Err(DbError::ResetUnsupported)));
        assert_eq!(assert_ok!(keys.next_key().await), None);
    }

    #[tokio::test]
    async fn test_into_stream() {
        let store = seeded(&["k1", "k2", "k3"]);
        let keys: Vec<String> = assert_ok!(
            store.client().list_keys("k").into_stream().try_collect().await
        );
        assert_eq!(keys, vec!["k1", "k2", "k3"]);
        assert_eq!(store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_open_is_reported() {
        let store = seeded(&["a", "b", "c"]);
        store.stall(Method::GET, Duration::from_millis(200));
        let mut keys = store.client().list_keys("");

        assert!(timeout(Duration::from_millis(10), keys.next_key()).await.is_err());
        assert!(matches!(keys.next_key().await, Err(DbError::Cancelled)));
        assert_eq!(assert_ok!(keys.next_key().await), None);
        assert!(store.requests().is_empty());
        assert_eq!(store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_read_is_reported() {
        let client = assert_ok!(Client::builder()
            .base_url("http://db")
            .transport(HangingListing)
            .build());
        let mut keys = client.list_keys("");

        assert_eq!(assert_ok!(keys.next_key().await).as_deref(), Some("a"));
        assert!(timeout(Duration::from_millis(10), keys.next_key()).await.is_err());
        assert!(!keys.is_open());

        assert!(matches!(keys.next_key().await, Err(DbError::Cancelled)));
        assert_eq!(assert_ok!(keys.next_key().await), None);
    }

    #[tokio::test]
    async fn test_close_after_cancel() {
        let store = seeded(&["a"]);
        store.stall(Method::GET, Duration::from_millis(200));
        let mut keys = store.client().list_keys("");

        assert!(timeout(Duration::from_millis(10), keys.next_key()).await.is_err());
        keys.close();
        assert!(matches!(keys.next_key().await, Err(DbError::IteratorClosed)));
    }

    #[tokio::test]
    async fn test_into_stream_ends_after_error() {
        let store = MemoryTransport::new();
        store.override_listing("ok\n%\nnever\n");

        let items: Vec<_> = store.client().list_keys("").into_stream().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().ok(), Some("ok"));
        assert!(matches!(items[1], Err(DbError::Decode(_))));
    }
}
