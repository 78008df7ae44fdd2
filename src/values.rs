//! Value iteration over a key listing.

use crate::client::Client;
use crate::error::DbError;
use crate::keys::KeyStream;
use futures::Stream;

/// A lazy sequence of every stored value, in key listing order.
///
/// Each call to [`next_value`](Self::next_value) advances the owned
/// [`KeyStream`] by one key and fetches that key's value; nothing is
/// fetched ahead. The listing is released once it is exhausted, on the
/// first error, on [`close`](Self::close) or on drop. A `next_value` future
/// dropped before it completes releases it too, and the next call fails
/// with [`DbError::Cancelled`].
#[derive(Debug)]
pub struct ValueStream {
    client: Client,
    keys: Option<KeyStream>,
    in_flight: bool,
    closed: bool,
}

impl ValueStream {
    pub(crate) fn new(client: Client, keys: KeyStream) -> Self {
        Self {
            client,
            keys: Some(keys),
            in_flight: false,
            closed: false,
        }
    }

    /// Fetch the value of the next key.
    ///
    /// A failed listing or `get` ends the sequence: the error is returned
    /// once and later calls yield `Ok(None)`.
    pub async fn next_value(&mut self) -> Result<Option<String>, DbError> {
        if self.closed {
            return Err(DbError::IteratorClosed);
        }
        // The listing is moved into this future while it runs, so a dropped
        // call takes it along and leaves `in_flight` set.
        let Some(mut keys) = self.keys.take() else {
            if std::mem::take(&mut self.in_flight) {
                return Err(DbError::Cancelled);
            }
            return Ok(None);
        };

        self.in_flight = true;
        let result = match keys.next_key().await {
            Ok(Some(key)) => self.client.get(&key).await.map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        self.in_flight = false;

        if matches!(result, Ok(Some(_))) {
            self.keys = Some(keys);
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(failed = result.is_err(), "value stream finished");
        }
        result
    }

    /// Close the sequence and release the underlying listing.
    pub fn close(&mut self) {
        self.closed = true;
        self.in_flight = false;
        self.keys = None;
    }

    /// Adapt into a [`Stream`] of values that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, DbError>> {
        futures::stream::unfold(self, |mut values| async move {
            match values.next_value().await {
                Ok(Some(value)) => Some((Ok(value), values)),
                Ok(None) => None,
                Err(e) => Some((Err(e), values)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use futures::TryStreamExt;
    use http::Method;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    fn seeded() -> MemoryTransport {
        let store = MemoryTransport::new();
        store.insert("b", "2");
        store.insert("a", "1");
        store.insert("c", "3");
        store.insert("d", "");
        store
    }

    #[tokio::test]
    async fn test_values_follow_listing_order() {
        let store = seeded();
        let client = store.client();

        let keys: Vec<String> = assert_ok!(client.list_keys("").into_stream().try_collect().await);
        let values: Vec<String> =
            assert_ok!(client.get_all_values().into_stream().try_collect().await);

        assert_eq!(values, vec!["1", "2", "3", ""]);
        assert_eq!(values.len(), keys.len());
        assert_eq!(store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn test_one_get_per_advance() {
        let store = seeded();
        let mut values = store.client().get_all_values();
        assert!(store.requests().is_empty());

        assert_eq!(assert_ok!(values.next_value().await).as_deref(), Some("1"));
        let methods: Vec<_> = store.requests().iter().map(|r| r.method.clone()).collect();
        assert_eq!(methods, vec![Method::GET, Method::GET]);
        assert!(store.requests()[1].url.ends_with("/a"));

        assert_ok!(values.next_value().await);
        assert_eq!(store.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_releases_listing() {
        let store = seeded();
        let mut values = store.client().get_all_values();

        while assert_ok!(values.next_value().await).is_some() {}
        assert_eq!(store.open_bodies(), 0);
        assert_eq!(assert_ok!(values.next_value().await), None);
    }

    #[tokio::test]
    async fn test_get_failure_terminates() {
        let store = seeded();
        store.fail_key(Method::GET, "b", 500);
        let mut values = store.client().get_all_values();

        assert_eq!(assert_ok!(values.next_value().await).as_deref(), Some("1"));
        assert!(matches!(
            values.next_value().await,
            Err(DbError::ServiceInternalError { status: 500 })
        ));
        assert_eq!(store.open_bodies(), 0);

        let sent = store.requests().len();
        assert_eq!(assert_ok!(values.next_value().await), None);
        assert_eq!(store.requests().len(), sent);
    }

    #[tokio::test]
    async fn test_close_and_drop_release_listing() {
        let store = seeded();
        let client = store.client();

        let mut values = client.get_all_values();
        assert_ok!(values.next_value().await);
        assert_eq!(store.open_bodies(), 1);
        values.close();
        assert_eq!(store.open_bodies(), 0);
        assert!(matches!(values.next_value().await, Err(DbError::IteratorClosed)));

        let mut values = client.get_all_values();
        assert_ok!(values.next_value().await);
        assert_eq!(store.open_bodies(), 1);
        drop(values);
        assert_eq!(store.open_bodies(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_get_is_reported() {
        let store = seeded();
        store.stall_key(Method::GET, "b", Duration::from_millis(200));
        let mut values = store.client().get_all_values();

        assert_eq!(assert_ok!(values.next_value().await).as_deref(), Some("1"));
        assert!(timeout(Duration::from_millis(10), values.next_value()).await.is_err());
        assert_eq!(store.open_bodies(), 0);

        assert!(matches!(values.next_value().await, Err(DbError::Cancelled)));
        assert_eq!(assert_ok!(values.next_value().await), None);
    }

    #[tokio::test]
    async fn test_cancelled_listing_is_reported() {
        let store = seeded();
        store.stall(Method::GET, Duration::from_millis(200));
        let mut values = store.client().get_all_values();

        assert!(timeout(Duration::from_millis(10), values.next_value()).await.is_err());
        assert!(matches!(values.next_value().await, Err(DbError::Cancelled)));
        assert_eq!(assert_ok!(values.next_value().await), None);
        assert!(store.requests().is_empty());
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = MemoryTransport::new();
        let mut values = store.client().get_all_values();
        assert_eq!(assert_ok!(values.next_value().await), None);
    }
}
