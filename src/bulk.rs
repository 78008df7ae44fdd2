//! Multi-key helpers built on the single-key operations.

use crate::client::Client;
use crate::error::DbError;
use futures::TryStreamExt;

impl Client {
    /// Delete each of `keys`, left to right.
    ///
    /// Not atomic: the first failure is returned immediately, keys before it
    /// stay deleted and keys after it are not attempted.
    pub async fn delete_multiple<I>(&self, keys: I) -> Result<(), DbError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        for key in keys {
            self.delete(key.as_ref()).await?;
        }
        Ok(())
    }

    /// Delete every key in the database.
    ///
    /// The complete listing is read before the first delete is sent; keys
    /// are then deleted in listing order with the same stop-on-first-failure
    /// behaviour as [`delete_multiple`](Self::delete_multiple).
    pub async fn empty(&self) -> Result<(), DbError> {
        let keys: Vec<String> = self.list_keys("").into_stream().try_collect().await?;

        #[cfg(feature = "tracing")]
        tracing::debug!(count = keys.len(), "emptying database");

        self.delete_multiple(keys).await
    }
}
