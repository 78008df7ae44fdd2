//! JSON value helpers.

use crate::client::Client;
use crate::error::DbError;
use serde::de::DeserializeOwned;
use serde::Serialize;

impl Client {
    /// Store `value` serialized as JSON.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), DbError> {
        let json = serde_json::to_string(value)?;
        self.set(key, &json).await
    }

    /// Read a value stored as JSON.
    ///
    /// An empty value yields `Ok(None)`; anything that is not valid JSON for
    /// `T` is a [`DbError::Json`].
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DbError> {
        let raw = self.get(key).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&raw)?))
    }
}
