//! Replit Database Rust Client
//!
//! A Rust client library for Replit Database - a key-value store exposed
//! over HTTP, with lazily streamed key listings.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use replit_db::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads the database URL from REPLIT_DB_URL
//!     let client = Client::from_env()?;
//!
//!     client.set("greeting", "hello world").await?;
//!     println!("{}", client.get("greeting").await?);
//!
//!     // Keys are streamed from the response, one line per call
//!     let mut keys = client.list_keys("greet");
//!     while let Some(key) = keys.next_key().await? {
//!         println!("key: {key}");
//!     }
//!
//!     client.delete_multiple(["greeting"]).await?;
//!     Ok(())
//! }
//! ```

mod bulk;
mod client;
mod codec;
mod error;
#[cfg(feature = "json")]
mod json;
mod keys;
mod memory;
mod retry;
mod transport;
mod values;

pub use client::{Client, ClientBuilder, ENV_DB_URL};
pub use codec::{decode_key, encode_component};
pub use error::{check_status, DbError, InvalidHeaderError};
pub use keys::KeyStream;
pub use memory::{MemoryTransport, MEMORY_URL};
pub use retry::{JitterMode, RetryConfig};
pub use transport::{ReqwestTransport, ResponseBody, Transport, TransportRequest, TransportResponse};
pub use values::ValueStream;
