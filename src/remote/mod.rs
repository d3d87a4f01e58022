//! Remote data service contract.
//!
//! The engine never assumes a transport: it talks to the backing service
//! through [`RemoteService`]. [`HttpRemote`] speaks JSON over HTTP,
//! [`InMemoryRemote`] keeps everything in process and records each call.

mod http;
mod memory;

pub use http::{HttpRemote, HttpRemoteConfig};
pub use memory::{InMemoryRemote, RemoteCall};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::Collection;

/// Error type for remote service calls.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
  /// Transport-level failure (connection refused, timeout, TLS...).
  #[error("request failed: {0}")]
  Http(#[from] reqwest::Error),

  /// The service answered with a non-success status.
  #[error("remote returned {status}: {body}")]
  Status { status: u16, body: String },

  /// Endpoint URL could not be built.
  #[error("invalid url: {0}")]
  InvalidUrl(#[from] url::ParseError),

  /// The response body did not have the expected shape.
  #[error("invalid response: {0}")]
  InvalidResponse(String),

  /// The service refused or could not be reached.
  #[error("remote unavailable: {0}")]
  Unavailable(String),
}

/// Result type for remote service calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Boxed future returned by [`RemoteService`] methods.
pub type RemoteFuture<'a, T> = BoxFuture<'a, RemoteResult<T>>;

/// One page of a collection listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
  pub items: Vec<Value>,
  #[serde(default)]
  pub next_cursor: Option<String>,
  #[serde(default)]
  pub has_more: bool,
}

/// Capabilities the engine needs from the backing data service.
pub trait RemoteService: Send + Sync + 'static {
  /// Create an entity and return its server-assigned id.
  fn create_entity<'a>(
    &'a self,
    collection: &'a Collection,
    payload: &'a Value,
  ) -> RemoteFuture<'a, String>;

  /// Overwrite an existing entity.
  fn update_entity<'a>(
    &'a self,
    collection: &'a Collection,
    id: &'a str,
    payload: &'a Value,
  ) -> RemoteFuture<'a, ()>;

  /// Fetch one page of a collection.
  fn list_entities<'a>(
    &'a self,
    collection: &'a Collection,
    page_size: u32,
    cursor: Option<&'a str>,
  ) -> RemoteFuture<'a, Page>;
}
