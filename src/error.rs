//! Library-wide error type.

use crate::remote::RemoteError;
use crate::store::StoreError;

/// Errors surfaced to callers of the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Durable storage failed on a path the caller is waiting on.
  #[error("storage error: {0}")]
  Storage(#[from] StoreError),

  /// The remote service rejected or failed a request.
  #[error("remote service error: {0}")]
  Remote(#[from] RemoteError),

  /// A payload could not be serialized.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// An update targets a locally issued id whose create has not reached
  /// the remote service yet.
  #[error("{0} has not been synced yet")]
  UnsyncedId(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
