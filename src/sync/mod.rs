//! Offline write queue and its replay engine.
//!
//! ```text
//! facade ──enqueue──► SyncQueue ◄──drain── SyncEngine ──► RemoteService
//!                                              ▲
//!                          ConnectivityMonitor ┘ (online)
//! ```

mod engine;
mod operation;
mod queue;

pub use engine::{DrainOutcome, DrainReport, ReplayHook, SyncEngine, SyncStats};
pub use operation::{is_local_id, local_id, SyncKind, SyncOperation, MAX_RETRIES};
pub use queue::SyncQueue;
