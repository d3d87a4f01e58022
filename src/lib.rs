//! Tiered caching and offline synchronization for a remote data service.
//!
//! ```text
//!  application
//!      │
//!      ▼
//! ┌──────────────┐  hit   ┌──────────────────┐
//! │ DataService  │───────►│ CacheCoordinator │── memory tier
//! └──────────────┘        └──────────────────┘── persistent tier (RecordStore)
//!      │ miss / write (online)
//!      ├──────────────────────────► RemoteService
//!      │ write (offline)                 ▲
//!      ▼                                 │ drain
//! ┌──────────────┐               ┌──────────────┐
//! │  SyncQueue   │◄──────────────│  SyncEngine  │◄── ConnectivityMonitor
//! └──────────────┘               └──────────────┘      (online)
//! ```
//!
//! [`Engine`] wires the pieces together and owns their background tasks.

pub mod cache;
pub mod clock;
pub mod collection;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod meta;
pub mod remote;
pub mod service;
pub mod store;
pub mod sync;

pub use cache::{CacheCoordinator, CacheEntry, CacheResult, CacheSettings, CacheSource, Invalidation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collection::Collection;
pub use connectivity::ConnectivityMonitor;
pub use context::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use remote::{HttpRemote, HttpRemoteConfig, InMemoryRemote, Page, RemoteError, RemoteService};
pub use service::{DataService, EngineStats, PageRequest, WriteAck, WriteStatus};
pub use store::{MemoryStore, RecordStore, SqliteStore, StoreError};
pub use sync::{DrainOutcome, DrainReport, SyncEngine, SyncKind, SyncOperation, SyncStats};
