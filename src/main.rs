mod config;

use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use offsync::service::DEFAULT_PAGE_SIZE;
use offsync::{
  Collection, DrainOutcome, Engine, EngineConfig, HttpRemote, InMemoryRemote, PageRequest,
  RecordStore, RemoteService, SqliteStore, WriteStatus,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "OFFSYNC_LOG";

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Cached, offline-tolerant access to a remote data service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Start offline: reads come from the cache, writes are queued
  #[arg(long)]
  offline: bool,

  /// Use an in-process demo service instead of the configured URL
  #[arg(long)]
  demo: bool,

  /// Also write logs to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List one page of a collection
  List {
    collection: Collection,
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u32,
    /// Cursor returned with the previous page
    #[arg(long)]
    cursor: Option<String>,
    /// Skip the cache and fetch from the service
    #[arg(long)]
    refresh: bool,
  },
  /// Create an entity from a JSON payload
  Create { collection: Collection, payload: String },
  /// Update an entity with a JSON payload
  Update {
    collection: Collection,
    id: String,
    payload: String,
  },
  /// Replay queued writes
  Sync,
  /// Remove expired cache entries
  Cleanup,
  /// Show cache and queue statistics
  Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = setup_logging(args.verbose);

  let config = config::Config::load(args.config.as_deref())?;

  let store = Arc::new(match &config.cache.database {
    Some(path) => SqliteStore::open(path)?,
    None => SqliteStore::open_default()?,
  });
  let engine_config = EngineConfig {
    cache: config.cache.settings(),
    start_online: !args.offline,
  };

  if args.demo {
    let remote = Arc::new(demo_remote());
    let engine = Engine::start(engine_config, store, remote)?;
    run(&engine, args.command).await?;
    engine.shutdown().await;
  } else {
    let remote = Arc::new(HttpRemote::new(&config.remote_config())?);
    let engine = Engine::start(engine_config, store, remote)?;
    run(&engine, args.command).await?;
    engine.shutdown().await;
  }

  Ok(())
}

async fn run<S: RecordStore, R: RemoteService>(engine: &Engine<S, R>, command: Command) -> Result<()> {
  let service = engine.data_service();

  match command {
    Command::List {
      collection,
      page_size,
      cursor,
      refresh,
    } => {
      let request = PageRequest { page_size, cursor };
      let result = service.list(&collection, &request, refresh).await?;

      eprintln!("source: {:?}", result.source);
      if let Some(at) = result.cached_at {
        eprintln!("cached at: {}", at.to_rfc3339());
      }
      println!("{}", serde_json::to_string_pretty(&result.data)?);
    }
    Command::Create {
      collection,
      payload,
    } => {
      let ack = service.create(&collection, parse_payload(&payload)?).await?;
      print_ack(&ack.id, &ack.status);
    }
    Command::Update {
      collection,
      id,
      payload,
    } => {
      let ack = service
        .update(&collection, &id, parse_payload(&payload)?)
        .await?;
      print_ack(&ack.id, &ack.status);
    }
    Command::Sync => match engine.sync_now().await? {
      DrainOutcome::Completed(report) => println!(
        "replayed {}, retrying {}, dropped {}, {} storage errors, {} pending",
        report.replayed, report.retried, report.dropped, report.storage_errors, report.remaining
      ),
      DrainOutcome::Offline => println!("offline, nothing replayed"),
      DrainOutcome::Skipped => println!("a sync is already running"),
    },
    Command::Cleanup => {
      let report = engine.cleanup().await;
      println!(
        "evicted {} from memory, {} from disk",
        report.memory_evicted, report.persistent_evicted
      );
    }
    Command::Stats => {
      let stats = service.stats()?;
      let sync = engine.sync_engine().stats()?;
      let last_sync = sync
        .last_sync_at
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .map(|at| at.to_rfc3339());

      let report = json!({
        "online": stats.online,
        "memory_entry_count": stats.memory_entry_count,
        "memory_bytes": stats.memory_bytes,
        "pending_sync_count": stats.pending_sync_count,
        "last_sync_at": last_sync,
      });
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
  }

  Ok(())
}

fn parse_payload(raw: &str) -> Result<Value> {
  serde_json::from_str(raw).map_err(|e| eyre!("Invalid JSON payload: {}", e))
}

fn print_ack(id: &str, status: &WriteStatus) {
  match status {
    WriteStatus::Applied => println!("{}", id),
    WriteStatus::Queued { operation_id } => {
      println!("{} (queued as operation {})", id, operation_id)
    }
  }
}

/// In-process service with a few students to look at.
fn demo_remote() -> InMemoryRemote {
  let remote = InMemoryRemote::new();
  for name in ["Ada Lovelace", "Alan Turing", "Grace Hopper"] {
    remote.seed(Collection::Students, json!({ "name": name }));
  }
  remote
}

/// Log to a daily file in the data directory, and to stderr with
/// `--verbose`.
///
/// The returned guard flushes the file writer when dropped.
fn setup_logging(verbose: bool) -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  let (file_layer, guard) = match log_appender() {
    Some(appender) => {
      let (writer, guard) = tracing_appender::non_blocking(appender);
      (
        Some(fmt::layer().with_writer(writer).with_ansi(false)),
        Some(guard),
      )
    }
    None => (None, None),
  };
  let stderr_layer = verbose.then(|| fmt::layer().with_writer(std::io::stderr));

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .init();

  guard
}

fn log_appender() -> Option<RollingFileAppender> {
  let dir = dirs::data_dir()?.join("offsync").join("logs");
  std::fs::create_dir_all(&dir).ok()?;

  RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix("offsync")
    .filename_suffix("log")
    .build(dir)
    .ok()
}
