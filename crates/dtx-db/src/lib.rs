//! # dtx database layer
//!
//! The storage contract the coordinator core relies on, and two implementations of it.
//!
//! - [`Store`]: transactional insert with conflict-ignore, per-row conditional status
//!   updates returning the affected-row count, multi-row branch status batches and
//!   ordered selects by `gid`.
//! - [`TransLog`]: append-only audit sink. Never authoritative; callers treat write
//!   failures as warnings.
//! - [`MemoryStore`]: in-process store, every operation atomic under one lock.
//! - [`SqlStore`]: SQLite store over an `sqlx` connection pool.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dtx_db::{SqlStore, SqlStoreConfig, Store};
//!
//! # async fn example() -> Result<(), dtx_db::StoreError> {
//! let store = SqlStore::connect(&SqlStoreConfig::new("sqlite::memory:")).await?;
//! store.migrate().await?;
//! assert!(store.find_global("missing").await?.is_none());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod memory;
pub mod sql;
pub mod store;
pub mod trans_log;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sql::{SqlStore, SqlStoreConfig};
pub use store::{CreateOutcome, Store};
pub use trans_log::{InMemoryTransLog, NoopTransLog, TransLog, TransLogEntry};
