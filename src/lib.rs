//! # dtx
//!
//! A distributed transaction coordinator. Clients register a **global transaction**
//! made of **branches** (calls to independent participant services); the coordinator
//! drives every branch to completion or compensation and survives its own crashes by
//! persisting every step.
//!
//! ## Protocols
//!
//! - **saga**: forward actions, compensated in reverse when one fails
//! - **tcc**: try every participant, then confirm all or cancel the tried ones
//! - **xa**: prepare every participant, persist the decision, then commit or roll back
//! - **msg**: a prepared message delivered once its sender confirms the local commit
//!
//! ## Feature Flags
//!
//! - `db` - storage contract, in-memory and SQLite stores
//! - `conf` - layered settings
//! - `server` (implies `db`, `conf`) - coordinator, flusher, recovery poller
//! - `full` (default) - everything
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "server")]
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use dtx::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let store = Arc::new(SqlStore::connect(&SqlStoreConfig::new("sqlite://dtx.db?mode=rwc")).await?);
//! store.migrate().await?;
//!
//! let coordinator = Coordinator::new(
//! 	Repository::new(store.clone(), store),
//! 	Arc::new(HttpInvoker::new(Duration::from_secs(3))?),
//! 	None,
//! 	CoordinatorConfig::default().with_wait_result(true),
//! );
//! let payload = r#"{"participants":[{"try":"http://svc/try","confirm":"http://svc/confirm","cancel":"http://svc/cancel"}]}"#;
//! let receipt = coordinator.submit_new(TransType::Tcc, "order-42", payload).await?;
//! assert_eq!(receipt.gid, "order-42");
//! # Ok(())
//! # }
//! ```

pub mod core;
#[cfg(feature = "db")]
pub mod db;
#[cfg(feature = "conf")]
pub mod conf;
#[cfg(feature = "server")]
pub mod server;

pub use dtx_core::{
	BranchStatus, BranchType, GlobalStatus, ParseError, TransBranch, TransGlobal, TransType,
};

#[cfg(feature = "db")]
pub use dtx_db::{
	CreateOutcome, MemoryStore, SqlStore, SqlStoreConfig, Store, StoreError, TransLog,
	TransLogEntry,
};

#[cfg(feature = "conf")]
pub use dtx_conf::{Settings, SettingsError};

#[cfg(feature = "server")]
pub use dtx_server::{
	BranchInvoker, BranchOutcome, BranchStatusFlusher, Coordinator, CoordinatorConfig,
	CoordinatorError, FlushConfig, HttpInvoker, RecoveryConfig, RecoveryPoller, Repository,
	SubmitOutcome, SubmitReceipt, TransSnapshot,
};

pub mod prelude {
	pub use crate::{GlobalStatus, TransType};

	#[cfg(feature = "db")]
	pub use crate::{MemoryStore, SqlStore, SqlStoreConfig, Store};

	#[cfg(feature = "conf")]
	pub use crate::Settings;

	#[cfg(feature = "server")]
	pub use crate::{
		BranchStatusFlusher, Coordinator, CoordinatorConfig, FlushConfig, HttpInvoker,
		RecoveryConfig, RecoveryPoller, Repository,
	};
}
