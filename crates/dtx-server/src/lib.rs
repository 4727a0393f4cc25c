//! # dtx coordinator core
//!
//! Drives global transactions to a terminal outcome across independent participant
//! services.
//!
//! ## Pieces
//!
//! - [`Repository`]: creation, loading and the optimistic status transition. Every
//!   change is a conditional update naming the expected prior status; a lost race
//!   surfaces as [`CoordinatorError::ConcurrencyConflict`] and ends the pass quietly.
//! - [`Processor`]: one variant per protocol (saga, tcc, xa, msg) deriving branch rows
//!   and running single processing passes.
//! - [`BranchStatusFlusher`]: batches branch status changes into multi-row updates.
//! - [`Coordinator`]: `submit_new`, `prepare_msg`, `process`, `query_status`.
//! - [`RecoveryPoller`]: re-submits stalled transactions.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dtx_core::TransType;
//! use dtx_db::{MemoryStore, NoopTransLog};
//! use dtx_server::{
//! 	BranchStatusFlusher, Coordinator, CoordinatorConfig, FlushConfig, HttpInvoker, Repository,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! let flusher = BranchStatusFlusher::spawn(store.clone(), FlushConfig::default());
//! let coordinator = Coordinator::new(
//! 	Repository::new(store, Arc::new(NoopTransLog)),
//! 	Arc::new(HttpInvoker::new(Duration::from_secs(3))?),
//! 	Some(flusher.sender()),
//! 	CoordinatorConfig::default(),
//! );
//!
//! let payload = r#"{"steps":[{"action":"http://svc/out","compensate":"http://svc/revert"}]}"#;
//! let receipt = coordinator.submit_new(TransType::Saga, "", payload).await?;
//! println!("{}", coordinator.query_status(&receipt.gid).await?.global.status);
//!
//! flusher.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod error;
pub mod flusher;
pub mod invoker;
pub mod processor;
pub mod recovery;
pub mod repository;

pub use coordinator::{
	Coordinator, CoordinatorConfig, SubmitOutcome, SubmitReceipt, TransSnapshot,
};
pub use error::{CoordinatorError, InvokeError, Result};
pub use flusher::{BranchStatusFlusher, FlushConfig, FlushSender};
pub use invoker::{BranchInvoker, BranchOutcome, HttpInvoker};
pub use processor::{BranchWriter, Pass, Processor, TransProcessor};
pub use recovery::{RecoveryConfig, RecoveryPoller};
pub use repository::Repository;
