//! Coordinator service
//!
//! Entry points used by a transport layer and by the recovery poller. A
//! [`Coordinator`] is cheap to clone; every clone shares the same repository, invoker
//! and branch writer.

use crate::error::{CoordinatorError, Result};
use crate::flusher::FlushSender;
use crate::invoker::BranchInvoker;
use crate::processor::{BranchWriter, Pass, Processor, TransProcessor};
use crate::repository::Repository;
use dtx_conf::CoordinatorSettings;
use dtx_core::{GlobalStatus, TransBranch, TransGlobal, TransType};
use dtx_db::{CreateOutcome, TransLogEntry};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorConfig {
	/// Write every branch transition with a conditional update instead of the flusher
	pub update_branch_sync: bool,
	/// Run the first processing pass before `submit_new` returns
	pub wait_result: bool,
}

impl CoordinatorConfig {
	pub fn from_settings(settings: &CoordinatorSettings) -> Self {
		Self {
			update_branch_sync: settings.update_branch_sync,
			wait_result: settings.wait_result,
		}
	}

	pub fn with_update_branch_sync(mut self, sync: bool) -> Self {
		self.update_branch_sync = sync;
		self
	}

	pub fn with_wait_result(mut self, wait: bool) -> Self {
		self.wait_result = wait;
		self
	}
}

/// What happened to a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitOutcome {
	/// New transaction persisted
	Created,
	/// A prepared message was advanced to submitted
	Upgraded,
	/// The gid already existed; nothing was written
	Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
	pub gid: String,
	pub outcome: SubmitOutcome,
}

/// Global row and its branches as currently persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransSnapshot {
	pub global: TransGlobal,
	pub branches: Vec<TransBranch>,
}

struct Inner {
	repo: Repository,
	invoker: Arc<dyn BranchInvoker>,
	writer: BranchWriter,
	config: CoordinatorConfig,
}

#[derive(Clone)]
pub struct Coordinator {
	inner: Arc<Inner>,
}

impl Coordinator {
	/// Build a coordinator. Branch transitions go to `flush` unless it is `None` or
	/// `config.update_branch_sync` is set.
	pub fn new(
		repo: Repository,
		invoker: Arc<dyn BranchInvoker>,
		flush: Option<FlushSender>,
		config: CoordinatorConfig,
	) -> Self {
		let writer = match flush {
			Some(sender) if !config.update_branch_sync => BranchWriter::Async(sender),
			_ => BranchWriter::Sync,
		};
		Self {
			inner: Arc::new(Inner {
				repo,
				invoker,
				writer,
				config,
			}),
		}
	}

	pub fn repository(&self) -> &Repository {
		&self.inner.repo
	}

	pub fn config(&self) -> CoordinatorConfig {
		self.inner.config
	}

	/// Register a transaction in `submitted` and start processing it.
	///
	/// An empty `gid` is replaced by a generated one. Re-submitting an existing gid is
	/// absorbed and reported as [`SubmitOutcome::Duplicate`], except for a prepared
	/// message re-submitted as a message, which is upgraded and keeps its prepared
	/// branches.
	pub async fn submit_new(
		&self,
		trans_type: TransType,
		gid: impl Into<String>,
		payload: impl Into<String>,
	) -> Result<SubmitReceipt> {
		let global = TransGlobal::new(
			resolve_gid(gid.into()),
			trans_type,
			payload,
			GlobalStatus::Submitted,
		);
		self.save(global).await
	}

	/// Register a message in `prepared`. It is delivered after a matching
	/// [`Coordinator::submit_new`], or settled through `query_prepared` by the
	/// recovery poller.
	pub async fn prepare_msg(
		&self,
		gid: impl Into<String>,
		payload: impl Into<String>,
		query_prepared: impl Into<String>,
	) -> Result<SubmitReceipt> {
		let gid = resolve_gid(gid.into());
		let query_prepared = query_prepared.into();
		if query_prepared.trim().is_empty() {
			return Err(CoordinatorError::invalid_payload(
				&gid,
				"prepared msg needs a query_prepared url",
			));
		}
		let global = TransGlobal::new(gid, TransType::Msg, payload, GlobalStatus::Prepared)
			.with_query_prepared(query_prepared);
		self.save(global).await
	}

	async fn save(&self, global: TransGlobal) -> Result<SubmitReceipt> {
		let branches = Processor::for_type(global.trans_type).generate_branches(&global)?;
		let gid = global.gid.clone();

		let outcome = match self.inner.repo.create_new(&global, &branches).await {
			Ok(CreateOutcome::Inserted) => SubmitOutcome::Created,
			Ok(CreateOutcome::Upgraded) => SubmitOutcome::Upgraded,
			Err(CoordinatorError::DuplicateIgnored(_)) => {
				tracing::info!(gid = %gid, "duplicate submission ignored");
				return Ok(SubmitReceipt {
					gid,
					outcome: SubmitOutcome::Duplicate,
				});
			}
			Err(e) => return Err(e),
		};

		if global.status == GlobalStatus::Submitted {
			if self.inner.config.wait_result {
				self.process(&gid).await;
			} else {
				self.trigger(gid.clone());
			}
		}

		Ok(SubmitReceipt { gid, outcome })
	}

	/// Run one processing pass, containing every error and panic.
	///
	/// Safe to call redundantly and concurrently for the same gid.
	pub async fn process(&self, gid: &str) {
		let result = AssertUnwindSafe(self.try_process(gid))
			.catch_unwind()
			.await
			.unwrap_or_else(|panic| {
				Err(CoordinatorError::Panicked {
					gid: gid.to_string(),
					message: panic_message(panic.as_ref()),
				})
			});

		match result {
			Ok(status) => {
				tracing::debug!(gid = %gid, status = %status, "processing pass finished");
			}
			Err(e) if e.is_conflict() => {
				tracing::info!(gid = %gid, error = %e, "processing pass abandoned");
			}
			Err(e) => {
				tracing::error!(gid = %gid, error = %e, "processing pass failed");
				self.inner
					.repo
					.write_log(TransLogEntry::new(gid, "process error").with_detail(e.to_string()))
					.await;
			}
		}
	}

	/// One processing pass with errors surfaced. Returns the global status the pass
	/// left behind.
	pub async fn try_process(&self, gid: &str) -> Result<GlobalStatus> {
		let inner = &self.inner;
		let global = inner.repo.load_by_gid(gid).await?;
		if global.is_terminal() {
			return Ok(global.status);
		}

		let mut branches = inner.repo.load_branches(gid).await?;
		if branches.is_empty() {
			return Err(CoordinatorError::invariant(gid, "transaction has no branches"));
		}

		let processor = Processor::for_type(global.trans_type);
		let mut pass = Pass::new(global, &inner.repo, inner.invoker.as_ref(), &inner.writer);
		processor.process_once(&mut pass, &mut branches).await?;
		Ok(pass.status())
	}

	/// Fire-and-forget processing on its own task
	pub fn trigger(&self, gid: impl Into<String>) -> JoinHandle<()> {
		let this = self.clone();
		let gid = gid.into();
		tokio::spawn(async move { this.process(&gid).await })
	}

	pub async fn query_status(&self, gid: &str) -> Result<TransSnapshot> {
		let global = self.inner.repo.load_by_gid(gid).await?;
		let branches = self.inner.repo.load_branches(gid).await?;
		Ok(TransSnapshot { global, branches })
	}

	/// Globals in insertion order, optionally filtered by status
	pub async fn list(&self, status: Option<GlobalStatus>, limit: usize) -> Result<Vec<TransGlobal>> {
		Ok(self.inner.repo.store().list_globals(status, limit).await?)
	}
}

fn resolve_gid(gid: String) -> String {
	if gid.trim().is_empty() {
		uuid::Uuid::new_v4().to_string()
	} else {
		gid
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(message) = panic.downcast_ref::<&str>() {
		message.to_string()
	} else if let Some(message) = panic.downcast_ref::<String>() {
		message.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_empty_gid_is_generated() {
		let gid = resolve_gid("  ".to_string());
		assert_eq!(gid.len(), 36);
		assert_eq!(resolve_gid("order-1".to_string()), "order-1");
	}

	#[rstest]
	fn test_panic_message_variants() {
		let s: Box<dyn Any + Send> = Box::new("boom");
		let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
		let other: Box<dyn Any + Send> = Box::new(7_u8);

		assert_eq!(panic_message(s.as_ref()), "boom");
		assert_eq!(panic_message(owned.as_ref()), "bang");
		assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
	}
}
