//! Global transaction repository
//!
//! Every status change goes through here: the transition table is checked, the attempt
//! is written to the transaction log, and the store applies it only if the row still
//! holds the expected prior status. One affected row means this worker won; anything
//! else is a [`CoordinatorError::ConcurrencyConflict`].

use crate::error::{CoordinatorError, Result};
use chrono::Utc;
use dtx_core::{BranchStatus, GlobalStatus, TransBranch, TransGlobal};
use dtx_db::{CreateOutcome, Store, StoreError, TransLog, TransLogEntry};
use std::sync::Arc;

#[derive(Clone)]
pub struct Repository {
	store: Arc<dyn Store>,
	log: Arc<dyn TransLog>,
}

impl Repository {
	pub fn new(store: Arc<dyn Store>, log: Arc<dyn TransLog>) -> Self {
		Self { store, log }
	}

	pub fn store(&self) -> &Arc<dyn Store> {
		&self.store
	}

	/// Persist `global` with `branches` in one unit of work
	pub async fn create_new(
		&self,
		global: &TransGlobal,
		branches: &[TransBranch],
	) -> Result<CreateOutcome> {
		self.write_log(
			TransLogEntry::new(&global.gid, "create trans")
				.with_status(global.status.as_str())
				.with_detail(&global.data),
		)
		.await;

		match self.store.create_new(global, branches).await {
			Ok(outcome) => {
				tracing::info!(
					gid = %global.gid,
					trans_type = %global.trans_type,
					status = %global.status,
					branches = branches.len(),
					outcome = ?outcome,
					"transaction saved"
				);
				Ok(outcome)
			}
			Err(StoreError::DuplicateIgnored { gid }) => {
				Err(CoordinatorError::DuplicateIgnored(gid))
			}
			Err(e) => Err(e.into()),
		}
	}

	pub async fn load_by_gid(&self, gid: &str) -> Result<TransGlobal> {
		self.store
			.find_global(gid)
			.await?
			.ok_or_else(|| CoordinatorError::NotFound(gid.to_string()))
	}

	/// Branches of `gid` in creation order
	pub async fn load_branches(&self, gid: &str) -> Result<Vec<TransBranch>> {
		Ok(self.store.find_branches(gid).await?)
	}

	/// Move `global` to `next`, mirroring the change into the in-memory row on success
	pub async fn change_global_status(
		&self,
		global: &mut TransGlobal,
		next: GlobalStatus,
	) -> Result<()> {
		let current = global.status;
		if !current.can_transition_to(next) {
			return Err(CoordinatorError::InvalidTransition {
				gid: global.gid.clone(),
				from: current.to_string(),
				to: next.to_string(),
			});
		}

		self.write_log(TransLogEntry::new(&global.gid, "change status").with_status(next.as_str()))
			.await;

		let now = Utc::now();
		let affected = self
			.store
			.update_global_status(&global.gid, current, next, now)
			.await?;
		if affected != 1 {
			return Err(CoordinatorError::global_conflict(&global.gid, current, next));
		}

		global.apply_status(next, now);
		tracing::info!(gid = %global.gid, from = %current, to = %next, "global status changed");
		Ok(())
	}

	/// Move one branch to `next` with the same conditional discipline
	pub async fn change_branch_status(
		&self,
		branch: &mut TransBranch,
		next: BranchStatus,
	) -> Result<()> {
		let current = branch.status;
		if !current.can_transition_to(next) {
			return Err(CoordinatorError::InvalidTransition {
				gid: branch.gid.clone(),
				from: format!("{} {}", branch.label(), current),
				to: next.to_string(),
			});
		}

		self.write_log(
			TransLogEntry::new(&branch.gid, "branch change")
				.with_status(next.as_str())
				.with_branch(branch.label()),
		)
		.await;

		let now = Utc::now();
		let affected = self
			.store
			.update_branch_status(branch.id, current, next, now)
			.await?;
		if affected != 1 {
			return Err(CoordinatorError::branch_conflict(
				&branch.gid,
				&branch.label(),
				current,
				next,
			));
		}

		branch.apply_status(next, now);
		tracing::debug!(gid = %branch.gid, branch = %branch.label(), status = %next, "branch status changed");
		Ok(())
	}

	/// Bump `update_time` so the recovery poller leaves `gid` alone for a while
	pub async fn touch(&self, global: &mut TransGlobal) -> Result<()> {
		let now = Utc::now();
		self.store.touch_global(&global.gid, now).await?;
		global.update_time = now;
		Ok(())
	}

	/// Append to the transaction log; failures are logged and swallowed
	pub async fn write_log(&self, entry: TransLogEntry) {
		if let Err(e) = self.log.write(&entry).await {
			tracing::warn!(gid = %entry.gid, action = %entry.action, error = %e, "trans log write failed");
		}
	}
}
