//! Storage contract consumed by the coordinator

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dtx_core::{BranchStatus, BranchStatusUpdate, GlobalStatus, TransBranch, TransGlobal};

/// What [`Store::create_new`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
	/// The global row and its branches were inserted
	Inserted,
	/// An existing `prepared` msg was advanced to `submitted`
	Upgraded,
}

/// Durable store for global transactions and branches.
///
/// Every mutating method is atomic on its own. Conditional updates report the number
/// of rows they touched so the caller can detect a lost race; the store itself never
/// interprets a zero count as an error.
#[async_trait]
pub trait Store: Send + Sync {
	/// Insert `global` and `branches` in one unit of work.
	///
	/// If a row with the same gid exists, nothing is written and
	/// [`StoreError::DuplicateIgnored`](crate::StoreError::DuplicateIgnored) is returned,
	/// unless both rows are msg transactions, the existing one `prepared` and `global`
	/// `submitted`: then only the status is advanced. The branches written with the
	/// prepare are kept and `branches` is ignored.
	async fn create_new(&self, global: &TransGlobal, branches: &[TransBranch])
	-> Result<CreateOutcome>;

	async fn find_global(&self, gid: &str) -> Result<Option<TransGlobal>>;

	/// All branches of `gid`, in insertion order
	async fn find_branches(&self, gid: &str) -> Result<Vec<TransBranch>>;

	/// `SET status = next WHERE gid = ? AND status = expected`, stamping the timestamp
	/// column `next` owns. Returns the affected-row count.
	async fn update_global_status(
		&self,
		gid: &str,
		expected: GlobalStatus,
		next: GlobalStatus,
		now: DateTime<Utc>,
	) -> Result<u64>;

	/// Branch counterpart of [`Store::update_global_status`], keyed by row id
	async fn update_branch_status(
		&self,
		id: i64,
		expected: BranchStatus,
		next: BranchStatus,
		now: DateTime<Utc>,
	) -> Result<u64>;

	/// Bump `update_time` only
	async fn touch_global(&self, gid: &str, now: DateTime<Utc>) -> Result<u64>;

	/// Apply a batch of branch status changes in one statement.
	///
	/// Writes `status`, `finish_time`, `rollback_time` (failures only) and `update_time`
	/// of exactly the listed rows.
	async fn update_branches(&self, updates: &[BranchStatusUpdate], now: DateTime<Utc>)
	-> Result<u64>;

	/// Non-terminal globals whose `update_time` is at or before `older_than`, oldest id first
	async fn find_stale(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<TransGlobal>>;

	/// Globals in insertion order, optionally filtered by status
	async fn list_globals(
		&self,
		status: Option<GlobalStatus>,
		limit: usize,
	) -> Result<Vec<TransGlobal>>;
}
