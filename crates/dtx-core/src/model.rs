//! Global transaction and branch rows

use crate::status::{BranchStatus, BranchType, GlobalStatus, StatusStamp, TransType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One coordinated multi-participant operation.
///
/// `gid`, `trans_type` and `data` are immutable once persisted. `status` changes only
/// through a conditional update that names the expected prior status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransGlobal {
	/// Globally unique business key
	pub gid: String,
	pub trans_type: TransType,
	/// Serialized protocol payload (step or participant definitions)
	pub data: String,
	pub status: GlobalStatus,
	/// Callback confirming a prepared message transaction
	pub query_prepared: Option<String>,
	pub create_time: DateTime<Utc>,
	/// Liveness marker the recovery poller keys on
	pub update_time: DateTime<Utc>,
	pub commit_time: Option<DateTime<Utc>>,
	pub finish_time: Option<DateTime<Utc>>,
	pub rollback_time: Option<DateTime<Utc>>,
}

impl TransGlobal {
	/// Create an unsaved global transaction
	///
	/// # Examples
	///
	/// ```
	/// use dtx_core::{GlobalStatus, TransGlobal, TransType};
	///
	/// let global = TransGlobal::new("gid-1", TransType::Saga, "{}", GlobalStatus::Submitted);
	/// assert_eq!(global.gid, "gid-1");
	/// assert!(global.finish_time.is_none());
	/// ```
	pub fn new(
		gid: impl Into<String>,
		trans_type: TransType,
		data: impl Into<String>,
		status: GlobalStatus,
	) -> Self {
		let now = Utc::now();
		Self {
			gid: gid.into(),
			trans_type,
			data: data.into(),
			status,
			query_prepared: None,
			create_time: now,
			update_time: now,
			commit_time: None,
			finish_time: None,
			rollback_time: None,
		}
	}

	pub fn with_query_prepared(mut self, url: impl Into<String>) -> Self {
		self.query_prepared = Some(url.into());
		self
	}

	pub fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	/// Mirror a committed transition into this in-memory row
	pub fn apply_status(&mut self, status: GlobalStatus, now: DateTime<Utc>) {
		self.status = status;
		self.update_time = now;
		match status.stamp() {
			Some(StatusStamp::Commit) => self.commit_time = Some(now),
			Some(StatusStamp::Finish) => self.finish_time = Some(now),
			Some(StatusStamp::Rollback) => self.rollback_time = Some(now),
			None => {}
		}
	}
}

/// One participant call belonging to a global transaction.
///
/// `id` is the store-assigned row id; it is `0` until the row has been persisted and
/// reloaded. Rows for one `gid` are returned in ascending `id` order, which is the
/// order they were generated in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransBranch {
	pub id: i64,
	pub gid: String,
	/// Ordinal shared by the branches of one step or participant (`01`, `02`, ...)
	pub branch_id: String,
	pub branch_type: BranchType,
	pub url: String,
	pub data: String,
	pub status: BranchStatus,
	pub create_time: DateTime<Utc>,
	pub update_time: DateTime<Utc>,
	pub finish_time: Option<DateTime<Utc>>,
	pub rollback_time: Option<DateTime<Utc>>,
}

impl TransBranch {
	pub fn new(
		gid: impl Into<String>,
		branch_id: impl Into<String>,
		branch_type: BranchType,
		url: impl Into<String>,
		data: impl Into<String>,
	) -> Self {
		let now = Utc::now();
		Self {
			id: 0,
			gid: gid.into(),
			branch_id: branch_id.into(),
			branch_type,
			url: url.into(),
			data: data.into(),
			status: BranchStatus::Prepared,
			create_time: now,
			update_time: now,
			finish_time: None,
			rollback_time: None,
		}
	}

	pub fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	/// `branch_id/branch_type`, used in logs
	pub fn label(&self) -> String {
		format!("{}/{}", self.branch_id, self.branch_type)
	}

	/// Mirror a terminal transition into this in-memory row.
	///
	/// `finish_time` is set on every terminal transition, `rollback_time` only on failure.
	pub fn apply_status(&mut self, status: BranchStatus, now: DateTime<Utc>) {
		self.status = status;
		self.update_time = now;
		if status.is_terminal() {
			self.finish_time = Some(now);
		}
		if status == BranchStatus::Failed {
			self.rollback_time = Some(now);
		}
	}
}

/// A branch status change queued for the batched flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchStatusUpdate {
	/// Row id of the branch
	pub id: i64,
	pub status: BranchStatus,
	pub finish_time: DateTime<Utc>,
}

impl BranchStatusUpdate {
	pub fn new(id: i64, status: BranchStatus, finish_time: DateTime<Utc>) -> Self {
		Self {
			id,
			status,
			finish_time,
		}
	}

	/// `rollback_time` implied by this update
	pub fn rollback_time(&self) -> Option<DateTime<Utc>> {
		(self.status == BranchStatus::Failed).then_some(self.finish_time)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_global_apply_status_stamps_once() {
		let mut global = TransGlobal::new("g1", TransType::Xa, "{}", GlobalStatus::Submitted);
		let t1 = Utc::now();
		global.apply_status(GlobalStatus::Committed, t1);
		assert_eq!(global.commit_time, Some(t1));
		assert!(global.finish_time.is_none());

		let t2 = t1 + chrono::Duration::seconds(1);
		global.apply_status(GlobalStatus::Succeed, t2);
		assert_eq!(global.commit_time, Some(t1));
		assert_eq!(global.finish_time, Some(t2));
		assert!(global.rollback_time.is_none());
		assert!(global.is_terminal());
	}

	#[rstest]
	fn test_branch_apply_failed_sets_rollback_time() {
		let mut branch = TransBranch::new("g1", "01", BranchType::Try, "http://p/try", "{}");
		let now = Utc::now();
		branch.apply_status(BranchStatus::Failed, now);
		assert_eq!(branch.finish_time, Some(now));
		assert_eq!(branch.rollback_time, Some(now));
		assert_eq!(branch.label(), "01/try");
	}

	#[rstest]
	fn test_update_rollback_time_only_on_failure() {
		let now = Utc::now();
		assert_eq!(
			BranchStatusUpdate::new(1, BranchStatus::Succeed, now).rollback_time(),
			None
		);
		assert_eq!(
			BranchStatusUpdate::new(1, BranchStatus::Failed, now).rollback_time(),
			Some(now)
		);
	}
}
