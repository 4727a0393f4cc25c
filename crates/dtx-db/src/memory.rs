//! In-process store
//!
//! All state sits behind one mutex, so every [`Store`] method is a single atomic step
//! and conditional updates race exactly like their SQL counterparts.

use crate::error::{Result, StoreError};
use crate::store::{CreateOutcome, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dtx_core::{
	BranchStatus, BranchStatusUpdate, GlobalStatus, TransBranch, TransGlobal, TransType,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MemoryState {
	globals: IndexMap<String, TransGlobal>,
	branches: Vec<TransBranch>,
	next_branch_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
	state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of persisted global rows
	pub fn global_count(&self) -> usize {
		self.state.lock().globals.len()
	}

	/// Number of persisted branch rows across all transactions
	pub fn branch_count(&self) -> usize {
		self.state.lock().branches.len()
	}
}

#[async_trait]
impl Store for MemoryStore {
	async fn create_new(
		&self,
		global: &TransGlobal,
		branches: &[TransBranch],
	) -> Result<CreateOutcome> {
		let mut state = self.state.lock();

		match state.globals.get_mut(&global.gid) {
			None => {
				state.globals.insert(global.gid.clone(), global.clone());
			}
			Some(existing)
				if existing.trans_type == TransType::Msg
					&& global.trans_type == TransType::Msg
					&& existing.status == GlobalStatus::Prepared
					&& global.status == GlobalStatus::Submitted =>
			{
				existing.status = GlobalStatus::Submitted;
				existing.update_time = Utc::now();
				return Ok(CreateOutcome::Upgraded);
			}
			Some(_) => {
				return Err(StoreError::DuplicateIgnored {
					gid: global.gid.clone(),
				});
			}
		}

		for branch in branches {
			let exists = state.branches.iter().any(|b| {
				b.gid == branch.gid
					&& b.branch_id == branch.branch_id
					&& b.branch_type == branch.branch_type
			});
			if exists {
				continue;
			}
			state.next_branch_id += 1;
			let mut row = branch.clone();
			row.id = state.next_branch_id;
			state.branches.push(row);
		}

		Ok(CreateOutcome::Inserted)
	}

	async fn find_global(&self, gid: &str) -> Result<Option<TransGlobal>> {
		Ok(self.state.lock().globals.get(gid).cloned())
	}

	async fn find_branches(&self, gid: &str) -> Result<Vec<TransBranch>> {
		// Ids are assigned in push order, so the vec is already sorted by id.
		Ok(self
			.state
			.lock()
			.branches
			.iter()
			.filter(|b| b.gid == gid)
			.cloned()
			.collect())
	}

	async fn update_global_status(
		&self,
		gid: &str,
		expected: GlobalStatus,
		next: GlobalStatus,
		now: DateTime<Utc>,
	) -> Result<u64> {
		let mut state = self.state.lock();
		match state.globals.get_mut(gid) {
			Some(global) if global.status == expected => {
				global.apply_status(next, now);
				Ok(1)
			}
			_ => Ok(0),
		}
	}

	async fn update_branch_status(
		&self,
		id: i64,
		expected: BranchStatus,
		next: BranchStatus,
		now: DateTime<Utc>,
	) -> Result<u64> {
		let mut state = self.state.lock();
		match state.branches.iter_mut().find(|b| b.id == id) {
			Some(branch) if branch.status == expected => {
				branch.apply_status(next, now);
				Ok(1)
			}
			_ => Ok(0),
		}
	}

	async fn touch_global(&self, gid: &str, now: DateTime<Utc>) -> Result<u64> {
		let mut state = self.state.lock();
		match state.globals.get_mut(gid) {
			Some(global) => {
				global.update_time = now;
				Ok(1)
			}
			None => Ok(0),
		}
	}

	async fn update_branches(
		&self,
		updates: &[BranchStatusUpdate],
		now: DateTime<Utc>,
	) -> Result<u64> {
		let mut state = self.state.lock();
		let mut affected = 0;
		for branch in state.branches.iter_mut() {
			let Some(update) = updates.iter().find(|u| u.id == branch.id) else {
				continue;
			};
			branch.status = update.status;
			branch.finish_time = Some(update.finish_time);
			if let Some(rollback_time) = update.rollback_time() {
				branch.rollback_time = Some(rollback_time);
			}
			branch.update_time = now;
			affected += 1;
		}
		Ok(affected)
	}

	async fn find_stale(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<TransGlobal>> {
		Ok(self
			.state
			.lock()
			.globals
			.values()
			.filter(|g| !g.is_terminal() && g.update_time <= older_than)
			.take(limit)
			.cloned()
			.collect())
	}

	async fn list_globals(
		&self,
		status: Option<GlobalStatus>,
		limit: usize,
	) -> Result<Vec<TransGlobal>> {
		Ok(self
			.state
			.lock()
			.globals
			.values()
			.filter(|g| status.is_none_or(|s| g.status == s))
			.take(limit)
			.cloned()
			.collect())
	}
}
