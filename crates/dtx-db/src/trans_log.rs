//! Transaction Log
//!
//! Append-only audit trail of every state transition the coordinator attempts. Entries
//! exist for diagnosis only: losing one never changes an outcome.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Transaction log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransLogEntry {
	pub gid: String,
	/// What was attempted (`create trans`, `change status`, `branch change`, ...)
	pub action: String,
	/// Target status label, empty when not applicable
	pub new_status: String,
	/// Branch label, empty for global-level actions
	pub branch: String,
	/// Payload snapshot or error text
	pub detail: String,
	pub create_time: chrono::DateTime<chrono::Utc>,
}

impl TransLogEntry {
	/// Create a new log entry
	pub fn new(gid: impl Into<String>, action: impl Into<String>) -> Self {
		Self {
			gid: gid.into(),
			action: action.into(),
			new_status: String::new(),
			branch: String::new(),
			detail: String::new(),
			create_time: chrono::Utc::now(),
		}
	}

	pub fn with_status(mut self, status: impl Into<String>) -> Self {
		self.new_status = status.into();
		self
	}

	pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
		self.branch = branch.into();
		self
	}

	pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
		self.detail = detail.into();
		self
	}
}

/// Transaction log interface
#[async_trait]
pub trait TransLog: Send + Sync {
	/// Append a log entry
	async fn write(&self, entry: &TransLogEntry) -> Result<()>;
}

/// In-memory transaction log
///
/// Keeps every entry in append order. Useful for tests and embedded coordinators.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransLog {
	entries: Arc<Mutex<Vec<TransLogEntry>>>,
}

impl InMemoryTransLog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn entries(&self) -> Vec<TransLogEntry> {
		self.entries.lock().clone()
	}

	/// Entries of one transaction, in append order
	pub fn for_gid(&self, gid: &str) -> Vec<TransLogEntry> {
		self.entries
			.lock()
			.iter()
			.filter(|e| e.gid == gid)
			.cloned()
			.collect()
	}
}

#[async_trait]
impl TransLog for InMemoryTransLog {
	async fn write(&self, entry: &TransLogEntry) -> Result<()> {
		self.entries.lock().push(entry.clone());
		Ok(())
	}
}

/// Discards every entry
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransLog;

#[async_trait]
impl TransLog for NoopTransLog {
	async fn write(&self, _entry: &TransLogEntry) -> Result<()> {
		Ok(())
	}
}
