//! Shared fixtures: a scripted participant and an instrumented store
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dtx_core::{
	BranchStatus, BranchStatusUpdate, GlobalStatus, TransBranch, TransGlobal,
};
use dtx_db::{CreateOutcome, InMemoryTransLog, MemoryStore, Store, StoreError};
use dtx_server::{
	BranchInvoker, BranchOutcome, BranchStatusFlusher, Coordinator, CoordinatorConfig,
	FlushConfig, InvokeError, Repository,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scripted participant answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
	Success,
	Failure,
	/// Transient error
	Unavailable,
	Panic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
	pub gid: String,
	pub url: String,
	/// Branch label, or `query` for a query_prepared call
	pub op: String,
}

#[derive(Default)]
struct Script {
	queued: HashMap<String, VecDeque<Reply>>,
	fallback: HashMap<String, Reply>,
	calls: Vec<Call>,
}

/// Participant double: replies per URL from a queue, then from a fallback (default
/// [`Reply::Success`]), and records every call.
#[derive(Clone, Default)]
pub struct ScriptedInvoker {
	script: Arc<Mutex<Script>>,
	latency: Option<Duration>,
}

impl ScriptedInvoker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Sleep before every answer so concurrent passes interleave
	pub fn with_latency(mut self, latency: Duration) -> Self {
		self.latency = Some(latency);
		self
	}

	/// Queue one-shot replies for `url`
	pub fn script(&self, url: &str, replies: impl IntoIterator<Item = Reply>) {
		self.script
			.lock()
			.queued
			.entry(url.to_string())
			.or_default()
			.extend(replies);
	}

	/// Reply used for `url` once its queue is empty
	pub fn always(&self, url: &str, reply: Reply) {
		self.script.lock().fallback.insert(url.to_string(), reply);
	}

	pub fn calls(&self) -> Vec<Call> {
		self.script.lock().calls.clone()
	}

	pub fn urls(&self) -> Vec<String> {
		self.calls().into_iter().map(|c| c.url).collect()
	}

	pub fn count(&self, url: &str) -> usize {
		self.script
			.lock()
			.calls
			.iter()
			.filter(|c| c.url == url)
			.count()
	}

	async fn answer(&self, gid: &str, url: &str, op: String) -> Result<BranchOutcome, InvokeError> {
		if let Some(latency) = self.latency {
			tokio::time::sleep(latency).await;
		}
		let reply = {
			let mut script = self.script.lock();
			script.calls.push(Call {
				gid: gid.to_string(),
				url: url.to_string(),
				op,
			});
			let queued = script.queued.get_mut(url).and_then(|q| q.pop_front());
			queued
				.or_else(|| script.fallback.get(url).copied())
				.unwrap_or(Reply::Success)
		};
		match reply {
			Reply::Success => Ok(BranchOutcome::Success),
			Reply::Failure => Ok(BranchOutcome::Failure),
			Reply::Unavailable => Err(InvokeError::Unavailable(format!("{url} scripted down"))),
			Reply::Panic => panic!("scripted panic at {url}"),
		}
	}
}

#[async_trait]
impl BranchInvoker for ScriptedInvoker {
	async fn invoke(
		&self,
		global: &TransGlobal,
		branch: &TransBranch,
	) -> Result<BranchOutcome, InvokeError> {
		self.answer(&global.gid, &branch.url, branch.label()).await
	}

	async fn query_prepared(&self, global: &TransGlobal) -> Result<BranchOutcome, InvokeError> {
		let url = global.query_prepared.clone().unwrap_or_default();
		self.answer(&global.gid, &url, "query".to_string()).await
	}
}

/// [`MemoryStore`] that records batch sizes and can fail batch commits on demand
#[derive(Clone, Default)]
pub struct RecordingStore {
	inner: MemoryStore,
	batches: Arc<Mutex<Vec<usize>>>,
	failures: Arc<AtomicUsize>,
}

impl RecordingStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn memory(&self) -> &MemoryStore {
		&self.inner
	}

	/// Sizes of successfully committed batches, in commit order
	pub fn batches(&self) -> Vec<usize> {
		self.batches.lock().clone()
	}

	/// Make the next `n` batch commits fail
	pub fn fail_next_batches(&self, n: usize) {
		self.failures.store(n, Ordering::SeqCst);
	}

	pub fn remaining_failures(&self) -> usize {
		self.failures.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Store for RecordingStore {
	async fn create_new(
		&self,
		global: &TransGlobal,
		branches: &[TransBranch],
	) -> dtx_db::Result<CreateOutcome> {
		self.inner.create_new(global, branches).await
	}

	async fn find_global(&self, gid: &str) -> dtx_db::Result<Option<TransGlobal>> {
		self.inner.find_global(gid).await
	}

	async fn find_branches(&self, gid: &str) -> dtx_db::Result<Vec<TransBranch>> {
		self.inner.find_branches(gid).await
	}

	async fn update_global_status(
		&self,
		gid: &str,
		expected: GlobalStatus,
		next: GlobalStatus,
		now: DateTime<Utc>,
	) -> dtx_db::Result<u64> {
		self.inner
			.update_global_status(gid, expected, next, now)
			.await
	}

	async fn update_branch_status(
		&self,
		id: i64,
		expected: BranchStatus,
		next: BranchStatus,
		now: DateTime<Utc>,
	) -> dtx_db::Result<u64> {
		self.inner
			.update_branch_status(id, expected, next, now)
			.await
	}

	async fn touch_global(&self, gid: &str, now: DateTime<Utc>) -> dtx_db::Result<u64> {
		self.inner.touch_global(gid, now).await
	}

	async fn update_branches(
		&self,
		updates: &[BranchStatusUpdate],
		now: DateTime<Utc>,
	) -> dtx_db::Result<u64> {
		let injected = self
			.failures
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if injected {
			return Err(StoreError::Corrupt("injected batch failure".to_string()));
		}
		let affected = self.inner.update_branches(updates, now).await?;
		self.batches.lock().push(updates.len());
		Ok(affected)
	}

	async fn find_stale(
		&self,
		older_than: DateTime<Utc>,
		limit: usize,
	) -> dtx_db::Result<Vec<TransGlobal>> {
		self.inner.find_stale(older_than, limit).await
	}

	async fn list_globals(
		&self,
		status: Option<GlobalStatus>,
		limit: usize,
	) -> dtx_db::Result<Vec<TransGlobal>> {
		self.inner.list_globals(status, limit).await
	}
}

/// How branch transitions reach the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Sync,
	Flushed,
}

pub fn fast_flush() -> FlushConfig {
	FlushConfig::default()
		.with_interval(Duration::from_millis(40))
		.with_poll_interval(Duration::from_millis(5))
		.with_retry_backoff(Duration::from_millis(10))
}

/// Coordinator wired to in-memory collaborators
pub struct Harness {
	pub store: RecordingStore,
	pub log: InMemoryTransLog,
	pub invoker: ScriptedInvoker,
	pub coordinator: Coordinator,
	flusher: Option<BranchStatusFlusher>,
}

impl Harness {
	pub fn new(mode: Mode) -> Self {
		Self::with_config(mode, CoordinatorConfig::default().with_wait_result(true))
	}

	pub fn with_config(mode: Mode, config: CoordinatorConfig) -> Self {
		Self::with_invoker(mode, config, ScriptedInvoker::new())
	}

	pub fn with_invoker(mode: Mode, config: CoordinatorConfig, invoker: ScriptedInvoker) -> Self {
		let store = RecordingStore::new();
		let log = InMemoryTransLog::new();
		let flusher = match mode {
			Mode::Sync => None,
			Mode::Flushed => Some(BranchStatusFlusher::spawn(Arc::new(store.clone()), fast_flush())),
		};
		let coordinator = Coordinator::new(
			Repository::new(Arc::new(store.clone()), Arc::new(log.clone())),
			Arc::new(invoker.clone()),
			flusher.as_ref().map(|f| f.sender()),
			config.with_update_branch_sync(mode == Mode::Sync),
		);
		Self {
			store,
			log,
			invoker,
			coordinator,
			flusher,
		}
	}

	/// Commit everything the flusher holds; further async branch writes fail afterwards
	pub async fn drain(&mut self) {
		if let Some(flusher) = self.flusher.take() {
			flusher.shutdown().await;
		}
	}

	pub async fn status(&self, gid: &str) -> GlobalStatus {
		self.coordinator
			.query_status(gid)
			.await
			.unwrap()
			.global
			.status
	}

	/// Branch statuses by label
	pub async fn branch_statuses(&self, gid: &str) -> Vec<(String, BranchStatus)> {
		self.coordinator
			.query_status(gid)
			.await
			.unwrap()
			.branches
			.into_iter()
			.map(|b| (b.label(), b.status))
			.collect()
	}

	pub fn log_actions(&self, gid: &str) -> Vec<String> {
		self.log.for_gid(gid).into_iter().map(|e| e.action).collect()
	}
}

pub fn saga_payload(steps: &[(&str, &str)]) -> String {
	let steps: Vec<_> = steps
		.iter()
		.map(|(action, compensate)| serde_json::json!({"action": action, "compensate": compensate}))
		.collect();
	serde_json::json!({ "steps": steps }).to_string()
}

pub fn tcc_payload(participants: &[&str]) -> String {
	let participants: Vec<_> = participants
		.iter()
		.map(|p| {
			serde_json::json!({
				"try": format!("http://{p}/try"),
				"confirm": format!("http://{p}/confirm"),
				"cancel": format!("http://{p}/cancel"),
			})
		})
		.collect();
	serde_json::json!({ "participants": participants }).to_string()
}

pub fn xa_payload(participants: &[&str]) -> String {
	let participants: Vec<_> = participants
		.iter()
		.map(|p| {
			serde_json::json!({
				"prepare": format!("http://{p}/prepare"),
				"commit": format!("http://{p}/commit"),
				"rollback": format!("http://{p}/rollback"),
			})
		})
		.collect();
	serde_json::json!({ "participants": participants }).to_string()
}

pub fn msg_payload(actions: &[&str]) -> String {
	let steps: Vec<_> = actions
		.iter()
		.map(|a| serde_json::json!({"action": a, "data": {"amount": 30}}))
		.collect();
	serde_json::json!({ "steps": steps }).to_string()
}
