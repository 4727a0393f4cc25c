//! Coordinator over the SQLite store, flusher and recovery together
#![cfg(feature = "server")]

use async_trait::async_trait;
use dtx::prelude::*;
use dtx::{BranchInvoker, BranchOutcome, TransBranch, TransGlobal};
use dtx::server::InvokeError;
use rstest::{fixture, rstest};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Fails the first `down` calls transiently, then refuses any url containing `refuse`
struct Participant {
	down: AtomicUsize,
}

#[async_trait]
impl BranchInvoker for Participant {
	async fn invoke(
		&self,
		_global: &TransGlobal,
		branch: &TransBranch,
	) -> Result<BranchOutcome, InvokeError> {
		let transient = self
			.down
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if transient {
			return Err(InvokeError::Unavailable(branch.url.clone()));
		}
		if branch.url.contains("refuse") {
			Ok(BranchOutcome::Failure)
		} else {
			Ok(BranchOutcome::Success)
		}
	}

	async fn query_prepared(&self, _global: &TransGlobal) -> Result<BranchOutcome, InvokeError> {
		Ok(BranchOutcome::Success)
	}
}

#[fixture]
async fn store() -> Arc<SqlStore> {
	let store = SqlStore::connect(&SqlStoreConfig::new("sqlite::memory:"))
		.await
		.unwrap();
	store.migrate().await.unwrap();
	Arc::new(store)
}

fn coordinator(store: &Arc<SqlStore>, flusher: &BranchStatusFlusher, down: usize) -> Coordinator {
	Coordinator::new(
		Repository::new(store.clone(), store.clone()),
		Arc::new(Participant {
			down: AtomicUsize::new(down),
		}),
		Some(flusher.sender()),
		CoordinatorConfig::default().with_wait_result(true),
	)
}

fn flush_config() -> FlushConfig {
	FlushConfig::default()
		.with_interval(Duration::from_millis(30))
		.with_poll_interval(Duration::from_millis(5))
}

#[rstest]
#[tokio::test]
async fn test_saga_failure_is_compensated_and_logged(#[future] store: Arc<SqlStore>) {
	let store = store.await;
	let flusher = BranchStatusFlusher::spawn(store.clone(), flush_config());
	let coordinator = coordinator(&store, &flusher, 0);
	let payload = r#"{"steps":[
		{"action":"http://a/out","compensate":"http://a/revert"},
		{"action":"http://b/refuse","compensate":"http://b/revert"}
	]}"#;

	coordinator
		.submit_new(TransType::Saga, "s1", payload)
		.await
		.unwrap();
	flusher.shutdown().await;

	let snapshot = coordinator.query_status("s1").await.unwrap();
	assert_eq!(snapshot.global.status, GlobalStatus::Failed);
	let settled: Vec<_> = snapshot
		.branches
		.iter()
		.map(|b| (b.label(), b.status.as_str()))
		.collect();
	assert_eq!(
		settled,
		vec![
			("01/compensate".to_string(), "succeed"),
			("01/action".to_string(), "succeed"),
			("02/compensate".to_string(), "prepared"),
			("02/action".to_string(), "failed"),
		]
	);

	let actions: Vec<_> = store
		.read_log("s1")
		.await
		.unwrap()
		.into_iter()
		.map(|e| e.action)
		.collect();
	assert_eq!(actions.first().map(String::as_str), Some("create trans"));
	assert!(actions.iter().any(|a| a == "change status"));
}

#[rstest]
#[tokio::test]
async fn test_recovery_finishes_interrupted_tcc(#[future] store: Arc<SqlStore>) {
	let store = store.await;
	let flusher = BranchStatusFlusher::spawn(store.clone(), flush_config());
	let coordinator = coordinator(&store, &flusher, 1);
	let payload = r#"{"participants":[
		{"try":"http://a/try","confirm":"http://a/confirm","cancel":"http://a/cancel"},
		{"try":"http://b/try","confirm":"http://b/confirm","cancel":"http://b/cancel"}
	]}"#;

	coordinator
		.submit_new(TransType::Tcc, "t1", payload)
		.await
		.unwrap();
	assert_eq!(
		coordinator.query_status("t1").await.unwrap().global.status,
		GlobalStatus::Submitted
	);

	let poller = RecoveryPoller::new(coordinator.clone(), RecoveryConfig::new(Duration::ZERO, 10));
	for handle in poller.run_once().await.unwrap() {
		handle.await.unwrap();
	}
	flusher.shutdown().await;

	let snapshot = coordinator.query_status("t1").await.unwrap();
	assert_eq!(snapshot.global.status, GlobalStatus::Succeed);
	assert!(snapshot.global.finish_time.is_some());
	assert_eq!(
		snapshot
			.branches
			.iter()
			.filter(|b| b.label().ends_with("confirm") && b.status.as_str() == "succeed")
			.count(),
		2
	);
}
