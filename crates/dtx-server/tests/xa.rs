//! Two-phase commit processing

mod common;

use common::{Harness, Mode, Reply, xa_payload};
use dtx_core::{GlobalStatus, TransType};
use rstest::rstest;

#[rstest]
#[case::sync(Mode::Sync)]
#[case::flushed(Mode::Flushed)]
#[tokio::test]
async fn test_commit_decision_precedes_commit_round(#[case] mode: Mode) {
	let mut h = Harness::new(mode);

	h.coordinator
		.submit_new(TransType::Xa, "x1", xa_payload(&["a", "b"]))
		.await
		.unwrap();
	h.drain().await;

	let snapshot = h.coordinator.query_status("x1").await.unwrap();
	assert_eq!(snapshot.global.status, GlobalStatus::Succeed);
	let commit_time = snapshot.global.commit_time.unwrap();
	let finish_time = snapshot.global.finish_time.unwrap();
	assert!(commit_time <= finish_time);
	assert_eq!(
		h.invoker.urls(),
		vec![
			"http://a/prepare",
			"http://b/prepare",
			"http://a/commit",
			"http://b/commit",
		]
	);

	let statuses: Vec<_> = h
		.log
		.for_gid("x1")
		.into_iter()
		.filter(|e| e.action == "change status")
		.map(|e| e.new_status)
		.collect();
	assert_eq!(statuses, vec!["committed", "succeed"]);
}

#[rstest]
#[tokio::test]
async fn test_refused_prepare_rolls_back() {
	let h = Harness::new(Mode::Sync);
	h.invoker.always("http://b/prepare", Reply::Failure);

	h.coordinator
		.submit_new(TransType::Xa, "x1", xa_payload(&["a", "b", "c"]))
		.await
		.unwrap();

	let snapshot = h.coordinator.query_status("x1").await.unwrap();
	assert_eq!(snapshot.global.status, GlobalStatus::Failed);
	assert!(snapshot.global.commit_time.is_none());
	assert_eq!(h.invoker.count("http://c/prepare"), 0);
	assert_eq!(h.invoker.count("http://a/rollback"), 1);
	assert_eq!(h.invoker.count("http://b/rollback"), 1);
	assert_eq!(h.invoker.count("http://c/rollback"), 0);
	assert!(h.invoker.urls().iter().all(|u| !u.ends_with("/commit")));
}

#[rstest]
#[tokio::test]
async fn test_resume_after_decision_skips_prepares() {
	let h = Harness::new(Mode::Sync);
	h.invoker.script("http://b/commit", [Reply::Unavailable]);

	h.coordinator
		.submit_new(TransType::Xa, "x1", xa_payload(&["a", "b"]))
		.await
		.unwrap();
	assert_eq!(h.status("x1").await, GlobalStatus::Committed);

	let status = h.coordinator.try_process("x1").await.unwrap();

	assert_eq!(status, GlobalStatus::Succeed);
	assert_eq!(h.invoker.count("http://a/prepare"), 1);
	assert_eq!(h.invoker.count("http://b/prepare"), 1);
	assert_eq!(h.invoker.count("http://a/commit"), 1);
	assert_eq!(h.invoker.count("http://b/commit"), 2);
}
