//! Saga processing end to end against in-memory collaborators

mod common;

use common::{Harness, Mode, Reply, saga_payload};
use dtx_core::{BranchStatus, GlobalStatus, TransType};
use rstest::rstest;

const TWO_STEPS: &[(&str, &str)] = &[
	("http://a/out", "http://a/revert"),
	("http://b/in", "http://b/revert"),
];

#[rstest]
#[case::sync(Mode::Sync)]
#[case::flushed(Mode::Flushed)]
#[tokio::test]
async fn test_all_actions_succeed(#[case] mode: Mode) {
	let mut h = Harness::new(mode);

	h.coordinator
		.submit_new(TransType::Saga, "s1", saga_payload(TWO_STEPS))
		.await
		.unwrap();
	h.drain().await;

	assert_eq!(h.status("s1").await, GlobalStatus::Succeed);
	assert_eq!(h.invoker.urls(), vec!["http://a/out", "http://b/in"]);
	assert_eq!(
		h.branch_statuses("s1").await,
		vec![
			("01/compensate".to_string(), BranchStatus::Prepared),
			("01/action".to_string(), BranchStatus::Succeed),
			("02/compensate".to_string(), BranchStatus::Prepared),
			("02/action".to_string(), BranchStatus::Succeed),
		]
	);
}

#[rstest]
#[case::sync(Mode::Sync)]
#[case::flushed(Mode::Flushed)]
#[tokio::test]
async fn test_second_step_failure_compensates_first_only(#[case] mode: Mode) {
	let mut h = Harness::new(mode);
	h.invoker.always("http://b/in", Reply::Failure);

	h.coordinator
		.submit_new(TransType::Saga, "s1", saga_payload(TWO_STEPS))
		.await
		.unwrap();
	h.drain().await;

	let snapshot = h.coordinator.query_status("s1").await.unwrap();
	assert_eq!(snapshot.global.status, GlobalStatus::Failed);
	assert!(snapshot.global.rollback_time.is_some());
	assert_eq!(h.invoker.count("http://a/revert"), 1);
	assert_eq!(h.invoker.count("http://b/revert"), 0);
	assert_eq!(
		h.branch_statuses("s1").await,
		vec![
			("01/compensate".to_string(), BranchStatus::Succeed),
			("01/action".to_string(), BranchStatus::Succeed),
			("02/compensate".to_string(), BranchStatus::Prepared),
			("02/action".to_string(), BranchStatus::Failed),
		]
	);
}

#[rstest]
#[tokio::test]
async fn test_first_step_failure_needs_no_compensation() {
	let h = Harness::new(Mode::Sync);
	h.invoker.always("http://a/out", Reply::Failure);

	h.coordinator
		.submit_new(TransType::Saga, "s1", saga_payload(TWO_STEPS))
		.await
		.unwrap();

	assert_eq!(h.status("s1").await, GlobalStatus::Failed);
	assert_eq!(h.invoker.urls(), vec!["http://a/out"]);
}

#[rstest]
#[tokio::test]
async fn test_transient_error_resumes_where_it_stopped() {
	let h = Harness::new(Mode::Sync);
	h.invoker.script("http://b/in", [Reply::Unavailable]);

	h.coordinator
		.submit_new(TransType::Saga, "s1", saga_payload(TWO_STEPS))
		.await
		.unwrap();
	assert_eq!(h.status("s1").await, GlobalStatus::Submitted);

	let status = h.coordinator.try_process("s1").await.unwrap();

	assert_eq!(status, GlobalStatus::Succeed);
	assert_eq!(h.invoker.count("http://a/out"), 1);
	assert_eq!(h.invoker.count("http://b/in"), 2);
	assert!(h.log_actions("s1").contains(&"branch error".to_string()));
}

#[rstest]
#[tokio::test]
async fn test_compensation_runs_in_reverse_and_retries() {
	let h = Harness::new(Mode::Sync);
	let steps = &[
		("http://a/out", "http://a/revert"),
		("http://b/in", "http://b/revert"),
		("http://c/in", "http://c/revert"),
	];
	h.invoker.always("http://c/in", Reply::Failure);
	h.invoker.script("http://b/revert", [Reply::Unavailable, Reply::Failure]);

	h.coordinator
		.submit_new(TransType::Saga, "s1", saga_payload(steps))
		.await
		.unwrap();
	assert_eq!(h.status("s1").await, GlobalStatus::Aborting);
	assert_eq!(h.invoker.count("http://a/revert"), 0);

	assert_eq!(
		h.coordinator.try_process("s1").await.unwrap(),
		GlobalStatus::Aborting
	);
	assert_eq!(
		h.coordinator.try_process("s1").await.unwrap(),
		GlobalStatus::Failed
	);

	let reverts: Vec<_> = h
		.invoker
		.urls()
		.into_iter()
		.filter(|u| u.ends_with("/revert"))
		.collect();
	assert_eq!(
		reverts,
		vec![
			"http://b/revert",
			"http://b/revert",
			"http://b/revert",
			"http://a/revert"
		]
	);
	assert_eq!(h.invoker.count("http://c/revert"), 0);
}

#[rstest]
#[tokio::test]
async fn test_terminal_saga_is_left_alone() {
	let h = Harness::new(Mode::Sync);
	h.coordinator
		.submit_new(TransType::Saga, "s1", saga_payload(TWO_STEPS))
		.await
		.unwrap();
	let calls = h.invoker.calls().len();

	assert_eq!(
		h.coordinator.try_process("s1").await.unwrap(),
		GlobalStatus::Succeed
	);
	assert_eq!(h.invoker.calls().len(), calls);
}
