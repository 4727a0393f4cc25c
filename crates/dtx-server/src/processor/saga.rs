//! Saga: forward actions in order, compensations in reverse on failure.
//!
//! Actions run strictly one after another, so when the first `failed` action sits at
//! step `k`, every step before `k` has executed its action. Compensation covers exactly
//! those steps, last first. The failed step itself is never compensated.

use super::{
	Pass, TransProcessor, branch_data, first_failed, layout, parse_payload, require_url, step_id,
};
use crate::error::{CoordinatorError, Result};
use crate::invoker::BranchOutcome;
use async_trait::async_trait;
use dtx_core::{BranchStatus, BranchType, GlobalStatus, TransBranch, TransGlobal};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const COMPENSATE: usize = 0;
const ACTION: usize = 1;
const ROLES: [BranchType; 2] = [BranchType::Compensate, BranchType::Action];

/// `{"steps":[{"action":URL,"compensate":URL,"data":ANY}]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaPayload {
	pub steps: Vec<SagaStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
	pub action: String,
	pub compensate: String,
	#[serde(default)]
	pub data: Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SagaProcessor;

impl SagaProcessor {
	/// Run the remaining actions. Returns once the saga is decided or a call is pending.
	async fn forward(
		&self,
		pass: &mut Pass<'_>,
		branches: &mut [TransBranch],
		steps: &[[usize; 2]],
	) -> Result<()> {
		for step in steps {
			let action = &mut branches[step[ACTION]];
			match action.status {
				BranchStatus::Succeed => continue,
				BranchStatus::Failed => break,
				BranchStatus::Prepared => {}
			}

			match pass.invoke(action).await {
				Some(BranchOutcome::Success) => {
					pass.finish_branch(action, BranchStatus::Succeed).await?;
					pass.touch().await?;
				}
				Some(BranchOutcome::Failure) => {
					pass.finish_branch_durable(action, BranchStatus::Failed)
						.await?;
					break;
				}
				None => return Ok(()),
			}
		}

		if first_failed(branches, steps, ACTION).is_some() {
			pass.change_status(GlobalStatus::Aborting).await?;
			self.compensate(pass, branches, steps).await
		} else {
			pass.change_status(GlobalStatus::Succeed).await
		}
	}

	async fn compensate(
		&self,
		pass: &mut Pass<'_>,
		branches: &mut [TransBranch],
		steps: &[[usize; 2]],
	) -> Result<()> {
		let failed_at = first_failed(branches, steps, ACTION).ok_or_else(|| {
			CoordinatorError::invariant(pass.gid(), "aborting saga has no failed action")
		})?;

		for step in steps[..failed_at].iter().rev() {
			if !pass.call_until_success(&mut branches[step[COMPENSATE]]).await? {
				return Ok(());
			}
		}

		pass.change_status(GlobalStatus::Failed).await
	}
}

#[async_trait]
impl TransProcessor for SagaProcessor {
	fn generate_branches(&self, global: &TransGlobal) -> Result<Vec<TransBranch>> {
		let payload: SagaPayload = parse_payload(global)?;
		if payload.steps.is_empty() {
			return Err(CoordinatorError::invalid_payload(&global.gid, "saga has no steps"));
		}

		let mut branches = Vec::with_capacity(payload.steps.len() * 2);
		for (i, step) in payload.steps.iter().enumerate() {
			require_url(&global.gid, i, "action", &step.action)?;
			require_url(&global.gid, i, "compensate", &step.compensate)?;
			let data = branch_data(&step.data);
			branches.push(TransBranch::new(
				&global.gid,
				step_id(i),
				BranchType::Compensate,
				&step.compensate,
				data.clone(),
			));
			branches.push(TransBranch::new(
				&global.gid,
				step_id(i),
				BranchType::Action,
				&step.action,
				data,
			));
		}
		Ok(branches)
	}

	async fn process_once(&self, pass: &mut Pass<'_>, branches: &mut [TransBranch]) -> Result<()> {
		let steps = layout(pass.gid(), branches, ROLES)?;
		match pass.status() {
			GlobalStatus::Submitted => self.forward(pass, branches, &steps).await,
			GlobalStatus::Aborting => self.compensate(pass, branches, &steps).await,
			other => Err(CoordinatorError::invariant(
				pass.gid(),
				format!("saga cannot be processed in status {other}"),
			)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use dtx_core::TransType;
	use rstest::rstest;

	fn global(data: &str) -> TransGlobal {
		TransGlobal::new("s1", TransType::Saga, data, GlobalStatus::Submitted)
	}

	#[rstest]
	fn test_generates_compensate_then_action_per_step() {
		let data = serde_json::json!({
			"steps": [
				{"action": "http://a/out", "compensate": "http://a/revert", "data": {"amount": 30}},
				{"action": "http://b/in", "compensate": "http://b/revert"}
			]
		});

		let branches = SagaProcessor.generate_branches(&global(&data.to_string())).unwrap();

		let labels: Vec<_> = branches.iter().map(|b| b.label()).collect();
		assert_eq!(labels, vec!["01/compensate", "01/action", "02/compensate", "02/action"]);
		assert_eq!(branches[1].url, "http://a/out");
		assert_eq!(branches[1].data, r#"{"amount":30}"#);
		assert_eq!(branches[3].data, "{}");
		assert!(branches.iter().all(|b| b.status == BranchStatus::Prepared));
	}

	#[rstest]
	#[case(r#"{"steps": []}"#)]
	#[case(r#"{"steps": [{"action": "", "compensate": "http://a"}]}"#)]
	#[case(r#"{"stages": []}"#)]
	#[case("not json")]
	fn test_rejects_bad_payload(#[case] data: &str) {
		let err = SagaProcessor.generate_branches(&global(data)).unwrap_err();
		assert!(matches!(err, CoordinatorError::InvalidPayload { .. }));
	}
}
