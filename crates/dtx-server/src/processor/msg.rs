//! Reliable message
//!
//! A message is either submitted in one call, or prepared first and submitted once the
//! sender's local transaction commits. A prepared message that is never submitted is
//! settled through its `query_prepared` callback. Once submitted, actions are delivered
//! in order and retried until each one succeeds; nothing is ever compensated.

use super::{Pass, TransProcessor, branch_data, layout, parse_payload, require_url, step_id};
use crate::error::{CoordinatorError, Result};
use crate::invoker::BranchOutcome;
use async_trait::async_trait;
use dtx_core::{BranchType, GlobalStatus, TransBranch, TransGlobal};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ACTION: usize = 0;
const ROLES: [BranchType; 1] = [BranchType::Action];

/// `{"steps":[{"action":URL,"data":ANY}]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgPayload {
	pub steps: Vec<MsgStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgStep {
	pub action: String,
	#[serde(default)]
	pub data: Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MsgProcessor;

impl MsgProcessor {
	/// Settle a prepared message. Returns whether delivery may start.
	async fn settle_prepared(&self, pass: &mut Pass<'_>) -> Result<bool> {
		if pass.global.query_prepared.is_none() {
			return Err(CoordinatorError::invariant(
				pass.gid(),
				"prepared msg has no query_prepared callback",
			));
		}

		match pass.query_prepared().await {
			Some(BranchOutcome::Success) => {
				pass.change_status(GlobalStatus::Submitted).await?;
				Ok(true)
			}
			Some(BranchOutcome::Failure) => {
				pass.change_status(GlobalStatus::Failed).await?;
				Ok(false)
			}
			None => Ok(false),
		}
	}

	async fn deliver(
		&self,
		pass: &mut Pass<'_>,
		branches: &mut [TransBranch],
		steps: &[[usize; 1]],
	) -> Result<()> {
		for step in steps {
			if !pass.call_until_success(&mut branches[step[ACTION]]).await? {
				return Ok(());
			}
		}
		pass.change_status(GlobalStatus::Succeed).await
	}
}

#[async_trait]
impl TransProcessor for MsgProcessor {
	fn generate_branches(&self, global: &TransGlobal) -> Result<Vec<TransBranch>> {
		let payload: MsgPayload = parse_payload(global)?;
		if payload.steps.is_empty() {
			return Err(CoordinatorError::invalid_payload(&global.gid, "msg has no steps"));
		}

		payload
			.steps
			.iter()
			.enumerate()
			.map(|(i, step)| -> Result<TransBranch> {
				require_url(&global.gid, i, "action", &step.action)?;
				Ok(TransBranch::new(
					&global.gid,
					step_id(i),
					BranchType::Action,
					&step.action,
					branch_data(&step.data),
				))
			})
			.collect()
	}

	async fn process_once(&self, pass: &mut Pass<'_>, branches: &mut [TransBranch]) -> Result<()> {
		let steps = layout(pass.gid(), branches, ROLES)?;
		match pass.status() {
			GlobalStatus::Prepared => {
				if self.settle_prepared(pass).await? {
					self.deliver(pass, branches, &steps).await?;
				}
				Ok(())
			}
			GlobalStatus::Submitted => self.deliver(pass, branches, &steps).await,
			other => Err(CoordinatorError::invariant(
				pass.gid(),
				format!("msg cannot be processed in status {other}"),
			)),
		}
	}
}
