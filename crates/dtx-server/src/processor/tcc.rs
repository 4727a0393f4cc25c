//! Try-confirm-cancel
//!
//! Trys run one participant at a time. Only a refused try can fail the transaction;
//! confirms and cancels are retried until they succeed.

use super::{
	Pass, TransProcessor, branch_data, first_failed, layout, parse_payload, require_url, step_id,
};
use crate::error::{CoordinatorError, Result};
use crate::invoker::BranchOutcome;
use async_trait::async_trait;
use dtx_core::{BranchStatus, BranchType, GlobalStatus, TransBranch, TransGlobal};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const TRY: usize = 0;
const CONFIRM: usize = 1;
const CANCEL: usize = 2;
const ROLES: [BranchType; 3] = [BranchType::Try, BranchType::Confirm, BranchType::Cancel];

/// `{"participants":[{"try":URL,"confirm":URL,"cancel":URL,"data":ANY}]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TccPayload {
	pub participants: Vec<TccParticipant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TccParticipant {
	#[serde(rename = "try")]
	pub try_url: String,
	pub confirm: String,
	pub cancel: String,
	#[serde(default)]
	pub data: Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TccProcessor;

impl TccProcessor {
	async fn submitted(
		&self,
		pass: &mut Pass<'_>,
		branches: &mut [TransBranch],
		steps: &[[usize; 3]],
	) -> Result<()> {
		// A confirmed participant means every try already succeeded.
		let confirming = steps
			.iter()
			.any(|step| branches[step[CONFIRM]].status == BranchStatus::Succeed);

		if !confirming {
			for step in steps {
				let try_branch = &mut branches[step[TRY]];
				match try_branch.status {
					BranchStatus::Succeed => continue,
					BranchStatus::Failed => break,
					BranchStatus::Prepared => {}
				}
				match pass.invoke(try_branch).await {
					Some(BranchOutcome::Success) => {
						pass.finish_branch(try_branch, BranchStatus::Succeed).await?;
					}
					Some(BranchOutcome::Failure) => {
						pass.finish_branch_durable(try_branch, BranchStatus::Failed)
							.await?;
						break;
					}
					None => return Ok(()),
				}
			}

			if first_failed(branches, steps, TRY).is_some() {
				pass.change_status(GlobalStatus::Aborting).await?;
				return self.cancel(pass, branches, steps).await;
			}
		}

		let mut done = true;
		for step in steps {
			if !pass.call_until_success(&mut branches[step[CONFIRM]]).await? {
				done = false;
			}
		}
		if done {
			pass.change_status(GlobalStatus::Succeed).await?;
		}
		Ok(())
	}

	/// Cancel every participant up to and including the one whose try failed
	async fn cancel(
		&self,
		pass: &mut Pass<'_>,
		branches: &mut [TransBranch],
		steps: &[[usize; 3]],
	) -> Result<()> {
		let failed_at = first_failed(branches, steps, TRY).ok_or_else(|| {
			CoordinatorError::invariant(pass.gid(), "aborting tcc has no failed try")
		})?;

		let mut done = true;
		for step in &steps[..=failed_at] {
			if !pass.call_until_success(&mut branches[step[CANCEL]]).await? {
				done = false;
			}
		}
		if done {
			pass.change_status(GlobalStatus::Failed).await?;
		}
		Ok(())
	}
}

#[async_trait]
impl TransProcessor for TccProcessor {
	fn generate_branches(&self, global: &TransGlobal) -> Result<Vec<TransBranch>> {
		let payload: TccPayload = parse_payload(global)?;
		if payload.participants.is_empty() {
			return Err(CoordinatorError::invalid_payload(&global.gid, "tcc has no participants"));
		}

		let mut branches = Vec::with_capacity(payload.participants.len() * 3);
		for (i, p) in payload.participants.iter().enumerate() {
			let data = branch_data(&p.data);
			for (role, url) in ROLES.iter().zip([&p.try_url, &p.confirm, &p.cancel]) {
				require_url(&global.gid, i, role.as_str(), url)?;
				branches.push(TransBranch::new(&global.gid, step_id(i), *role, url, data.clone()));
			}
		}
		Ok(branches)
	}

	async fn process_once(&self, pass: &mut Pass<'_>, branches: &mut [TransBranch]) -> Result<()> {
		let steps = layout(pass.gid(), branches, ROLES)?;
		match pass.status() {
			GlobalStatus::Submitted => self.submitted(pass, branches, &steps).await,
			GlobalStatus::Aborting => self.cancel(pass, branches, &steps).await,
			other => Err(CoordinatorError::invariant(
				pass.gid(),
				format!("tcc cannot be processed in status {other}"),
			)),
		}
	}
}
