//! XA-style two-phase commit
//!
//! The outcome of the prepare round is written to the global row (`committed` or
//! `aborting`) before any commit or rollback call goes out. A pass that finds either
//! status resumes the second round from that decision and never re-runs prepares.

use super::{
	Pass, TransProcessor, branch_data, first_failed, layout, parse_payload, require_url, step_id,
};
use crate::error::{CoordinatorError, Result};
use crate::invoker::BranchOutcome;
use async_trait::async_trait;
use dtx_core::{BranchStatus, BranchType, GlobalStatus, TransBranch, TransGlobal};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const PREPARE: usize = 0;
const COMMIT: usize = 1;
const ROLLBACK: usize = 2;
const ROLES: [BranchType; 3] = [BranchType::Prepare, BranchType::Commit, BranchType::Rollback];

/// `{"participants":[{"prepare":URL,"commit":URL,"rollback":URL,"data":ANY}]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XaPayload {
	pub participants: Vec<XaParticipant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XaParticipant {
	pub prepare: String,
	pub commit: String,
	pub rollback: String,
	#[serde(default)]
	pub data: Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct XaProcessor;

impl XaProcessor {
	/// Collect votes, then record the decision
	async fn prepare(
		&self,
		pass: &mut Pass<'_>,
		branches: &mut [TransBranch],
		steps: &[[usize; 3]],
	) -> Result<()> {
		for step in steps {
			let prepare = &mut branches[step[PREPARE]];
			match prepare.status {
				BranchStatus::Succeed => continue,
				BranchStatus::Failed => break,
				BranchStatus::Prepared => {}
			}
			match pass.invoke(prepare).await {
				Some(BranchOutcome::Success) => {
					pass.finish_branch(prepare, BranchStatus::Succeed).await?;
				}
				Some(BranchOutcome::Failure) => {
					pass.finish_branch_durable(prepare, BranchStatus::Failed)
						.await?;
					break;
				}
				None => return Ok(()),
			}
		}

		if first_failed(branches, steps, PREPARE).is_some() {
			pass.change_status(GlobalStatus::Aborting).await?;
			self.rollback(pass, branches, steps).await
		} else {
			pass.change_status(GlobalStatus::Committed).await?;
			self.commit(pass, branches, steps).await
		}
	}

	async fn commit(
		&self,
		pass: &mut Pass<'_>,
		branches: &mut [TransBranch],
		steps: &[[usize; 3]],
	) -> Result<()> {
		let mut done = true;
		for step in steps {
			if !pass.call_until_success(&mut branches[step[COMMIT]]).await? {
				done = false;
			}
		}
		if done {
			pass.change_status(GlobalStatus::Succeed).await?;
		}
		Ok(())
	}

	/// Roll back every participant up to and including the first refused prepare
	async fn rollback(
		&self,
		pass: &mut Pass<'_>,
		branches: &mut [TransBranch],
		steps: &[[usize; 3]],
	) -> Result<()> {
		let failed_at = first_failed(branches, steps, PREPARE).ok_or_else(|| {
			CoordinatorError::invariant(pass.gid(), "aborting xa has no failed prepare")
		})?;

		let mut done = true;
		for step in &steps[..=failed_at] {
			if !pass.call_until_success(&mut branches[step[ROLLBACK]]).await? {
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
impl TransProcessor for XaProcessor {
	fn generate_branches(&self, global: &TransGlobal) -> Result<Vec<TransBranch>> {
		let payload: XaPayload = parse_payload(global)?;
		if payload.participants.is_empty() {
			return Err(CoordinatorError::invalid_payload(&global.gid, "xa has no participants"));
		}

		let mut branches = Vec::with_capacity(payload.participants.len() * 3);
		for (i, p) in payload.participants.iter().enumerate() {
			let data = branch_data(&p.data);
			for (role, url) in ROLES.iter().zip([&p.prepare, &p.commit, &p.rollback]) {
				require_url(&global.gid, i, role.as_str(), url)?;
				branches.push(TransBranch::new(&global.gid, step_id(i), *role, url, data.clone()));
			}
		}
		Ok(branches)
	}

	async fn process_once(&self, pass: &mut Pass<'_>, branches: &mut [TransBranch]) -> Result<()> {
		let steps = layout(pass.gid(), branches, ROLES)?;
		match pass.status() {
			GlobalStatus::Submitted => self.prepare(pass, branches, &steps).await,
			GlobalStatus::Committed => self.commit(pass, branches, &steps).await,
			GlobalStatus::Aborting => self.rollback(pass, branches, &steps).await,
			other => Err(CoordinatorError::invariant(
				pass.gid(),
				format!("xa cannot be processed in status {other}"),
			)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use dtx_core::TransType;
	use rstest::rstest;

	#[rstest]
	fn test_generates_prepare_commit_rollback() {
		let data = serde_json::json!({
			"participants": [
				{"prepare": "http://a/prepare", "commit": "http://a/commit", "rollback": "http://a/rollback"}
			]
		});
		let global = TransGlobal::new("x1", TransType::Xa, data.to_string(), GlobalStatus::Submitted);

		let branches = XaProcessor.generate_branches(&global).unwrap();

		let types: Vec<_> = branches.iter().map(|b| b.branch_type).collect();
		assert_eq!(types, ROLES.to_vec());
		assert!(branches.iter().all(|b| b.branch_id == "01"));
	}
}
