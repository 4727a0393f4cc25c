//! Protocol processors
//!
//! A processor is picked by [`TransType`] and does two things: derive the branch rows
//! to persist when a transaction is created, and run one processing pass over rows
//! already loaded from the store.
//!
//! A pass may be interrupted at any point and re-run later, possibly by another worker
//! at the same time. Processors therefore skip terminal branches, and every status
//! change they make goes through [`Pass`], which enforces the conditional-update
//! discipline of [`Repository`].

pub mod msg;
pub mod saga;
pub mod tcc;
pub mod xa;

pub use msg::MsgProcessor;
pub use saga::SagaProcessor;
pub use tcc::TccProcessor;
pub use xa::XaProcessor;

use crate::error::{CoordinatorError, Result};
use crate::flusher::FlushSender;
use crate::invoker::{BranchInvoker, BranchOutcome};
use crate::repository::Repository;
use async_trait::async_trait;
use chrono::Utc;
use dtx_core::{
	BranchStatus, BranchStatusUpdate, BranchType, GlobalStatus, TransBranch, TransGlobal,
	TransType,
};
use dtx_db::TransLogEntry;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Per-protocol strategy
#[async_trait]
pub trait TransProcessor: Send + Sync {
	/// Rows to persist alongside `global`. Pure: no I/O, same output for the same payload.
	fn generate_branches(&self, global: &TransGlobal) -> Result<Vec<TransBranch>>;

	/// Run at most one pass of remote calls and status changes over `branches`
	async fn process_once(&self, pass: &mut Pass<'_>, branches: &mut [TransBranch]) -> Result<()>;
}

/// The closed set of protocols
#[derive(Debug, Clone, Copy)]
pub enum Processor {
	Saga(SagaProcessor),
	Tcc(TccProcessor),
	Xa(XaProcessor),
	Msg(MsgProcessor),
}

impl Processor {
	pub fn for_type(trans_type: TransType) -> Self {
		match trans_type {
			TransType::Saga => Processor::Saga(SagaProcessor),
			TransType::Tcc => Processor::Tcc(TccProcessor),
			TransType::Xa => Processor::Xa(XaProcessor),
			TransType::Msg => Processor::Msg(MsgProcessor),
		}
	}

	fn inner(&self) -> &dyn TransProcessor {
		match self {
			Processor::Saga(p) => p,
			Processor::Tcc(p) => p,
			Processor::Xa(p) => p,
			Processor::Msg(p) => p,
		}
	}
}

#[async_trait]
impl TransProcessor for Processor {
	fn generate_branches(&self, global: &TransGlobal) -> Result<Vec<TransBranch>> {
		self.inner().generate_branches(global)
	}

	async fn process_once(&self, pass: &mut Pass<'_>, branches: &mut [TransBranch]) -> Result<()> {
		self.inner().process_once(pass, branches).await
	}
}

/// Where non-decisive branch transitions are written
#[derive(Debug, Clone)]
pub enum BranchWriter {
	/// Conditional update per branch
	Sync,
	/// Queued for the batched flush
	Async(FlushSender),
}

/// State of one processing pass over one global transaction
pub struct Pass<'a> {
	/// Freshly loaded global row, kept in step with every applied transition
	pub global: TransGlobal,
	repo: &'a Repository,
	invoker: &'a dyn BranchInvoker,
	writer: &'a BranchWriter,
}

impl<'a> Pass<'a> {
	pub fn new(
		global: TransGlobal,
		repo: &'a Repository,
		invoker: &'a dyn BranchInvoker,
		writer: &'a BranchWriter,
	) -> Self {
		Self {
			global,
			repo,
			invoker,
			writer,
		}
	}

	pub fn gid(&self) -> &str {
		&self.global.gid
	}

	pub fn status(&self) -> GlobalStatus {
		self.global.status
	}

	/// Call `branch`. `None` means a transient error, already logged.
	pub async fn invoke(&self, branch: &TransBranch) -> Option<BranchOutcome> {
		match self.invoker.invoke(&self.global, branch).await {
			Ok(outcome) => {
				tracing::debug!(gid = %branch.gid, branch = %branch.label(), outcome = ?outcome, "branch called");
				Some(outcome)
			}
			Err(e) => {
				tracing::warn!(gid = %branch.gid, branch = %branch.label(), error = %e, "branch call failed");
				self.repo
					.write_log(
						TransLogEntry::new(&branch.gid, "branch error")
							.with_branch(branch.label())
							.with_detail(e.to_string()),
					)
					.await;
				None
			}
		}
	}

	/// Ask the `query_prepared` callback. `None` means a transient error, already logged.
	pub async fn query_prepared(&self) -> Option<BranchOutcome> {
		match self.invoker.query_prepared(&self.global).await {
			Ok(outcome) => {
				tracing::debug!(gid = %self.global.gid, outcome = ?outcome, "query prepared answered");
				Some(outcome)
			}
			Err(e) => {
				tracing::warn!(gid = %self.global.gid, error = %e, "query prepared failed");
				self.repo
					.write_log(TransLogEntry::new(&self.global.gid, "query prepared error").with_detail(e.to_string()))
					.await;
				None
			}
		}
	}

	/// Record a branch outcome through the configured writer
	pub async fn finish_branch(&self, branch: &mut TransBranch, status: BranchStatus) -> Result<()> {
		let BranchWriter::Async(sender) = self.writer else {
			return self.repo.change_branch_status(branch, status).await;
		};

		if !branch.status.can_transition_to(status) {
			return Err(CoordinatorError::InvalidTransition {
				gid: branch.gid.clone(),
				from: format!("{} {}", branch.label(), branch.status),
				to: status.to_string(),
			});
		}
		self.repo
			.write_log(
				TransLogEntry::new(&branch.gid, "branch change")
					.with_status(status.as_str())
					.with_branch(branch.label()),
			)
			.await;

		let now = Utc::now();
		sender
			.send(BranchStatusUpdate::new(branch.id, status, now))
			.await?;
		branch.apply_status(status, now);
		Ok(())
	}

	/// Record a branch outcome with a conditional update, whatever the writer.
	///
	/// Used for outcomes later passes decide on, such as the failure that starts a
	/// rollback.
	pub async fn finish_branch_durable(
		&self,
		branch: &mut TransBranch,
		status: BranchStatus,
	) -> Result<()> {
		self.repo.change_branch_status(branch, status).await
	}

	/// Drive a branch that may only end in success (confirm, cancel, commit,
	/// rollback, compensate, msg action). A refusal is logged and left for a later pass.
	///
	/// Returns whether the branch is now `succeed`.
	pub async fn call_until_success(&self, branch: &mut TransBranch) -> Result<bool> {
		match branch.status {
			BranchStatus::Succeed => return Ok(true),
			BranchStatus::Failed => {
				return Err(CoordinatorError::invariant(
					&branch.gid,
					format!("branch {} cannot fail but is failed", branch.label()),
				));
			}
			BranchStatus::Prepared => {}
		}

		match self.invoke(branch).await {
			Some(BranchOutcome::Success) => {
				self.finish_branch(branch, BranchStatus::Succeed).await?;
				Ok(true)
			}
			Some(BranchOutcome::Failure) => {
				tracing::warn!(gid = %branch.gid, branch = %branch.label(), "branch refused, will retry");
				self.repo
					.write_log(
						TransLogEntry::new(&branch.gid, "branch refused").with_branch(branch.label()),
					)
					.await;
				Ok(false)
			}
			None => Ok(false),
		}
	}

	/// Apply a global transition
	pub async fn change_status(&mut self, next: GlobalStatus) -> Result<()> {
		self.repo.change_global_status(&mut self.global, next).await
	}

	/// Signal liveness to the recovery poller
	pub async fn touch(&mut self) -> Result<()> {
		self.repo.touch(&mut self.global).await
	}
}

/// Decode the JSON payload of `global`
pub(crate) fn parse_payload<T: DeserializeOwned>(global: &TransGlobal) -> Result<T> {
	serde_json::from_str(&global.data)
		.map_err(|e| CoordinatorError::invalid_payload(&global.gid, e))
}

/// Serialized request body of a branch
pub(crate) fn branch_data(data: &Value) -> String {
	if data.is_null() {
		"{}".to_string()
	} else {
		data.to_string()
	}
}

/// `01`, `02`, ... for the step at `index`
pub(crate) fn step_id(index: usize) -> String {
	format!("{:02}", index + 1)
}

pub(crate) fn require_url(gid: &str, step: usize, role: &str, url: &str) -> Result<()> {
	if url.trim().is_empty() {
		return Err(CoordinatorError::invalid_payload(
			gid,
			format!("step {} has an empty {role} url", step + 1),
		));
	}
	Ok(())
}

/// Positions in `branches` of each step's rows, one slot per entry of `roles`,
/// in step order.
pub(crate) fn layout<const N: usize>(
	gid: &str,
	branches: &[TransBranch],
	roles: [BranchType; N],
) -> Result<Vec<[usize; N]>> {
	let mut steps: Vec<(&str, [Option<usize>; N])> = Vec::new();

	for (pos, branch) in branches.iter().enumerate() {
		let slot = roles
			.iter()
			.position(|role| *role == branch.branch_type)
			.ok_or_else(|| {
				CoordinatorError::invariant(gid, format!("unexpected branch {}", branch.label()))
			})?;
		let step = match steps.iter().position(|(id, _)| *id == branch.branch_id) {
			Some(step) => step,
			None => {
				steps.push((branch.branch_id.as_str(), [None; N]));
				steps.len() - 1
			}
		};
		if steps[step].1[slot].replace(pos).is_some() {
			return Err(CoordinatorError::invariant(
				gid,
				format!("duplicate branch {}", branch.label()),
			));
		}
	}

	steps
		.into_iter()
		.map(|(id, slots)| -> Result<[usize; N]> {
			let mut positions = [0usize; N];
			for (i, slot) in slots.iter().enumerate() {
				positions[i] = slot.ok_or_else(|| {
					CoordinatorError::invariant(gid, format!("step {id} has no {} branch", roles[i]))
				})?;
			}
			Ok(positions)
		})
		.collect()
}

/// Index of the first step whose `role` branch is `failed`
pub(crate) fn first_failed(
	branches: &[TransBranch],
	steps: &[impl AsRef<[usize]>],
	role: usize,
) -> Option<usize> {
	steps
		.iter()
		.position(|step| branches[step.as_ref()[role]].status == BranchStatus::Failed)
}
