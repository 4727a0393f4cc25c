//! Participant calls
//!
//! A participant answers every call with one of three results:
//!
//! - `SUCCESS` in a 2xx body: the operation is done.
//! - HTTP 409 or `FAILURE` anywhere in the body: the operation was refused for good.
//! - Anything else (timeouts, 5xx, unreadable bodies): transient, ask again later.

use crate::error::InvokeError;
use async_trait::async_trait;
use dtx_core::{TransBranch, TransGlobal};
use std::time::Duration;

/// Decisive answer from a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome {
	Success,
	Failure,
}

/// Issues remote branch calls on behalf of the processors.
///
/// Calls must be safe to repeat: a branch whose outcome was lost is invoked again on
/// the next pass.
#[async_trait]
pub trait BranchInvoker: Send + Sync {
	/// Call the operation `branch` points at
	async fn invoke(
		&self,
		global: &TransGlobal,
		branch: &TransBranch,
	) -> Result<BranchOutcome, InvokeError>;

	/// Ask the `query_prepared` callback of a prepared message transaction whether its
	/// local transaction committed
	async fn query_prepared(&self, global: &TransGlobal) -> Result<BranchOutcome, InvokeError>;
}

/// [`BranchInvoker`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpInvoker {
	client: reqwest::Client,
}

impl HttpInvoker {
	/// Build a client whose requests give up after `timeout`
	pub fn new(timeout: Duration) -> Result<Self, InvokeError> {
		let client = reqwest::Client::builder().timeout(timeout).build()?;
		Ok(Self { client })
	}

	pub fn from_client(client: reqwest::Client) -> Self {
		Self { client }
	}

	async fn read(response: reqwest::Response) -> Result<BranchOutcome, InvokeError> {
		let status = response.status().as_u16();
		let body = response.text().await?;
		classify(status, &body)
	}
}

/// Map an HTTP status and body to an outcome
pub fn classify(status: u16, body: &str) -> Result<BranchOutcome, InvokeError> {
	if status == 409 || body.contains("FAILURE") {
		return Ok(BranchOutcome::Failure);
	}
	if (200..300).contains(&status) && body.contains("SUCCESS") {
		return Ok(BranchOutcome::Success);
	}
	Err(InvokeError::UnexpectedResponse {
		status,
		body: body.chars().take(256).collect(),
	})
}

#[async_trait]
impl BranchInvoker for HttpInvoker {
	async fn invoke(
		&self,
		global: &TransGlobal,
		branch: &TransBranch,
	) -> Result<BranchOutcome, InvokeError> {
		let body = if branch.data.is_empty() {
			"{}".to_string()
		} else {
			branch.data.clone()
		};
		let response = self
			.client
			.post(&branch.url)
			.query(&[
				("gid", global.gid.as_str()),
				("trans_type", global.trans_type.as_str()),
				("branch_id", branch.branch_id.as_str()),
				("op", branch.branch_type.as_str()),
			])
			.header(reqwest::header::CONTENT_TYPE, "application/json")
			.body(body)
			.send()
			.await?;
		Self::read(response).await
	}

	async fn query_prepared(&self, global: &TransGlobal) -> Result<BranchOutcome, InvokeError> {
		let url = global.query_prepared.as_deref().ok_or_else(|| {
			InvokeError::Unavailable(format!("{} has no query_prepared callback", global.gid))
		})?;
		let response = self
			.client
			.get(url)
			.query(&[
				("gid", global.gid.as_str()),
				("trans_type", global.trans_type.as_str()),
			])
			.send()
			.await?;
		Self::read(response).await
	}
}
