//! Recovery poller
//!
//! Re-submits transactions that stopped making progress: non-terminal rows whose
//! `update_time` is older than the retry interval. Each row is touched before its pass
//! is spawned, so a second coordinator polling the same store skips it for one interval.

use crate::coordinator::Coordinator;
use crate::error::Result;
use chrono::{TimeDelta, Utc};
use dtx_conf::RecoverySettings;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryConfig {
	/// Staleness threshold and poll period
	pub retry_interval: Duration,
	/// Most transactions re-submitted per poll
	pub batch_limit: usize,
}

impl Default for RecoveryConfig {
	fn default() -> Self {
		Self {
			retry_interval: Duration::from_secs(10),
			batch_limit: 100,
		}
	}
}

impl RecoveryConfig {
	pub fn new(retry_interval: Duration, batch_limit: usize) -> Self {
		Self {
			retry_interval,
			batch_limit,
		}
	}

	pub fn from_settings(settings: &RecoverySettings) -> Self {
		Self::new(settings.retry_interval(), settings.batch_limit)
	}
}

pub struct RecoveryPoller {
	coordinator: Coordinator,
	config: RecoveryConfig,
	shutdown_tx: broadcast::Sender<()>,
}

impl RecoveryPoller {
	pub fn new(coordinator: Coordinator, config: RecoveryConfig) -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			coordinator,
			config,
			shutdown_tx,
		}
	}

	/// Poll once and spawn one processing pass per stale transaction
	pub async fn run_once(&self) -> Result<Vec<JoinHandle<()>>> {
		let window = TimeDelta::from_std(self.config.retry_interval).unwrap_or(TimeDelta::MAX);
		let threshold = Utc::now()
			.checked_sub_signed(window)
			.unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

		let repo = self.coordinator.repository();
		let stale = repo
			.store()
			.find_stale(threshold, self.config.batch_limit)
			.await?;

		let mut handles = Vec::with_capacity(stale.len());
		for mut global in stale {
			if let Err(e) = repo.touch(&mut global).await {
				tracing::warn!(gid = %global.gid, error = %e, "failed to touch stale transaction");
				continue;
			}
			tracing::info!(gid = %global.gid, status = %global.status, "re-submitting stale transaction");
			handles.push(self.coordinator.trigger(global.gid));
		}
		Ok(handles)
	}

	/// Poll every `retry_interval` until [`RecoveryPoller::shutdown`] is called
	pub async fn run(&self) {
		let mut shutdown_rx = self.shutdown_tx.subscribe();
		tracing::info!(
			interval_secs = self.config.retry_interval.as_secs(),
			batch_limit = self.config.batch_limit,
			"recovery poller started"
		);

		loop {
			if let Err(e) = self.run_once().await {
				tracing::error!(error = %e, "recovery poll failed");
			}

			tokio::select! {
				_ = shutdown_rx.recv() => break,
				_ = tokio::time::sleep(self.config.retry_interval) => {}
			}
		}

		tracing::info!("recovery poller stopped");
	}

	/// Stop [`RecoveryPoller::run`]; passes already spawned run to completion
	pub fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());
	}
}
