//! Branch status flusher
//!
//! Processing passes push [`BranchStatusUpdate`]s into a bounded queue; one background
//! task drains it into batches and commits each batch with a single multi-row update.
//!
//! A batch closes when it holds `max_batch` updates or when the collection window
//! (opened by its first update) runs out, whichever comes first. A failed commit is
//! retried after `retry_backoff` until it goes through. Producers wait when the queue is
//! full; no update is ever dropped.

use crate::error::{CoordinatorError, Result};
use chrono::Utc;
use dtx_conf::FlushSettings;
use dtx_core::BranchStatusUpdate;
use dtx_db::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};

/// Flusher tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushConfig {
	pub queue_capacity: usize,
	/// Batch collection window
	pub interval: Duration,
	/// How often an open batch re-checks the window and the shutdown signal
	pub poll_interval: Duration,
	pub max_batch: usize,
	pub retry_backoff: Duration,
}

impl Default for FlushConfig {
	fn default() -> Self {
		Self {
			queue_capacity: 1000,
			interval: Duration::from_millis(200),
			poll_interval: Duration::from_millis(20),
			max_batch: 20,
			retry_backoff: Duration::from_secs(1),
		}
	}
}

impl FlushConfig {
	pub fn from_settings(settings: &FlushSettings) -> Self {
		Self {
			queue_capacity: settings.queue_capacity.max(1),
			interval: settings.interval(),
			poll_interval: settings.poll_interval(),
			max_batch: settings.max_batch.max(1),
			retry_backoff: settings.retry_backoff(),
		}
	}

	pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
		self.queue_capacity = capacity.max(1);
		self
	}

	pub fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
		self.poll_interval = poll_interval;
		self
	}

	pub fn with_max_batch(mut self, max_batch: usize) -> Self {
		self.max_batch = max_batch.max(1);
		self
	}

	pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
		self.retry_backoff = backoff;
		self
	}
}

/// Producer handle for the flusher queue
#[derive(Debug, Clone)]
pub struct FlushSender {
	tx: mpsc::Sender<BranchStatusUpdate>,
}

impl FlushSender {
	/// Queue one update, waiting while the queue is full
	pub async fn send(&self, update: BranchStatusUpdate) -> Result<()> {
		self.tx
			.send(update)
			.await
			.map_err(|_| CoordinatorError::FlusherClosed)
	}

	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

/// Owner of the background flush task
pub struct BranchStatusFlusher {
	sender: FlushSender,
	shutdown_tx: broadcast::Sender<()>,
	handle: JoinHandle<()>,
}

impl BranchStatusFlusher {
	/// Start the flush loop on the current runtime
	pub fn spawn(store: Arc<dyn Store>, config: FlushConfig) -> Self {
		let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
		let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
		let handle = tokio::spawn(run(store, config, rx, shutdown_rx));
		Self {
			sender: FlushSender { tx },
			shutdown_tx,
			handle,
		}
	}

	pub fn sender(&self) -> FlushSender {
		self.sender.clone()
	}

	/// Stop the loop after committing everything already queued
	pub async fn shutdown(self) {
		let _ = self.shutdown_tx.send(());
		drop(self.sender);
		if let Err(e) = self.handle.await {
			tracing::error!(error = %e, "branch status flusher task failed");
		}
	}
}

async fn run(
	store: Arc<dyn Store>,
	config: FlushConfig,
	mut rx: mpsc::Receiver<BranchStatusUpdate>,
	mut shutdown_rx: broadcast::Receiver<()>,
) {
	tracing::debug!(
		capacity = config.queue_capacity,
		max_batch = config.max_batch,
		interval_ms = config.interval.as_millis() as u64,
		"branch status flusher started"
	);
	loop {
		let (batch, stop) = collect(&mut rx, &mut shutdown_rx, &config).await;
		if !batch.is_empty() {
			commit(store.as_ref(), &batch, &config).await;
		}
		if stop {
			break;
		}
	}
	tracing::debug!("branch status flusher stopped");
}

/// Gather one batch. The flag is true when the loop should exit after committing it.
async fn collect(
	rx: &mut mpsc::Receiver<BranchStatusUpdate>,
	shutdown_rx: &mut broadcast::Receiver<()>,
	config: &FlushConfig,
) -> (Vec<BranchStatusUpdate>, bool) {
	let mut batch = Vec::with_capacity(config.max_batch);

	let first = tokio::select! {
		biased;
		_ = shutdown_rx.recv() => {
			drain(rx, &mut batch);
			return (batch, true);
		}
		update = rx.recv() => match update {
			Some(update) => update,
			None => return (batch, true),
		},
	};
	batch.push(first);

	let opened = Instant::now();
	let window = config.interval.saturating_sub(config.poll_interval);
	while batch.len() < config.max_batch && opened.elapsed() < window {
		tokio::select! {
			biased;
			_ = shutdown_rx.recv() => {
				drain(rx, &mut batch);
				return (batch, true);
			}
			update = rx.recv() => match update {
				Some(update) => batch.push(update),
				None => return (batch, true),
			},
			_ = sleep(config.poll_interval) => {}
		}
	}

	(batch, false)
}

fn drain(rx: &mut mpsc::Receiver<BranchStatusUpdate>, batch: &mut Vec<BranchStatusUpdate>) {
	rx.close();
	while let Ok(update) = rx.try_recv() {
		batch.push(update);
	}
}

async fn commit(store: &dyn Store, batch: &[BranchStatusUpdate], config: &FlushConfig) {
	for chunk in batch.chunks(config.max_batch.max(1)) {
		let mut attempt: u32 = 0;
		loop {
			match store.update_branches(chunk, Utc::now()).await {
				Ok(affected) => {
					tracing::debug!(size = chunk.len(), affected, "branch status batch committed");
					break;
				}
				Err(e) => {
					attempt += 1;
					tracing::error!(
						error = %e,
						size = chunk.len(),
						attempt,
						"branch status batch commit failed, retrying"
					);
					sleep(config.retry_backoff).await;
				}
			}
		}
	}
}
