//! dtx coordinator runner
//!
//! ## Usage
//!
//! ```bash
//! dtxd init-db
//! dtxd serve --config dtx.toml
//! dtxd submit --trans-type saga --payload saga.json
//! dtxd status 6f1c...
//! ```
//!
//! Settings come from the optional TOML file, overridden by `DTX_*` environment
//! variables (`DTX_DATABASE__URL`, `DTX_FLUSH__MAX_BATCH`, ...).

use anyhow::Context;
use clap::{Parser, Subcommand};
use dtx_conf::Settings;
use dtx_core::{GlobalStatus, TransType};
use dtx_db::{SqlStore, SqlStoreConfig};
use dtx_server::{
	BranchStatusFlusher, Coordinator, CoordinatorConfig, FlushConfig, HttpInvoker,
	RecoveryConfig, RecoveryPoller, Repository,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dtxd")]
#[command(about = "Distributed transaction coordinator", long_about = None)]
#[command(version)]
struct Cli {
	/// TOML settings file
	#[arg(short, long, global = true, value_name = "PATH")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Create the coordinator tables
	InitDb,

	/// Run the branch status flusher and the recovery poller until interrupted
	Serve,

	/// Submit one transaction and run its first processing pass
	Submit {
		/// Protocol: saga, tcc, xa or msg
		#[arg(short, long)]
		trans_type: TransType,

		/// Global transaction id (generated when omitted)
		#[arg(short, long, default_value = "")]
		gid: String,

		/// JSON payload file
		#[arg(short, long, value_name = "PATH")]
		payload: PathBuf,
	},

	/// Print a transaction and its branches as JSON
	Status {
		#[arg(value_name = "GID")]
		gid: String,
	},

	/// List transactions
	List {
		/// Only show transactions in this status
		#[arg(short, long)]
		status: Option<GlobalStatus>,

		#[arg(short, long, default_value_t = 50)]
		limit: usize,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
	init_tracing(&settings);

	let store = open_store(&settings).await?;
	match cli.command {
		Commands::InitDb => {
			store.migrate().await.context("failed to create tables")?;
			tracing::info!(url = %settings.database.url, "database initialized");
		}
		Commands::Serve => serve(&settings, store).await?,
		Commands::Submit {
			trans_type,
			gid,
			payload,
		} => {
			let payload = std::fs::read_to_string(&payload)
				.with_context(|| format!("failed to read {}", payload.display()))?;
			let config = CoordinatorConfig::from_settings(&settings.coordinator)
				.with_update_branch_sync(true)
				.with_wait_result(true);
			let coordinator = coordinator(&settings, store, None, config)?;
			let receipt = coordinator.submit_new(trans_type, gid, payload).await?;
			let snapshot = coordinator.query_status(&receipt.gid).await?;
			println!("{}", serde_json::to_string_pretty(&snapshot)?);
		}
		Commands::Status { gid } => {
			let coordinator = coordinator(&settings, store, None, CoordinatorConfig::default())?;
			let snapshot = coordinator.query_status(&gid).await?;
			println!("{}", serde_json::to_string_pretty(&snapshot)?);
		}
		Commands::List { status, limit } => {
			let coordinator = coordinator(&settings, store, None, CoordinatorConfig::default())?;
			for global in coordinator.list(status, limit).await? {
				println!(
					"{}\t{}\t{}\t{}",
					global.gid,
					global.trans_type,
					global.status,
					global.update_time.to_rfc3339()
				);
			}
		}
	}
	Ok(())
}

/// `RUST_LOG` wins over the configured filter
fn init_tracing(settings: &Settings) {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn open_store(settings: &Settings) -> anyhow::Result<SqlStore> {
	let config = SqlStoreConfig::new(&settings.database.url)
		.with_max_connections(settings.database.max_connections)
		.with_acquire_timeout(settings.database.acquire_timeout());
	SqlStore::connect(&config)
		.await
		.with_context(|| format!("failed to open {}", settings.database.url))
}

fn coordinator(
	settings: &Settings,
	store: SqlStore,
	flush: Option<dtx_server::FlushSender>,
	config: CoordinatorConfig,
) -> anyhow::Result<Coordinator> {
	let store = Arc::new(store);
	let invoker = HttpInvoker::new(settings.coordinator.request_timeout())?;
	Ok(Coordinator::new(
		Repository::new(store.clone(), store),
		Arc::new(invoker),
		flush,
		config,
	))
}

async fn serve(settings: &Settings, store: SqlStore) -> anyhow::Result<()> {
	store.migrate().await.context("failed to create tables")?;

	let flusher = BranchStatusFlusher::spawn(
		Arc::new(store.clone()),
		FlushConfig::from_settings(&settings.flush),
	);
	let coordinator = coordinator(
		settings,
		store,
		Some(flusher.sender()),
		CoordinatorConfig::from_settings(&settings.coordinator),
	)?;
	let poller = Arc::new(RecoveryPoller::new(
		coordinator,
		RecoveryConfig::from_settings(&settings.recovery),
	));

	let polling = tokio::spawn({
		let poller = poller.clone();
		async move { poller.run().await }
	});
	tracing::info!(url = %settings.database.url, "coordinator running");

	tokio::signal::ctrl_c()
		.await
		.context("failed to listen for ctrl-c")?;
	tracing::info!("shutting down");

	poller.shutdown();
	if let Err(e) = polling.await {
		tracing::error!(error = %e, "recovery poller task failed");
	}
	flusher.shutdown().await;
	Ok(())
}
