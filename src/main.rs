use account_sync::config::{NodeConfig, SyncConfig};
use account_sync::node::NodeClient;
use account_sync::wallet::sync::{
	AccountStore, EventDispatcher, LoggingEventHandler, NotificationRouter, StatePersistenceService,
	SyncContext,
};
use account_sync::wallet::{SharedChainTip, WalletBackend, WatchOnlyWallet};

use backoff::{ExponentialBackoff, future::retry};
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_ACCOUNT: &str = "default";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting account sync service");
	let config = NodeConfig::from_env()?;

	let router = Arc::new(NotificationRouter::new());
	let (client, connection) = retry(ExponentialBackoff::default(), || {
		let router = router.clone();
		let url = config.url.clone();
		async move {
			NodeClient::connect(&url, router).await.map_err(|e| {
				warn!("Cannot connect to node at {}: {}", url, e);
				backoff::Error::transient(e)
			})
		}
	})
	.await?;

	let mut dispatcher = EventDispatcher::new();
	dispatcher.register_handler(Box::new(LoggingEventHandler));

	let ctx = SyncContext::new(
		router,
		Arc::new(client),
		Arc::new(SharedChainTip::new()),
		Arc::new(dispatcher),
		Arc::new(StatePersistenceService::new(config.data_dir.clone())),
		SyncConfig::default(),
	);
	let store = AccountStore::new(ctx);

	let mut wallet = WatchOnlyWallet::open(
		config.data_dir.join(DEFAULT_ACCOUNT).join("wallet.json"),
		config.network,
	)?;
	let mut added = false;
	for address in &config.watch {
		added |= wallet.watch(address, 0)?;
	}
	if added {
		wallet.save()?;
	}
	info!("Watching {} addresses on {}", config.watch.len(), config.network);

	let account = store.open(DEFAULT_ACCOUNT, Box::new(wallet)).await?;
	if added {
		// New addresses may have history before the stored sync point.
		account.set_full_rescan(true).await;
	}
	store.track_and_rescan_all().await?;

	tokio::select! {
		result = connection => {
			if let Err(e) = result {
				error!("Node connection task failed: {}", e);
			}
			info!("Node connection closed");
		}
		_ = tokio::signal::ctrl_c() => info!("Shutting down"),
	}

	store.write_all_dirty().await;
	Ok(())
}
