//! Runtime configuration.

use crate::wallet::Network;

use std::path::PathBuf;
use std::time::Duration;

/// Bounds on the waits an account may perform while applying notifications.
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// How long a receive waits for the matching send to be recorded
	pub ordering_wait_timeout: Duration,
	/// How long a handler waits for another handler of the same block
	pub block_gate_timeout: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			ordering_wait_timeout: Duration::from_secs(30),
			block_gate_timeout: Duration::from_secs(30),
		}
	}
}

/// Where the node lives and where account state is kept.
#[derive(Debug, Clone)]
pub struct NodeConfig {
	/// WebSocket endpoint of the node
	pub url: String,
	/// Directory holding one subdirectory per account
	pub data_dir: PathBuf,
	pub network: Network,
	/// Addresses the default account follows
	pub watch: Vec<String>,
}

impl Default for NodeConfig {
	fn default() -> Self {
		Self {
			url: "ws://127.0.0.1:18332/ws".to_string(),
			data_dir: PathBuf::from("data"),
			network: Network::TestNet,
			watch: Vec::new(),
		}
	}
}

impl NodeConfig {
	pub const URL_VAR: &'static str = "ACCOUNT_SYNC_NODE_URL";
	pub const DATA_DIR_VAR: &'static str = "ACCOUNT_SYNC_DATA_DIR";
	pub const NETWORK_VAR: &'static str = "ACCOUNT_SYNC_NETWORK";
	pub const WATCH_VAR: &'static str = "ACCOUNT_SYNC_WATCH";

	/// Reads the configuration from the environment, falling back to defaults.
	pub fn from_env() -> Result<Self, String> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
		let defaults = Self::default();
		let network = match lookup(Self::NETWORK_VAR) {
			Some(value) => value.parse()?,
			None => defaults.network,
		};
		Ok(Self {
			url: lookup(Self::URL_VAR).unwrap_or(defaults.url),
			data_dir: lookup(Self::DATA_DIR_VAR)
				.map(PathBuf::from)
				.unwrap_or(defaults.data_dir),
			network,
			watch: lookup(Self::WATCH_VAR)
				.map(|list| {
					list.split(',')
						.map(str::trim)
						.filter(|a| !a.is_empty())
						.map(String::from)
						.collect()
				})
				.unwrap_or_default(),
		})
	}
}
