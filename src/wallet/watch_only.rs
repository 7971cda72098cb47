//! A wallet backend that follows addresses without holding their keys.

use crate::utils::decode_address;
use crate::wallet::{
	AddressInfo, BlockStamp, Network, PrivateKey, ShaHash, WalletBackend, WalletBackendError,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WatchedAddress {
	address: String,
	first_block: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct WatchOnlyFile {
	network: Network,
	addresses: Vec<WatchedAddress>,
	synced_with: BlockStamp,
}

/// Watch-only wallet kept in a single JSON file.
///
/// Every key operation fails with [`WalletBackendError::Other`]; the account
/// still tracks payments to the watched addresses.
#[derive(Debug)]
pub struct WatchOnlyWallet {
	path: PathBuf,
	file: WatchOnlyFile,
}

impl WatchOnlyWallet {
	/// Loads the wallet at `path`, or starts an empty one for `network`.
	pub fn open(path: impl Into<PathBuf>, network: Network) -> Result<Self, WalletBackendError> {
		let path = path.into();
		let file = match std::fs::read(&path) {
			Ok(bytes) => {
				let file: WatchOnlyFile = serde_json::from_slice(&bytes)
					.map_err(|e| WalletBackendError::Other(format!("{:?}: {}", path, e)))?;
				if file.network != network {
					return Err(WalletBackendError::Other(format!(
						"{:?} holds a {} wallet, expected {}",
						path, file.network, network
					)));
				}
				info!("Loaded {} watched addresses from {:?}", file.addresses.len(), path);
				file
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!("No wallet at {:?}, starting empty", path);
				WatchOnlyFile {
					network,
					addresses: Vec::new(),
					synced_with: BlockStamp::new(0, ShaHash::ZERO),
				}
			}
			Err(e) => return Err(WalletBackendError::Other(format!("{:?}: {}", path, e))),
		};
		Ok(Self { path, file })
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Adds `address`, first seen at `first_block`. Returns whether it was new.
	pub fn watch(&mut self, address: &str, first_block: i32) -> Result<bool, WalletBackendError> {
		let (_, network) = decode_address(address).map_err(|e| WalletBackendError::Other(e.to_string()))?;
		if network != self.file.network {
			return Err(WalletBackendError::Other(format!(
				"{} is a {} address, wallet is {}",
				address, network, self.file.network
			)));
		}
		if self.file.addresses.iter().any(|w| w.address == address) {
			return Ok(false);
		}
		self.file.addresses.push(WatchedAddress {
			address: address.to_string(),
			first_block,
		});
		Ok(true)
	}

	fn find(&self, address: &str) -> Result<(usize, &WatchedAddress), WalletBackendError> {
		self.file
			.addresses
			.iter()
			.enumerate()
			.find(|(_, w)| w.address == address)
			.ok_or_else(|| WalletBackendError::UnknownAddress(address.to_string()))
	}

	fn no_keys() -> WalletBackendError {
		WalletBackendError::Other("watch-only wallet holds no keys".to_string())
	}
}

impl WalletBackend for WatchOnlyWallet {
	fn network(&self) -> Network {
		self.file.network
	}

	fn next_chained_address(&mut self, _tip: &BlockStamp) -> Result<String, WalletBackendError> {
		Err(Self::no_keys())
	}

	fn last_chained_address(&self) -> Result<String, WalletBackendError> {
		self.file
			.addresses
			.last()
			.map(|w| w.address.clone())
			.ok_or_else(|| WalletBackendError::Other("no watched addresses".to_string()))
	}

	fn address_key(&self, address: &str) -> Result<PrivateKey, WalletBackendError> {
		self.find(address)?;
		Err(Self::no_keys())
	}

	fn address_info(&self, address: &str) -> Result<AddressInfo, WalletBackendError> {
		let (index, watched) = self.find(address)?;
		Ok(AddressInfo {
			address: watched.address.clone(),
			compressed: true,
			first_block: watched.first_block,
			chain_index: index as i64,
		})
	}

	fn import_private_key(
		&mut self,
		_key: PrivateKey,
		_compressed: bool,
		_tip: &BlockStamp,
	) -> Result<String, WalletBackendError> {
		Err(Self::no_keys())
	}

	fn active_addresses(&self) -> Vec<AddressInfo> {
		self.file
			.addresses
			.iter()
			.enumerate()
			.map(|(index, w)| AddressInfo {
				address: w.address.clone(),
				compressed: true,
				first_block: w.first_block,
				chain_index: index as i64,
			})
			.collect()
	}

	fn synced_with(&self) -> BlockStamp {
		self.file.synced_with
	}

	fn set_synced_with(&mut self, tip: BlockStamp) {
		self.file.synced_with = tip;
	}

	fn earliest_block_height(&self) -> i32 {
		self.file
			.addresses
			.iter()
			.map(|w| w.first_block)
			.min()
			.unwrap_or(0)
	}

	fn lock(&mut self) -> Result<(), WalletBackendError> {
		Ok(())
	}

	fn unlock(&mut self, _passphrase: &[u8]) -> Result<(), WalletBackendError> {
		Ok(())
	}

	fn save(&self) -> Result<(), WalletBackendError> {
		let io = |e: std::io::Error| WalletBackendError::Other(format!("{:?}: {}", self.path, e));
		if let Some(dir) = self.path.parent() {
			std::fs::create_dir_all(dir).map_err(io)?;
		}
		let bytes = serde_json::to_vec_pretty(&self.file)
			.map_err(|e| WalletBackendError::Other(e.to_string()))?;
		let staging = self.path.with_extension("json.tmp");
		std::fs::write(&staging, bytes).map_err(io)?;
		std::fs::rename(&staging, &self.path).map_err(io)?;
		debug!("Saved watch-only wallet to {:?}", self.path);
		Ok(())
	}
}
