//! The key management capability wrapped by an account.
//!
//! Address derivation, key storage and wallet file I/O live behind the
//! [`WalletBackend`] trait. An account forwards the operations it needs to
//! the backend and never exposes the backend's surface directly.

use crate::wallet::{BlockStamp, Network, WalletBackendError};

use std::fmt;

/// A raw secp256k1 private key.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey(pub [u8; 32]);

impl fmt::Debug for PrivateKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("PrivateKey(<redacted>)")
	}
}

/// Information about one address managed by a wallet backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
	/// The encoded payment address.
	pub address: String,
	/// Whether the public key for this address is serialized compressed.
	pub compressed: bool,
	/// Height of the block the address was first seen at or created after.
	pub first_block: i32,
	/// Position in the key chain. Imported keys sort after chained ones.
	pub chain_index: i64,
}

/// Key management operations an account needs from its wallet.
pub trait WalletBackend: Send + Sync {
	/// Network the wallet's keys belong to.
	fn network(&self) -> Network;

	/// Derives the next address of the key chain, recording `tip` as the
	/// block it was created at.
	fn next_chained_address(&mut self, tip: &BlockStamp) -> Result<String, WalletBackendError>;

	/// The most recently derived chained address.
	fn last_chained_address(&self) -> Result<String, WalletBackendError>;

	fn address_key(&self, address: &str) -> Result<PrivateKey, WalletBackendError>;

	fn address_info(&self, address: &str) -> Result<AddressInfo, WalletBackendError>;

	/// Imports a private key, returning its payment address.
	fn import_private_key(
		&mut self,
		key: PrivateKey,
		compressed: bool,
		tip: &BlockStamp,
	) -> Result<String, WalletBackendError>;

	/// All active addresses, in no particular order.
	fn active_addresses(&self) -> Vec<AddressInfo>;

	fn synced_with(&self) -> BlockStamp;

	fn set_synced_with(&mut self, tip: BlockStamp);

	/// Lowest block height any address of this wallet can appear in.
	fn earliest_block_height(&self) -> i32;

	fn lock(&mut self) -> Result<(), WalletBackendError>;

	fn unlock(&mut self, passphrase: &[u8]) -> Result<(), WalletBackendError>;

	/// Writes the wallet file.
	fn save(&self) -> Result<(), WalletBackendError>;
}
