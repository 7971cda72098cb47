use crate::node::NodeError;
use crate::utils::AddressError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of minor units in one display unit.
pub const SATOSHI_PER_BITCOIN: u64 = 100_000_000;

/// Height recorded for anything not yet included in a block.
pub const UNCONFIRMED_HEIGHT: i32 = -1;

/// A 32 byte double-SHA256 hash (transaction id or block hash).
///
/// Stored in internal byte order and rendered byte-reversed, the way block
/// explorers and the node print them.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShaHash(pub [u8; 32]);

impl ShaHash {
	pub const ZERO: ShaHash = ShaHash([0u8; 32]);

	pub fn is_zero(&self) -> bool {
		self.0 == [0u8; 32]
	}
}

impl FromStr for ShaHash {
	type Err = AddressError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let bytes = hex::decode(s).map_err(|e| AddressError::InvalidHash(e.to_string()))?;
		let mut raw: [u8; 32] = bytes
			.try_into()
			.map_err(|b: Vec<u8>| AddressError::InvalidHash(format!("expected 32 bytes, got {}", b.len())))?;
		raw.reverse();
		Ok(ShaHash(raw))
	}
}

impl fmt::Display for ShaHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut rev = self.0;
		rev.reverse();
		f.write_str(&hex::encode(rev))
	}
}

impl fmt::Debug for ShaHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ShaHash({})", self)
	}
}

impl Serialize for ShaHash {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for ShaHash {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

/// Reference to one output of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
	pub hash: ShaHash,
	pub index: u32,
}

impl OutPoint {
	pub fn new(hash: ShaHash, index: u32) -> Self {
		Self { hash, index }
	}
}

impl fmt::Display for OutPoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.hash, self.index)
	}
}

/// A block identified by height and hash. Used for the current chain tip
/// and for the point a wallet is synced with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStamp {
	pub height: i32,
	pub hash: ShaHash,
}

impl BlockStamp {
	pub fn new(height: i32, hash: ShaHash) -> Self {
		Self { height, hash }
	}
}

/// Whether a record mined at `height` in block `hash` sits on the branch
/// orphaned by a rollback to (`rollback_height`, `rollback_hash`).
///
/// Unconfirmed records are never orphaned.
pub(crate) fn is_orphaned(
	height: i32,
	hash: &ShaHash,
	rollback_height: i32,
	rollback_hash: &ShaHash,
) -> bool {
	height != UNCONFIRMED_HEIGHT && (height >= rollback_height || hash == rollback_hash)
}

/// Networks an account can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
	MainNet,
	TestNet,
}

impl Network {
	/// Version byte prefixed to pay-to-pubkey-hash addresses.
	pub fn pubkey_hash_prefix(self) -> u8 {
		match self {
			Network::MainNet => 0x00,
			Network::TestNet => 0x6f,
		}
	}

	/// Version byte prefixed to WIF private keys.
	pub fn wif_prefix(self) -> u8 {
		match self {
			Network::MainNet => 0x80,
			Network::TestNet => 0xef,
		}
	}

	pub fn from_pubkey_hash_prefix(prefix: u8) -> Option<Self> {
		match prefix {
			0x00 => Some(Network::MainNet),
			0x6f => Some(Network::TestNet),
			_ => None,
		}
	}

	pub fn from_wif_prefix(prefix: u8) -> Option<Self> {
		match prefix {
			0x80 => Some(Network::MainNet),
			0xef => Some(Network::TestNet),
			_ => None,
		}
	}
}

impl fmt::Display for Network {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Network::MainNet => f.write_str("mainnet"),
			Network::TestNet => f.write_str("testnet"),
		}
	}
}

impl FromStr for Network {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"mainnet" | "main" => Ok(Network::MainNet),
			"testnet" | "testnet3" | "test" => Ok(Network::TestNet),
			other => Err(format!("unknown network '{}'", other)),
		}
	}
}

/// The current best block could not be determined.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainTipError {
	#[error("Chain tip is not known yet")]
	Unknown,

	#[error("Chain tip source failed: {0}")]
	Source(String),
}

/// Errors raised by the key management capability an account wraps.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WalletBackendError {
	#[error("Address {0} is not managed by this wallet")]
	UnknownAddress(String),

	#[error("Wallet is locked")]
	Locked,

	#[error("Invalid passphrase")]
	InvalidPassphrase,

	#[error("Duplicate address: {0}")]
	DuplicateAddress(String),

	#[error("Wallet backend error: {0}")]
	Other(String),
}

/// Failure writing or reading persisted account state.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Serialization error: {0}")]
	SerdeError(#[from] serde_json::Error),

	#[error("Wallet save failed: {0}")]
	Wallet(#[from] WalletBackendError),
}

/// Errors returned to callers of account operations.
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Decode error: {0}")]
	Decode(#[from] AddressError),

	#[error("Wrong network: account is on {expected}, key is for {found}")]
	NetworkMismatch { expected: Network, found: Network },

	#[error("Persistence error: {0}")]
	Persistence(#[from] PersistenceError),

	#[error("Chain tip unavailable: {0}")]
	ChainTipUnavailable(#[from] ChainTipError),

	#[error("Wallet error: {0}")]
	Wallet(#[from] WalletBackendError),

	#[error("Node error: {0}")]
	Node(#[from] NodeError),
}
