//! Base58check encoding for payment addresses and WIF private keys.

use crate::wallet::{Network, PrivateKey};

use base58::{FromBase58, ToBase58};
use sha2::{Digest, Sha256};

/// Length of a pay-to-pubkey-hash payload.
pub const PUBKEY_HASH_LEN: usize = 20;

const CHECKSUM_LEN: usize = 4;
const COMPRESSED_FLAG: u8 = 0x01;

/// Errors decoding an address, key, or hash string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
	#[error("Invalid base58 string: {0}")]
	InvalidBase58(String),

	#[error("Checksum mismatch")]
	BadChecksum,

	#[error("Unknown version byte {0:#04x}")]
	UnknownVersion(u8),

	#[error("Unexpected payload length {0}")]
	BadLength(usize),

	#[error("Invalid hash: {0}")]
	InvalidHash(String),
}

/// Sha256(Sha256(value))
fn double_sha256(payload: &[u8]) -> Vec<u8> {
	let h1 = Sha256::digest(payload);
	Sha256::digest(h1).to_vec()
}

fn to_base58check(version: u8, body: &[u8], suffix: &[u8]) -> String {
	let mut payload = Vec::with_capacity(1 + body.len() + suffix.len() + CHECKSUM_LEN);
	payload.push(version);
	payload.extend_from_slice(body);
	payload.extend_from_slice(suffix);

	let checksum = double_sha256(&payload);
	payload.extend_from_slice(&checksum[..CHECKSUM_LEN]);
	payload.to_base58()
}

/// Decodes and verifies a base58check string, returning the version byte and
/// the body without the checksum.
fn from_base58check(s: &str) -> Result<(u8, Vec<u8>), AddressError> {
	let mut raw = s
		.from_base58()
		.map_err(|e| AddressError::InvalidBase58(format!("{:?}", e)))?;
	if raw.len() < 1 + CHECKSUM_LEN {
		return Err(AddressError::BadLength(raw.len()));
	}

	let checksum = raw.split_off(raw.len() - CHECKSUM_LEN);
	if double_sha256(&raw)[..CHECKSUM_LEN] != checksum[..] {
		return Err(AddressError::BadChecksum);
	}

	let body = raw.split_off(1);
	Ok((raw[0], body))
}

/// Decodes a payment address into its pubkey hash and network.
pub fn decode_address(address: &str) -> Result<(Vec<u8>, Network), AddressError> {
	let (version, hash) = from_base58check(address)?;
	let network =
		Network::from_pubkey_hash_prefix(version).ok_or(AddressError::UnknownVersion(version))?;
	if hash.len() != PUBKEY_HASH_LEN {
		return Err(AddressError::BadLength(hash.len()));
	}
	Ok((hash, network))
}

/// Encodes a pubkey hash as a payment address for `network`.
pub fn encode_address(pubkey_hash: &[u8], network: Network) -> String {
	to_base58check(network.pubkey_hash_prefix(), pubkey_hash, &[])
}

/// Decodes a WIF private key into the key, its network and whether the
/// matching public key is compressed.
pub fn decode_wif(wif: &str) -> Result<(PrivateKey, Network, bool), AddressError> {
	let (version, body) = from_base58check(wif)?;
	let network = Network::from_wif_prefix(version).ok_or(AddressError::UnknownVersion(version))?;

	let compressed = match body.len() {
		32 => false,
		33 if body[32] == COMPRESSED_FLAG => true,
		n => return Err(AddressError::BadLength(n)),
	};

	let mut key = [0u8; 32];
	key.copy_from_slice(&body[..32]);
	Ok((PrivateKey(key), network, compressed))
}

/// Encodes a private key as WIF.
pub fn encode_wif(key: &PrivateKey, network: Network, compressed: bool) -> String {
	let suffix: &[u8] = if compressed { &[COMPRESSED_FLAG] } else { &[] };
	to_base58check(network.wif_prefix(), &key.0, suffix)
}

/// Decodes plain (checksum-less) base58, as used for pubkey scripts in
/// transaction notifications.
pub fn decode_base58(s: &str) -> Result<Vec<u8>, AddressError> {
	s.from_base58()
		.map_err(|e| AddressError::InvalidBase58(format!("{:?}", e)))
}
