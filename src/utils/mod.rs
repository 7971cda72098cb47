//!
//! Utility module for the account sync engine.
//!
//! Re-exports formatting helpers and base58check codecs for use throughout the codebase.
/// Base58check address and WIF codecs
pub mod base58check;
/// Utility functions for formatting and display
pub mod index;

pub use base58check::{
	AddressError, PUBKEY_HASH_LEN, decode_address, decode_base58, decode_wif, encode_address,
	encode_wif,
};
pub use index::{format_amount, to_display_amount};
