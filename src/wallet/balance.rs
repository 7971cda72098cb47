//! Confirmation aware balance computation over a UTXO store.

use crate::utils::to_display_amount;
use crate::wallet::{BlockStamp, ChainTipError, UtxoStore};

use tracing::debug;

/// Sums the minor units of every output meeting `confirms` at `tip_height`,
/// optionally restricted to a single receiving pubkey hash.
pub fn sum_eligible(
	store: &UtxoStore,
	confirms: u32,
	tip_height: i32,
	addr_hash: Option<&[u8]>,
) -> u64 {
	store
		.eligible(confirms, tip_height)
		.filter(|u| addr_hash.is_none_or(|h| u.addr_hash == h))
		.map(|u| u.amount)
		.sum()
}

/// Balance of `store` in display units.
///
/// An unknown chain tip yields a zero balance rather than an error.
pub fn calculate_balance(
	store: &UtxoStore,
	tip: Result<BlockStamp, ChainTipError>,
	confirms: u32,
	addr_hash: Option<&[u8]>,
) -> f64 {
	let tip = match tip {
		Ok(tip) => tip,
		Err(e) => {
			debug!("Reporting zero balance, chain tip unavailable: {}", e);
			return 0.0;
		}
	};
	to_display_amount(sum_eligible(store, confirms, tip.height, addr_hash))
}
