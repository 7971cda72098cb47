//! Unspent outputs owned by an account.

use crate::wallet::{OutPoint, ShaHash, UNCONFIRMED_HEIGHT, is_orphaned};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// An unspent transaction output paying to one of the account's addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
	pub outpoint: OutPoint,
	/// Amount in minor units.
	pub amount: u64,
	/// Height of the enclosing block, or [`UNCONFIRMED_HEIGHT`].
	pub height: i32,
	/// Pubkey hash of the receiving address.
	pub addr_hash: Vec<u8>,
	pub block_hash: ShaHash,
	/// Redeem script of the output.
	pub subscript: Vec<u8>,
}

impl Utxo {
	pub fn is_confirmed(&self) -> bool {
		self.height != UNCONFIRMED_HEIGHT
	}

	/// Number of blocks, inclusive, between this output's block and `tip_height`.
	pub fn confirmations(&self, tip_height: i32) -> i32 {
		if self.is_confirmed() {
			tip_height - self.height + 1
		} else {
			0
		}
	}

	/// Confirmation rule shared by every balance computation.
	///
	/// With `confirms == 0` every output counts, mined or not. Otherwise the
	/// output must be in a block with at least `confirms` confirmations.
	pub fn meets_confirms(&self, confirms: u32, tip_height: i32) -> bool {
		confirms == 0
			|| (self.is_confirmed() && i64::from(self.confirmations(tip_height)) >= i64::from(confirms))
	}
}

/// Unspent outputs of one account, keyed by outpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Utxo>", into = "Vec<Utxo>")]
pub struct UtxoStore {
	utxos: BTreeMap<OutPoint, Utxo>,
}

impl UtxoStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds `utxo`, replacing any entry for the same outpoint.
	pub fn insert(&mut self, utxo: Utxo) -> Option<Utxo> {
		self.utxos.insert(utxo.outpoint, utxo)
	}

	pub fn remove(&mut self, outpoint: &OutPoint) -> Option<Utxo> {
		self.utxos.remove(outpoint)
	}

	pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
		self.utxos.get(outpoint)
	}

	pub fn len(&self) -> usize {
		self.utxos.len()
	}

	pub fn is_empty(&self) -> bool {
		self.utxos.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
		self.utxos.values()
	}

	/// Owned copies of every output meeting `confirms` at `tip_height`.
	///
	/// The sequence is lazy; it reflects the store as seen through the
	/// borrow (and therefore the lock) it was created under.
	pub fn eligible(&self, confirms: u32, tip_height: i32) -> impl Iterator<Item = Utxo> + '_ {
		self.utxos
			.values()
			.filter(move |u| u.meets_confirms(confirms, tip_height))
			.cloned()
	}

	/// Drops every output mined on the branch orphaned at (`height`, `hash`).
	///
	/// Returns whether anything was removed.
	pub fn rollback(&mut self, height: i32, hash: &ShaHash) -> bool {
		let before = self.utxos.len();
		self.utxos
			.retain(|_, u| !is_orphaned(u.height, &u.block_hash, height, hash));
		let removed = before - self.utxos.len();
		if removed > 0 {
			debug!("Rolled back {} unspent outputs past height {}", removed, height);
		}
		removed > 0
	}
}

impl From<Vec<Utxo>> for UtxoStore {
	fn from(utxos: Vec<Utxo>) -> Self {
		Self {
			utxos: utxos.into_iter().map(|u| (u.outpoint, u)).collect(),
		}
	}
}

impl From<UtxoStore> for Vec<Utxo> {
	fn from(store: UtxoStore) -> Self {
		store.utxos.into_values().collect()
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	pub(crate) fn utxo(tag: u8, amount: u64, height: i32, block: u8) -> Utxo {
		Utxo {
			outpoint: OutPoint::new(ShaHash([tag; 32]), 0),
			amount,
			height,
			addr_hash: vec![tag; 20],
			block_hash: if height == UNCONFIRMED_HEIGHT {
				ShaHash::ZERO
			} else {
				ShaHash([block; 32])
			},
			subscript: vec![0x76, 0xa9],
		}
	}

	#[test]
	fn insert_replaces_same_outpoint() {
		let mut store = UtxoStore::new();
		assert!(store.insert(utxo(1, 5, -1, 0)).is_none());
		let prev = store.insert(utxo(1, 5, 90, 9)).unwrap();
		assert_eq!(prev.height, -1);
		assert_eq!(store.len(), 1);
		assert_eq!(store.iter().next().unwrap().height, 90);
	}

	#[test]
	fn confirmation_rule() {
		let mined = utxo(1, 5, 95, 1);
		let pending = utxo(2, 3, -1, 0);

		assert!(mined.meets_confirms(0, 100));
		assert!(pending.meets_confirms(0, 100));
		assert!(mined.meets_confirms(6, 100));
		assert!(!mined.meets_confirms(7, 100));
		assert!(!pending.meets_confirms(1, 100));
		assert_eq!(pending.confirmations(100), 0);
	}

	#[test]
	fn eligible_filters_by_confirms() {
		let mut store = UtxoStore::new();
		store.insert(utxo(1, 5, 95, 1));
		store.insert(utxo(2, 3, -1, 0));

		assert_eq!(store.eligible(0, 100).count(), 2);
		let confirmed: Vec<_> = store.eligible(1, 100).collect();
		assert_eq!(confirmed, vec![utxo(1, 5, 95, 1)]);
		assert_eq!(store.eligible(10, 100).count(), 0);
	}

	#[test]
	fn rollback_removes_orphaned_outputs_only() {
		let mut store = UtxoStore::new();
		store.insert(utxo(1, 5, 95, 1));
		store.insert(utxo(2, 3, -1, 0));
		store.insert(utxo(3, 4, 97, 3));

		assert!(store.rollback(96, &ShaHash([0xee; 32])));
		let left: Vec<_> = store.iter().map(|u| u.outpoint.hash.0[0]).collect();
		assert_eq!(left, vec![1, 2]);

		// Nothing else sits on the orphaned branch.
		assert!(!store.rollback(96, &ShaHash([0xee; 32])));
	}

	#[test]
	fn rollback_removes_outputs_in_the_orphaned_block() {
		let mut store = UtxoStore::new();
		store.insert(utxo(1, 5, 95, 0xee));
		store.insert(utxo(2, 3, -1, 0));

		assert!(store.rollback(96, &ShaHash([0xee; 32])));
		assert_eq!(store.len(), 1);
		assert!(store.iter().all(|u| !u.is_confirmed()));
	}

	#[test]
	fn rollback_then_reinsert_restores_contents() {
		let originals = vec![utxo(1, 5, 95, 1), utxo(2, 3, -1, 0), utxo(3, 4, 97, 3)];
		let mut never_rolled: UtxoStore = originals.clone().into();

		let mut store: UtxoStore = originals.clone().into();
		store.rollback(96, &ShaHash([3; 32]));
		for u in originals {
			store.insert(u);
		}
		assert_eq!(store, never_rolled);

		never_rolled.remove(&OutPoint::new(ShaHash([1; 32]), 0));
		assert_ne!(store, never_rolled);
	}

	#[test]
	fn serializes_as_list() {
		let store: UtxoStore = vec![utxo(1, 5, 95, 1)].into();
		let json = serde_json::to_value(&store).unwrap();
		assert!(json.is_array());
		let back: UtxoStore = serde_json::from_value(json).unwrap();
		assert_eq!(back, store);
	}
}
