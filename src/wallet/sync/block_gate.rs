//! Per-block serialization of balance side effects.
//!
//! Handlers applying a confirmed notification take the slot of the
//! enclosing block for as long as they are applying it. Two handlers for the
//! same block therefore never interleave, while different blocks proceed
//! independently. Slots are created on demand and dropped with their last
//! holder.

use crate::wallet::ShaHash;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::warn;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// Process-wide map of block hash to slot.
#[derive(Debug, Default)]
pub struct BlockGate {
	slots: Mutex<HashMap<ShaHash, Slot>>,
}

/// Exclusive hold on one block's slot, released on drop.
#[derive(Debug)]
pub struct BlockSlot<'a> {
	gate: &'a BlockGate,
	block: ShaHash,
	slot: Slot,
	guard: Option<OwnedMutexGuard<()>>,
}

impl BlockGate {
	pub fn new() -> Self {
		Self::default()
	}

	/// Takes the slot for `block`, waiting at most `timeout` for the current holder.
	///
	/// On timeout the caller proceeds without exclusivity; the returned slot
	/// then reports [`BlockSlot::is_exclusive`] as false.
	pub async fn acquire(&self, block: ShaHash, timeout: Duration) -> BlockSlot<'_> {
		let slot = self.slots().entry(block).or_default().clone();
		let guard = match tokio::time::timeout(timeout, slot.clone().lock_owned()).await {
			Ok(guard) => Some(guard),
			Err(_) => {
				warn!("Block {} still busy after {:?}, proceeding", block, timeout);
				None
			}
		};
		BlockSlot {
			gate: self,
			block,
			slot,
			guard,
		}
	}

	/// Number of blocks with a live slot.
	pub fn len(&self) -> usize {
		self.slots().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn slots(&self) -> MutexGuard<'_, HashMap<ShaHash, Slot>> {
		self.slots.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

impl BlockSlot<'_> {
	pub fn block(&self) -> ShaHash {
		self.block
	}

	pub fn is_exclusive(&self) -> bool {
		self.guard.is_some()
	}
}

impl Drop for BlockSlot<'_> {
	fn drop(&mut self) {
		self.guard.take();
		let mut slots = self.gate.slots();
		// The map and this holder are the last references.
		if slots
			.get(&self.block)
			.is_some_and(|s| Arc::ptr_eq(s, &self.slot) && Arc::strong_count(s) == 2)
		{
			slots.remove(&self.block);
		}
	}
}
