//! Outpoints whose unconfirmed receipt has already been announced upstream.

use crate::wallet::OutPoint;

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Which upstream event, if any, a received output should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptEvent {
	/// First sighting of the output.
	New,
	/// An output announced while unconfirmed is now in a block.
	Confirmed,
	/// Already announced and still unconfirmed.
	Duplicate,
}

/// Process-wide set of announced unconfirmed outpoints.
#[derive(Debug, Default)]
pub struct NotifiedOutpoints {
	outpoints: Mutex<HashSet<OutPoint>>,
}

impl NotifiedOutpoints {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records a sighting of `outpoint` and decides the event to emit.
	///
	/// An entry lives from the unconfirmed announcement to the confirmed one,
	/// so each output yields one `New` and at most one `Confirmed`. Outputs
	/// first seen already mined never enter the set.
	pub fn observe(&self, outpoint: OutPoint, confirmed: bool) -> ReceiptEvent {
		let mut outpoints = self.outpoints();
		match (outpoints.contains(&outpoint), confirmed) {
			(true, true) => {
				outpoints.remove(&outpoint);
				ReceiptEvent::Confirmed
			}
			(true, false) => ReceiptEvent::Duplicate,
			(false, false) => {
				outpoints.insert(outpoint);
				ReceiptEvent::New
			}
			(false, true) => ReceiptEvent::New,
		}
	}

	pub fn contains(&self, outpoint: &OutPoint) -> bool {
		self.outpoints().contains(outpoint)
	}

	pub fn len(&self) -> usize {
		self.outpoints().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn outpoints(&self) -> MutexGuard<'_, HashSet<OutPoint>> {
		self.outpoints.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
