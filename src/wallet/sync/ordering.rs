//! Send-before-receive ordering for self-originated transactions.
//!
//! Recording a sent transaction publishes a [`PendingSend`] for its txid.
//! A receive notification for the same txid that shows up while the entry
//! is published waits until the send has been recorded. Without an entry
//! the receive goes ahead at once.

use crate::wallet::ShaHash;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Process-wide registry of sends whose history write is in flight.
#[derive(Debug, Default)]
pub struct SendRecvOrdering {
	pending: Mutex<HashMap<ShaHash, watch::Receiver<bool>>>,
}

/// Marks the send of one transaction as in flight until completed or dropped.
#[must_use = "dropping a PendingSend releases waiting receives immediately"]
#[derive(Debug)]
pub struct PendingSend<'a> {
	registry: &'a SendRecvOrdering,
	txid: ShaHash,
	done: watch::Sender<bool>,
}

/// Outcome of [`SendRecvOrdering::wait_for_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingWait {
	/// No send for the txid was in flight.
	Clear,
	/// A send was in flight and has completed.
	Completed,
	/// A send was in flight and did not complete within the bound.
	TimedOut,
}

impl SendRecvOrdering {
	pub fn new() -> Self {
		Self::default()
	}

	/// Publishes an in-flight send for `txid`.
	pub fn begin_send(&self, txid: ShaHash) -> PendingSend<'_> {
		let (done, rx) = watch::channel(false);
		if self.pending().insert(txid, rx).is_some() {
			debug!("Superseding in-flight send entry for {}", txid);
		}
		PendingSend {
			registry: self,
			txid,
			done,
		}
	}

	/// Waits, at most `timeout`, for an in-flight send of `txid` to be recorded.
	pub async fn wait_for_send(&self, txid: &ShaHash, timeout: Duration) -> OrderingWait {
		let Some(mut rx) = self.pending().get(txid).cloned() else {
			return OrderingWait::Clear;
		};

		let outcome = match tokio::time::timeout(timeout, rx.wait_for(|done| *done)).await {
			Ok(_) => OrderingWait::Completed,
			Err(_) => {
				warn!(
					"Send of {} not recorded after {:?}, recording receive anyway",
					txid, timeout
				);
				OrderingWait::TimedOut
			}
		};
		self.remove_if(txid, &rx);
		outcome
	}

	pub fn is_pending(&self, txid: &ShaHash) -> bool {
		self.pending().contains_key(txid)
	}

	pub fn len(&self) -> usize {
		self.pending().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Removes the entry for `txid` only if it still belongs to `rx`'s channel.
	fn remove_if(&self, txid: &ShaHash, rx: &watch::Receiver<bool>) {
		let mut pending = self.pending();
		if pending.get(txid).is_some_and(|current| current.same_channel(rx)) {
			pending.remove(txid);
		}
	}

	fn pending(&self) -> MutexGuard<'_, HashMap<ShaHash, watch::Receiver<bool>>> {
		self.pending.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

impl PendingSend<'_> {
	pub fn txid(&self) -> ShaHash {
		self.txid
	}

	/// Signals that the send history for this txid has been written.
	pub fn complete(self) {}
}

impl Drop for PendingSend<'_> {
	fn drop(&mut self) {
		self.done.send_replace(true);
		self.registry.remove_if(&self.txid, &self.done.subscribe());
	}
}
