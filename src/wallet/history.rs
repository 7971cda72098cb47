//! Transaction history of an account.
//!
//! The history is an insertion ordered list of received and sent
//! transaction records. Insertion order is processing order, not chain
//! order; callers wanting chronological output sort by block height.

use crate::utils::{encode_address, to_display_amount};
use crate::wallet::{Network, OutPoint, ShaHash, UNCONFIRMED_HEIGHT, is_orphaned};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A transaction output received by the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecvTx {
	pub txid: ShaHash,
	pub tx_out_index: u32,
	/// Unix timestamp the notification was processed at.
	pub time_received: i64,
	pub block_height: i32,
	pub block_hash: ShaHash,
	pub block_index: i32,
	pub block_time: i64,
	/// Amount in minor units.
	pub amount: u64,
	pub receiver_hash: Vec<u8>,
}

impl RecvTx {
	pub fn outpoint(&self) -> OutPoint {
		OutPoint::new(self.txid, self.tx_out_index)
	}

	pub fn is_confirmed(&self) -> bool {
		self.block_height != UNCONFIRMED_HEIGHT
	}

	/// Renders the record as a single "receive" detail entry.
	pub fn tx_info(&self, account: &str, tip_height: i32, network: Network) -> TxDetail {
		let confirmed = self.block_height != UNCONFIRMED_HEIGHT;
		TxDetail {
			account: account.to_string(),
			category: TxCategory::Receive,
			address: encode_address(&self.receiver_hash, network),
			amount: to_display_amount(self.amount),
			fee: None,
			confirmations: confirmations(self.block_height, tip_height),
			txid: self.txid,
			time_received: self.time_received,
			block_hash: confirmed.then_some(self.block_hash),
			block_index: confirmed.then_some(self.block_index),
			block_time: confirmed.then_some(self.block_time),
		}
	}

	fn unconfirm(&mut self) {
		self.block_height = UNCONFIRMED_HEIGHT;
		self.block_hash = ShaHash::ZERO;
		self.block_index = -1;
		self.block_time = 0;
	}
}

/// One recipient of a sent transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRecipient {
	pub pubkey_hash: Vec<u8>,
	/// Amount in minor units.
	pub amount: i64,
}

/// A transaction created and sent by the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTx {
	pub txid: ShaHash,
	pub time_created: i64,
	pub block_height: i32,
	pub block_hash: ShaHash,
	pub block_index: i32,
	pub block_time: i64,
	/// Fee paid, in minor units.
	pub fee: u64,
	pub recipients: Vec<SendRecipient>,
}

impl SendTx {
	/// Renders one "send" detail entry per recipient.
	pub fn tx_info(&self, account: &str, tip_height: i32, network: Network) -> Vec<TxDetail> {
		let confirmed = self.block_height != UNCONFIRMED_HEIGHT;
		self.recipients
			.iter()
			.map(|r| TxDetail {
				account: account.to_string(),
				category: TxCategory::Send,
				address: encode_address(&r.pubkey_hash, network),
				amount: -signed_display_amount(r.amount),
				fee: Some(-to_display_amount(self.fee)),
				confirmations: confirmations(self.block_height, tip_height),
				txid: self.txid,
				time_received: self.time_created,
				block_hash: confirmed.then_some(self.block_hash),
				block_index: confirmed.then_some(self.block_index),
				block_time: confirmed.then_some(self.block_time),
			})
			.collect()
	}

	fn unconfirm(&mut self) {
		self.block_height = UNCONFIRMED_HEIGHT;
		self.block_hash = ShaHash::ZERO;
		self.block_index = -1;
		self.block_time = 0;
	}
}

/// A single entry of the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TxRecord {
	Recv(RecvTx),
	Send(SendTx),
}

impl TxRecord {
	pub fn txid(&self) -> ShaHash {
		match self {
			TxRecord::Recv(r) => r.txid,
			TxRecord::Send(s) => s.txid,
		}
	}

	pub fn block_height(&self) -> i32 {
		match self {
			TxRecord::Recv(r) => r.block_height,
			TxRecord::Send(s) => s.block_height,
		}
	}

	/// Renders the record into zero or more detail entries.
	pub fn tx_info(&self, account: &str, tip_height: i32, network: Network) -> Vec<TxDetail> {
		match self {
			TxRecord::Recv(r) => vec![r.tx_info(account, tip_height, network)],
			TxRecord::Send(s) => s.tx_info(account, tip_height, network),
		}
	}
}

/// Direction of a detail entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxCategory {
	Send,
	Receive,
}

/// Externally shaped transaction detail, as reported to upstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxDetail {
	pub account: String,
	pub category: TxCategory,
	pub address: String,
	/// Amount in display units; negative for sends.
	pub amount: f64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub fee: Option<f64>,
	pub confirmations: i32,
	pub txid: ShaHash,
	#[serde(rename = "timereceived")]
	pub time_received: i64,
	#[serde(rename = "blockhash", skip_serializing_if = "Option::is_none")]
	pub block_hash: Option<ShaHash>,
	#[serde(rename = "blockindex", skip_serializing_if = "Option::is_none")]
	pub block_index: Option<i32>,
	#[serde(rename = "blocktime", skip_serializing_if = "Option::is_none")]
	pub block_time: Option<i64>,
}

fn confirmations(block_height: i32, tip_height: i32) -> i32 {
	if block_height == UNCONFIRMED_HEIGHT {
		0
	} else {
		tip_height - block_height + 1
	}
}

fn signed_display_amount(amount: i64) -> f64 {
	let display = to_display_amount(amount.unsigned_abs());
	if amount < 0 { -display } else { display }
}

/// Insertion ordered history of one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxStore {
	records: Vec<TxRecord>,
}

impl TxStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records a received output.
	///
	/// A record for an outpoint already in the history is updated in place
	/// (this is how an unconfirmed receipt becomes mined) rather than
	/// appended a second time. Returns the record it replaced.
	pub fn insert_recv_tx(&mut self, recv: RecvTx) -> Option<RecvTx> {
		let existing = self.records.iter_mut().find_map(|r| match r {
			TxRecord::Recv(old) if old.outpoint() == recv.outpoint() => Some(old),
			_ => None,
		});
		match existing {
			Some(old) => {
				// Keep the original receipt time.
				let time_received = old.time_received;
				let previous = std::mem::replace(old, recv);
				old.time_received = time_received;
				Some(previous)
			}
			None => {
				self.records.push(TxRecord::Recv(recv));
				None
			}
		}
	}

	/// Records a sent transaction. Re-recording the same txid updates it.
	pub fn insert_send_tx(&mut self, send: SendTx) {
		let existing = self.records.iter_mut().find_map(|r| match r {
			TxRecord::Send(old) if old.txid == send.txid => Some(old),
			_ => None,
		});
		match existing {
			Some(old) => *old = send,
			None => self.records.push(TxRecord::Send(send)),
		}
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn records(&self) -> &[TxRecord] {
		&self.records
	}

	/// Receive records only, in insertion order.
	pub fn recv_txs(&self) -> impl Iterator<Item = &RecvTx> {
		self.records.iter().filter_map(|r| match r {
			TxRecord::Recv(recv) => Some(recv),
			TxRecord::Send(_) => None,
		})
	}

	/// Reverts the block fields of every record mined on the branch orphaned
	/// at (`height`, `hash`), leaving them unconfirmed in their original
	/// position. Returns whether anything changed.
	pub fn rollback(&mut self, height: i32, hash: &ShaHash) -> bool {
		let mut reverted = 0usize;
		for record in &mut self.records {
			match record {
				TxRecord::Recv(r) if is_orphaned(r.block_height, &r.block_hash, height, hash) => {
					r.unconfirm();
					reverted += 1;
				}
				TxRecord::Send(s) if is_orphaned(s.block_height, &s.block_hash, height, hash) => {
					s.unconfirm();
					reverted += 1;
				}
				_ => {}
			}
		}
		if reverted > 0 {
			debug!("Reverted {} history records past height {}", reverted, height);
		}
		reverted > 0
	}
}
