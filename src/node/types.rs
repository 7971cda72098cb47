//! Types for node protocol messages and typed notification payloads

use crate::utils::{AddressError, decode_address, decode_base58};
use crate::wallet::{OutPoint, ShaHash, UNCONFIRMED_HEIGHT};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;

/// Prefix of every request identifier this client sends.
pub const REQUEST_TAG: &str = "accountsync";

/// Formats a correlation identifier the way it travels on the wire.
pub fn request_tag(id: u64) -> String {
	format!("{}({})", REQUEST_TAG, id)
}

/// Extracts the correlation identifier from a wire id such as `accountsync(12)`.
pub fn parse_request_tag(tag: &str) -> Option<u64> {
	tag.strip_prefix(REQUEST_TAG)?
		.strip_prefix('(')?
		.strip_suffix(')')?
		.parse()
		.ok()
}

/// Error object attached to a node reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
	pub code: i64,
	pub message: String,
}

/// A reply or notification pushed by the node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeReply {
	#[serde(default)]
	pub result: Option<Value>,
	#[serde(default)]
	pub error: Option<RpcError>,
}

impl NodeReply {
	pub fn result(result: Value) -> Self {
		Self {
			result: Some(result),
			error: None,
		}
	}

	/// A reply with a null result. Ends a rescan.
	pub fn done() -> Self {
		Self::default()
	}
}

/// Envelope of every inbound message.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeEnvelope {
	pub id: Option<Value>,
	#[serde(flatten)]
	pub reply: NodeReply,
}

impl NodeEnvelope {
	/// The correlation identifier, when the message carries one of ours.
	pub fn correlation_id(&self) -> Option<u64> {
		self.id.as_ref()?.as_str().and_then(parse_request_tag)
	}
}

/// Requests this engine issues to the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRequest {
	/// Replay blocks from `begin_height` for `addresses`.
	Rescan {
		begin_height: i32,
		addresses: BTreeSet<String>,
	},
	/// Push new transactions paying to `addresses`.
	NotifyNewTxs { addresses: Vec<String> },
	/// Push a notification when `outpoint` is spent.
	NotifySpent { outpoint: OutPoint },
}

/// A request bound to its correlation identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCommand {
	pub id: u64,
	pub request: NodeRequest,
}

impl NodeCommand {
	pub fn new(id: u64, request: NodeRequest) -> Self {
		Self { id, request }
	}

	pub fn method(&self) -> &'static str {
		match self.request {
			NodeRequest::Rescan { .. } => "rescan",
			NodeRequest::NotifyNewTxs { .. } => "notifynewtxs",
			NodeRequest::NotifySpent { .. } => "notifyspent",
		}
	}

	pub fn to_json(&self) -> Value {
		let params = match &self.request {
			NodeRequest::Rescan {
				begin_height,
				addresses,
			} => json!([begin_height, addresses]),
			NodeRequest::NotifyNewTxs { addresses } => json!([addresses]),
			NodeRequest::NotifySpent { outpoint } => {
				json!([outpoint.hash.to_string(), outpoint.index])
			}
		};
		json!({
			"jsonrpc": "1.0",
			"id": request_tag(self.id),
			"method": self.method(),
			"params": params,
		})
	}
}

/// A pushed notification that could not be turned into a typed payload.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
	#[error("Unspecified {0}")]
	MissingField(&'static str),

	#[error("Malformed notification: {0}")]
	Malformed(#[from] serde_json::Error),

	#[error("Invalid {field}: {reason}")]
	InvalidField { field: &'static str, reason: String },

	#[error("Cannot decode {field}: {source}")]
	Decode {
		field: &'static str,
		#[source]
		source: AddressError,
	},
}

/// Fields of a transaction notification as they arrive; every one optional
/// so absence can be reported by name.
#[derive(Debug, Deserialize)]
struct RawTxNotification {
	receiver: Option<String>,
	height: Option<i64>,
	blockhash: Option<String>,
	blockindex: Option<i32>,
	blocktime: Option<i64>,
	txid: Option<String>,
	txoutindex: Option<u32>,
	amount: Option<i64>,
	pkscript: Option<String>,
	spent: Option<bool>,
}

/// A new transaction output paying to one of the account's addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxNotification {
	pub receiver: String,
	pub receiver_hash: Vec<u8>,
	/// Block height, or [`UNCONFIRMED_HEIGHT`] for mempool transactions.
	pub height: i32,
	pub block_hash: ShaHash,
	pub block_index: i32,
	pub block_time: i64,
	pub txid: ShaHash,
	pub tx_out_index: u32,
	/// Amount in minor units.
	pub amount: u64,
	pub pk_script: Vec<u8>,
	pub spent: bool,
}

impl TxNotification {
	pub fn outpoint(&self) -> OutPoint {
		OutPoint::new(self.txid, self.tx_out_index)
	}

	pub fn is_confirmed(&self) -> bool {
		self.height != UNCONFIRMED_HEIGHT
	}

	pub fn from_value(value: &Value) -> Result<Self, NotificationError> {
		let raw: RawTxNotification = serde_json::from_value(value.clone())?;

		let receiver = raw.receiver.ok_or(NotificationError::MissingField("receiver"))?;
		let (receiver_hash, _) = decode_address(&receiver).map_err(|source| {
			NotificationError::Decode {
				field: "receiver",
				source,
			}
		})?;

		let height = raw.height.ok_or(NotificationError::MissingField("height"))?;
		let height = match i32::try_from(height) {
			Ok(h) if h >= 0 || h == UNCONFIRMED_HEIGHT => h,
			_ => {
				return Err(NotificationError::InvalidField {
					field: "height",
					reason: format!("{} is not a block height", height),
				});
			}
		};

		// Mempool transactions carry no block, and the node may send an empty hash.
		let block_hash = match raw.blockhash {
			Some(hash) if hash.is_empty() && height == UNCONFIRMED_HEIGHT => ShaHash::ZERO,
			other => parse_hash(other, "blockhash")?,
		};
		let block_index = raw.blockindex.ok_or(NotificationError::MissingField("blockindex"))?;
		let block_time = raw.blocktime.ok_or(NotificationError::MissingField("blocktime"))?;
		let txid = parse_hash(raw.txid, "txid")?;
		let tx_out_index = raw.txoutindex.ok_or(NotificationError::MissingField("txoutindex"))?;

		let amount = raw.amount.ok_or(NotificationError::MissingField("amount"))?;
		let amount = u64::try_from(amount).map_err(|_| NotificationError::InvalidField {
			field: "amount",
			reason: format!("negative amount {}", amount),
		})?;

		let pk_script = raw.pkscript.ok_or(NotificationError::MissingField("pkscript"))?;
		let pk_script = decode_base58(&pk_script).map_err(|source| NotificationError::Decode {
			field: "pkscript",
			source,
		})?;

		Ok(Self {
			receiver,
			receiver_hash,
			height,
			block_hash,
			block_index,
			block_time,
			txid,
			tx_out_index,
			amount,
			pk_script,
			spent: raw.spent.unwrap_or(false),
		})
	}
}

#[derive(Debug, Deserialize)]
struct RawSpentNotification {
	txhash: Option<String>,
	index: Option<u32>,
}

/// An output of the account was spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpentNotification {
	pub outpoint: OutPoint,
}

impl SpentNotification {
	pub fn from_value(value: &Value) -> Result<Self, NotificationError> {
		let raw: RawSpentNotification = serde_json::from_value(value.clone())?;
		let hash = parse_hash(raw.txhash, "txhash")?;
		let index = raw.index.ok_or(NotificationError::MissingField("index"))?;
		Ok(Self {
			outpoint: OutPoint::new(hash, index),
		})
	}
}

fn parse_hash(s: Option<String>, field: &'static str) -> Result<ShaHash, NotificationError> {
	s.ok_or(NotificationError::MissingField(field))?
		.parse()
		.map_err(|source| NotificationError::Decode { field, source })
}

/// Error types for node transport operations
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
	#[error("WebSocket error: {0}")]
	WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Connection closed")]
	ConnectionClosed,

	#[error("RPC error {}: {}", .0.code, .0.message)]
	Rpc(RpcError),
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::wallet::sync::test_support::tx_payload;

	#[test]
	fn request_tags_round_trip() {
		assert_eq!(parse_request_tag(&request_tag(42)), Some(42));
		assert_eq!(parse_request_tag("accountsync(x)"), None);
		assert_eq!(parse_request_tag("other(4)"), None);
	}

	#[test]
	fn parses_well_formed_tx_notification() {
		let n = TxNotification::from_value(&tx_payload(3, 1, 120, 5000)).unwrap();
		assert_eq!(n.height, 120);
		assert_eq!(n.receiver_hash, vec![3; 20]);
		assert_eq!(n.outpoint(), OutPoint::new(ShaHash([3; 32]), 1));
		assert_eq!(n.pk_script, vec![0x76, 0xa9, 0x14]);
		assert!(n.is_confirmed());
		assert!(!n.spent);
	}

	#[test]
	fn missing_field_is_reported_by_name() {
		let mut payload = tx_payload(3, 1, -1, 5000);
		payload.as_object_mut().unwrap().remove("txid");
		assert!(matches!(
			TxNotification::from_value(&payload),
			Err(NotificationError::MissingField("txid"))
		));
	}

	#[test]
	fn mistyped_field_is_malformed() {
		let mut payload = tx_payload(3, 1, -1, 5000);
		payload["amount"] = json!("lots");
		assert!(matches!(
			TxNotification::from_value(&payload),
			Err(NotificationError::Malformed(_))
		));
	}

	#[test]
	fn bad_receiver_is_a_decode_failure() {
		let mut payload = tx_payload(3, 1, -1, 5000);
		payload["receiver"] = json!("not-an-address");
		assert!(matches!(
			TxNotification::from_value(&payload),
			Err(NotificationError::Decode { field: "receiver", .. })
		));
	}

	#[test]
	fn empty_block_hash_is_accepted_only_while_unconfirmed() {
		let mut pending = tx_payload(3, 1, -1, 5000);
		pending["blockhash"] = json!("");
		let n = TxNotification::from_value(&pending).unwrap();
		assert_eq!(n.block_hash, ShaHash::ZERO);

		let mut mined = tx_payload(3, 1, 120, 5000);
		mined["blockhash"] = json!("");
		assert!(matches!(
			TxNotification::from_value(&mined),
			Err(NotificationError::Decode { field: "blockhash", .. })
		));
	}

	#[test]
	fn negative_heights_other_than_unconfirmed_are_rejected() {
		let payload = tx_payload(3, 1, -2, 5000);
		assert!(matches!(
			TxNotification::from_value(&payload),
			Err(NotificationError::InvalidField { field: "height", .. })
		));
	}

	#[test]
	fn spent_notification_requires_both_fields() {
		let hash = ShaHash([5; 32]).to_string();
		let n = SpentNotification::from_value(&json!({"txhash": hash, "index": 2})).unwrap();
		assert_eq!(n.outpoint.index, 2);

		assert!(matches!(
			SpentNotification::from_value(&json!({"txhash": hash})),
			Err(NotificationError::MissingField("index"))
		));
		assert!(SpentNotification::from_value(&json!({"txhash": "00", "index": 2})).is_err());
	}

	#[test]
	fn commands_serialize_with_tagged_id() {
		let cmd = NodeCommand::new(
			7,
			NodeRequest::Rescan {
				begin_height: 10,
				addresses: ["b".to_string(), "a".to_string()].into(),
			},
		);
		let v = cmd.to_json();
		assert_eq!(v["id"], "accountsync(7)");
		assert_eq!(v["method"], "rescan");
		assert_eq!(v["params"], json!([10, ["a", "b"]]));
	}

	#[test]
	fn envelope_extracts_correlation_id() {
		let env: NodeEnvelope =
			serde_json::from_str(r#"{"id":"accountsync(3)","result":null,"error":null}"#).unwrap();
		assert_eq!(env.correlation_id(), Some(3));
		assert!(env.reply.result.is_none());
	}
}
