//! Standing notification handlers of an account.
//!
//! Both handlers stay registered for the life of the subscription. A broken
//! notification is logged and dropped; it never ends the subscription.

use crate::node::{NodeReply, SpentNotification, TxNotification};
use crate::utils::format_amount;
use crate::wallet::sync::{Account, AccountEvent, HandlerControl, ReceiptEvent};
use crate::wallet::{OutPoint, RecvTx, Utxo};

use tracing::{debug, error, info, warn};

impl Account {
	/// Registers the new-transaction handler under `id`.
	pub(super) fn register_new_tx_handler(&self, id: u64) {
		let this = self.this.clone();
		self.ctx.router.register(id, move |reply: NodeReply| {
			let this = this.clone();
			async move {
				match this.upgrade() {
					Some(account) => account.handle_new_tx_reply(reply).await,
					None => HandlerControl::Remove,
				}
			}
		});
	}

	/// Registers the spent-output handler under `id`.
	pub(super) fn register_spent_handler(&self, id: u64) {
		let this = self.this.clone();
		self.ctx.router.register(id, move |reply: NodeReply| {
			let this = this.clone();
			async move {
				match this.upgrade() {
					Some(account) => account.handle_spent_reply(reply).await,
					None => HandlerControl::Remove,
				}
			}
		});
	}

	async fn handle_new_tx_reply(&self, reply: NodeReply) -> HandlerControl {
		if let Some(e) = reply.error {
			error!("Tx handler: error {} received from node: {}", e.code, e.message);
			return HandlerControl::Keep;
		}
		// The node acknowledges a subscription with a null result.
		let Some(result) = reply.result else {
			return HandlerControl::Keep;
		};

		match TxNotification::from_value(&result) {
			Ok(notification) => {
				self.apply_tx_notification(notification).await;
				self.persist_best_effort().await;
			}
			Err(e) => error!("Tx handler: dropping notification: {}", e),
		}
		HandlerControl::Keep
	}

	/// Records a received output in history and, unless already spent, as a UTXO.
	///
	/// Used for live notifications and rescan results alike.
	pub(super) async fn apply_tx_notification(&self, n: TxNotification) {
		// Held until the notification is fully applied.
		let _slot = if n.is_confirmed() {
			Some(
				self.ctx
					.block_gate
					.acquire(n.block_hash, self.ctx.config.block_gate_timeout)
					.await,
			)
		} else {
			None
		};

		let recv = RecvTx {
			txid: n.txid,
			tx_out_index: n.tx_out_index,
			time_received: chrono::Utc::now().timestamp(),
			block_height: n.height,
			block_hash: n.block_hash,
			block_index: n.block_index,
			block_time: n.block_time,
			amount: n.amount,
			receiver_hash: n.receiver_hash.clone(),
		};

		self.ctx
			.ordering
			.wait_for_send(&n.txid, self.ctx.config.ordering_wait_timeout)
			.await;

		let previous = {
			let mut txs = self.txs.write().await;
			let previous = txs.inner.insert_recv_tx(recv.clone());
			txs.mark_dirty();
			previous
		};

		let receipt = match previous {
			None => self.ctx.notified.observe(n.outpoint(), n.is_confirmed()),
			// Recorded unconfirmed, possibly before a restart emptied the set.
			Some(old) if !old.is_confirmed() && n.is_confirmed() => {
				self.ctx.notified.observe(n.outpoint(), true);
				ReceiptEvent::Confirmed
			}
			Some(_) => ReceiptEvent::Duplicate,
		};

		let tip_height = self.ctx.chain.current_tip().map_or(n.height, |tip| tip.height);
		let detail = recv.tx_info(self.name(), tip_height, self.network());
		match receipt {
			ReceiptEvent::New => {
				self.emit(AccountEvent::NewTransaction {
					account: self.name().to_string(),
					detail,
				})
				.await;
			}
			ReceiptEvent::Confirmed => {
				self.emit(AccountEvent::TransactionConfirmed {
					account: self.name().to_string(),
					detail,
				})
				.await;
			}
			ReceiptEvent::Duplicate => debug!("Output {} already recorded", n.outpoint()),
		}

		if n.spent {
			return;
		}

		let utxo = Utxo {
			outpoint: n.outpoint(),
			amount: n.amount,
			height: n.height,
			addr_hash: n.receiver_hash,
			block_hash: n.block_hash,
			subscript: n.pk_script,
		};
		let first_seen = {
			let mut utxos = self.utxos.write().await;
			let previous = utxos.inner.insert(utxo.clone());
			utxos.mark_dirty();
			previous.is_none()
		};

		if first_seen {
			if let Err(e) = self.req_spent_utxo_ntfn(&utxo).await {
				warn!("Cannot request spend notification for {}: {}", utxo.outpoint, e);
			}
		}
		// Confirmed balances are refreshed per block by on_block_connected.
		if !utxo.is_confirmed() {
			self.emit_unconfirmed_balance().await;
		}
	}

	async fn handle_spent_reply(&self, reply: NodeReply) -> HandlerControl {
		if let Some(e) = reply.error {
			error!("Spent handler: error {} received from node: {}", e.code, e.message);
			return HandlerControl::Keep;
		}
		let Some(result) = reply.result else {
			return HandlerControl::Keep;
		};

		match SpentNotification::from_value(&result) {
			Ok(notification) => self.apply_spent(notification.outpoint).await,
			Err(e) => error!("Spent handler: dropping notification: {}", e),
		}
		HandlerControl::Keep
	}

	/// Removes a spent output so no balance counts it again.
	pub(super) async fn apply_spent(&self, outpoint: OutPoint) {
		let removed = {
			let mut utxos = self.utxos.write().await;
			let removed = utxos.inner.remove(&outpoint);
			if removed.is_some() {
				utxos.mark_dirty();
			}
			removed
		};

		match removed {
			Some(utxo) => {
				info!(
					"Output {} of account '{}' spent ({})",
					outpoint,
					self.name(),
					format_amount(utxo.amount)
				);
				self.persist_best_effort().await;
				self.emit_balances().await;
			}
			None => debug!("Spent output {} is not in the store", outpoint),
		}
	}
}

#[cfg(test)]
mod tests {
	use crate::node::{NodeReply, RpcError};
	use crate::wallet::history::tests::recv;
	use crate::wallet::sync::AccountEvent;
	use crate::wallet::sync::test_support::*;
	use crate::wallet::{
		OutPoint, SATOSHI_PER_BITCOIN, SendRecipient, SendTx, ShaHash, TxRecord, UNCONFIRMED_HEIGHT,
	};
	use serde_json::json;
	use std::time::Duration;

	#[tokio::test]
	async fn unconfirmed_then_mined_yields_one_new_and_one_confirmed() {
		let mut harness = Harness::new();
		let account = harness.tracked_account("default").await;

		harness.push_tx(&account, tx_payload(1, 0, -1, 5000));
		let first = harness.next_tx_event().await;
		assert!(matches!(first, AccountEvent::NewTransaction { .. }));

		harness.push_tx(&account, tx_payload(1, 0, -1, 5000));
		harness.push_tx(&account, tx_payload(1, 0, 99, 5000));
		let second = harness.next_tx_event().await;
		match second {
			AccountEvent::TransactionConfirmed { detail, .. } => assert_eq!(detail.confirmations, 2),
			other => panic!("unexpected event {:?}", other),
		}

		harness.settle().await;
		assert!(harness.no_more_tx_events());
		assert_eq!(account.txs.read().await.inner.len(), 1);
		let utxos = account.utxos.read().await;
		assert_eq!(utxos.inner.len(), 1);
		assert_eq!(utxos.inner.iter().next().unwrap().height, 99);
	}

	#[tokio::test]
	async fn mined_output_seen_twice_is_new_once() {
		let mut harness = Harness::new();
		let account = harness.tracked_account("default").await;

		harness.push_tx(&account, tx_payload(1, 0, 99, 5000));
		harness.push_tx(&account, tx_payload(1, 0, 99, 5000));
		assert!(matches!(harness.next_tx_event().await, AccountEvent::NewTransaction { .. }));

		harness.settle().await;
		assert!(harness.no_more_tx_events());
		assert_eq!(account.txs.read().await.inner.len(), 1);
	}

	#[tokio::test]
	async fn confirmation_of_restored_receipt_is_not_new() {
		let mut harness = Harness::new();
		let account = harness.tracked_account("default").await;
		account
			.txs
			.write()
			.await
			.inner
			.insert_recv_tx(recv(1, 0, UNCONFIRMED_HEIGHT, 5000));

		harness.push_tx(&account, tx_payload(1, 0, 99, 5000));
		assert!(matches!(
			harness.next_tx_event().await,
			AccountEvent::TransactionConfirmed { .. }
		));
		assert!(harness.ctx.notified.is_empty());
	}

	#[tokio::test]
	async fn unconfirmed_receipt_with_empty_block_hash_is_recorded() {
		let mut harness = Harness::new();
		let account = harness.tracked_account("default").await;
		let mut payload = tx_payload(1, 0, -1, 5000);
		payload["blockhash"] = json!("");
		harness.push_tx(&account, payload);

		assert!(matches!(harness.next_tx_event().await, AccountEvent::NewTransaction { .. }));
		assert_eq!(account.txs.read().await.inner.len(), 1);
		assert_eq!(account.utxos.read().await.inner.len(), 1);
	}

	#[tokio::test]
	async fn unconfirmed_receipt_publishes_unconfirmed_balance() {
		let mut harness = Harness::new();
		let account = harness.tracked_account("default").await;
		harness.push_tx(&account, tx_payload(1, 0, -1, 2 * SATOSHI_PER_BITCOIN as i64));
		harness.settle().await;

		let events = harness.drain_events();
		assert!(events.contains(&AccountEvent::UnconfirmedBalanceChanged {
			account: "default".to_string(),
			balance: 2.0,
		}));
		assert!(harness.repository.utxo_saves() >= 1);
	}

	#[tokio::test]
	async fn new_output_is_subscribed_for_spends() {
		let harness = Harness::new();
		let account = harness.tracked_account("default").await;
		harness.push_tx(&account, tx_payload(6, 2, 90, 1000));
		harness.settle().await;

		let last = harness.node.sent().last().unwrap().to_json();
		assert_eq!(last["method"], "notifyspent");
		assert_eq!(last["params"], json!([ShaHash([6; 32]).to_string(), 2]));
	}

	#[tokio::test]
	async fn spent_flag_records_history_only() {
		let harness = Harness::new();
		let account = harness.tracked_account("default").await;
		let mut payload = tx_payload(2, 0, 90, 1000);
		payload["spent"] = json!(true);
		harness.push_tx(&account, payload);
		harness.settle().await;

		assert_eq!(account.txs.read().await.inner.len(), 1);
		assert!(account.utxos.read().await.inner.is_empty());
	}

	#[tokio::test]
	async fn malformed_notifications_keep_the_subscription() {
		let harness = Harness::new();
		let account = harness.tracked_account("default").await;
		let id = account.state.read().await.new_tx_id.unwrap();

		let mut missing = tx_payload(3, 0, -1, 10);
		missing.as_object_mut().unwrap().remove("blockhash");
		harness.push_tx(&account, missing);
		harness.push_tx(&account, json!("not an object"));
		harness.ctx.router.dispatch(
			id,
			NodeReply {
				result: None,
				error: Some(RpcError {
					code: -1,
					message: "boom".to_string(),
				}),
			},
		);
		harness.push_tx(&account, tx_payload(3, 0, -1, 10));
		harness.settle().await;

		assert!(harness.ctx.router.is_registered(id));
		assert_eq!(account.txs.read().await.inner.len(), 1);
	}

	#[tokio::test]
	async fn spent_output_stops_counting() {
		let harness = Harness::new();
		let account = harness.tracked_account("default").await;
		harness.push_tx(&account, tx_payload(4, 1, 95, 5 * SATOSHI_PER_BITCOIN as i64));
		harness.settle().await;
		assert_eq!(account.calculate_balance(1).await, 5.0);

		harness.push_spent(&account, json!({"txhash": ShaHash([4; 32]).to_string(), "index": 1}));
		harness.push_spent(&account, json!({"txhash": ShaHash([4; 32]).to_string()}));
		harness.push_spent(&account, json!({"txhash": ShaHash([8; 32]).to_string(), "index": 0}));
		harness.settle().await;

		assert_eq!(account.calculate_balance(0).await, 0.0);
		assert!(account.utxos.read().await.inner.get(&OutPoint::new(ShaHash([4; 32]), 1)).is_none());
		let spent_id = account.state.read().await.spent_id.unwrap();
		assert!(harness.ctx.router.is_registered(spent_id));
	}

	fn self_payment(tag: u8) -> SendTx {
		SendTx {
			txid: ShaHash([tag; 32]),
			time_created: 1_700_000_000,
			block_height: UNCONFIRMED_HEIGHT,
			block_hash: ShaHash::ZERO,
			block_index: -1,
			block_time: 0,
			fee: 500,
			recipients: vec![SendRecipient {
				pubkey_hash: vec![tag; 20],
				amount: 1000,
			}],
		}
	}

	fn kinds(records: &[TxRecord]) -> Vec<&'static str> {
		records
			.iter()
			.map(|r| match r {
				TxRecord::Send(_) => "send",
				TxRecord::Recv(_) => "recv",
			})
			.collect()
	}

	#[tokio::test]
	async fn receive_during_send_waits_for_send_history() {
		let mut harness = Harness::new();
		let account = harness.tracked_account("default").await;

		let pending = account.begin_send(ShaHash([5; 32]));
		harness.push_tx(&account, tx_payload(5, 0, -1, 1000));
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(account.txs.read().await.inner.is_empty());

		account.record_send_tx(pending, self_payment(5)).await;
		harness.next_tx_event().await;
		assert_eq!(kinds(account.txs.read().await.inner.records()), vec!["send", "recv"]);
		assert!(harness.ctx.ordering.is_empty());
	}

	#[tokio::test]
	async fn receive_after_send_is_recorded_immediately() {
		let mut harness = Harness::new();
		let account = harness.tracked_account("default").await;

		let pending = account.begin_send(ShaHash([5; 32]));
		account.record_send_tx(pending, self_payment(5)).await;
		harness.push_tx(&account, tx_payload(5, 0, -1, 1000));
		harness.next_tx_event().await;

		assert_eq!(kinds(account.txs.read().await.inner.records()), vec!["send", "recv"]);
	}

	#[tokio::test(start_paused = true)]
	async fn abandoned_send_does_not_block_forever() {
		let mut harness = Harness::with_config(crate::config::SyncConfig {
			ordering_wait_timeout: Duration::from_millis(100),
			..Default::default()
		});
		let account = harness.tracked_account("default").await;

		let pending = account.begin_send(ShaHash([5; 32]));
		harness.push_tx(&account, tx_payload(5, 0, -1, 1000));
		harness.next_tx_event().await;
		assert_eq!(kinds(account.txs.read().await.inner.records()), vec!["recv"]);
		drop(pending);
	}

	#[tokio::test]
	async fn block_connected_refreshes_balances() {
		let mut harness = Harness::new();
		let account = harness.tracked_account("default").await;
		harness.push_tx(&account, tx_payload(7, 0, 99, 3 * SATOSHI_PER_BITCOIN as i64));
		harness.settle().await;
		harness.drain_events();

		account.on_block_connected(harness.tip()).await;
		assert_eq!(
			harness.drain_events(),
			vec![
				AccountEvent::BalanceChanged {
					account: "default".to_string(),
					balance: 3.0
				},
				AccountEvent::UnconfirmedBalanceChanged {
					account: "default".to_string(),
					balance: 0.0
				},
			]
		);
	}
}
