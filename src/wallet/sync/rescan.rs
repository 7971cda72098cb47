//! Subscriptions and rescans.
//!
//! [`Account::track`] opens the two standing subscriptions of an account.
//! [`Account::rescan_addresses`] asks the node to replay blocks for a set of
//! addresses; every result goes through the same path as a live
//! notification and the terminating null result finalizes the account.

use crate::node::{NodeCommand, NodeReply, NodeRequest, NotificationError, RpcError, TxNotification};
use crate::wallet::sync::{Account, HandlerControl};
use crate::wallet::{AccountError, BlockStamp, Utxo};

use std::collections::{BTreeSet, HashSet};
use tracing::{debug, error, info};

/// Height a rescan of the whole account starts from.
///
/// A full rescan covers everything since the wallet's earliest block;
/// otherwise the blocks after the last synced one.
pub fn rescan_begin_height(full_rescan: bool, synced_with: BlockStamp, earliest_block_height: i32) -> i32 {
	if full_rescan {
		earliest_block_height
	} else {
		synced_with.height + 1
	}
}

/// One reply of a rescan, classified.
#[derive(Debug)]
enum RescanStep {
	Tx(TxNotification),
	Malformed(NotificationError),
	Failed(RpcError),
	Done,
}

impl From<NodeReply> for RescanStep {
	fn from(reply: NodeReply) -> Self {
		if let Some(e) = reply.error {
			return RescanStep::Failed(e);
		}
		match reply.result {
			None | Some(serde_json::Value::Null) => RescanStep::Done,
			Some(result) => match TxNotification::from_value(&result) {
				Ok(n) => RescanStep::Tx(n),
				Err(e) => RescanStep::Malformed(e),
			},
		}
	}
}

/// Tracks the progress of one rescan.
#[derive(Debug, Clone)]
pub struct RescanProgress {
	/// Height the rescan started at
	begin_height: i32,
	/// Highest block height a result was seen for
	highest_height: Option<i32>,
	/// Blocks that produced at least one result
	blocks: HashSet<i32>,
	/// Results applied
	transactions: usize,
	/// Results dropped as malformed
	malformed: usize,
	/// Height at which progress was last logged
	last_logged_height: i32,
}

impl RescanProgress {
	pub fn new(begin_height: i32) -> Self {
		Self {
			begin_height,
			highest_height: None,
			blocks: HashSet::new(),
			transactions: 0,
			malformed: 0,
			last_logged_height: begin_height,
		}
	}

	/// Record an applied result mined at `height` (or unconfirmed, -1).
	pub fn record_transaction(&mut self, height: i32) {
		self.transactions += 1;
		if height >= 0 {
			self.blocks.insert(height);
			self.highest_height = Some(self.highest_height.map_or(height, |h| h.max(height)));
		}
	}

	pub fn record_malformed(&mut self) {
		self.malformed += 1;
	}

	/// Log progress every 1000 blocks or when forced.
	pub fn log_progress(&mut self, force: bool) {
		let highest = self.highest_height.unwrap_or(self.begin_height);
		if force || highest.saturating_sub(self.last_logged_height) >= 1000 {
			info!(
				"Rescan progress: {} transactions in {} blocks up to height {}",
				self.transactions,
				self.blocks.len(),
				highest
			);
			self.last_logged_height = highest;
		}
	}

	pub fn stats(&self) -> RescanStats {
		RescanStats {
			begin_height: self.begin_height,
			highest_height: self.highest_height,
			blocks_with_results: self.blocks.len(),
			transactions: self.transactions,
			malformed: self.malformed,
		}
	}
}

/// Summary of a finished rescan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescanStats {
	pub begin_height: i32,
	pub highest_height: Option<i32>,
	pub blocks_with_results: usize,
	pub transactions: usize,
	pub malformed: usize,
}

impl RescanStats {
	pub fn summary(&self) -> String {
		format!(
			"Rescan from {}{}: {} transactions in {} blocks{}",
			self.begin_height,
			self.highest_height
				.map(|h| format!(" to {}", h))
				.unwrap_or_default(),
			self.transactions,
			self.blocks_with_results,
			if self.malformed == 0 {
				String::new()
			} else {
				format!(" ({} malformed results dropped)", self.malformed)
			}
		)
	}
}

impl Account {
	/// Opens the standing subscriptions: new transactions to every active
	/// address and spends of every stored output.
	pub async fn track(&self) -> Result<(), AccountError> {
		let new_tx_id = self.ctx.router.next_id();
		self.state.write().await.new_tx_id = Some(new_tx_id);
		self.register_new_tx_handler(new_tx_id);
		let addresses = self.sorted_active_payment_addresses().await;
		self.request_new_txs(new_tx_id, addresses).await?;

		let spent_id = self.ctx.router.next_id();
		self.state.write().await.spent_id = Some(spent_id);
		self.register_spent_handler(spent_id);
		let utxos: Vec<Utxo> = self.utxos.read().await.inner.iter().cloned().collect();
		for utxo in &utxos {
			self.req_spent_utxo_ntfn(utxo).await?;
		}

		info!(
			"Tracking account '{}' (new tx request {}, spent request {})",
			self.name(),
			new_tx_id,
			spent_id
		);
		Ok(())
	}

	/// Asks the node for transactions paying to `address`.
	///
	/// Does nothing until the account is tracked; tracking covers every
	/// active address.
	pub async fn req_new_txs_for_address(&self, address: &str) -> Result<(), AccountError> {
		let Some(id) = self.state.read().await.new_tx_id else {
			debug!("Account '{}' not tracked yet, not subscribing {}", self.name(), address);
			return Ok(());
		};
		self.request_new_txs(id, vec![address.to_string()]).await
	}

	async fn request_new_txs(&self, id: u64, addresses: Vec<String>) -> Result<(), AccountError> {
		if addresses.is_empty() {
			return Ok(());
		}
		debug!("Requesting notifications of transactions to {:?}", addresses);
		self.ctx
			.node
			.send(NodeCommand::new(id, NodeRequest::NotifyNewTxs { addresses }))
			.await?;
		Ok(())
	}

	/// Asks the node to report when `utxo` is spent.
	pub async fn req_spent_utxo_ntfn(&self, utxo: &Utxo) -> Result<(), AccountError> {
		let Some(id) = self.state.read().await.spent_id else {
			debug!("Account '{}' not tracked yet, not watching {}", self.name(), utxo.outpoint);
			return Ok(());
		};
		debug!("Requesting spent notifications for outpoint {}", utxo.outpoint);
		self.ctx
			.node
			.send(NodeCommand::new(
				id,
				NodeRequest::NotifySpent {
					outpoint: utxo.outpoint,
				},
			))
			.await?;
		Ok(())
	}

	/// Rescans every active address from the height chosen by [`rescan_begin_height`].
	pub async fn rescan_active_addresses(&self) -> Result<u64, AccountError> {
		let full_rescan = self.state.read().await.full_rescan;
		let (synced_with, earliest) = {
			let wallet = self.wallet.read().await;
			(wallet.synced_with(), wallet.earliest_block_height())
		};
		let begin_height = rescan_begin_height(full_rescan, synced_with, earliest);
		if full_rescan {
			debug!(
				"Rescanning account '{}' for new transactions since block height {}",
				self.name(),
				begin_height
			);
		} else {
			debug!(
				"Rescanning account '{}' for new transactions after block height {} hash {}",
				self.name(),
				synced_with.height,
				synced_with.hash
			);
		}

		let addresses = self.active_payment_addresses().await;
		self.rescan_addresses(begin_height, addresses).await
	}

	/// Asks the node to replay blocks from `begin_height` for `addresses`.
	///
	/// Returns the correlation id of the rescan. The rescan finishes in the
	/// background when the node sends its terminating null result.
	pub async fn rescan_addresses(
		&self,
		begin_height: i32,
		addresses: BTreeSet<String>,
	) -> Result<u64, AccountError> {
		let id = self.ctx.router.next_id();
		let this = self.this.clone();
		let mut progress = RescanProgress::new(begin_height);

		self.ctx.router.register(id, move |reply: NodeReply| {
			let step = RescanStep::from(reply);
			match &step {
				RescanStep::Tx(n) => {
					progress.record_transaction(n.height);
					progress.log_progress(false);
				}
				RescanStep::Malformed(_) => progress.record_malformed(),
				RescanStep::Done | RescanStep::Failed(_) => progress.log_progress(true),
			}
			let stats = progress.stats();
			let this = this.clone();
			async move {
				match this.upgrade() {
					Some(account) => account.handle_rescan_step(id, step, stats).await,
					None => HandlerControl::Remove,
				}
			}
		});

		info!(
			"Rescanning {} addresses of account '{}' from height {} (request {})",
			addresses.len(),
			self.name(),
			begin_height,
			id
		);
		let command = NodeCommand::new(id, NodeRequest::Rescan { begin_height, addresses });
		if let Err(e) = self.ctx.node.send(command).await {
			self.ctx.router.deregister(id);
			return Err(e.into());
		}
		Ok(id)
	}

	async fn handle_rescan_step(&self, id: u64, step: RescanStep, stats: RescanStats) -> HandlerControl {
		match step {
			RescanStep::Tx(n) => {
				self.apply_tx_notification(n).await;
				HandlerControl::Keep
			}
			RescanStep::Malformed(e) => {
				error!("Rescan {}: dropping result: {}", id, e);
				HandlerControl::Keep
			}
			RescanStep::Failed(e) => {
				error!("Rescan {}: error {} received from node: {}", id, e.code, e.message);
				HandlerControl::Remove
			}
			RescanStep::Done => {
				info!("{} for account '{}'", stats.summary(), self.name());
				self.finish_rescan().await;
				HandlerControl::Remove
			}
		}
	}

	/// Publishes balances and records the current tip as synced.
	async fn finish_rescan(&self) {
		self.emit_balances().await;
		match self.ctx.chain.current_tip() {
			Ok(tip) => {
				self.wallet.write().await.set_synced_with(tip);
				self.state.write().await.dirty = true;
			}
			Err(e) => error!("Cannot record synced tip of account '{}': {}", self.name(), e),
		}
		self.persist_best_effort().await;
	}
}
