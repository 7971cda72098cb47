//! The account orchestrator.
//!
//! An [`Account`] owns the unspent outputs and transaction history of one
//! named wallet identity and keeps them reconciled with what the node
//! reports. It forwards key management to a [`WalletBackend`], publishes
//! [`AccountEvent`]s for upstream consumers and writes its state through the
//! shared [`StatePersistenceService`].
//!
//! Lock order: the wallet, account state, UTXO store and history store each
//! have their own lock. No code path holds two of them at once.

use crate::config::SyncConfig;
use crate::node::NodeConnection;
use crate::utils::{decode_address, decode_wif, encode_wif};
use crate::wallet::balance;
use crate::wallet::sync::{
	AccountEvent, BlockGate, EventDispatcher, NotificationRouter, NotifiedOutpoints, PendingSend,
	SendRecvOrdering, StatePersistenceService,
};
use crate::wallet::{
	AccountError, AddressOwnershipIndex, BlockStamp, ChainTipSource, Network, PersistenceError,
	SendTx, ShaHash, TxDetail, TxRecord, TxStore, UtxoStore, WalletBackend,
};

use itertools::Itertools;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Collaborators and process-wide registries shared by every account.
#[derive(Clone)]
pub struct SyncContext {
	pub router: Arc<NotificationRouter>,
	pub node: Arc<dyn NodeConnection>,
	pub chain: Arc<dyn ChainTipSource>,
	pub addresses: Arc<AddressOwnershipIndex>,
	pub ordering: Arc<SendRecvOrdering>,
	pub notified: Arc<NotifiedOutpoints>,
	pub block_gate: Arc<BlockGate>,
	pub events: Arc<EventDispatcher>,
	pub persistence: Arc<StatePersistenceService>,
	pub config: SyncConfig,
}

impl SyncContext {
	/// Builds a context with fresh registries around the given collaborators.
	pub fn new(
		router: Arc<NotificationRouter>,
		node: Arc<dyn NodeConnection>,
		chain: Arc<dyn ChainTipSource>,
		events: Arc<EventDispatcher>,
		persistence: Arc<StatePersistenceService>,
		config: SyncConfig,
	) -> Self {
		Self {
			router,
			node,
			chain,
			addresses: Arc::new(AddressOwnershipIndex::new()),
			ordering: Arc::new(SendRecvOrdering::new()),
			notified: Arc::new(NotifiedOutpoints::new()),
			block_gate: Arc::new(BlockGate::new()),
			events,
			persistence,
			config,
		}
	}
}

/// A store together with whether it has changes not yet on disk.
#[derive(Debug, Default)]
pub(crate) struct Tracked<T> {
	pub(crate) inner: T,
	pub(crate) dirty: bool,
}

impl<T> Tracked<T> {
	pub(crate) fn mark_dirty(&mut self) {
		self.dirty = true;
	}
}

/// Mutable per-account bookkeeping.
#[derive(Debug, Default)]
pub(super) struct AccountState {
	/// The wallet backend has changes not yet saved.
	pub(super) dirty: bool,
	/// Rescan from the wallet's earliest block instead of its synced tip.
	pub(super) full_rescan: bool,
	/// Correlation id of the standing new-transaction subscription.
	pub(super) new_tx_id: Option<u64>,
	/// Correlation id of the standing spent-output subscription.
	pub(super) spent_id: Option<u64>,
}

/// One wallet identity kept in sync with the node.
pub struct Account {
	name: String,
	network: Network,
	pub(super) this: Weak<Account>,
	pub(super) ctx: SyncContext,
	pub(super) wallet: RwLock<Box<dyn WalletBackend>>,
	pub(super) state: RwLock<AccountState>,
	pub(super) utxos: RwLock<Tracked<UtxoStore>>,
	pub(super) txs: RwLock<Tracked<TxStore>>,
}

impl Account {
	pub fn new(name: impl Into<String>, wallet: Box<dyn WalletBackend>, ctx: SyncContext) -> Arc<Self> {
		let network = wallet.network();
		Arc::new_cyclic(|this| Self {
			name: name.into(),
			network,
			this: this.clone(),
			ctx,
			wallet: RwLock::new(wallet),
			state: RwLock::new(AccountState::default()),
			utxos: RwLock::new(Tracked::default()),
			txs: RwLock::new(Tracked::default()),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn network(&self) -> Network {
		self.network
	}

	pub fn context(&self) -> &SyncContext {
		&self.ctx
	}

	/// Whether anything about the account awaits a write.
	pub async fn is_dirty(&self) -> bool {
		let wallet_dirty = self.state.read().await.dirty;
		let utxos_dirty = self.utxos.read().await.dirty;
		let txs_dirty = self.txs.read().await.dirty;
		wallet_dirty || utxos_dirty || txs_dirty
	}

	/// Makes the next [`Account::rescan_active_addresses`] start at the
	/// wallet's earliest block.
	pub async fn set_full_rescan(&self, full_rescan: bool) {
		self.state.write().await.full_rescan = full_rescan;
	}

	/// Loads previously written stores from disk. Returns whether anything was found.
	pub async fn restore(&self) -> Result<bool, PersistenceError> {
		self.ctx.persistence.restore(self).await
	}

	/// Writes every dirty part of the account.
	pub async fn persist(&self) -> Result<(), PersistenceError> {
		self.ctx.persistence.write_if_dirty(self).await
	}

	/// [`Account::persist`], logging instead of failing.
	pub(super) async fn persist_best_effort(&self) {
		if let Err(e) = self.persist().await {
			error!("Cannot write dirty state of account '{}': {}", self.name, e);
		}
	}

	pub(super) fn current_tip(&self) -> Result<BlockStamp, AccountError> {
		Ok(self.ctx.chain.current_tip()?)
	}

	/// Locks the wallet's key store.
	pub async fn lock(&self) -> Result<(), AccountError> {
		self.wallet.write().await.lock()?;
		self.emit(AccountEvent::LockStateChanged {
			account: self.name.clone(),
			locked: true,
		})
		.await;
		Ok(())
	}

	/// Unlocks the wallet's key store with `passphrase`.
	pub async fn unlock(&self, passphrase: &[u8]) -> Result<(), AccountError> {
		self.wallet.write().await.unlock(passphrase)?;
		self.emit(AccountEvent::LockStateChanged {
			account: self.name.clone(),
			locked: false,
		})
		.await;
		Ok(())
	}

	/// Reverts everything recorded on the branch orphaned at (`height`, `hash`).
	///
	/// Never fails; a failed write is logged and retried with the next one.
	pub async fn rollback(&self, height: i32, hash: &ShaHash) {
		let utxos_changed = {
			let mut utxos = self.utxos.write().await;
			let changed = utxos.inner.rollback(height, hash);
			utxos.dirty |= changed;
			changed
		};
		let txs_changed = {
			let mut txs = self.txs.write().await;
			let changed = txs.inner.rollback(height, hash);
			txs.dirty |= changed;
			changed
		};

		if utxos_changed || txs_changed {
			info!(
				"Account '{}' rolled back to height {} (outputs changed: {}, history changed: {})",
				self.name, height, utxos_changed, txs_changed
			);
			self.persist_best_effort().await;
		}
	}

	/// Balance in display units counting outputs with at least `confirms` confirmations.
	pub async fn calculate_balance(&self, confirms: u32) -> f64 {
		let tip = self.ctx.chain.current_tip();
		let utxos = self.utxos.read().await;
		balance::calculate_balance(&utxos.inner, tip, confirms, None)
	}

	/// Like [`Account::calculate_balance`], restricted to one receiving pubkey hash.
	pub async fn calculate_address_balance(&self, pubkey_hash: &[u8], confirms: u32) -> f64 {
		let tip = self.ctx.chain.current_tip();
		let utxos = self.utxos.read().await;
		balance::calculate_balance(&utxos.inner, tip, confirms, Some(pubkey_hash))
	}

	/// Publishes the confirmed and unconfirmed balances.
	pub(super) async fn emit_balances(&self) {
		let confirmed = self.calculate_balance(1).await;
		let unconfirmed = self.calculate_balance(0).await - confirmed;
		self.emit(AccountEvent::BalanceChanged {
			account: self.name.clone(),
			balance: confirmed,
		})
		.await;
		self.emit(AccountEvent::UnconfirmedBalanceChanged {
			account: self.name.clone(),
			balance: unconfirmed,
		})
		.await;
	}

	pub(super) async fn emit_unconfirmed_balance(&self) {
		let unconfirmed = self.calculate_balance(0).await - self.calculate_balance(1).await;
		self.emit(AccountEvent::UnconfirmedBalanceChanged {
			account: self.name.clone(),
			balance: unconfirmed,
		})
		.await;
	}

	pub(super) async fn emit(&self, event: AccountEvent) {
		self.ctx.events.dispatch(event).await;
	}

	/// Refreshes balances once a block is attached.
	///
	/// Waits for handlers still applying notifications from the same block.
	pub async fn on_block_connected(&self, block: BlockStamp) {
		let _slot = self
			.ctx
			.block_gate
			.acquire(block.hash, self.ctx.config.block_gate_timeout)
			.await;
		debug!(
			"Refreshing balances of account '{}' for block {} at height {}",
			self.name, block.hash, block.height
		);
		self.emit_balances().await;
	}

	/// Whether any received transaction pays to `pubkey_hash`.
	pub async fn address_used(&self, pubkey_hash: &[u8]) -> bool {
		self.txs
			.read()
			.await
			.inner
			.recv_txs()
			.any(|r| r.receiver_hash == pubkey_hash)
	}

	/// The most recent chained address, or a fresh one if it already received funds.
	pub async fn current_address(&self) -> Result<String, AccountError> {
		let address = self.wallet.read().await.last_chained_address()?;
		let (pubkey_hash, _) = decode_address(&address)?;
		if self.address_used(&pubkey_hash).await {
			self.new_address().await
		} else {
			Ok(address)
		}
	}

	/// Derives the next chained address and subscribes to payments to it.
	///
	/// Fails if the wallet could not be written; the address is then not handed out.
	pub async fn new_address(&self) -> Result<String, AccountError> {
		let tip = self.current_tip()?;
		let address = self.wallet.write().await.next_chained_address(&tip)?;
		self.state.write().await.dirty = true;
		self.persist().await?;

		self.ctx.addresses.mark(&address, &self.name);
		if let Err(e) = self.req_new_txs_for_address(&address).await {
			error!("Cannot request notifications for {}: {}", address, e);
		}
		Ok(address)
	}

	/// Up to `count` history entries, most recently added first, skipping the newest `from` records.
	pub async fn list_transactions(&self, from: usize, count: usize) -> Result<Vec<TxDetail>, AccountError> {
		let tip = self.current_tip()?;
		let txs = self.txs.read().await;
		Ok(txs
			.inner
			.records()
			.iter()
			.rev()
			.skip(from)
			.take(count)
			.flat_map(|r| r.tx_info(&self.name, tip.height, self.network))
			.collect())
	}

	/// Every history entry, most recently added first.
	pub async fn list_all_transactions(&self) -> Result<Vec<TxDetail>, AccountError> {
		let tip = self.current_tip()?;
		let txs = self.txs.read().await;
		Ok(txs
			.inner
			.records()
			.iter()
			.rev()
			.flat_map(|r| r.tx_info(&self.name, tip.height, self.network))
			.collect())
	}

	/// Received entries paying to any of `pubkey_hashes`, in insertion order.
	pub async fn list_address_transactions(
		&self,
		pubkey_hashes: &HashSet<Vec<u8>>,
	) -> Result<Vec<TxDetail>, AccountError> {
		let tip = self.current_tip()?;
		let txs = self.txs.read().await;
		Ok(txs
			.inner
			.records()
			.iter()
			.filter_map(|r| match r {
				TxRecord::Recv(recv) if pubkey_hashes.contains(&recv.receiver_hash) => {
					Some(recv.tx_info(&self.name, tip.height, self.network))
				}
				_ => None,
			})
			.collect())
	}

	/// WIF encodings of the keys of every active address.
	pub async fn dump_priv_keys(&self) -> Result<Vec<String>, AccountError> {
		let wallet = self.wallet.read().await;
		wallet
			.active_addresses()
			.into_iter()
			.sorted_by_key(|info| info.chain_index)
			.map(|info| -> Result<String, AccountError> {
				let key = wallet.address_key(&info.address)?;
				Ok(encode_wif(&key, self.network, info.compressed))
			})
			.collect()
	}

	/// WIF encoding of the key of a single address.
	pub async fn dump_wif_private_key(&self, address: &str) -> Result<String, AccountError> {
		let wallet = self.wallet.read().await;
		let key = wallet.address_key(address)?;
		let info = wallet.address_info(address)?;
		Ok(encode_wif(&key, self.network, info.compressed))
	}

	/// Imports a WIF key with no hint of when its address was first used,
	/// optionally rescanning the chain from genesis for it.
	pub async fn import_priv_key(&self, wif: &str, rescan: bool) -> Result<String, AccountError> {
		let genesis = BlockStamp::new(0, ShaHash::ZERO);
		let address = self.import_wif_private_key(wif, &genesis).await?;
		if rescan {
			self.rescan_addresses(genesis.height, BTreeSet::from([address.clone()]))
				.await?;
		}
		Ok(address)
	}

	/// Imports a WIF key first seen at `tip`, returning its payment address.
	///
	/// The wallet is written before the address is recorded as owned; a failed
	/// write fails the import.
	pub async fn import_wif_private_key(&self, wif: &str, tip: &BlockStamp) -> Result<String, AccountError> {
		let (key, network, compressed) = decode_wif(wif)?;
		if network != self.network {
			return Err(AccountError::NetworkMismatch {
				expected: self.network,
				found: network,
			});
		}

		let address = self
			.wallet
			.write()
			.await
			.import_private_key(key, compressed, tip)?;
		self.state.write().await.dirty = true;
		self.persist().await?;

		self.ctx.addresses.mark(&address, &self.name);
		info!("Imported payment address {}", address);
		if let Err(e) = self.req_new_txs_for_address(&address).await {
			error!("Cannot request notifications for {}: {}", address, e);
		}
		Ok(address)
	}

	/// Active payment addresses in key chain order.
	pub async fn sorted_active_payment_addresses(&self) -> Vec<String> {
		self.wallet
			.read()
			.await
			.active_addresses()
			.into_iter()
			.sorted_by_key(|info| info.chain_index)
			.map(|info| info.address)
			.collect()
	}

	pub async fn active_payment_addresses(&self) -> BTreeSet<String> {
		self.wallet
			.read()
			.await
			.active_addresses()
			.into_iter()
			.map(|info| info.address)
			.collect()
	}

	/// Publishes that a transaction spending from this account is about to be
	/// broadcast. Receives of its outputs wait until the returned entry is
	/// passed to [`Account::record_send_tx`] or dropped.
	pub fn begin_send(&self, txid: ShaHash) -> PendingSend<'_> {
		self.ctx.ordering.begin_send(txid)
	}

	/// Records the history of a sent transaction, then releases receives
	/// waiting on it.
	pub async fn record_send_tx(&self, pending: PendingSend<'_>, send: SendTx) {
		debug!("Recording send {} for account '{}'", send.txid, self.name);
		{
			let mut txs = self.txs.write().await;
			txs.inner.insert_send_tx(send);
			txs.mark_dirty();
		}
		pending.complete();
		self.persist_best_effort().await;
	}
}
