//! Fakes for the collaborators of an account, shared by the unit tests.

use crate::config::SyncConfig;
use crate::node::{NodeCommand, NodeConnection, NodeError};
use crate::utils::encode_address;
use crate::wallet::sync::repositories::AccountStateRepository;
use crate::wallet::sync::{
	Account, AccountEvent, ChannelEventHandler, EventDispatcher, NotificationRouter,
	StatePersistenceService, SyncContext,
};
use crate::wallet::{
	AddressInfo, BlockStamp, Network, PersistenceError, PrivateKey, SharedChainTip, ShaHash,
	TxStore, UtxoStore, WalletBackend, WalletBackendError,
};

use base58::ToBase58;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// A transaction notification paying `amount` to `[tag; 20]` from txid `[tag; 32]`.
pub(crate) fn tx_payload(tag: u8, out: u32, height: i32, amount: i64) -> Value {
	let confirmed = height != -1;
	let block_hash = if confirmed {
		ShaHash([height as u8; 32])
	} else {
		ShaHash::ZERO
	};
	let pk_script = [0x76u8, 0xa9, 0x14][..].to_base58();
	json!({
		"receiver": encode_address(&[tag; 20], Network::TestNet),
		"height": height,
		"blockhash": block_hash.to_string(),
		"blockindex": if confirmed { 1 } else { -1 },
		"blocktime": if confirmed { 1_700_000_000 + i64::from(height) } else { 0 },
		"txid": ShaHash([tag; 32]).to_string(),
		"txoutindex": out,
		"amount": amount,
		"pkscript": pk_script,
		"spent": false,
	})
}

#[derive(Debug)]
pub(crate) struct FakeWalletState {
	network: Network,
	seed: u8,
	keys: Vec<(AddressInfo, PrivateKey)>,
	synced_with: BlockStamp,
	locked: bool,
	saves: usize,
	fail_saves: Arc<AtomicBool>,
}

/// In-memory wallet backend deriving deterministic keys.
pub(crate) struct FakeWallet {
	state: Arc<Mutex<FakeWalletState>>,
}

impl FakeWallet {
	pub(crate) const PASSPHRASE: &'static [u8] = b"correct horse";
	pub(crate) const EARLIEST_HEIGHT: i32 = 12;
	const IMPORTED_INDEX_BASE: i64 = 1_000_000;

	fn state(&self) -> std::sync::MutexGuard<'_, FakeWalletState> {
		self.state.lock().unwrap()
	}
}

impl WalletBackend for FakeWallet {
	fn network(&self) -> Network {
		self.state().network
	}

	fn next_chained_address(&mut self, tip: &BlockStamp) -> Result<String, WalletBackendError> {
		let mut state = self.state();
		let index = state.keys.iter().filter(|(i, _)| i.chain_index < Self::IMPORTED_INDEX_BASE).count();
		let mut hash = [0u8; 20];
		hash[0] = state.seed;
		hash[1] = index as u8 + 1;
		let mut key = [0u8; 32];
		key[..20].copy_from_slice(&hash);

		let address = encode_address(&hash, state.network);
		state.keys.push((
			AddressInfo {
				address: address.clone(),
				compressed: true,
				first_block: tip.height,
				chain_index: index as i64,
			},
			PrivateKey(key),
		));
		Ok(address)
	}

	fn last_chained_address(&self) -> Result<String, WalletBackendError> {
		self.state()
			.keys
			.iter()
			.filter(|(i, _)| i.chain_index < Self::IMPORTED_INDEX_BASE)
			.max_by_key(|(i, _)| i.chain_index)
			.map(|(i, _)| i.address.clone())
			.ok_or_else(|| WalletBackendError::Other("no chained addresses".to_string()))
	}

	fn address_key(&self, address: &str) -> Result<PrivateKey, WalletBackendError> {
		let state = self.state();
		if state.locked {
			return Err(WalletBackendError::Locked);
		}
		state
			.keys
			.iter()
			.find(|(i, _)| i.address == address)
			.map(|(_, k)| k.clone())
			.ok_or_else(|| WalletBackendError::UnknownAddress(address.to_string()))
	}

	fn address_info(&self, address: &str) -> Result<AddressInfo, WalletBackendError> {
		self.state()
			.keys
			.iter()
			.find(|(i, _)| i.address == address)
			.map(|(i, _)| i.clone())
			.ok_or_else(|| WalletBackendError::UnknownAddress(address.to_string()))
	}

	fn import_private_key(
		&mut self,
		key: PrivateKey,
		compressed: bool,
		tip: &BlockStamp,
	) -> Result<String, WalletBackendError> {
		let mut state = self.state();
		let address = encode_address(&key.0[..20], state.network);
		if state.keys.iter().any(|(i, _)| i.address == address) {
			return Err(WalletBackendError::DuplicateAddress(address));
		}
		let chain_index = Self::IMPORTED_INDEX_BASE + state.keys.len() as i64;
		state.keys.push((
			AddressInfo {
				address: address.clone(),
				compressed,
				first_block: tip.height,
				chain_index,
			},
			key,
		));
		Ok(address)
	}

	fn active_addresses(&self) -> Vec<AddressInfo> {
		self.state().keys.iter().map(|(i, _)| i.clone()).collect()
	}

	fn synced_with(&self) -> BlockStamp {
		self.state().synced_with
	}

	fn set_synced_with(&mut self, tip: BlockStamp) {
		self.state().synced_with = tip;
	}

	fn earliest_block_height(&self) -> i32 {
		Self::EARLIEST_HEIGHT
	}

	fn lock(&mut self) -> Result<(), WalletBackendError> {
		self.state().locked = true;
		Ok(())
	}

	fn unlock(&mut self, passphrase: &[u8]) -> Result<(), WalletBackendError> {
		if passphrase != Self::PASSPHRASE {
			return Err(WalletBackendError::InvalidPassphrase);
		}
		self.state().locked = false;
		Ok(())
	}

	fn save(&self) -> Result<(), WalletBackendError> {
		let mut state = self.state();
		if state.fail_saves.load(Ordering::SeqCst) {
			return Err(WalletBackendError::Other("disk full".to_string()));
		}
		state.saves += 1;
		Ok(())
	}
}

/// Node connection recording every command sent.
#[derive(Default)]
pub(crate) struct RecordingNode {
	sent: Mutex<Vec<NodeCommand>>,
	fail: AtomicBool,
}

impl RecordingNode {
	pub(crate) fn sent(&self) -> Vec<NodeCommand> {
		self.sent.lock().unwrap().clone()
	}

	pub(crate) fn fail_sends(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}
}

#[async_trait::async_trait]
impl NodeConnection for RecordingNode {
	async fn send(&self, command: NodeCommand) -> Result<(), NodeError> {
		if self.fail.load(Ordering::SeqCst) {
			return Err(NodeError::ConnectionClosed);
		}
		self.sent.lock().unwrap().push(command);
		Ok(())
	}
}

#[derive(Default)]
struct MemoryRepositoryState {
	utxos: HashMap<String, UtxoStore>,
	txs: HashMap<String, TxStore>,
	utxo_saves: usize,
	tx_saves: usize,
}

/// Repository keeping snapshots in memory. Clones share contents.
#[derive(Clone, Default)]
pub(crate) struct MemoryRepository {
	state: Arc<Mutex<MemoryRepositoryState>>,
	fail: Arc<AtomicBool>,
}

impl MemoryRepository {
	pub(crate) fn utxo_saves(&self) -> usize {
		self.state.lock().unwrap().utxo_saves
	}

	pub(crate) fn tx_saves(&self) -> usize {
		self.state.lock().unwrap().tx_saves
	}

	pub(crate) fn fail_writes(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}

	fn check(&self) -> Result<(), PersistenceError> {
		if self.fail.load(Ordering::SeqCst) {
			return Err(PersistenceError::IoError(std::io::Error::other("disk full")));
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl AccountStateRepository for MemoryRepository {
	async fn save_utxos(&self, account: &str, store: &UtxoStore) -> Result<(), PersistenceError> {
		self.check()?;
		let mut state = self.state.lock().unwrap();
		state.utxos.insert(account.to_string(), store.clone());
		state.utxo_saves += 1;
		Ok(())
	}

	async fn save_txs(&self, account: &str, store: &TxStore) -> Result<(), PersistenceError> {
		self.check()?;
		let mut state = self.state.lock().unwrap();
		state.txs.insert(account.to_string(), store.clone());
		state.tx_saves += 1;
		Ok(())
	}

	async fn load_utxos(&self, account: &str) -> Result<Option<UtxoStore>, PersistenceError> {
		Ok(self.state.lock().unwrap().utxos.get(account).cloned())
	}

	async fn load_txs(&self, account: &str) -> Result<Option<TxStore>, PersistenceError> {
		Ok(self.state.lock().unwrap().txs.get(account).cloned())
	}
}

/// A sync context wired to fakes, plus handles to inspect them.
pub(crate) struct Harness {
	pub(crate) ctx: SyncContext,
	pub(crate) node: Arc<RecordingNode>,
	pub(crate) chain: Arc<SharedChainTip>,
	pub(crate) repository: MemoryRepository,
	wallets: Mutex<Vec<Arc<Mutex<FakeWalletState>>>>,
	fail_wallet_saves: Arc<AtomicBool>,
	events: mpsc::UnboundedReceiver<AccountEvent>,
}

impl Harness {
	pub(crate) fn new() -> Self {
		Self::with_config(SyncConfig::default())
	}

	/// A harness whose chain tip has not been reported yet.
	pub(crate) fn without_tip() -> Self {
		Self::build(SyncConfig::default(), None)
	}

	pub(crate) fn with_config(config: SyncConfig) -> Self {
		Self::build(config, Some(Self::default_tip()))
	}

	fn build(config: SyncConfig, tip: Option<BlockStamp>) -> Self {
		let node = Arc::new(RecordingNode::default());
		let chain = Arc::new(match tip {
			Some(tip) => SharedChainTip::with_tip(tip),
			None => SharedChainTip::new(),
		});
		let repository = MemoryRepository::default();
		let (channel, events) = ChannelEventHandler::channel();
		let mut dispatcher = EventDispatcher::new();
		dispatcher.register_handler(Box::new(channel));

		let ctx = SyncContext::new(
			Arc::new(NotificationRouter::new()),
			node.clone(),
			chain.clone(),
			Arc::new(dispatcher),
			Arc::new(StatePersistenceService::with_repository(Box::new(repository.clone()))),
			config,
		);
		Self {
			ctx,
			node,
			chain,
			repository,
			wallets: Mutex::new(Vec::new()),
			fail_wallet_saves: Arc::new(AtomicBool::new(false)),
			events,
		}
	}

	fn default_tip() -> BlockStamp {
		BlockStamp::new(100, ShaHash([0xaa; 32]))
	}

	pub(crate) fn tip(&self) -> BlockStamp {
		Self::default_tip()
	}

	/// A new account over a fresh TestNet wallet with its own key space.
	pub(crate) fn account(&self, name: &str) -> Arc<Account> {
		Account::new(name, self.wallet(), self.ctx.clone())
	}

	/// A fresh TestNet wallet with its own key space.
	pub(crate) fn wallet(&self) -> Box<dyn WalletBackend> {
		let mut wallets = self.wallets.lock().unwrap();
		let state = Arc::new(Mutex::new(FakeWalletState {
			network: Network::TestNet,
			seed: 0xc0 + wallets.len() as u8,
			keys: Vec::new(),
			synced_with: BlockStamp::new(0, ShaHash::ZERO),
			locked: false,
			saves: 0,
			fail_saves: self.fail_wallet_saves.clone(),
		}));
		wallets.push(state.clone());
		Box::new(FakeWallet { state })
	}

	pub(crate) async fn tracked_account(&self, name: &str) -> Arc<Account> {
		let account = self.account(name);
		account.track().await.unwrap();
		account
	}

	pub(crate) async fn add_wallet_addresses(&self, account: &Account, count: usize) -> Vec<String> {
		let mut wallet = account.wallet.write().await;
		(0..count)
			.map(|_| wallet.next_chained_address(&self.tip()).unwrap())
			.collect()
	}

	pub(crate) fn fail_wallet_saves(&self) {
		self.fail_wallet_saves.store(true, Ordering::SeqCst);
	}

	/// Wallet saves across every account made by this harness.
	pub(crate) fn wallet_saves(&self) -> usize {
		self.wallets
			.lock()
			.unwrap()
			.iter()
			.map(|w| w.lock().unwrap().saves)
			.sum()
	}

	/// Synced tip of the first account's wallet.
	pub(crate) fn synced_with(&self) -> BlockStamp {
		self.wallets.lock().unwrap()[0].lock().unwrap().synced_with
	}

	pub(crate) fn push_tx(&self, account: &Account, payload: Value) {
		let id = account.state.try_read().unwrap().new_tx_id.unwrap();
		assert!(self.ctx.router.dispatch(id, crate::node::NodeReply::result(payload)));
	}

	pub(crate) fn push_spent(&self, account: &Account, payload: Value) {
		let id = account.state.try_read().unwrap().spent_id.unwrap();
		assert!(self.ctx.router.dispatch(id, crate::node::NodeReply::result(payload)));
	}

	/// Lets spawned handler tasks run to completion.
	pub(crate) async fn settle(&self) {
		tokio::time::sleep(Duration::from_millis(100)).await;
	}

	pub(crate) fn drain_events(&mut self) -> Vec<AccountEvent> {
		let mut events = Vec::new();
		while let Ok(event) = self.events.try_recv() {
			events.push(event);
		}
		events
	}

	/// Waits for the next new-transaction or confirmation event.
	pub(crate) async fn next_tx_event(&mut self) -> AccountEvent {
		loop {
			let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
				.await
				.expect("no transaction event within 5s")
				.expect("event channel closed");
			if is_tx_event(&event) {
				return event;
			}
		}
	}

	pub(crate) fn no_more_tx_events(&mut self) -> bool {
		!self.drain_events().iter().any(is_tx_event)
	}
}

fn is_tx_event(event: &AccountEvent) -> bool {
	matches!(
		event,
		AccountEvent::NewTransaction { .. } | AccountEvent::TransactionConfirmed { .. }
	)
}
