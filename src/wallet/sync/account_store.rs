//! The set of accounts managed by one process.

use crate::wallet::sync::{Account, SyncContext};
use crate::wallet::{AccountError, BlockStamp, ShaHash, WalletBackend};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, info, warn};

/// Named accounts sharing one [`SyncContext`].
pub struct AccountStore {
	ctx: SyncContext,
	accounts: RwLock<HashMap<String, Arc<Account>>>,
}

impl AccountStore {
	pub fn new(ctx: SyncContext) -> Self {
		Self {
			ctx,
			accounts: RwLock::new(HashMap::new()),
		}
	}

	pub fn context(&self) -> &SyncContext {
		&self.ctx
	}

	/// Opens `name` over `wallet`, restoring stored state and recording its addresses.
	pub async fn open(&self, name: &str, wallet: Box<dyn WalletBackend>) -> Result<Arc<Account>, AccountError> {
		let account = Account::new(name, wallet, self.ctx.clone());
		account.restore().await?;
		self.insert(account.clone()).await;
		Ok(account)
	}

	/// Adds `account`, replacing one of the same name.
	pub async fn insert(&self, account: Arc<Account>) -> Option<Arc<Account>> {
		for address in account.active_payment_addresses().await {
			self.ctx.addresses.mark(&address, account.name());
		}
		info!("Added account '{}'", account.name());
		self.accounts
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(account.name().to_string(), account)
	}

	pub fn get(&self, name: &str) -> Result<Arc<Account>, AccountError> {
		self.accounts
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(name)
			.cloned()
			.ok_or_else(|| AccountError::NotFound(format!("account '{}'", name)))
	}

	/// The account owning `address`.
	pub fn account_for_address(&self, address: &str) -> Result<Arc<Account>, AccountError> {
		let name = self.ctx.addresses.lookup(address)?;
		self.get(&name)
	}

	/// Account names in sorted order.
	pub fn names(&self) -> Vec<String> {
		let mut names: Vec<String> = self
			.accounts
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.keys()
			.cloned()
			.collect();
		names.sort();
		names
	}

	fn snapshot(&self) -> Vec<Arc<Account>> {
		self.accounts
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.values()
			.cloned()
			.collect()
	}

	/// Rolls every account back past (`height`, `hash`).
	pub async fn rollback(&self, height: i32, hash: &ShaHash) {
		for account in self.snapshot() {
			account.rollback(height, hash).await;
		}
	}

	/// Refreshes every account's balances for a newly attached block.
	pub async fn on_block_connected(&self, block: BlockStamp) {
		for account in self.snapshot() {
			account.on_block_connected(block).await;
		}
	}

	/// Whether the chain tip source has reported a tip yet.
	pub fn tip_known(&self) -> bool {
		self.ctx.chain.current_tip().is_ok()
	}

	/// Opens the standing subscriptions of every account and rescans what
	/// each missed while offline.
	pub async fn track_and_rescan_all(&self) -> Result<(), AccountError> {
		if !self.tip_known() {
			warn!("Chain tip is not set; balances read zero and rescans cannot record a synced block");
		}
		for account in self.snapshot() {
			account.track().await?;
			account.rescan_active_addresses().await?;
		}
		Ok(())
	}

	/// Writes every account's dirty state, logging failures.
	pub async fn write_all_dirty(&self) {
		for account in self.snapshot() {
			if let Err(e) = account.persist().await {
				error!("Cannot write dirty state of account '{}': {}", account.name(), e);
			}
		}
	}

	pub fn len(&self) -> usize {
		self.accounts.read().unwrap_or_else(PoisonError::into_inner).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
