//! State persistence service for accounts.
//!
//! This module provides the `StatePersistenceService`, which writes and restores the UTXO and
//! history stores of an account through an [`AccountStateRepository`] and asks the wallet
//! backend to save itself when its own state changed.
//!
//! Only dirty parts are written. A part's dirty flag is cleared when its snapshot is taken and
//! set again if the write fails, so a change made while a write is in flight is never lost.

use crate::wallet::PersistenceError;
use crate::wallet::sync::Account;
use crate::wallet::sync::repositories::{AccountStateRepository, FileAccountStateRepository};

use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Service for managing state persistence operations.
pub struct StatePersistenceService {
	repository: Box<dyn AccountStateRepository>,
	/// Serializes writes so snapshots land on disk in the order they were taken.
	write_lock: Mutex<()>,
}

impl StatePersistenceService {
	/// Create a new state persistence service for the given data directory.
	pub fn new(data_dir: PathBuf) -> Self {
		Self::with_repository(Box::new(FileAccountStateRepository::new(data_dir)))
	}

	pub fn with_repository(repository: Box<dyn AccountStateRepository>) -> Self {
		Self {
			repository,
			write_lock: Mutex::new(()),
		}
	}

	/// Write every dirty part of `account`.
	pub async fn write_if_dirty(&self, account: &Account) -> Result<(), PersistenceError> {
		let _writing = self.write_lock.lock().await;

		let utxos = {
			let mut utxos = account.utxos.write().await;
			std::mem::take(&mut utxos.dirty).then(|| utxos.inner.clone())
		};
		if let Some(snapshot) = utxos {
			if let Err(e) = self.repository.save_utxos(account.name(), &snapshot).await {
				account.utxos.write().await.mark_dirty();
				return Err(e);
			}
		}

		let txs = {
			let mut txs = account.txs.write().await;
			std::mem::take(&mut txs.dirty).then(|| txs.inner.clone())
		};
		if let Some(snapshot) = txs {
			if let Err(e) = self.repository.save_txs(account.name(), &snapshot).await {
				account.txs.write().await.mark_dirty();
				return Err(e);
			}
		}

		let wallet_dirty = std::mem::take(&mut account.state.write().await.dirty);
		if wallet_dirty {
			if let Err(e) = account.wallet.read().await.save() {
				account.state.write().await.dirty = true;
				return Err(e.into());
			}
			debug!("Saved wallet of account '{}'", account.name());
		}
		Ok(())
	}

	/// Fill the stores of `account` from disk, returning whether anything was found.
	pub async fn restore(&self, account: &Account) -> Result<bool, PersistenceError> {
		let utxos = self.repository.load_utxos(account.name()).await?;
		let txs = self.repository.load_txs(account.name()).await?;
		let found = utxos.is_some() || txs.is_some();

		if let Some(store) = utxos {
			let mut utxos = account.utxos.write().await;
			utxos.inner = store;
			utxos.dirty = false;
		}
		if let Some(store) = txs {
			let mut txs = account.txs.write().await;
			txs.inner = store;
			txs.dirty = false;
		}

		if found {
			info!("Restored stored state of account '{}'", account.name());
		}
		Ok(found)
	}
}
