use crate::wallet::{PersistenceError, TxStore, UtxoStore};

use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Repository for per-account store snapshots
#[async_trait::async_trait]
pub trait AccountStateRepository: Send + Sync {
	async fn save_utxos(&self, account: &str, store: &UtxoStore) -> Result<(), PersistenceError>;
	async fn save_txs(&self, account: &str, store: &TxStore) -> Result<(), PersistenceError>;
	async fn load_utxos(&self, account: &str) -> Result<Option<UtxoStore>, PersistenceError>;
	async fn load_txs(&self, account: &str) -> Result<Option<TxStore>, PersistenceError>;
}

/// File-based implementation of AccountStateRepository
///
/// Each account gets a directory under `data_dir` holding `utxo.json`,
/// `tx.json` and a metadata file per store.
pub struct FileAccountStateRepository {
	data_dir: PathBuf,
}

impl FileAccountStateRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn account_dir(&self, account: &str) -> PathBuf {
		self.data_dir.join(account)
	}

	async fn write_json<T: serde::Serialize + Sync>(
		&self,
		account: &str,
		file: &str,
		value: &T,
		entries: usize,
	) -> Result<(), PersistenceError> {
		let dir = self.account_dir(account);
		tokio::fs::create_dir_all(&dir).await?;

		let metadata = serde_json::json!({
			"entries": entries,
			"timestamp": chrono::Utc::now().to_rfc3339(),
		});
		let metadata_filename = dir.join(format!("{}.meta.json", file));
		tokio::fs::write(&metadata_filename, serde_json::to_string_pretty(&metadata)?).await?;

		// Write to a sibling file first so a crash never leaves a torn store.
		let filename = dir.join(format!("{}.json", file));
		let staging = dir.join(format!("{}.json.tmp", file));
		tokio::fs::write(&staging, serde_json::to_vec(value)?).await?;
		tokio::fs::rename(&staging, &filename).await?;

		info!("Saved {} {} entries to {:?}", entries, file, filename);
		Ok(())
	}

	async fn read_json<T: serde::de::DeserializeOwned>(
		path: &Path,
	) -> Result<Option<T>, PersistenceError> {
		let bytes = match tokio::fs::read(path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				debug!("No saved state at {:?}", path);
				return Ok(None);
			}
			Err(e) => return Err(e.into()),
		};
		Ok(Some(serde_json::from_slice(&bytes)?))
	}
}

#[async_trait::async_trait]
impl AccountStateRepository for FileAccountStateRepository {
	async fn save_utxos(&self, account: &str, store: &UtxoStore) -> Result<(), PersistenceError> {
		self.write_json(account, "utxo", store, store.len()).await
	}

	async fn save_txs(&self, account: &str, store: &TxStore) -> Result<(), PersistenceError> {
		self.write_json(account, "tx", store, store.len()).await
	}

	async fn load_utxos(&self, account: &str) -> Result<Option<UtxoStore>, PersistenceError> {
		let store: Option<UtxoStore> =
			Self::read_json(&self.account_dir(account).join("utxo.json")).await?;
		if let Some(store) = &store {
			info!("Loaded {} unspent outputs for account '{}'", store.len(), account);
		}
		Ok(store)
	}

	async fn load_txs(&self, account: &str) -> Result<Option<TxStore>, PersistenceError> {
		let store: Option<TxStore> =
			Self::read_json(&self.account_dir(account).join("tx.json")).await?;
		if let Some(store) = &store {
			info!("Loaded {} history records for account '{}'", store.len(), account);
		}
		Ok(store)
	}
}
