//! Account state and its synchronization with the node.

pub mod address_index;
pub mod backend;
pub mod balance;
pub mod chain;
pub mod history;
pub mod sync;
pub mod types;
pub mod utxo;
pub mod watch_only;

pub use address_index::AddressOwnershipIndex;
pub use backend::{AddressInfo, PrivateKey, WalletBackend};
pub use chain::{ChainTipSource, SharedChainTip};
pub use history::{RecvTx, SendRecipient, SendTx, TxCategory, TxDetail, TxRecord, TxStore};
pub use sync::{Account, AccountStore, SyncContext};
pub use types::*;
pub(crate) use types::is_orphaned;
pub use utxo::{Utxo, UtxoStore};
pub use watch_only::WatchOnlyWallet;
