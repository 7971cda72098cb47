//! Account Synchronization Module
//!
//! This module keeps accounts reconciled with the node. It is composed of several submodules:
//!
//! - `account`: The account orchestrator and the context shared by every account.
//! - `account_store`: The named accounts of one process.
//! - `handlers`: Application of new-transaction and spent-output notifications.
//! - `rescan`: Subscriptions and chain rescans, with progress reporting.
//! - `router`: Correlates node replies with the handlers registered for them.
//! - `ordering`: Makes receives of a self-payment wait for its send record.
//! - `block_gate`: Serializes notification handling per block.
//! - `notified`: Remembers outputs announced as unconfirmed.
//! - `events`: Account events and the handlers that consume them.
//! - `repositories` and `state_persistence`: Writing and restoring account state.

pub mod account;
/// The named accounts of one process
pub mod account_store;
pub mod block_gate;
/// Account events for upstream consumers
pub mod events;
mod handlers;
pub mod notified;
pub mod ordering;
/// Storage backends for account state
pub mod repositories;
pub mod rescan;
pub mod router;
/// Service for writing and restoring account state
pub mod state_persistence;

#[cfg(test)]
pub(crate) mod test_support;

pub use account::{Account, SyncContext};
pub use account_store::AccountStore;
pub use block_gate::{BlockGate, BlockSlot};
pub use events::*;
pub use notified::{NotifiedOutpoints, ReceiptEvent};
pub use ordering::{OrderingWait, PendingSend, SendRecvOrdering};
pub use repositories::{AccountStateRepository, FileAccountStateRepository};
pub use rescan::{RescanProgress, RescanStats, rescan_begin_height};
pub use router::{HandlerControl, NotificationRouter};
pub use state_persistence::StatePersistenceService;
