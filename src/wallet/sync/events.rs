//! Event system for upstream consumers of account state.
//!
//! Accounts emit an [`AccountEvent`] whenever something a wallet frontend
//! cares about changes: balances, newly seen or newly confirmed
//! transactions, and the lock state of the key store. Events go through an
//! [`EventDispatcher`], which fans each one out to every registered
//! [`AccountEventHandler`]. Handlers are independent; one failing does not
//! keep the event from the others.

use crate::wallet::TxDetail;

use tokio::sync::mpsc;
use tracing::{error, info};

/// Notifications published to upstream consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountEvent {
	/// Confirmed balance (at least one confirmation), in display units.
	BalanceChanged { account: String, balance: f64 },
	/// Balance held in outputs that are not yet mined, in display units.
	UnconfirmedBalanceChanged { account: String, balance: f64 },
	/// A transaction was seen for the first time.
	NewTransaction { account: String, detail: TxDetail },
	/// A transaction previously announced unconfirmed has been mined.
	TransactionConfirmed { account: String, detail: TxDetail },
	/// The account's key store was locked or unlocked.
	LockStateChanged { account: String, locked: bool },
}

impl AccountEvent {
	pub fn account(&self) -> &str {
		match self {
			AccountEvent::BalanceChanged { account, .. }
			| AccountEvent::UnconfirmedBalanceChanged { account, .. }
			| AccountEvent::NewTransaction { account, .. }
			| AccountEvent::TransactionConfirmed { account, .. }
			| AccountEvent::LockStateChanged { account, .. } => account,
		}
	}
}

/// Failure of a single event handler.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
	#[error("Event receiver dropped")]
	ReceiverClosed,

	#[error("Event handler error: {0}")]
	Handler(String),
}

/// Trait for handling account events.
#[async_trait::async_trait]
pub trait AccountEventHandler: Send + Sync {
	/// Handle one event. Called concurrently from notification workers.
	async fn handle(&self, event: &AccountEvent) -> Result<(), EventError>;

	/// Get the name of this handler for logging and diagnostics.
	fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// Handlers are registered while the dispatcher is being built and called in
/// registration order for each event.
#[derive(Default)]
pub struct EventDispatcher {
	handlers: Vec<Box<dyn AccountEventHandler>>,
}

impl EventDispatcher {
	/// Create a new, empty event dispatcher.
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a new event handler.
	pub fn register_handler(&mut self, handler: Box<dyn AccountEventHandler>) {
		self.handlers.push(handler);
	}

	pub fn handler_count(&self) -> usize {
		self.handlers.len()
	}

	/// Dispatch an event to all registered handlers.
	///
	/// Errors from handlers are logged, but do not stop other handlers from running.
	pub async fn dispatch(&self, event: AccountEvent) {
		for handler in &self.handlers {
			if let Err(e) = handler.handle(&event).await {
				error!("Handler {} failed to process event: {}", handler.name(), e);
			}
		}
	}
}

/// Logs every event at info level.
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl AccountEventHandler for LoggingEventHandler {
	async fn handle(&self, event: &AccountEvent) -> Result<(), EventError> {
		match event {
			AccountEvent::BalanceChanged { account, balance } => {
				info!("Account '{}' balance: {}", account, balance);
			}
			AccountEvent::UnconfirmedBalanceChanged { account, balance } => {
				info!("Account '{}' unconfirmed balance: {}", account, balance);
			}
			AccountEvent::NewTransaction { account, detail } => {
				info!(
					"Account '{}' new {:?} transaction {} for {} ({} confirmations)",
					account, detail.category, detail.txid, detail.amount, detail.confirmations
				);
			}
			AccountEvent::TransactionConfirmed { account, detail } => {
				info!(
					"Account '{}' transaction {} confirmed in block {:?}",
					account, detail.txid, detail.block_hash
				);
			}
			AccountEvent::LockStateChanged { account, locked } => {
				info!(
					"Account '{}' {}",
					account,
					if *locked { "locked" } else { "unlocked" }
				);
			}
		}
		Ok(())
	}

	fn name(&self) -> &'static str {
		"logging"
	}
}

/// Forwards every event into an unbounded channel.
pub struct ChannelEventHandler {
	sender: mpsc::UnboundedSender<AccountEvent>,
}

impl ChannelEventHandler {
	pub fn new(sender: mpsc::UnboundedSender<AccountEvent>) -> Self {
		Self { sender }
	}

	/// A handler together with the receiving end of its channel.
	pub fn channel() -> (Self, mpsc::UnboundedReceiver<AccountEvent>) {
		let (sender, receiver) = mpsc::unbounded_channel();
		(Self::new(sender), receiver)
	}
}

#[async_trait::async_trait]
impl AccountEventHandler for ChannelEventHandler {
	async fn handle(&self, event: &AccountEvent) -> Result<(), EventError> {
		self.sender
			.send(event.clone())
			.map_err(|_| EventError::ReceiverClosed)
	}

	fn name(&self) -> &'static str {
		"channel"
	}
}
