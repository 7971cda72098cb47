//! Correlation of node replies to the handlers that asked for them.
//!
//! Every outbound request carries an identifier drawn from
//! [`NotificationRouter::next_id`]. A handler registered under that
//! identifier receives every reply the node pushes for it. Each
//! registration runs on its own task and consumes its replies in arrival
//! order; registrations never wait on one another.

use crate::node::NodeReply;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What a handler wants done with its registration after a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerControl {
	/// Keep receiving replies (standing subscriptions).
	Keep,
	/// The handler is finished; drop the registration.
	Remove,
}

/// Routes replies to registered handlers by correlation identifier.
#[derive(Debug)]
pub struct NotificationRouter {
	next_id: AtomicU64,
	lanes: Mutex<HashMap<u64, mpsc::UnboundedSender<NodeReply>>>,
}

impl Default for NotificationRouter {
	fn default() -> Self {
		Self {
			next_id: AtomicU64::new(1),
			lanes: Mutex::new(HashMap::new()),
		}
	}
}

impl NotificationRouter {
	pub fn new() -> Self {
		Self::default()
	}

	/// Allocates a fresh correlation identifier.
	pub fn next_id(&self) -> u64 {
		self.next_id.fetch_add(1, Ordering::Relaxed)
	}

	/// Registers `handler` for replies tagged `id`.
	///
	/// Must be called from within a tokio runtime. Registering an identifier
	/// twice replaces the earlier handler.
	pub fn register<F, Fut>(self: &Arc<Self>, id: u64, mut handler: F)
	where
		F: FnMut(NodeReply) -> Fut + Send + 'static,
		Fut: Future<Output = HandlerControl> + Send + 'static,
	{
		let (lane, mut replies) = mpsc::unbounded_channel::<NodeReply>();
		if self.lanes().insert(id, lane).is_some() {
			warn!("Replaced existing handler for request {}", id);
		}

		let router = Arc::downgrade(self);
		tokio::spawn(async move {
			while let Some(reply) = replies.recv().await {
				if handler(reply).await == HandlerControl::Remove {
					if let Some(router) = router.upgrade() {
						router.deregister(id);
					}
					debug!("Handler for request {} finished", id);
					break;
				}
			}
		});
	}

	/// Hands `reply` to the handler registered for `id`.
	///
	/// Returns false when nothing is registered under `id`.
	pub fn dispatch(&self, id: u64, reply: NodeReply) -> bool {
		match self.lanes().get(&id) {
			Some(lane) => lane.send(reply).is_ok(),
			None => false,
		}
	}

	/// Drops the registration for `id`. Replies still queued for it are discarded.
	pub fn deregister(&self, id: u64) -> bool {
		self.lanes().remove(&id).is_some()
	}

	pub fn is_registered(&self, id: u64) -> bool {
		self.lanes().contains_key(&id)
	}

	pub fn len(&self) -> usize {
		self.lanes().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn lanes(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<NodeReply>>> {
		self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
	}
}
