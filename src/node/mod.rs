//! Node integration module
//!
//! This module provides the client and wire types for talking to the remote full node that is
//! the sole source of chain state and transaction notifications.

/// WebSocket client for the node
mod client;
/// Type definitions for node messages and notification payloads
mod types;

pub use client::NodeClient;
pub use types::*;

/// Outbound half of the node connection.
#[async_trait::async_trait]
pub trait NodeConnection: Send + Sync {
	/// Queue `command` for delivery. Replies arrive through the router.
	async fn send(&self, command: NodeCommand) -> Result<(), NodeError>;
}
