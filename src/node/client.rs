//!
//! WebSocket client for the remote full node.
//!
//! This module owns the connection to the node. Outbound commands are queued onto a writer task;
//! every inbound message is parsed into a [`NodeEnvelope`] and handed to the [`NotificationRouter`],
//! which runs each registered handler on its own task so notifications for unrelated requests are
//! processed in parallel.

use super::types::*;
use super::NodeConnection;
use crate::wallet::sync::NotificationRouter;

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Node client over a WebSocket connection
#[derive(Clone)]
pub struct NodeClient {
	/// Queue feeding the writer task.
	outbound: mpsc::UnboundedSender<Message>,
}

impl NodeClient {
	/// Connect to the node and start the reader and writer tasks.
	///
	/// # Arguments
	/// * `url` - The WebSocket endpoint of the node.
	/// * `router` - Router inbound replies are dispatched through.
	///
	/// # Returns
	/// The client and a handle that completes when the connection closes.
	pub async fn connect(
		url: &str,
		router: Arc<NotificationRouter>,
	) -> Result<(Self, JoinHandle<()>), NodeError> {
		debug!("Attempting WebSocket connection to: {}", url);
		let (ws_stream, response) = connect_async(url).await?;
		info!(
			"Connected to node at {}, response status: {}",
			url,
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();
		let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

		let writer = tokio::spawn(async move {
			while let Some(msg) = outbound_rx.recv().await {
				if let Err(e) = ws_sender.send(msg).await {
					error!("Failed to send to node: {}", e);
					break;
				}
			}
		});

		let connection = tokio::spawn(async move {
			while let Some(msg) = ws_receiver.next().await {
				match msg {
					Ok(Message::Text(text)) => Self::dispatch_text(&router, &text),
					Ok(Message::Close(frame)) => {
						info!("Node closed the connection: {:?}", frame);
						break;
					}
					Ok(_) => debug!("Ignoring non-text message from node"),
					Err(e) => {
						error!("WebSocket error reading from node: {}", e);
						break;
					}
				}
			}
			writer.abort();
		});

		Ok((Self { outbound }, connection))
	}

	/// Parse one inbound message and hand it to the router.
	fn dispatch_text(router: &Arc<NotificationRouter>, text: &str) {
		let envelope = match serde_json::from_str::<NodeEnvelope>(text) {
			Ok(envelope) => envelope,
			Err(e) => {
				warn!("Dropping unparseable message from node: {}", e);
				return;
			}
		};
		let Some(id) = envelope.correlation_id() else {
			debug!("Ignoring message without our correlation id: {:?}", envelope.id);
			return;
		};

		if !router.dispatch(id, envelope.reply) {
			debug!("No handler registered for request {}", id);
		}
	}
}

#[async_trait::async_trait]
impl NodeConnection for NodeClient {
	async fn send(&self, command: NodeCommand) -> Result<(), NodeError> {
		debug!("Sending {} request {}", command.method(), command.id);
		self.outbound
			.send(Message::Text(command.to_json().to_string()))
			.map_err(|_| NodeError::ConnectionClosed)
	}
}
