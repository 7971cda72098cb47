//! Access to the node's current best block.

use crate::wallet::{BlockStamp, ChainTipError};

use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Supplies the currently known best block.
pub trait ChainTipSource: Send + Sync {
	fn current_tip(&self) -> Result<BlockStamp, ChainTipError>;
}

/// A chain tip updated from block-connected notifications.
#[derive(Debug, Default)]
pub struct SharedChainTip {
	tip: RwLock<Option<BlockStamp>>,
}

impl SharedChainTip {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_tip(tip: BlockStamp) -> Self {
		Self {
			tip: RwLock::new(Some(tip)),
		}
	}

	/// Replaces the known tip. Called for both connected and disconnected blocks.
	pub fn set(&self, tip: BlockStamp) {
		debug!("Chain tip now at height {} hash {}", tip.height, tip.hash);
		*self.tip.write().unwrap_or_else(PoisonError::into_inner) = Some(tip);
	}
}

impl ChainTipSource for SharedChainTip {
	fn current_tip(&self) -> Result<BlockStamp, ChainTipError> {
		self.tip
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.ok_or(ChainTipError::Unknown)
	}
}
