//! Process-wide record of which account owns which payment address.

use crate::wallet::AccountError;

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Maps payment addresses to the name of the account holding them.
///
/// Entries are only ever added. Marking the same address twice overwrites
/// the previous owner.
#[derive(Debug, Default)]
pub struct AddressOwnershipIndex {
	owners: RwLock<HashMap<String, String>>,
}

impl AddressOwnershipIndex {
	pub fn new() -> Self {
		Self::default()
	}

	/// Marks an address as belonging to an account.
	pub fn mark(&self, address: &str, account: &str) {
		debug!("Marking address {} for account '{}'", address, account);
		self.owners
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(address.to_string(), account.to_string());
	}

	/// Returns the name of the account owning `address`.
	pub fn lookup(&self, address: &str) -> Result<String, AccountError> {
		self.owners
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(address)
			.cloned()
			.ok_or_else(|| AccountError::NotFound(format!("address {}", address)))
	}

	pub fn len(&self) -> usize {
		self.owners.read().unwrap_or_else(PoisonError::into_inner).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
