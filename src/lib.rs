//! Keeps wallet accounts reconciled with a remote full node.
//!
//! Accounts track their unspent outputs and transaction history from the
//! notifications the node pushes, survive chain reorganizations, answer
//! confirmation-aware balance queries and rescan the chain for history they
//! missed while offline.

pub mod config;
pub mod node;
pub mod utils;
pub mod wallet;
