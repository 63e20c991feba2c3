use bitcoin::{Script, Transaction};

use crate::error::ChainError;
use crate::trusted::domain::request::TransactionRecord;

/// Read side of the chain as seen by the broadcast service.
///
/// Everything is script based; implementations enforce their own timeouts.
pub trait ChainQuery {
    /// Height of the current best block.
    fn current_height(&self) -> Result<u32, ChainError>;

    /// Transactions that pay to or spend from `script`, with their confirmation count.
    fn transactions_touching(&self, script: &Script) -> Result<Vec<TransactionRecord>, ChainError>;

    /// Start tracking `script`. Must be idempotent.
    fn watch(&self, script: &Script) -> Result<(), ChainError>;
}

/// Relay side. Duplicate submissions are tolerated by the network layer.
pub trait Transmitter {
    fn submit(&self, tx: &Transaction) -> Result<(), ChainError>;
}
