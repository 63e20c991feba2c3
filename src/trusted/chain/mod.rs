use std::sync::Arc;

use bitcoin::{Script, Transaction};

use crate::error::ChainError;
use crate::trusted::domain::request::TransactionRecord;

pub mod api;
pub mod electrum;
pub mod mock;

pub use api::{ChainQuery, Transmitter};
pub use electrum::ElectrumChain;
pub use mock::client::MockChain;

// Shared backends: one connection serves both the query and the relay side.
impl<C: ChainQuery + ?Sized> ChainQuery for Arc<C> {
    fn current_height(&self) -> Result<u32, ChainError> {
        (**self).current_height()
    }

    fn transactions_touching(&self, script: &Script) -> Result<Vec<TransactionRecord>, ChainError> {
        (**self).transactions_touching(script)
    }

    fn watch(&self, script: &Script) -> Result<(), ChainError> {
        (**self).watch(script)
    }
}

impl<T: Transmitter + ?Sized> Transmitter for Arc<T> {
    fn submit(&self, tx: &Transaction) -> Result<(), ChainError> {
        (**self).submit(tx)
    }
}
