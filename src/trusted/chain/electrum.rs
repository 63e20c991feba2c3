//! Blocking Electrum backend.
//!
//! Implements [`ChainQuery`] and [`Transmitter`] on top of `electrum_client`.
//! Height comes from `blockchain.headers.subscribe`, script history from
//! `blockchain.scripthash.get_history` followed by one batched tx fetch.
//! Subscription notifications are drained on every read; the service always
//! re-reads height and history, so only the queues need emptying.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use bdk_electrum::electrum_client::{self, Client, ElectrumApi as _};
use bitcoin::{Script, ScriptBuf, Transaction, Txid};

use crate::error::ChainError;
use crate::trusted::chain::api::{ChainQuery, Transmitter};
use crate::trusted::domain::request::TransactionRecord;

fn transient(e: electrum_client::Error) -> ChainError {
    ChainError::Transient(e.to_string())
}

/// Confirmations of a history entry at `height` when the tip is `tip`.
///
/// Electrum reports `0` or `-1` for mempool entries.
pub fn confirmations(height: i32, tip: u32) -> u32 {
    match u32::try_from(height) {
        Ok(h) if h > 0 && tip >= h => tip - h + 1,
        _ => 0,
    }
}

/// Pops queued notifications until the queue is empty, keeping the last one.
pub fn drain_latest<T, E>(mut pop: impl FnMut() -> Result<Option<T>, E>) -> Result<Option<T>, E> {
    let mut latest = None;
    while let Some(item) = pop()? {
        latest = Some(item);
    }
    Ok(latest)
}

pub struct ElectrumChain {
    inner: Client,

    /// scripts already subscribed on this connection
    watched: Mutex<HashSet<ScriptBuf>>,

    /// tip of the last height read; confirmations of one poll are counted against it
    tip: AtomicU32,
}

impl ElectrumChain {
    pub fn new(url: &str) -> Result<Self> {
        log::info!("[ELECTRUM] connecting to {}", url);
        let inner = Client::new(url)?;
        Ok(Self::with_client(inner))
    }

    pub fn with_client(inner: Client) -> Self {
        Self {
            inner,
            watched: Mutex::new(HashSet::new()),
            tip: AtomicU32::new(0),
        }
    }
}

impl ChainQuery for ElectrumChain {
    fn current_height(&self) -> Result<u32, ChainError> {
        let header = self.inner.block_headers_subscribe().map_err(transient)?;
        drain_latest(|| self.inner.block_headers_pop()).map_err(transient)?;

        let height = u32::try_from(header.height).map_err(|e| ChainError::Transient(e.to_string()))?;
        self.tip.store(height, Ordering::SeqCst);
        Ok(height)
    }

    fn transactions_touching(&self, script: &Script) -> Result<Vec<TransactionRecord>, ChainError> {
        let tip = match self.tip.load(Ordering::SeqCst) {
            0 => self.current_height()?,
            tip => tip,
        };

        let subscribed = self
            .watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(script);
        if subscribed {
            drain_latest(|| self.inner.script_pop(script)).map_err(transient)?;
        }

        let history = self.inner.script_get_history(script).map_err(transient)?;
        if history.is_empty() {
            return Ok(vec![]);
        }

        let txids: Vec<Txid> = history.iter().map(|h| h.tx_hash).collect();
        let txs = self.inner.batch_transaction_get(&txids).map_err(transient)?;
        log::trace!("[ELECTRUM] {} history entries for {}", txs.len(), script);

        if txs.len() != history.len() {
            return Err(ChainError::Transient(format!(
                "asked for {} transactions, got {}",
                history.len(),
                txs.len()
            )));
        }

        Ok(history
            .iter()
            .zip(txs)
            .map(|(entry, tx)| TransactionRecord::new(tx, confirmations(entry.height, tip)))
            .collect())
    }

    fn watch(&self, script: &Script) -> Result<(), ChainError> {
        let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);
        if watched.contains(script) {
            return Ok(());
        }
        self.inner.script_subscribe(script).map_err(transient)?;
        watched.insert(script.to_owned());
        log::debug!("[ELECTRUM] watching {}", script);
        Ok(())
    }
}

impl Transmitter for ElectrumChain {
    fn submit(&self, tx: &Transaction) -> Result<(), ChainError> {
        match self.inner.transaction_broadcast(tx) {
            Ok(txid) => {
                log::debug!("[ELECTRUM] broadcast {}", txid);
                Ok(())
            }
            Err(electrum_client::Error::Protocol(reason)) => {
                Err(ChainError::Rejected(reason.to_string()))
            }
            Err(e) => Err(transient(e)),
        }
    }
}
