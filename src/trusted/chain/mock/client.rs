use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bitcoin::{Script, ScriptBuf, Transaction};

use crate::error::ChainError;
use crate::trusted::chain::api::{ChainQuery, Transmitter};
use crate::trusted::domain::request::TransactionRecord;

#[derive(Default)]
struct MockState {
    height: u32,
    /// tx -> height it confirmed at (None = mempool)
    txs: Vec<(Transaction, Option<u32>)>,
    watched: Vec<ScriptBuf>,
    failing_scripts: BTreeSet<ScriptBuf>,
    height_unavailable: bool,
    watch_unavailable: bool,
    rejections_left: usize,
    submitted: Vec<Transaction>,
}

/// Pure in-memory chain + relay for tests.
///
/// Interior mutability lets a test keep driving the chain after handing it
/// to a service behind an `Arc`.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(height: u32) -> Self {
        let chain = Self::default();
        chain.lock().height = height;
        chain
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_height(&self, height: u32) {
        log::trace!("[MOCK] height -> {}", height);
        self.lock().height = height;
    }

    /// Confirms `tx` in the current tip.
    pub fn mine(&self, tx: Transaction) {
        let mut state = self.lock();
        let height = state.height;
        state.txs.push((tx, Some(height)));
    }

    /// Adds `tx` without confirming it.
    pub fn push_mempool(&self, tx: Transaction) {
        self.lock().txs.push((tx, None));
    }

    /// Queries for `script` fail until [`MockChain::heal`] is called.
    pub fn fail_queries_for(&self, script: ScriptBuf) {
        self.lock().failing_scripts.insert(script);
    }

    pub fn heal(&self, script: &Script) {
        self.lock().failing_scripts.remove(script);
    }

    pub fn set_height_unavailable(&self, unavailable: bool) {
        self.lock().height_unavailable = unavailable;
    }

    pub fn set_watch_unavailable(&self, unavailable: bool) {
        self.lock().watch_unavailable = unavailable;
    }

    /// The next `n` submissions are rejected.
    pub fn reject_next_submissions(&self, n: usize) {
        self.lock().rejections_left = n;
    }

    /// Transactions accepted by [`Transmitter::submit`], in order.
    pub fn submitted(&self) -> Vec<Transaction> {
        self.lock().submitted.clone()
    }

    pub fn watched(&self) -> Vec<ScriptBuf> {
        self.lock().watched.clone()
    }
}

impl ChainQuery for MockChain {
    fn current_height(&self) -> Result<u32, ChainError> {
        let state = self.lock();
        if state.height_unavailable {
            return Err(ChainError::Transient("mock height unavailable".into()));
        }
        Ok(state.height)
    }

    fn transactions_touching(&self, script: &Script) -> Result<Vec<TransactionRecord>, ChainError> {
        let state = self.lock();
        if state.failing_scripts.contains(script) {
            return Err(ChainError::Transient(format!("mock query failure for {}", script)));
        }

        let records = state
            .txs
            .iter()
            .filter(|(tx, _)| tx.output.iter().any(|o| o.script_pubkey.as_script() == script))
            .map(|(tx, confirmed_at)| {
                let confirmations = match confirmed_at {
                    Some(h) if state.height >= *h => state.height - h + 1,
                    _ => 0,
                };
                TransactionRecord::new(tx.clone(), confirmations)
            })
            .collect();

        Ok(records)
    }

    fn watch(&self, script: &Script) -> Result<(), ChainError> {
        let mut state = self.lock();
        if state.watch_unavailable {
            return Err(ChainError::Transient("mock watch unavailable".into()));
        }
        if !state.watched.iter().any(|s| s.as_script() == script) {
            state.watched.push(script.to_owned());
        }
        Ok(())
    }
}

impl Transmitter for MockChain {
    fn submit(&self, tx: &Transaction) -> Result<(), ChainError> {
        let mut state = self.lock();
        if state.rejections_left > 0 {
            state.rejections_left -= 1;
            return Err(ChainError::Rejected("mock rejection".into()));
        }
        log::trace!("[MOCK] submitted {}", tx.compute_txid());
        state.submitted.push(tx.clone());
        Ok(())
    }
}
