use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use bitcoin::{Network, OutPoint, Transaction};

use crate::error::{BroadcastError, RebindError};
use crate::trusted::chain::api::{ChainQuery, Transmitter};
use crate::trusted::domain::registry::{validate_request, BroadcastRecord, BroadcastRegistry, RequestId, RequestState};
use crate::trusted::domain::request::{CycleId, ResolvedCoin, TransactionType, TrustedBroadcastRequest};
use crate::trusted::engine::{gate, rebinder, resolver};
use crate::trusted::keys::KeyStore;

/// Coins are only bound once they have this many confirmations, unless configured otherwise.
pub const DEFAULT_MIN_CONFIRMATIONS: u32 = 1;

/// A coin that will never produce a valid transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    pub request: RequestId,
    pub cycle: CycleId,
    pub transaction_type: TransactionType,
    pub outpoint: OutPoint,
    pub error: RebindError,
}

/// Schedules pre-signed transactions whose previous coin is only known by script.
///
/// This component acts as the **Imperative Shell** around the engine:
/// 1. Registers requests and asks the chain to watch their scripts.
/// 2. On every poll, walks the registry with one height snapshot, resolves
///    coins, rebinds templates and hands the results to the transmitter.
/// 3. Keeps per-coin markers so nothing is transmitted twice.
///
/// The polling cadence belongs to the caller. All methods take `&self`; the
/// registry is serialized by a mutex and concurrent polls are refused.
pub struct TrustedBroadcastService<C, T, K> {
    chain: C,
    transmitter: T,
    keys: K,
    network: Network,
    min_confirmations: u32,

    registry: Mutex<BroadcastRegistry>,

    /// Held for the whole body of `try_broadcast_all`.
    poll_guard: Mutex<()>,

    /// Height observed by the last poll, used for state reporting.
    last_height: AtomicU32,
}

impl<C, T, K> TrustedBroadcastService<C, T, K>
where
    C: ChainQuery,
    T: Transmitter,
    K: KeyStore,
{
    pub fn new(chain: C, transmitter: T, keys: K, network: Network) -> Self {
        Self {
            chain,
            transmitter,
            keys,
            network,
            min_confirmations: DEFAULT_MIN_CONFIRMATIONS,
            registry: Mutex::new(BroadcastRegistry::new(network)),
            poll_guard: Mutex::new(()),
            last_height: AtomicU32::new(0),
        }
    }

    /// Confirmations a coin needs before it is bound. `0` accepts mempool coins.
    pub fn with_min_confirmations(mut self, min_confirmations: u32) -> Self {
        self.min_confirmations = min_confirmations;
        self
    }

    fn registry(&self) -> MutexGuard<'_, BroadcastRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, id: RequestId, f: impl FnOnce(&mut BroadcastRecord)) {
        if let Some(record) = self.registry().get_mut(id) {
            f(record);
        }
    }

    /// Registers `request` and starts watching its script.
    ///
    /// Nothing is registered if the request is invalid or the watch call fails.
    pub fn broadcast(
        &self,
        cycle: CycleId,
        transaction_type: TransactionType,
        request: TrustedBroadcastRequest,
    ) -> Result<RequestId, BroadcastError> {
        validate_request(&request, self.network)?;

        self.chain
            .watch(&request.watched_script)
            .map_err(BroadcastError::Watch)?;

        let min_height = request.min_broadcast_height;
        let id = self.registry().register(cycle, transaction_type, request)?;
        log::info!(
            "[SERVICE] registered {} {} for cycle {} (broadcast at height {})",
            id,
            transaction_type,
            cycle,
            min_height
        );
        Ok(id)
    }

    /// One poll over every registered request.
    ///
    /// Returns the transactions accepted by the transmitter during this poll,
    /// in discovery order. Failures local to one request or coin are logged and
    /// never abort the poll.
    pub fn try_broadcast_all(&self) -> Vec<Transaction> {
        let _guard = match self.poll_guard.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(p)) => p.into_inner(),
            Err(TryLockError::WouldBlock) => {
                log::warn!("[SERVICE] poll already in flight, skipping");
                return Vec::new();
            }
        };

        let height = match self.chain.current_height() {
            Ok(h) => h,
            Err(e) => {
                log::warn!("[SERVICE] cannot read chain height, skipping poll: {}", e);
                return Vec::new();
            }
        };
        self.last_height.store(height, Ordering::SeqCst);

        // Snapshot under the lock, do the I/O without it.
        let eligible: Vec<(RequestId, Arc<TrustedBroadcastRequest>)> = self
            .registry()
            .pending()
            .filter(|(_, r)| gate::eligible(r.request(), height))
            .map(|(id, r)| (id, r.request().clone()))
            .collect();

        log::debug!("[SERVICE] poll at height {}: {} eligible", height, eligible.len());

        let mut broadcasted = Vec::new();
        for (id, request) in eligible {
            let coins = resolver::resolve(&self.chain, &request.watched_script, self.min_confirmations);
            for coin in coins {
                if let Some(tx) = self.process_coin(id, &request, &coin) {
                    broadcasted.push(tx);
                }
            }
        }

        if !broadcasted.is_empty() {
            log::info!(
                "[SERVICE] poll at height {} broadcast {} transactions",
                height,
                broadcasted.len()
            );
        }
        broadcasted
    }

    fn process_coin(
        &self,
        id: RequestId,
        request: &TrustedBroadcastRequest,
        coin: &ResolvedCoin,
    ) -> Option<Transaction> {
        let outpoint = coin.outpoint;

        let cached = {
            let registry = self.registry();
            let record = registry.get(id)?;
            if record.is_settled(&outpoint) {
                return None;
            }
            record.rebound(&outpoint).cloned()
        };

        let tx = match cached {
            Some(tx) => {
                log::debug!("[SERVICE] {} retrying rebound tx for {}", id, outpoint);
                tx
            }
            None => match rebinder::rebind(&request.template, coin, &self.keys) {
                Ok(tx) => {
                    self.update(id, |r| r.mark_resolved(outpoint, tx.clone()));
                    tx
                }
                Err(e) if e.is_permanent() => {
                    log::error!(
                        "[SERVICE] {} coin {} can never be spent, needs operator attention: {}",
                        id,
                        outpoint,
                        e
                    );
                    self.update(id, |r| r.flag_anomaly(outpoint, e));
                    return None;
                }
                Err(e) => {
                    log::warn!("[SERVICE] {} rebind of {} failed, retrying next poll: {}", id, outpoint, e);
                    return None;
                }
            },
        };

        let txid = tx.compute_txid();
        match self.transmitter.submit(&tx) {
            Ok(()) => {
                self.update(id, |r| r.mark_transmitted(outpoint));
                log::info!(
                    "[SERVICE] {} transmitted {} spending {} ({})",
                    id,
                    txid,
                    outpoint,
                    hex::encode(bitcoin::consensus::serialize(&tx))
                );
                Some(tx)
            }
            Err(e) => {
                log::warn!("[SERVICE] {} transmission of {} failed, retrying next poll: {}", id, txid, e);
                None
            }
        }
    }

    /// State of a request as of the last poll's height.
    pub fn state(&self, id: RequestId) -> Option<RequestState> {
        let height = self.last_height.load(Ordering::SeqCst);
        self.registry().get(id).map(|r| r.state(height))
    }

    /// Every coin flagged as permanently unspendable, for operator attention.
    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.registry()
            .pending()
            .flat_map(|(id, r)| {
                r.anomalies().map(move |(outpoint, error)| Anomaly {
                    request: id,
                    cycle: r.cycle,
                    transaction_type: r.transaction_type,
                    outpoint: *outpoint,
                    error: error.clone(),
                })
            })
            .collect()
    }

    /// Requests registered for `cycle` and `transaction_type`.
    pub fn find(&self, cycle: CycleId, transaction_type: TransactionType) -> Vec<RequestId> {
        self.registry().find(cycle, transaction_type).collect()
    }

    /// All registered requests with their tags, in registration order.
    pub fn requests(&self) -> Vec<(CycleId, TransactionType, Arc<TrustedBroadcastRequest>)> {
        self.registry()
            .pending()
            .map(|(_, r)| (r.cycle, r.transaction_type, r.request().clone()))
            .collect()
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn transmitter(&self) -> &T {
        &self.transmitter
    }

    pub fn keys(&self) -> &K {
        &self.keys
    }
}
