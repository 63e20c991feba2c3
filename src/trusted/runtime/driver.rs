use std::sync::Arc;
use std::time::{Duration, Instant};

use bitcoin::Transaction;

use crate::trusted::chain::api::{ChainQuery, Transmitter};
use crate::trusted::keys::KeyStore;
use crate::trusted::runtime::service::TrustedBroadcastService;

/// Drives a [`TrustedBroadcastService`] from a blocking loop.
///
/// The service has no timer of its own; this polls it every `interval` and
/// logs whenever the tip moved in between.
pub struct PollDriver<C, T, K> {
    service: Arc<TrustedBroadcastService<C, T, K>>,
    interval: Duration,
    last_height: Option<u32>,

    /// Start time for logging relative timestamps.
    t0: Instant,
}

impl<C, T, K> PollDriver<C, T, K>
where
    C: ChainQuery,
    T: Transmitter,
    K: KeyStore,
{
    pub fn new(service: Arc<TrustedBroadcastService<C, T, K>>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            last_height: None,
            t0: Instant::now(),
        }
    }

    fn t(&self) -> u128 {
        self.t0.elapsed().as_millis()
    }

    /// One poll. Returns what the service broadcast.
    pub fn tick(&mut self) -> Vec<Transaction> {
        if let Ok(height) = self.service.chain().current_height() {
            if self.last_height != Some(height) {
                log::info!("[DRIVER] {:>8}ms: new tip at height {}", self.t(), height);
                self.last_height = Some(height);
            }
        }

        let broadcasted = self.service.try_broadcast_all();
        for tx in &broadcasted {
            log::info!("[DRIVER] {:>8}ms: broadcast {}", self.t(), tx.compute_txid());
        }

        for anomaly in self.service.anomalies() {
            log::trace!(
                "[DRIVER] outstanding anomaly {} {} cycle {}: {}",
                anomaly.request,
                anomaly.transaction_type,
                anomaly.cycle,
                anomaly.error
            );
        }

        broadcasted
    }

    pub fn last_height(&self) -> Option<u32> {
        self.last_height
    }

    /// The main blocking loop.
    pub fn run_forever(mut self) -> ! {
        log::info!("[DRIVER] starting, polling every {:?}", self.interval);
        loop {
            self.tick();
            std::thread::sleep(self.interval);
        }
    }
}
