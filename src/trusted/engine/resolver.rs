use std::collections::HashSet;

use bitcoin::{OutPoint, Script};

use crate::trusted::chain::api::ChainQuery;
use crate::trusted::domain::request::{ResolvedCoin, TransactionRecord};

/// Coins locked by exactly `script` among `records`.
///
/// Records with fewer than `min_confirmations` are skipped. Every matching
/// output is its own candidate, in (record, output index) order; the same
/// outpoint reported twice is only returned once.
pub fn matching_coins(
    script: &Script,
    records: &[TransactionRecord],
    min_confirmations: u32,
) -> Vec<ResolvedCoin> {
    let mut seen = HashSet::new();
    let mut coins = Vec::new();

    for record in records {
        if record.confirmations < min_confirmations {
            continue;
        }

        let txid = record.transaction.compute_txid();
        for (vout, output) in record.transaction.output.iter().enumerate() {
            if output.script_pubkey.as_script() != script {
                continue;
            }
            let outpoint = OutPoint::new(txid, vout as u32);
            if seen.insert(outpoint) {
                coins.push(ResolvedCoin {
                    outpoint,
                    value: output.value,
                    script: output.script_pubkey.clone(),
                });
            }
        }
    }

    coins
}

/// Asks `chain` for everything touching `script` and returns the coins it locks.
///
/// A failed query yields no coins; the caller retries on its next poll.
pub fn resolve<C: ChainQuery + ?Sized>(
    chain: &C,
    script: &Script,
    min_confirmations: u32,
) -> Vec<ResolvedCoin> {
    match chain.transactions_touching(script) {
        Ok(records) => {
            let coins = matching_coins(script, &records, min_confirmations);
            log::debug!(
                "[RESOLVER] {} records, {} coins for {}",
                records.len(),
                coins.len(),
                script
            );
            coins
        }
        Err(e) => {
            log::warn!("[RESOLVER] query for {} failed, retrying next poll: {}", script, e);
            Vec::new()
        }
    }
}
