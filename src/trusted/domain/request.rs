use std::fmt;

use bitcoin::{Amount, OutPoint, PublicKey, ScriptBuf, Transaction};
use serde::{Deserialize, Serialize};

/// Tumbler cycle a request belongs to.
pub type CycleId = u32;

/// Role of the transaction inside a tumbler cycle.
///
/// Opaque to the scheduler; only used for bookkeeping and lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    TumblerEscape,
    TumblerRedeem,
    TumblerCashout,
    ClientEscape,
    ClientRedeem,
    ClientOffer,
    ClientOfferRedeem,
    ClientFulfill,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How input 0 of a template is unlocked once its coin is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpendPath {
    /// `scriptSig = <sig> <pubkey>`
    P2pkh,
    /// `witness = [<sig>, <pubkey>]`
    P2wpkh,
    /// `witness = [<sig>, <witness_script>]`
    P2wsh { witness_script: ScriptBuf },
}

impl SpendPath {
    /// The output script a coin spendable through this path must carry.
    ///
    /// Returns `None` when `signer` cannot be used on this path
    /// (uncompressed keys are not allowed in segwit).
    pub fn locking_script(&self, signer: &PublicKey) -> Option<ScriptBuf> {
        match self {
            SpendPath::P2pkh => Some(ScriptBuf::new_p2pkh(&signer.pubkey_hash())),
            SpendPath::P2wpkh => signer
                .wpubkey_hash()
                .ok()
                .map(|h| ScriptBuf::new_p2wpkh(&h)),
            SpendPath::P2wsh { witness_script } => {
                Some(ScriptBuf::new_p2wsh(&witness_script.wscript_hash()))
            }
        }
    }
}

/// A transaction whose input 0 still points to a placeholder outpoint.
///
/// Everything except input 0's outpoint and unlocking data is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionTemplate {
    pub transaction: Transaction,
    /// Key that signs input 0, resolved through a [`KeyStore`](crate::trusted::keys::KeyStore).
    pub signer: PublicKey,
    pub spend: SpendPath,
    /// Minimum fee the rebound transaction has to pay.
    pub min_fee: Amount,
}

impl TransactionTemplate {
    /// Sum of all template outputs, `None` on overflow.
    pub fn output_value(&self) -> Option<Amount> {
        self.transaction
            .output
            .iter()
            .try_fold(Amount::ZERO, |acc, o| acc.checked_add(o.value))
    }

    /// Value a coin must lock for this template to be spendable.
    ///
    /// `None` when outputs plus fee do not fit in an [`Amount`].
    pub fn required_value(&self) -> Option<Amount> {
        self.output_value()?.checked_add(self.min_fee)
    }
}

/// A pre-signed transaction waiting for the coin it spends to show up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedBroadcastRequest {
    /// Script of the coin this request waits for.
    pub watched_script: ScriptBuf,
    pub template: TransactionTemplate,
    /// Height at or above which the final transaction may be broadcast.
    pub min_broadcast_height: u32,
}

impl TrustedBroadcastRequest {
    pub fn new(
        watched_script: ScriptBuf,
        template: TransactionTemplate,
        min_broadcast_height: u32,
    ) -> Self {
        Self {
            watched_script,
            template,
            min_broadcast_height,
        }
    }
}

/// A coin found under a watched script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedCoin {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub script: ScriptBuf,
}

/// A transaction as reported by the chain, with its confirmation count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub transaction: Transaction,
    pub confirmations: u32,
}

impl TransactionRecord {
    pub fn new(transaction: Transaction, confirmations: u32) -> Self {
        Self {
            transaction,
            confirmations,
        }
    }
}
