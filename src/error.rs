//! Error types for trusted broadcasting

use bitcoin::{Amount, OutPoint, PublicKey};
use thiserror::Error;

/// Failures reported by a chain backend or transmitter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The backend could not answer this time (transport error, malformed reply).
    #[error("chain backend unavailable: {0}")]
    Transient(String),

    /// The network layer refused a transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),
}

/// Errors returned synchronously from `broadcast`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    /// The request can never be scheduled.
    #[error("invalid broadcast request: {0}")]
    InvalidRequest(String),

    /// The chain refused to start watching the script; nothing was registered.
    #[error("failed to watch script: {0}")]
    Watch(#[source] ChainError),
}

/// Failures binding a template to a concrete coin.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RebindError {
    /// Insufficient coin value
    #[error("coin {outpoint} holds {available}, template needs {required}")]
    InsufficientValue {
        outpoint: OutPoint,
        required: Amount,
        available: Amount,
    },

    /// The signing key is not loaded in the key store.
    #[error("no secret key available for {0}")]
    MissingKey(PublicKey),

    /// The coin's script is not what the template's spend path unlocks.
    #[error("coin {0} is not locked to the template's spend path")]
    ScriptMismatch(OutPoint),

    /// Outputs plus fee overflow the amount range.
    #[error("template outputs plus fee overflow")]
    ValueOverflow,

    /// The template has no input to bind.
    #[error("template has no input")]
    NoInput,

    /// Sighash or unlocking data could not be produced.
    #[error("signing failed: {0}")]
    Signing(String),
}

impl RebindError {
    /// Whether retrying the same coin can never succeed.
    ///
    /// A coin's value and script do not change, so only a missing key may
    /// resolve itself later.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, RebindError::MissingKey(_))
    }
}
