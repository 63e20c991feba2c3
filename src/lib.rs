//! Trusted broadcasting of pre-signed transactions whose previous coin is only
//! known by script.
//!
//! Requests are registered once with [`TrustedBroadcastService::broadcast`];
//! an external driver then calls [`TrustedBroadcastService::try_broadcast_all`]
//! periodically. Each poll binds every eligible template to the coins that
//! confirmed under its watched script and hands the results to a
//! [`Transmitter`].

pub mod error;
pub mod persistence;
pub mod trusted;

pub use error::{BroadcastError, ChainError, RebindError};
pub use persistence::{RequestStore, StoredRequest};
pub use trusted::chain::{ChainQuery, ElectrumChain, MockChain, Transmitter};
pub use trusted::domain::{
    BroadcastRegistry, CycleId, RequestId, RequestState, ResolvedCoin, SpendPath,
    TransactionRecord, TransactionTemplate, TransactionType, TrustedBroadcastRequest,
};
pub use trusted::keys::{InMemoryKeyStore, KeyStore};
pub use trusted::runtime::{Anomaly, PollDriver, TrustedBroadcastService};
