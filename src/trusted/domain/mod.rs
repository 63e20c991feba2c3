pub mod registry;
pub mod request;

pub use registry::{BroadcastRecord, BroadcastRegistry, RequestId, RequestState};
pub use request::{
    CycleId, ResolvedCoin, SpendPath, TransactionRecord, TransactionTemplate, TransactionType,
    TrustedBroadcastRequest,
};
