pub mod driver;
pub mod service;

#[cfg(test)]
mod tests;

pub use driver::PollDriver;
pub use service::{Anomaly, TrustedBroadcastService, DEFAULT_MIN_CONFIRMATIONS};
