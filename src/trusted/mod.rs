pub mod chain;
pub mod domain;
pub mod engine;
pub mod keys;
pub mod runtime;
