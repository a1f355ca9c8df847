//! Application layer: the idempotent saga engine and the services built on it.
//!
//! `PaymentEngine` is the entry point. Every mutating operation resolves an
//! idempotency key through `IdempotencyStore` and is then driven phase by
//! phase by `PhaseExecutor`, one serializable transaction per phase.

pub mod accounts;
pub mod audit;
pub mod database;
pub mod engine;
pub mod executor;
pub mod idempotency;
pub mod payments;
pub mod phase;
pub mod transfers;
