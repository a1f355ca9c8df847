//! Domain types and the ports the application layer depends on.

pub mod account;
pub mod audit;
pub mod bank;
pub mod idempotency;
pub mod payment;
pub mod ports;
pub mod recipient;
pub mod transfer;
