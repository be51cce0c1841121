//! Domain model: banks, accounts, ledger entries, queued intents and the ports
//! through which the application reaches storage and the message queue.

pub mod account;
pub mod bank;
pub mod intent;
pub mod ports;
pub mod transaction;
