//! Domain types, the transfer process state machine and the storage ports.

pub mod lease;
pub mod ports;
pub mod process;
pub mod query;
pub mod transition;
