//! Application layer orchestrating the lease-guarded write cycle.
//!
//! This module defines the `TransferProcessManager`, the entry point for
//! moving a transfer process from one state to the next. It composes the
//! storage ports and never talks to the database directly.

pub mod manager;
