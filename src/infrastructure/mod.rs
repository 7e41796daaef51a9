//! Adapters for the domain ports.

pub mod clock;
pub mod sql;
