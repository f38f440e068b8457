//! CLI command implementations.

pub mod backup;
pub mod schedule;
pub mod services;
pub mod storage;
