//! # burrow-rpc
//!
//! Per-host remote execution service. Callers send newline-delimited JSON
//! requests (`exec`, `query`, `kill`, `status`) over TCP; the server spawns
//! each command detached, tracks it in a task table, and enforces its
//! timeout from a dedicated watcher independent of the caller connection.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod client;
pub mod protocol;
pub mod server;
pub mod task;
