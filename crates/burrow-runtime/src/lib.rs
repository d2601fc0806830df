//! Container lifecycle management for the burrow runtime.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod engine;
pub mod launcher;
pub mod settings;
pub mod state;
