//! # burrow-core
//!
//! User-space isolation primitives for the burrow runtime.
//!
//! Nothing in this crate needs privilege or kernel namespaces:
//! - **Filesystem**: an emulated union view over read-only layers and one
//!   writable layer, copy-composition of the root, and diff capture.
//! - **Shims**: the capability-shim interface answering chroot, identity,
//!   and IPC calls from preloaded libraries.
//! - **Remap**: per-container program/path substitution tables.
//! - **Syscheck**: presence and permission checks of the support bundle.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod filesystem;
pub mod remap;
pub mod shim;
pub mod syscheck;
