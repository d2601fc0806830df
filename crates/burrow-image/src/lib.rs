//! # burrow-image
//!
//! Image and layer management for the burrow runtime.
//!
//! Handles:
//! - **Hashing**: SHA-256 content verification of blobs.
//! - **Layers**: extraction and packing of gzip tar layer blobs.
//! - **Storage**: the content-addressed store of kept blobs and extracted layers.
//! - **Catalog**: the local index of images and their layer parent links.
//! - **Stack**: layer-order reconstruction from parent links.
//! - **Remote**: the registry transport and its Docker Registry v2 client.
//! - **Docker**: download, search, package, add, reset, delete, commit, and push.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod catalog;
pub mod docker;
pub mod hash;
pub mod layer;
pub mod manifest;
pub mod reference;
pub mod remote;
pub mod stack;
pub mod storage;
