// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Content Store
//!
//! Ledger records only carry a [`ContentRef`]; the documents they point to
//! (allow-lists, action entries) live in a content-addressed store.
//!
//! - [`IpfsStore`] - IPFS HTTP API, with an optional Pinata mirror
//! - [`MemoryContentStore`] - in-process store

pub mod ipfs;
pub mod memory;

use std::future::Future;

pub use ipfs::IpfsStore;
pub use memory::MemoryContentStore;

use crate::blockchain::ContentRef;
use crate::error::ContentError;

/// Content-addressed blob storage.
pub trait ContentStore: Send + Sync + 'static {
    /// Store `bytes` and return their reference.
    fn publish(
        &self,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<ContentRef, ContentError>> + Send;

    /// Retrieve the bytes behind `reference`.
    fn fetch(
        &self,
        reference: &ContentRef,
    ) -> impl Future<Output = Result<Vec<u8>, ContentError>> + Send;
}
