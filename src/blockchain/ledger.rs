// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain connection interface.
//!
//! Everything the caches need from the ledger goes through [`LedgerClient`]:
//! point reads of identity and datalog state, per-block scans, and signed
//! record and launch submission. [`super::EvmLedgerClient`] talks JSON-RPC;
//! [`super::MemoryLedger`] keeps the whole ledger in process.

use std::future::Future;

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;

use super::types::{ContentRef, IdentityHandle, LedgerRecord, TransferEvent, TxHash};
use crate::error::ConnectionError;

/// Read and write access to the ledger.
pub trait LedgerClient: Send + Sync + 'static {
    /// Height of the newest block.
    fn head(&self) -> impl Future<Output = Result<u64, ConnectionError>> + Send;

    /// Topic to account bindings of an identity, or `None` if the handle
    /// is not registered.
    fn identity_roles(
        &self,
        handle: IdentityHandle,
    ) -> impl Future<Output = Result<Option<Vec<(B256, Address)>>, ConnectionError>> + Send;

    /// Most recent datalog record of `account`, if any.
    fn latest_record(
        &self,
        account: Address,
    ) -> impl Future<Output = Result<Option<LedgerRecord>, ConnectionError>> + Send;

    /// All records of `account` with a sequence number above `after`
    /// (all records when `after` is `None`), in sequence order.
    fn records_after(
        &self,
        account: Address,
        after: Option<u64>,
    ) -> impl Future<Output = Result<Vec<LedgerRecord>, ConnectionError>> + Send;

    /// Records appended by `account` in the block at `height`.
    fn block_records(
        &self,
        height: u64,
        account: Address,
    ) -> impl Future<Output = Result<Vec<LedgerRecord>, ConnectionError>> + Send;

    /// Token transfers carried by the block at `height`.
    fn block_transfers(
        &self,
        height: u64,
    ) -> impl Future<Output = Result<Vec<TransferEvent>, ConnectionError>> + Send;

    /// Append a record signed by `signer`. Resolves once the submission
    /// endpoint accepts the transaction, not on finality.
    fn submit_record(
        &self,
        signer: &PrivateKeySigner,
        content: &ContentRef,
    ) -> impl Future<Output = Result<TxHash, ConnectionError>> + Send;

    /// Send a start (`on`) or stop command to the device account `target`,
    /// signed by `signer`. Same acceptance semantics as `submit_record`.
    fn submit_launch(
        &self,
        signer: &PrivateKeySigner,
        target: Address,
        on: bool,
    ) -> impl Future<Output = Result<TxHash, ConnectionError>> + Send;
}
