// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process ledger.
//!
//! Implements [`LedgerClient`] over plain collections so the caches can run
//! without a node: offline demos, and the unit tests of every component.
//! Each mutation mines exactly one block.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use alloy::primitives::{Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;

use super::ledger::LedgerClient;
use super::types::{ContentRef, IdentityHandle, LaunchCommand, LedgerRecord, TransferEvent, TxHash};
use crate::error::ConnectionError;

#[derive(Default)]
struct Block {
    records: Vec<LedgerRecord>,
    transfers: Vec<TransferEvent>,
}

#[derive(Default)]
struct LedgerState {
    height: u64,
    identities: HashMap<IdentityHandle, Vec<(B256, Address)>>,
    datalogs: HashMap<Address, Vec<LedgerRecord>>,
    blocks: BTreeMap<u64, Block>,
    failing_head_polls: u32,
    failing_scans: u32,
    stalled_scans: bool,
    reject_submissions: bool,
    submissions: u64,
    launches: Vec<LaunchCommand>,
}

impl LedgerState {
    fn mine(&mut self, block: Block) -> u64 {
        self.height += 1;
        self.blocks.insert(self.height, block);
        self.height
    }

    fn append(&mut self, account: Address, payload: String) -> LedgerRecord {
        let log = self.datalogs.entry(account).or_default();
        let record = LedgerRecord {
            account,
            sequence: log.len() as u64,
            timestamp: self.height + 1,
            payload,
        };
        log.push(record.clone());
        record
    }

    fn take_scan_failure(&mut self) -> Result<(), ConnectionError> {
        if self.failing_scans > 0 {
            self.failing_scans -= 1;
            return Err(ConnectionError::Rpc("simulated block scan failure".into()));
        }
        Ok(())
    }
}

/// Ledger kept entirely in memory.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register (or replace) an identity with its topic bindings.
    pub fn register_identity(&self, handle: IdentityHandle, bindings: Vec<(B256, Address)>) {
        self.state().identities.insert(handle, bindings);
    }

    /// Append a record for `account` in a new block.
    pub fn append_record(&self, account: Address, payload: impl Into<String>) -> LedgerRecord {
        let mut state = self.state();
        let record = state.append(account, payload.into());
        state.mine(Block {
            records: vec![record.clone()],
            transfers: Vec::new(),
        });
        record
    }

    /// Record a token transfer in a new block; returns its height.
    pub fn transfer(&self, from: Address, to: Address, amount: U256) -> u64 {
        let mut state = self.state();
        let block = state.height + 1;
        state.mine(Block {
            records: Vec::new(),
            transfers: vec![TransferEvent {
                from,
                to,
                amount,
                block,
            }],
        })
    }

    /// Produce a block with no records or transfers.
    pub fn mine_empty_block(&self) -> u64 {
        self.state().mine(Block::default())
    }

    /// Height of the newest block.
    pub fn height(&self) -> u64 {
        self.state().height
    }

    /// Make the next `count` head polls fail with a connection error.
    pub fn fail_next_head_polls(&self, count: u32) {
        self.state().failing_head_polls = count;
    }

    /// Make the next `count` block scans fail with a connection error.
    pub fn fail_next_block_scans(&self, count: u32) {
        self.state().failing_scans = count;
    }

    /// Make block scans hang until called with `false`, like an RPC whose
    /// response never arrives.
    pub fn stall_block_scans(&self, stall: bool) {
        self.state().stalled_scans = stall;
    }

    async fn scan_gate(&self) {
        let stalled = self.state().stalled_scans;
        if stalled {
            std::future::pending::<()>().await;
        }
    }

    /// Reject every submitted transaction until called with `false`.
    pub fn reject_submissions(&self, reject: bool) {
        self.state().reject_submissions = reject;
    }

    /// Number of accepted submissions.
    pub fn submissions(&self) -> u64 {
        self.state().submissions
    }

    /// Accepted launch commands, oldest first.
    pub fn launches(&self) -> Vec<LaunchCommand> {
        self.state().launches.clone()
    }

    /// All records of `account`.
    pub fn records_of(&self, account: Address) -> Vec<LedgerRecord> {
        self.state()
            .datalogs
            .get(&account)
            .cloned()
            .unwrap_or_default()
    }
}

impl LedgerClient for MemoryLedger {
    async fn head(&self) -> Result<u64, ConnectionError> {
        let mut state = self.state();
        if state.failing_head_polls > 0 {
            state.failing_head_polls -= 1;
            return Err(ConnectionError::Rpc("simulated connection loss".into()));
        }
        Ok(state.height)
    }

    async fn identity_roles(
        &self,
        handle: IdentityHandle,
    ) -> Result<Option<Vec<(B256, Address)>>, ConnectionError> {
        Ok(self.state().identities.get(&handle).cloned())
    }

    async fn latest_record(
        &self,
        account: Address,
    ) -> Result<Option<LedgerRecord>, ConnectionError> {
        Ok(self
            .state()
            .datalogs
            .get(&account)
            .and_then(|log| log.last().cloned()))
    }

    async fn records_after(
        &self,
        account: Address,
        after: Option<u64>,
    ) -> Result<Vec<LedgerRecord>, ConnectionError> {
        let state = self.state();
        let Some(log) = state.datalogs.get(&account) else {
            return Ok(Vec::new());
        };
        Ok(log
            .iter()
            .filter(|r| after.map_or(true, |seq| r.sequence > seq))
            .cloned()
            .collect())
    }

    async fn block_records(
        &self,
        height: u64,
        account: Address,
    ) -> Result<Vec<LedgerRecord>, ConnectionError> {
        self.scan_gate().await;
        let mut state = self.state();
        state.take_scan_failure()?;
        Ok(state
            .blocks
            .get(&height)
            .map(|b| {
                b.records
                    .iter()
                    .filter(|r| r.account == account)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn block_transfers(&self, height: u64) -> Result<Vec<TransferEvent>, ConnectionError> {
        self.scan_gate().await;
        let mut state = self.state();
        state.take_scan_failure()?;
        Ok(state
            .blocks
            .get(&height)
            .map(|b| b.transfers.clone())
            .unwrap_or_default())
    }

    async fn submit_record(
        &self,
        signer: &PrivateKeySigner,
        content: &ContentRef,
    ) -> Result<TxHash, ConnectionError> {
        let mut state = self.state();
        if state.reject_submissions {
            return Err(ConnectionError::Rpc("transaction rejected".into()));
        }
        let record = state.append(signer.address(), content.to_string());
        let height = state.mine(Block {
            records: vec![record],
            transfers: Vec::new(),
        });
        state.submissions += 1;
        Ok(format!("0x{height:064x}"))
    }

    async fn submit_launch(
        &self,
        signer: &PrivateKeySigner,
        target: Address,
        on: bool,
    ) -> Result<TxHash, ConnectionError> {
        let mut state = self.state();
        if state.reject_submissions {
            return Err(ConnectionError::Rpc("transaction rejected".into()));
        }
        state.launches.push(LaunchCommand {
            sender: signer.address(),
            target,
            on,
        });
        let height = state.mine(Block::default());
        Ok(format!("0x{height:064x}"))
    }
}
