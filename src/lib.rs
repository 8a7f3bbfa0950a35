// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device Ledger Cache - chain-synchronized device state
//!
//! This crate keeps a device's authorization and audit state in sync with a
//! public ledger without re-reading chain history on every check.
//!
//! ## Modules
//!
//! - `blockchain` - Ledger client interface, EVM adapter, new-block feed
//! - `content` - Content-addressed document storage (IPFS)
//! - `identity` - Device identity and role resolution
//! - `watcher` - Per-account datalog follower
//! - `acl` - Cached allow-list
//! - `action_log` - Signed action records
//! - `income` - Incoming payment signal

pub mod acl;
pub mod action_log;
pub mod blockchain;
pub mod config;
pub mod content;
pub mod error;
pub mod identity;
pub mod income;
pub mod logging;
pub mod watcher;

pub use acl::{AccessList, AccessListCache};
pub use action_log::{ActionEntry, ActionReceipt, ActionRecorder};
pub use identity::{DeviceIdentity, IdentityResolver};
pub use income::{Income, IncomeHandle, IncomeSignal, IncomeWatcher};
pub use watcher::{RecordHandler, RecordWatcher, WatcherHandle, WatcherState, WatcherStatus};
