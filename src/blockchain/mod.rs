// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger integration.
//!
//! This module provides:
//! - The [`LedgerClient`] interface used by every cache
//! - An EVM JSON-RPC client and an in-memory ledger implementing it
//! - The new-block feed the watchers consume
//! - Device credential loading

pub mod client;
pub mod contracts;
pub mod heads;
pub mod ledger;
pub mod memory;
pub mod signing;
pub mod types;

pub use client::EvmLedgerClient;
pub use heads::{HeadEvent, HeadFeed};
pub use ledger::LedgerClient;
pub use memory::MemoryLedger;
pub use types::*;
