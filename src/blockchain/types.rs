// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger types shared by the chain adapters and the caches built on them.

use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::ContentError;

/// Handle of a device identity (digital twin) in the on-chain registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityHandle(pub u64);

impl fmt::Display for IdentityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "twin#{}", self.0)
    }
}

/// Address of externally stored content (an IPFS CID in production).
///
/// Non-empty and ASCII alphanumeric only, since it is spliced into fetch URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentRef(String);

impl ContentRef {
    pub fn new(raw: impl Into<String>) -> Result<Self, ContentError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ContentError::InvalidReference(raw));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentRef {
    type Err = ContentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContentRef {
    type Error = ContentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentRef> for String {
    fn from(value: ContentRef) -> Self {
        value.0
    }
}

/// An immutable datalog entry as recorded on the ledger.
///
/// Records of one account are totally ordered by `sequence`, which the
/// ledger assigns starting at 0 without gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    /// Account that appended the record
    pub account: Address,
    /// Per-account sequence number
    pub sequence: u64,
    /// Ledger timestamp (seconds since epoch)
    pub timestamp: u64,
    /// Raw payload; usually a content reference
    pub payload: String,
}

impl LedgerRecord {
    /// Interpret the payload as a content reference.
    pub fn content_ref(&self) -> Result<ContentRef, ContentError> {
        ContentRef::new(self.payload.as_str())
    }
}

/// A token transfer observed in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    /// Amount in the token's smallest unit
    pub amount: U256,
    /// Height of the block that carried the transfer
    pub block: u64,
}

/// A start/stop command addressed to another device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchCommand {
    pub sender: Address,
    pub target: Address,
    /// `true` starts the target, `false` stops it
    pub on: bool,
}

/// Hash of a transaction accepted by the submission endpoint.
pub type TxHash = String;

/// Format a raw token amount with the specified number of decimals.
pub fn format_amount(amount: U256, decimals: u8) -> String {
    if amount.is_zero() {
        return "0".to_string();
    }

    let divisor = U256::from(10u64).pow(U256::from(decimals));
    let whole = amount / divisor;
    let remainder = amount % divisor;

    if remainder.is_zero() {
        whole.to_string()
    } else {
        let decimal_str = format!("{:0>width$}", remainder, width = decimals as usize);
        let trimmed = decimal_str.trim_end_matches('0');
        if trimmed.is_empty() {
            whole.to_string()
        } else {
            format!("{}.{}", whole, &trimmed[..trimmed.len().min(6)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        // 1 XRT-like token with 12 decimals
        let one = U256::from(1_000_000_000_000u64);
        assert_eq!(format_amount(one, 12), "1");

        let half = U256::from(500_000_000_000u64);
        assert_eq!(format_amount(half, 12), "0.5");

        // Truncated to 6 decimals
        let complex = U256::from(1_234_567_890_000_000_000u64);
        assert_eq!(format_amount(complex, 18), "1.234567");

        assert_eq!(format_amount(U256::ZERO, 18), "0");
        assert_eq!(format_amount(U256::from(1001u64), 0), "1001");

        // Largest decimals the config accepts
        let one_at_max = U256::from(10u64).pow(U256::from(77u64));
        assert_eq!(format_amount(one_at_max, 77), "1");
    }

    #[test]
    fn content_ref_accepts_cids() {
        let cid = ContentRef::new("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").unwrap();
        assert_eq!(cid.as_str(), "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG");

        let padded = ContentRef::new("  bafybeigdyrzt5  ").unwrap();
        assert_eq!(padded.as_str(), "bafybeigdyrzt5");
    }

    #[test]
    fn content_ref_rejects_garbage() {
        assert!(ContentRef::new("").is_err());
        assert!(ContentRef::new("   ").is_err());
        assert!(ContentRef::new("../etc/passwd").is_err());
        assert!(ContentRef::new("Qm123&arg=evil").is_err());
    }

    #[test]
    fn record_payload_as_content_ref() {
        let record = LedgerRecord {
            account: Address::repeat_byte(1),
            sequence: 3,
            timestamp: 0,
            payload: "not a hash!".to_string(),
        };
        assert!(matches!(
            record.content_ref(),
            Err(ContentError::InvalidReference(_))
        ));
    }

    #[test]
    fn identity_handle_display() {
        assert_eq!(IdentityHandle(7).to_string(), "twin#7");
    }
}
