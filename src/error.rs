// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Error taxonomy shared by the ledger-backed components.
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | [`ResolutionError`] | identity lookups | fatal to the component being built |
//! | [`ConnectionError`] | chain RPC | retried inside watcher loops |
//! | [`ContentError`] | content fetch/parse | logged, last good state kept |
//! | [`SubmissionError`] | `log_action` | returned to the caller, never retried |

use alloy::primitives::Address;

use crate::blockchain::IdentityHandle;

/// Errors that can occur while talking to the chain.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Failed to decode chain data: {0}")]
    Decode(String),

    #[error("No {0} contract configured")]
    NotConfigured(&'static str),
}

/// Identity registry lookups.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("Identity {0} not found in registry")]
    IdentityNotFound(IdentityHandle),

    #[error("Identity {handle} has no account bound to role `{role}`")]
    RoleNotFound { handle: IdentityHandle, role: String },

    #[error("Invalid role name `{0}`")]
    InvalidRole(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Content store and document errors.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Invalid content reference: {0:?}")]
    InvalidReference(String),

    #[error("Failed to fetch content: {0}")]
    Fetch(String),

    #[error("Failed to publish content: {0}")]
    Publish(String),

    #[error("Failed to parse document: {0}")]
    Parse(String),

    #[error("Failed to serialize document: {0}")]
    Serialize(String),
}

/// Failures of an action write. Surfaced as-is; the recorder never retries.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Failed to publish action entry: {0}")]
    Publish(#[source] ContentError),

    #[error("Ledger rejected the record: {0}")]
    Rejected(String),

    #[error("Failed to serialize action entry: {0}")]
    Serialize(String),
}

/// Errors that abort the construction of a component.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Credential account {actual} does not match device account {expected}")]
    IdentityMismatch { expected: Address, actual: Address },

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),
}

/// Outcome of a wait that ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("Timed out waiting for income")]
    Timeout,

    #[error("Income watcher shut down")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_messages_name_the_identity() {
        let err = ResolutionError::RoleNotFound {
            handle: IdentityHandle(4),
            role: "acl".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Identity twin#4 has no account bound to role `acl`"
        );

        let err = ResolutionError::IdentityNotFound(IdentityHandle(9));
        assert_eq!(err.to_string(), "Identity twin#9 not found in registry");
    }

    #[test]
    fn connection_errors_pass_through_setup() {
        let err: SetupError = ConnectionError::Rpc("timeout".to_string()).into();
        assert_eq!(err.to_string(), "RPC error: timeout");

        let err: SetupError = ResolutionError::from(ConnectionError::Rpc("down".into())).into();
        assert!(matches!(
            err,
            SetupError::Resolution(ResolutionError::Connection(_))
        ));
    }
}
