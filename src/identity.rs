// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Device identity resolution.
//!
//! A device identity (digital twin) is a registry entry that binds role
//! topics to ledger accounts. Topics are role names right-padded with zero
//! bytes to 32 bytes.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, B256};
use tracing::{debug, info};

use crate::blockchain::{IdentityHandle, LedgerClient};
use crate::error::ResolutionError;

/// Encode a role name as a registry topic.
pub fn role_topic(role: &str) -> Result<B256, ResolutionError> {
    let bytes = role.as_bytes();
    if bytes.is_empty() || bytes.len() > 32 || bytes.contains(&0) {
        return Err(ResolutionError::InvalidRole(role.to_string()));
    }
    let mut topic = [0u8; 32];
    topic[..bytes.len()].copy_from_slice(bytes);
    Ok(B256::from(topic))
}

/// Decode a registry topic back into a role name, if it is one.
pub fn topic_role(topic: &B256) -> Option<String> {
    let end = topic.iter().position(|b| *b == 0).unwrap_or(32);
    if end == 0 || topic[end..].iter().any(|b| *b != 0) {
        return None;
    }
    std::str::from_utf8(&topic[..end]).ok().map(str::to_string)
}

/// A resolved identity. Immutable; resolve again for fresh bindings.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    handle: IdentityHandle,
    bindings: HashMap<B256, Address>,
}

impl DeviceIdentity {
    pub fn new(handle: IdentityHandle, bindings: impl IntoIterator<Item = (B256, Address)>) -> Self {
        Self {
            handle,
            bindings: bindings.into_iter().collect(),
        }
    }

    pub fn handle(&self) -> IdentityHandle {
        self.handle
    }

    /// Account bound to `role`.
    pub fn account(&self, role: &str) -> Result<Address, ResolutionError> {
        let topic = role_topic(role)?;
        self.bindings
            .get(&topic)
            .copied()
            .ok_or_else(|| ResolutionError::RoleNotFound {
                handle: self.handle,
                role: role.to_string(),
            })
    }

    /// Role names with their accounts; topics that are not valid names are skipped.
    pub fn roles(&self) -> Vec<(String, Address)> {
        let mut roles: Vec<_> = self
            .bindings
            .iter()
            .filter_map(|(topic, account)| topic_role(topic).map(|name| (name, *account)))
            .collect();
        roles.sort();
        roles
    }
}

/// Looks identities up in the on-chain registry.
pub struct IdentityResolver<C> {
    client: Arc<C>,
}

impl<C: LedgerClient> IdentityResolver<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// Fetch every binding of `handle`.
    pub async fn resolve(&self, handle: IdentityHandle) -> Result<DeviceIdentity, ResolutionError> {
        let bindings = self
            .client
            .identity_roles(handle)
            .await?
            .ok_or(ResolutionError::IdentityNotFound(handle))?;

        debug!(identity = %handle, bindings = bindings.len(), "Fetched identity bindings");
        Ok(DeviceIdentity::new(handle, bindings))
    }

    /// Account bound to `role` in identity `handle`.
    pub async fn resolve_role(
        &self,
        handle: IdentityHandle,
        role: &str,
    ) -> Result<Address, ResolutionError> {
        // Reject malformed names before the network round-trip
        role_topic(role)?;
        let account = self.resolve(handle).await?.account(role)?;
        info!(identity = %handle, role, %account, "Resolved role account");
        Ok(account)
    }
}
