// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process content store.

use std::collections::HashMap;
use std::sync::Mutex;

use super::ContentStore;
use crate::blockchain::ContentRef;
use crate::error::ContentError;

#[derive(Default)]
struct StoreState {
    blobs: HashMap<ContentRef, Vec<u8>>,
    next_id: u64,
    fail_publish: bool,
}

/// Content store kept in a `HashMap`. References are sequential
/// (`mem0000000000000000`, `mem0000000000000001`, ...).
#[derive(Default)]
pub struct MemoryContentStore {
    state: Mutex<StoreState>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every publish fail until called with `false`.
    pub fn fail_publish(&self, fail: bool) {
        self.state().fail_publish = fail;
    }

    /// Bytes stored under `reference`, if any.
    pub fn get(&self, reference: &ContentRef) -> Option<Vec<u8>> {
        self.state().blobs.get(reference).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentStore for MemoryContentStore {
    async fn publish(&self, bytes: Vec<u8>) -> Result<ContentRef, ContentError> {
        let mut state = self.state();
        if state.fail_publish {
            return Err(ContentError::Publish("content store unavailable".into()));
        }
        let reference = ContentRef::new(format!("mem{:016x}", state.next_id))?;
        state.next_id += 1;
        state.blobs.insert(reference.clone(), bytes);
        Ok(reference)
    }

    async fn fetch(&self, reference: &ContentRef) -> Result<Vec<u8>, ContentError> {
        self.get(reference)
            .ok_or_else(|| ContentError::Fetch(format!("{reference} not found")))
    }
}
