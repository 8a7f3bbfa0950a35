// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only action log of the device.
//!
//! Each action becomes a small JSON document in the content store whose
//! reference is written to the device account's datalog, signed with the
//! device key. The same key signs launch commands to other devices.

use std::sync::Arc;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::blockchain::signing::signer_account;
use crate::blockchain::{ContentRef, IdentityHandle, LedgerClient, TxHash};
use crate::content::ContentStore;
use crate::error::{SetupError, SubmissionError};
use crate::identity::IdentityResolver;

/// `YYYY.MM.DD-HH:MM:SS`, UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y.%m.%d-%H:%M:%S";

/// One logged action, as published to the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionEntry {
    pub description: String,
    pub status: String,
    pub timestamp: String,
}

impl ActionEntry {
    /// Entry stamped with the current time.
    pub fn new(description: impl Into<String>, status: impl Into<String>) -> Self {
        Self::at(description, status, Utc::now())
    }

    pub fn at(
        description: impl Into<String>,
        status: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            description: description.into(),
            status: status.into(),
            timestamp: time.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

/// Outcome of a successful [`ActionRecorder::log_action`].
#[derive(Debug, Clone)]
pub struct ActionReceipt {
    pub entry: ActionEntry,
    pub content: ContentRef,
    pub tx_hash: TxHash,
}

/// Writes action entries to the device's datalog.
pub struct ActionRecorder<C, S> {
    client: Arc<C>,
    store: Arc<S>,
    signer: PrivateKeySigner,
    account: Address,
}

impl<C: LedgerClient, S: ContentStore> ActionRecorder<C, S> {
    /// Resolve the device account of `identity` and check that `signer`
    /// controls it.
    pub async fn new(
        client: Arc<C>,
        store: Arc<S>,
        identity: IdentityHandle,
        device_role: &str,
        signer: PrivateKeySigner,
    ) -> Result<Self, SetupError> {
        let account = IdentityResolver::new(client.clone())
            .resolve_role(identity, device_role)
            .await?;

        let actual = signer_account(&signer);
        if actual != account {
            return Err(SetupError::IdentityMismatch {
                expected: account,
                actual,
            });
        }

        info!(identity = %identity, %account, "Action recorder ready");
        Ok(Self {
            client,
            store,
            signer,
            account,
        })
    }

    pub fn account(&self) -> Address {
        self.account
    }

    /// Publish an entry for this action and append its reference to the
    /// datalog. Returns once the ledger accepts the transaction.
    ///
    /// Never retried here: a second submission would log the action twice.
    pub async fn log_action(
        &self,
        description: &str,
        status: &str,
    ) -> Result<ActionReceipt, SubmissionError> {
        self.record(ActionEntry::new(description, status)).await
    }

    /// Like [`Self::log_action`] for a pre-built entry.
    pub async fn record(&self, entry: ActionEntry) -> Result<ActionReceipt, SubmissionError> {
        let document =
            serde_json::to_vec(&entry).map_err(|e| SubmissionError::Serialize(e.to_string()))?;

        let content = self
            .store
            .publish(document)
            .await
            .map_err(SubmissionError::Publish)?;
        debug!(content = %content, "Action entry published");

        let tx_hash = self
            .client
            .submit_record(&self.signer, &content)
            .await
            .map_err(|e| SubmissionError::Rejected(e.to_string()))?;

        info!(
            account = %self.account,
            description = %entry.description,
            status = %entry.status,
            content = %content,
            tx_hash = %tx_hash,
            "Action logged"
        );

        Ok(ActionReceipt {
            entry,
            content,
            tx_hash,
        })
    }

    /// Send a start (`on`) or stop command to the device account `target`.
    /// Not retried, like [`Self::log_action`].
    pub async fn launch(&self, target: Address, on: bool) -> Result<TxHash, SubmissionError> {
        let tx_hash = self
            .client
            .submit_launch(&self.signer, target, on)
            .await
            .map_err(|e| SubmissionError::Rejected(e.to_string()))?;

        info!(account = %self.account, %target, on, tx_hash = %tx_hash, "Launch sent");
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::signing::signer_from_hex;
    use crate::blockchain::{LaunchCommand, MemoryLedger};
    use crate::content::MemoryContentStore;
    use crate::error::{ContentError, ResolutionError};
    use crate::identity::role_topic;
    use chrono::{NaiveDateTime, TimeZone};

    const DEVICE_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const OTHER_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const TWIN: IdentityHandle = IdentityHandle(9);

    fn device_signer() -> PrivateKeySigner {
        signer_from_hex(DEVICE_KEY).unwrap()
    }

    fn setup() -> (Arc<MemoryLedger>, Arc<MemoryContentStore>) {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.register_identity(
            TWIN,
            vec![(role_topic("device").unwrap(), device_signer().address())],
        );
        (ledger, Arc::new(MemoryContentStore::new()))
    }

    async fn recorder(
        ledger: &Arc<MemoryLedger>,
        store: &Arc<MemoryContentStore>,
    ) -> ActionRecorder<MemoryLedger, MemoryContentStore> {
        ActionRecorder::new(ledger.clone(), store.clone(), TWIN, "device", device_signer())
            .await
            .unwrap()
    }

    #[test]
    fn timestamp_uses_fixed_format() {
        let time = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        let entry = ActionEntry::at("door opened", "success", time);
        assert_eq!(entry.timestamp, "2024.03.07-09:05:01");
    }

    #[tokio::test]
    async fn log_action_publishes_and_appends_one_record() {
        let (ledger, store) = setup();
        let recorder = recorder(&ledger, &store).await;
        let account = recorder.account();

        let receipt = recorder.log_action("door opened", "success").await.unwrap();

        let records = ledger.records_of(account);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, receipt.content.as_str());
        assert_eq!(ledger.submissions(), 1);

        let bytes = store.get(&receipt.content).unwrap();
        let document: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let fields = document.as_object().unwrap();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields["description"], "door opened");
        assert_eq!(fields["status"], "success");

        let timestamp = fields["timestamp"].as_str().unwrap();
        assert!(NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).is_ok());
        assert_eq!(timestamp.len(), "YYYY.MM.DD-HH:MM:SS".len());
    }

    #[tokio::test]
    async fn rejects_credential_of_another_account() {
        let (ledger, store) = setup();
        let other = signer_from_hex(OTHER_KEY).unwrap();
        let other_account = other.address();

        let result = ActionRecorder::new(ledger, store, TWIN, "device", other).await;
        match result {
            Err(SetupError::IdentityMismatch { expected, actual }) => {
                assert_eq!(expected, device_signer().address());
                assert_eq!(actual, other_account);
            }
            other => panic!("expected identity mismatch, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn missing_device_role_fails_construction() {
        let (ledger, store) = setup();
        let result = ActionRecorder::new(ledger, store, TWIN, "owner", device_signer()).await;
        assert!(matches!(
            result.err(),
            Some(SetupError::Resolution(ResolutionError::RoleNotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn publish_failure_is_surfaced_without_submission() {
        let (ledger, store) = setup();
        let recorder = recorder(&ledger, &store).await;
        store.fail_publish(true);

        let err = recorder.log_action("door opened", "success").await.unwrap_err();
        assert!(matches!(err, SubmissionError::Publish(ContentError::Publish(_))));
        assert_eq!(ledger.submissions(), 0);
    }

    #[tokio::test]
    async fn rejected_submission_is_surfaced_once() {
        let (ledger, store) = setup();
        let recorder = recorder(&ledger, &store).await;
        ledger.reject_submissions(true);

        let err = recorder.log_action("door opened", "failed").await.unwrap_err();
        assert!(matches!(err, SubmissionError::Rejected(_)));
        assert_eq!(ledger.submissions(), 0);
        assert!(ledger.records_of(recorder.account()).is_empty());
    }

    #[tokio::test]
    async fn launch_is_signed_by_device_account() {
        let (ledger, store) = setup();
        let recorder = recorder(&ledger, &store).await;
        let target = Address::repeat_byte(0x5c);

        recorder.launch(target, true).await.unwrap();
        recorder.launch(target, false).await.unwrap();

        assert_eq!(
            ledger.launches(),
            vec![
                LaunchCommand {
                    sender: recorder.account(),
                    target,
                    on: true
                },
                LaunchCommand {
                    sender: recorder.account(),
                    target,
                    on: false
                },
            ]
        );
        // Launches are not datalog records
        assert!(ledger.records_of(recorder.account()).is_empty());
    }

    #[tokio::test]
    async fn rejected_launch_is_surfaced() {
        let (ledger, store) = setup();
        let recorder = recorder(&ledger, &store).await;
        ledger.reject_submissions(true);

        let err = recorder.launch(Address::repeat_byte(0x5c), true).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Rejected(_)));
        assert!(ledger.launches().is_empty());
    }
}
