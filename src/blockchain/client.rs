// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM JSON-RPC implementation of [`LedgerClient`].

use alloy::{
    network::{Ethereum, EthereumWallet},
    primitives::{Address, B256, U256},
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::types::Filter,
    signers::local::PrivateKeySigner,
    sol_types::SolEvent,
};

use super::contracts::{IDatalog, IDigitalTwin, ILaunch, IERC20};
use super::ledger::LedgerClient;
use super::types::{ContentRef, IdentityHandle, LedgerRecord, TransferEvent, TxHash};
use crate::config::ChainConfig;
use crate::error::ConnectionError;

/// HTTP provider type (with all fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// Ledger client backed by an EVM node.
pub struct EvmLedgerClient {
    rpc_url: url::Url,
    provider: HttpProvider,
    identity_registry: Address,
    datalog: Address,
    income_token: Address,
    launch: Option<Address>,
}

impl EvmLedgerClient {
    /// Create a client for the configured node and contracts.
    ///
    /// No request is made here; the first RPC call happens on use.
    pub fn new(config: &ChainConfig) -> Result<Self, ConnectionError> {
        let rpc_url: url::Url = config
            .rpc_url
            .parse()
            .map_err(|e: url::ParseError| ConnectionError::InvalidRpcUrl(e.to_string()))?;

        let provider = ProviderBuilder::new().connect_http(rpc_url.clone());

        Ok(Self {
            rpc_url,
            provider,
            identity_registry: config.identity_registry,
            datalog: config.datalog,
            income_token: config.income_token,
            launch: config.launch,
        })
    }

    fn signing_provider(&self, signer: &PrivateKeySigner) -> impl Provider + Clone {
        ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer.clone()))
            .connect_http(self.rpc_url.clone())
    }

    fn datalog(&self) -> IDatalog::IDatalogInstance<HttpProvider> {
        IDatalog::new(self.datalog, self.provider.clone())
    }

    async fn record_at(
        &self,
        datalog: &IDatalog::IDatalogInstance<HttpProvider>,
        account: Address,
        index: u64,
    ) -> Result<LedgerRecord, ConnectionError> {
        let entry = datalog
            .recordAt(account, index)
            .call()
            .await
            .map_err(|e| ConnectionError::Contract(e.to_string()))?;

        Ok(LedgerRecord {
            account,
            sequence: index,
            timestamp: entry.timestamp,
            payload: entry.payload,
        })
    }

    async fn record_count(
        &self,
        datalog: &IDatalog::IDatalogInstance<HttpProvider>,
        account: Address,
    ) -> Result<u64, ConnectionError> {
        datalog
            .recordCount(account)
            .call()
            .await
            .map_err(|e| ConnectionError::Contract(e.to_string()))
    }
}

impl LedgerClient for EvmLedgerClient {
    async fn head(&self) -> Result<u64, ConnectionError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ConnectionError::Rpc(e.to_string()))
    }

    async fn identity_roles(
        &self,
        handle: IdentityHandle,
    ) -> Result<Option<Vec<(B256, Address)>>, ConnectionError> {
        let registry = IDigitalTwin::new(self.identity_registry, self.provider.clone());
        let id = U256::from(handle.0);

        let total: U256 = registry
            .total()
            .call()
            .await
            .map_err(|e| ConnectionError::Contract(e.to_string()))?;
        if id >= total {
            return Ok(None);
        }

        let bindings = registry
            .getTopics(id)
            .call()
            .await
            .map_err(|e| ConnectionError::Contract(e.to_string()))?;

        if bindings.topics.len() != bindings.accounts.len() {
            return Err(ConnectionError::Decode(format!(
                "identity {handle} has {} topics but {} accounts",
                bindings.topics.len(),
                bindings.accounts.len()
            )));
        }

        Ok(Some(
            bindings.topics.into_iter().zip(bindings.accounts).collect(),
        ))
    }

    async fn latest_record(
        &self,
        account: Address,
    ) -> Result<Option<LedgerRecord>, ConnectionError> {
        let datalog = self.datalog();
        let count = self.record_count(&datalog, account).await?;
        if count == 0 {
            return Ok(None);
        }
        self.record_at(&datalog, account, count - 1).await.map(Some)
    }

    async fn records_after(
        &self,
        account: Address,
        after: Option<u64>,
    ) -> Result<Vec<LedgerRecord>, ConnectionError> {
        let datalog = self.datalog();
        let count = self.record_count(&datalog, account).await?;
        let start = after.map_or(0, |seq| seq.saturating_add(1));

        let mut records = Vec::new();
        for index in start..count {
            records.push(self.record_at(&datalog, account, index).await?);
        }
        Ok(records)
    }

    async fn block_records(
        &self,
        height: u64,
        account: Address,
    ) -> Result<Vec<LedgerRecord>, ConnectionError> {
        let filter = Filter::new()
            .address(self.datalog)
            .event_signature(IDatalog::NewRecord::SIGNATURE_HASH)
            .topic1(account.into_word())
            .from_block(height)
            .to_block(height);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ConnectionError::Rpc(e.to_string()))?;

        let mut records = Vec::with_capacity(logs.len());
        for log in &logs {
            let decoded = log
                .log_decode::<IDatalog::NewRecord>()
                .map_err(|e| ConnectionError::Decode(e.to_string()))?;
            let event = decoded.inner.data;

            if event.account != account {
                continue;
            }

            records.push(LedgerRecord {
                account: event.account,
                sequence: event.index,
                timestamp: event.timestamp,
                payload: event.payload,
            });
        }

        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }

    async fn block_transfers(&self, height: u64) -> Result<Vec<TransferEvent>, ConnectionError> {
        let filter = Filter::new()
            .address(self.income_token)
            .event_signature(IERC20::Transfer::SIGNATURE_HASH)
            .from_block(height)
            .to_block(height);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| ConnectionError::Rpc(e.to_string()))?;

        let mut transfers = Vec::with_capacity(logs.len());
        for log in &logs {
            let block = log.block_number.unwrap_or(height);
            let decoded = match log.log_decode::<IERC20::Transfer>() {
                Ok(decoded) => decoded,
                Err(e) => {
                    // Non-standard tokens sometimes emit an unindexed variant
                    tracing::debug!(height, error = %e, "Skipping undecodable transfer log");
                    continue;
                }
            };
            let event = decoded.inner.data;

            transfers.push(TransferEvent {
                from: event.from,
                to: event.to,
                amount: event.value,
                block,
            });
        }

        Ok(transfers)
    }

    async fn submit_record(
        &self,
        signer: &PrivateKeySigner,
        content: &ContentRef,
    ) -> Result<TxHash, ConnectionError> {
        let datalog = IDatalog::new(self.datalog, self.signing_provider(signer));

        let pending = datalog
            .record(content.to_string())
            .send()
            .await
            .map_err(|e| ConnectionError::Rpc(format!("Failed to send: {e}")))?;

        Ok(format!("{:#x}", pending.tx_hash()))
    }

    async fn submit_launch(
        &self,
        signer: &PrivateKeySigner,
        target: Address,
        on: bool,
    ) -> Result<TxHash, ConnectionError> {
        let address = self.launch.ok_or(ConnectionError::NotConfigured("launch"))?;
        let launch = ILaunch::new(address, self.signing_provider(signer));

        let pending = launch
            .launch(target, on)
            .send()
            .await
            .map_err(|e| ConnectionError::Rpc(format!("Failed to send: {e}")))?;

        Ok(format!("{:#x}", pending.tx_hash()))
    }
}
