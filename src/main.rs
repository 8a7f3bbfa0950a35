// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::sync::Arc;

use device_ledger_cache::blockchain::{format_amount, EvmLedgerClient};
use device_ledger_cache::config::DaemonConfig;
use device_ledger_cache::content::IpfsStore;
use device_ledger_cache::error::{ConnectionError, ContentError, SetupError};
use device_ledger_cache::{logging, AccessListCache, ActionRecorder, IncomeWatcher};
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
enum DaemonError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Content(#[from] ContentError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match DaemonConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init(config.log_format);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Device ledger cache failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: DaemonConfig) -> Result<(), DaemonError> {
    info!(
        identity = %config.identity,
        rpc_url = %config.chain.rpc_url,
        ipfs_api = %config.content.api_url,
        mirror = config.content.pinata.is_some(),
        "Device ledger cache starting"
    );

    let client = Arc::new(EvmLedgerClient::new(&config.chain)?);
    let store = Arc::new(IpfsStore::new(&config.content)?);

    let acl = AccessListCache::start(
        client.clone(),
        store.clone(),
        config.identity,
        &config.acl_role,
        config.chain.poll_interval,
    )
    .await?;

    let income = IncomeWatcher::new(
        client.clone(),
        config.identity,
        &config.device_role,
        config.income_threshold,
    )
    .await?
    .with_poll_interval(config.chain.poll_interval)
    .with_decimals(config.income_decimals)
    .spawn();

    let recorder = match &config.device_credential {
        Some(credential) => Some(
            ActionRecorder::new(
                client.clone(),
                store.clone(),
                config.identity,
                &config.device_role,
                credential.load_signer()?,
            )
            .await?,
        ),
        None => {
            warn!("No device credential configured, action logging disabled");
            None
        }
    };

    info!(
        acl_account = %acl.account(),
        acl_entries = acl.snapshot().len(),
        "Watching for allow-list updates and income"
    );

    loop {
        tokio::select! {
            waited = income.wait(None) => {
                if let Err(e) = waited {
                    warn!(error = %e, "Income watcher stopped");
                    break;
                }
                let Some(payment) = income.take() else {
                    continue;
                };
                let amount = format_amount(payment.amount, config.income_decimals);
                info!(
                    from = %payment.source,
                    amount = %amount,
                    block = payment.block,
                    payer_allowed = acl.is_allowed(&payment.source.to_string()),
                    "Payment received"
                );

                if let Some(recorder) = &recorder {
                    let description = format!("Received {amount} from {}", payment.source);
                    tokio::select! {
                        logged = recorder.log_action(&description, "received") => {
                            if let Err(e) = logged {
                                warn!(error = %e, "Failed to log payment");
                            }
                        }
                        _ = tokio::signal::ctrl_c() => {
                            info!("Shutdown signal received while logging payment");
                            break;
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    income.shutdown().await;
    acl.shutdown().await;
    info!("Device ledger cache stopped");
    Ok(())
}
