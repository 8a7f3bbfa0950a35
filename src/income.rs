// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Income Watcher
//!
//! Background task that scans every new block for token transfers to the
//! device account and raises an [`IncomeSignal`] when one exceeds the
//! configured threshold.
//!
//! ## Signal semantics
//!
//! The signal is level-triggered and holds one value: the most recent
//! qualifying transfer since the last clear. Callers wait for it, read it,
//! then clear it (or do both at once with [`IncomeSignal::take`]). A second
//! qualifying transfer that arrives before the first is cleared overwrites
//! it; the overwritten transfer is only visible in the logs.
//!
//! ## Failures
//!
//! A failed block scan is retried with backoff before moving to the next
//! block, so transfers are not skipped across connection loss. Shutdown
//! wakes every pending wait with [`WaitError::Cancelled`].

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::blockchain::heads::{backoff, DEFAULT_POLL_INTERVAL};
use crate::blockchain::{format_amount, HeadEvent, HeadFeed, IdentityHandle, LedgerClient, TransferEvent};
use crate::error::{ConnectionError, SetupError, WaitError};
use crate::identity::IdentityResolver;

const DEFAULT_DECIMALS: u8 = 18;

/// A qualifying transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Income {
    pub source: Address,
    pub amount: U256,
    pub block: u64,
}

/// Single-slot, manually reset income notification.
#[derive(Debug)]
pub struct IncomeSignal {
    slot: watch::Sender<Option<Income>>,
    closed: CancellationToken,
}

impl Default for IncomeSignal {
    fn default() -> Self {
        Self {
            slot: watch::Sender::new(None),
            closed: CancellationToken::new(),
        }
    }
}

impl IncomeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The pending income, without clearing it.
    pub fn current(&self) -> Option<Income> {
        *self.slot.borrow()
    }

    /// Disarm the signal.
    pub fn clear(&self) {
        self.slot.send_replace(None);
    }

    /// Read and disarm in one step.
    pub fn take(&self) -> Option<Income> {
        self.slot.send_replace(None)
    }

    /// Wait until the signal is armed and return its value. Does not clear.
    ///
    /// Returns immediately if already armed, `Timeout` once `timeout`
    /// elapses, and `Cancelled` once the watcher shuts down.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<Income, WaitError> {
        let mut slot = self.slot.subscribe();
        let armed = async {
            tokio::select! {
                biased;
                income = slot.wait_for(Option::is_some) => {
                    income.ok().and_then(|value| *value).ok_or(WaitError::Cancelled)
                }
                _ = self.closed.cancelled() => Err(WaitError::Cancelled),
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, armed)
                .await
                .map_err(|_| WaitError::Timeout)?,
            None => armed.await,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn arm(&self, income: Income) -> Option<Income> {
        self.slot.send_replace(Some(income))
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Follower of transfers into one account.
pub struct IncomeWatcher<C> {
    client: Arc<C>,
    target: Address,
    threshold: U256,
    decimals: u8,
    poll_interval: Duration,
    last_block: Option<u64>,
    signal: Arc<IncomeSignal>,
}

impl<C: LedgerClient> IncomeWatcher<C> {
    /// Watch the `device_role` account of `identity`.
    pub async fn new(
        client: Arc<C>,
        identity: IdentityHandle,
        device_role: &str,
        threshold: U256,
    ) -> Result<Self, SetupError> {
        let target = IdentityResolver::new(client.clone())
            .resolve_role(identity, device_role)
            .await?;
        Ok(Self::for_account(client, target, threshold))
    }

    pub fn for_account(client: Arc<C>, target: Address, threshold: U256) -> Self {
        Self {
            client,
            target,
            threshold,
            decimals: DEFAULT_DECIMALS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            last_block: None,
            signal: Arc::new(IncomeSignal::new()),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Token decimals, used to format amounts in logs.
    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = decimals;
        self
    }

    /// Treat every block up to `height` as already scanned.
    pub fn starting_after(mut self, height: u64) -> Self {
        self.last_block = Some(height);
        self
    }

    pub fn target(&self) -> Address {
        self.target
    }

    pub fn threshold(&self) -> U256 {
        self.threshold
    }

    pub fn signal(&self) -> Arc<IncomeSignal> {
        self.signal.clone()
    }

    /// Destination is the target and the amount is strictly above the threshold.
    pub fn qualifies(&self, transfer: &TransferEvent) -> bool {
        transfer.to == self.target && transfer.amount > self.threshold
    }

    /// Scan the block at `height`, arming the signal for each qualifying
    /// transfer. Heights at or below the last scanned block are ignored.
    /// Returns the income left in the signal by this block, if any.
    pub async fn process_block(&mut self, height: u64) -> Result<Option<Income>, ConnectionError> {
        if self.last_block.is_some_and(|last| height <= last) {
            return Ok(None);
        }

        let transfers = self.client.block_transfers(height).await?;
        let mut latest = None;

        for transfer in transfers.iter().filter(|t| self.qualifies(t)) {
            let income = Income {
                source: transfer.from,
                amount: transfer.amount,
                block: height,
            };

            if let Some(previous) = self.signal.arm(income) {
                warn!(
                    from = %previous.source,
                    amount = %format_amount(previous.amount, self.decimals),
                    block = previous.block,
                    "Unconsumed income overwritten"
                );
            }
            info!(
                from = %income.source,
                amount = %format_amount(income.amount, self.decimals),
                block = height,
                "Income received"
            );
            latest = Some(income);
        }

        self.last_block = Some(height);
        Ok(latest)
    }

    /// Spawn the watcher as a background task.
    pub fn spawn(self) -> IncomeHandle {
        let shutdown = CancellationToken::new();
        let signal = self.signal.clone();
        let task = tokio::spawn(self.run(shutdown.clone()));

        IncomeHandle {
            shutdown: shutdown.drop_guard(),
            task,
            signal,
        }
    }

    async fn run(mut self, shutdown: CancellationToken) {
        info!(
            target_account = %self.target,
            threshold = %format_amount(self.threshold, self.decimals),
            "Income watcher starting"
        );

        let mut feed = HeadFeed::new(self.client.clone(), self.poll_interval);
        if let Some(height) = self.last_block {
            feed = feed.starting_after(height);
        }
        let (mut events, feed_task) = feed.spawn(shutdown.child_token());

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown.cancelled() => None,
            };

            match event {
                Some(HeadEvent::Block(height)) => {
                    if !self.process_with_retry(height, &shutdown).await {
                        break;
                    }
                }
                // Missed heights follow from the feed itself
                Some(HeadEvent::Resumed) => debug!("Chain connection resumed"),
                None => break,
            }
        }

        self.signal.close();
        drop(events);
        if let Err(e) = feed_task.await {
            warn!(error = %e, "Head feed task failed");
        }
        info!(target_account = %self.target, last_block = ?self.last_block, "Income watcher stopped");
    }

    /// `false` if shutdown interrupted the retries.
    async fn process_with_retry(&mut self, height: u64, shutdown: &CancellationToken) -> bool {
        let mut failures: u32 = 0;
        loop {
            let result = tokio::select! {
                result = self.process_block(height) => result,
                _ = shutdown.cancelled() => return false,
            };
            match result {
                Ok(_) => return true,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(height, error = %e, failures, "Transfer scan failed, will retry");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff(self.poll_interval, failures)) => {},
                _ = shutdown.cancelled() => return false,
            }
        }
    }
}

/// Owner of a running income watcher. Dropping it stops the task.
pub struct IncomeHandle {
    shutdown: DropGuard,
    task: JoinHandle<()>,
    signal: Arc<IncomeSignal>,
}

impl IncomeHandle {
    pub fn signal(&self) -> Arc<IncomeSignal> {
        self.signal.clone()
    }

    pub async fn wait(&self, timeout: Option<Duration>) -> Result<Income, WaitError> {
        self.signal.wait(timeout).await
    }

    pub fn current(&self) -> Option<Income> {
        self.signal.current()
    }

    pub fn clear(&self) {
        self.signal.clear();
    }

    pub fn take(&self) -> Option<Income> {
        self.signal.take()
    }

    /// Stop the task; pending waits return `Cancelled`.
    pub async fn shutdown(self) {
        let IncomeHandle {
            shutdown,
            task,
            signal,
        } = self;
        drop(shutdown);
        signal.close();
        if let Err(e) = task.await {
            warn!(error = %e, "Income watcher task failed");
        }
    }
}
