// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # New-block feed
//!
//! Background task that follows the chain head and emits every new block
//! height, in increasing order, into an `mpsc` channel.
//!
//! ## Strategy
//!
//! HTTP JSON-RPC has no push subscription, so the feed polls `head()` every
//! `poll_interval`. Each poll emits all heights between the last emitted one
//! and the new head, so blocks produced while the node was unreachable are
//! still delivered once it comes back.
//!
//! ## Failures
//!
//! A failed poll is retried with exponential backoff (capped at
//! [`MAX_BACKOFF`]). The first successful poll after a failure emits
//! [`HeadEvent::Resumed`] before any block, so consumers can re-scan state
//! that may have changed while they were blind.
//!
//! ## Shutdown
//!
//! Cancelling the token stops the task and drops the sender, closing the
//! channel for the consumer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ledger::LedgerClient;

/// Default interval between head polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound for the retry delay after repeated failures.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

const CHANNEL_CAPACITY: usize = 64;

/// Notification produced by the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadEvent {
    /// A block at this height is available.
    Block(u64),
    /// The connection recovered after one or more failed polls.
    Resumed,
}

/// Polling follower of the chain head.
pub struct HeadFeed<C> {
    client: Arc<C>,
    poll_interval: Duration,
    last_emitted: Option<u64>,
}

impl<C: LedgerClient> HeadFeed<C> {
    /// Follow blocks produced after the current head.
    pub fn new(client: Arc<C>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
            last_emitted: None,
        }
    }

    /// Start emitting from `height + 1` instead of the current head.
    pub fn starting_after(mut self, height: u64) -> Self {
        self.last_emitted = Some(height);
        self
    }

    /// Spawn the feed as a background task.
    pub fn spawn(self, shutdown: CancellationToken) -> (mpsc::Receiver<HeadEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let task = tokio::spawn(self.run(tx, shutdown));
        (rx, task)
    }

    /// Run the feed until the token is cancelled or the receiver is dropped.
    pub async fn run(mut self, tx: mpsc::Sender<HeadEvent>, shutdown: CancellationToken) {
        debug!(
            interval_ms = self.poll_interval.as_millis() as u64,
            "Head feed starting"
        );

        let mut failures: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let polled = tokio::select! {
                polled = self.client.head() => polled,
                _ = shutdown.cancelled() => break,
            };

            match polled {
                Ok(head) => {
                    if failures > 0 {
                        info!(failures, head, "Chain connection restored");
                        failures = 0;
                        if !emit(&tx, HeadEvent::Resumed, &shutdown).await {
                            break;
                        }
                    }

                    let from = match self.last_emitted {
                        Some(last) => last + 1,
                        None => {
                            self.last_emitted = Some(head);
                            head + 1
                        }
                    };

                    let mut closed = false;
                    for height in from..=head {
                        if !emit(&tx, HeadEvent::Block(height), &shutdown).await {
                            closed = true;
                            break;
                        }
                        self.last_emitted = Some(height);
                    }
                    if closed {
                        break;
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(error = %e, failures, "Head poll failed, will retry");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff(self.poll_interval, failures)) => {},
                _ = shutdown.cancelled() => break,
            }
        }

        debug!("Head feed stopped");
    }
}

/// Send one event; `false` once the feed should stop.
async fn emit(
    tx: &mpsc::Sender<HeadEvent>,
    event: HeadEvent,
    shutdown: &CancellationToken,
) -> bool {
    tokio::select! {
        sent = tx.send(event) => sent.is_ok(),
        _ = shutdown.cancelled() => false,
    }
}

/// Delay before the next poll after `failures` consecutive failures.
pub(crate) fn backoff(poll_interval: Duration, failures: u32) -> Duration {
    let factor = 1u32 << failures.min(5);
    poll_interval.saturating_mul(factor).min(MAX_BACKOFF.max(poll_interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::MemoryLedger;

    const FAST: Duration = Duration::from_millis(5);

    async fn next(rx: &mut mpsc::Receiver<HeadEvent>) -> HeadEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("feed stalled")
            .expect("feed closed")
    }

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff(base, 0), base);
        assert_eq!(backoff(base, 1), Duration::from_secs(4));
        assert_eq!(backoff(base, 3), Duration::from_secs(16));
        assert_eq!(backoff(base, 10), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn emits_new_blocks_in_order() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.mine_empty_block(); // height 1, before the feed starts

        let shutdown = CancellationToken::new();
        let (mut rx, task) = HeadFeed::new(ledger.clone(), FAST).spawn(shutdown.clone());

        // Give the feed a chance to observe the starting head.
        tokio::time::sleep(Duration::from_millis(30)).await;
        ledger.mine_empty_block();
        ledger.mine_empty_block();
        ledger.mine_empty_block();

        assert_eq!(next(&mut rx).await, HeadEvent::Block(2));
        assert_eq!(next(&mut rx).await, HeadEvent::Block(3));
        assert_eq!(next(&mut rx).await, HeadEvent::Block(4));

        shutdown.cancel();
        task.await.unwrap();
        assert!(rx.recv().await.is_none(), "channel closes on shutdown");
    }

    #[tokio::test]
    async fn delivers_blocks_missed_during_outage() {
        let ledger = Arc::new(MemoryLedger::new());
        let shutdown = CancellationToken::new();
        let (mut rx, task) = HeadFeed::new(ledger.clone(), FAST)
            .starting_after(0)
            .spawn(shutdown.clone());

        ledger.mine_empty_block();
        assert_eq!(next(&mut rx).await, HeadEvent::Block(1));

        ledger.fail_next_head_polls(2);
        ledger.mine_empty_block();
        ledger.mine_empty_block();

        assert_eq!(next(&mut rx).await, HeadEvent::Resumed);
        assert_eq!(next(&mut rx).await, HeadEvent::Block(2));
        assert_eq!(next(&mut rx).await, HeadEvent::Block(3));

        shutdown.cancel();
        task.await.unwrap();
    }
}
