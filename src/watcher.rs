// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Record Watcher
//!
//! Background task that follows new blocks and hands every datalog record
//! of one account to a [`RecordHandler`], exactly once and in sequence order.
//!
//! ## State machine
//!
//! `Initializing` → `CaughtUp` ⇄ `Processing`. Initialization sets the
//! last-seen sequence number to the newest existing record, so history that
//! predates the watcher is never replayed.
//!
//! ## Recovery
//!
//! The watcher re-reads everything after last-seen when it starts, after
//! the head feed reports a reconnect, after a failed block scan, and when a
//! block carries a record that does not directly follow last-seen. Records
//! are filtered on last-seen before delivery, so overlapping scans and
//! duplicate block notifications never re-invoke the handler.
//!
//! ## Shutdown
//!
//! Every ledger call and handler invocation is raced against the shutdown
//! token, so a stalled RPC never keeps [`WatcherHandle::shutdown`] waiting.
//! A record whose handler was interrupted is not marked consumed.
//!
//! ## Handler failures
//!
//! A handler error is logged and the record still counts as consumed.
//! Ledger records are immutable; retrying a bad one would stall the account
//! forever.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::blockchain::heads::{backoff, DEFAULT_POLL_INTERVAL};
use crate::blockchain::{HeadEvent, HeadFeed, LedgerClient, LedgerRecord};
use crate::error::{ConnectionError, ContentError};

/// Consumer of the records a [`RecordWatcher`] delivers.
pub trait RecordHandler: Send + 'static {
    fn handle(
        &mut self,
        record: &LedgerRecord,
    ) -> impl Future<Output = Result<(), ContentError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// Looking up the newest existing record.
    Initializing,
    /// Waiting for the next block.
    CaughtUp,
    /// Delivering records to the handler.
    Processing,
}

/// Snapshot of a watcher's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherStatus {
    pub state: WatcherState,
    /// Sequence number of the last consumed record; `None` while the
    /// account has no records.
    pub last_seen: Option<u64>,
}

/// Follower of one account's datalog.
pub struct RecordWatcher<C> {
    client: Arc<C>,
    account: Address,
    poll_interval: Duration,
    last_seen: Option<u64>,
    initialized: bool,
    status: watch::Sender<WatcherStatus>,
}

impl<C: LedgerClient> RecordWatcher<C> {
    pub fn new(client: Arc<C>, account: Address) -> Self {
        Self {
            client,
            account,
            poll_interval: DEFAULT_POLL_INTERVAL,
            last_seen: None,
            initialized: false,
            status: watch::Sender::new(WatcherStatus {
                state: WatcherState::Initializing,
                last_seen: None,
            }),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Skip initialization and treat `sequence` as already consumed.
    pub fn starting_after(mut self, sequence: Option<u64>) -> Self {
        self.last_seen = sequence;
        self.initialized = true;
        self.set_state(WatcherState::CaughtUp);
        self
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn last_seen(&self) -> Option<u64> {
        self.last_seen
    }

    pub fn status(&self) -> WatcherStatus {
        *self.status.borrow()
    }

    fn set_state(&self, state: WatcherState) {
        self.status.send_replace(WatcherStatus {
            state,
            last_seen: self.last_seen,
        });
    }

    fn is_new(&self, sequence: u64) -> bool {
        self.last_seen.map_or(true, |last| sequence > last)
    }

    fn next_expected(&self) -> u64 {
        self.last_seen.map_or(0, |last| last + 1)
    }

    /// Set last-seen to the newest existing record of the account.
    pub async fn initialize(&mut self) -> Result<Option<u64>, ConnectionError> {
        self.set_state(WatcherState::Initializing);
        let latest = self.client.latest_record(self.account).await?;
        self.last_seen = latest.map(|r| r.sequence);
        self.initialized = true;
        self.set_state(WatcherState::CaughtUp);

        debug!(account = %self.account, last_seen = ?self.last_seen, "Record watcher initialized");
        Ok(self.last_seen)
    }

    /// Deliver the account's records found in the block at `height`.
    /// Returns the number of records handed to `handler`.
    pub async fn process_block<H: RecordHandler>(
        &mut self,
        height: u64,
        handler: &mut H,
    ) -> Result<usize, ConnectionError> {
        let mut records: Vec<LedgerRecord> = self
            .client
            .block_records(height, self.account)
            .await?
            .into_iter()
            .filter(|r| self.is_new(r.sequence))
            .collect();

        if records.is_empty() {
            return Ok(0);
        }
        records.sort_by_key(|r| r.sequence);

        self.set_state(WatcherState::Processing);
        let contiguous = records
            .iter()
            .zip(self.next_expected()..)
            .all(|(record, expected)| record.sequence == expected);

        let result = if contiguous {
            Ok(self.deliver(records, handler).await)
        } else {
            warn!(
                account = %self.account,
                height,
                expected = self.next_expected(),
                found = records[0].sequence,
                "Sequence gap detected, re-scanning from last seen"
            );
            self.catch_up(handler).await
        };
        self.set_state(WatcherState::CaughtUp);
        result
    }

    /// Deliver every record after last-seen, regardless of block.
    pub async fn rescan<H: RecordHandler>(&mut self, handler: &mut H) -> Result<usize, ConnectionError> {
        self.set_state(WatcherState::Processing);
        let result = self.catch_up(handler).await;
        self.set_state(WatcherState::CaughtUp);
        result
    }

    async fn catch_up<H: RecordHandler>(&mut self, handler: &mut H) -> Result<usize, ConnectionError> {
        let mut records = self.client.records_after(self.account, self.last_seen).await?;
        records.sort_by_key(|r| r.sequence);
        Ok(self.deliver(records, handler).await)
    }

    async fn deliver<H: RecordHandler>(&mut self, records: Vec<LedgerRecord>, handler: &mut H) -> usize {
        let mut delivered = 0;
        for record in records {
            if !self.is_new(record.sequence) {
                continue;
            }

            if let Err(e) = handler.handle(&record).await {
                warn!(
                    account = %self.account,
                    sequence = record.sequence,
                    content = %record.payload,
                    error = %e,
                    "Record handler failed, skipping record"
                );
            }

            self.last_seen = Some(record.sequence);
            self.set_state(WatcherState::Processing);
            delivered += 1;
        }
        delivered
    }

    /// Spawn the watcher as a background task feeding `handler`.
    pub fn spawn<H: RecordHandler>(self, handler: H) -> WatcherHandle {
        let shutdown = CancellationToken::new();
        let status = self.status.subscribe();
        let task = tokio::spawn(self.run(handler, shutdown.clone()));

        WatcherHandle {
            shutdown: shutdown.drop_guard(),
            task,
            status,
        }
    }

    async fn run<H: RecordHandler>(mut self, mut handler: H, shutdown: CancellationToken) {
        info!(account = %self.account, "Record watcher starting");

        let Some(head) = self.start(&mut handler, &shutdown).await else {
            info!(account = %self.account, "Record watcher stopped before start-up completed");
            return;
        };

        let (mut events, feed) = HeadFeed::new(self.client.clone(), self.poll_interval)
            .starting_after(head)
            .spawn(shutdown.child_token());

        let mut needs_rescan = false;

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown.cancelled() => None,
            };
            let Some(event) = event else {
                break;
            };

            if event == HeadEvent::Resumed {
                needs_rescan = true;
            }

            if needs_rescan {
                let result = tokio::select! {
                    result = self.rescan(&mut handler) => result,
                    _ = shutdown.cancelled() => break,
                };
                match result {
                    Ok(delivered) => {
                        needs_rescan = false;
                        debug!(account = %self.account, delivered, "Re-scan complete");
                    }
                    Err(e) => {
                        warn!(account = %self.account, error = %e, "Re-scan failed, will retry");
                        continue;
                    }
                }
            }

            if let HeadEvent::Block(height) = event {
                let result = tokio::select! {
                    result = self.process_block(height, &mut handler) => result,
                    _ = shutdown.cancelled() => break,
                };
                if let Err(e) = result {
                    warn!(
                        account = %self.account,
                        height,
                        error = %e,
                        "Block scan failed, will re-scan from last seen"
                    );
                    needs_rescan = true;
                }
            }
        }

        drop(events);
        if let Err(e) = feed.await {
            warn!(error = %e, "Head feed task failed");
        }
        info!(account = %self.account, last_seen = ?self.last_seen, "Record watcher stopped");
    }

    /// Initialize if needed and catch up; returns the head the live feed
    /// continues from. Retries until it succeeds or `shutdown` fires, which
    /// also abandons an in-flight attempt.
    async fn start<H: RecordHandler>(
        &mut self,
        handler: &mut H,
        shutdown: &CancellationToken,
    ) -> Option<u64> {
        let mut failures: u32 = 0;
        loop {
            let result = tokio::select! {
                result = self.sync(handler) => result,
                _ = shutdown.cancelled() => return None,
            };
            match result {
                Ok(head) => return Some(head),
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(account = %self.account, error = %e, failures, "Record watcher start-up failed, will retry");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff(self.poll_interval, failures)) => {},
                _ = shutdown.cancelled() => return None,
            }
        }
    }

    async fn sync<H: RecordHandler>(&mut self, handler: &mut H) -> Result<u64, ConnectionError> {
        if !self.initialized {
            self.initialize().await?;
        }
        // Read the head first: anything at or below it is covered by the re-scan
        let head = self.client.head().await?;
        self.rescan(handler).await?;
        Ok(head)
    }
}

/// Owner of a running watcher task. Dropping it stops the task.
pub struct WatcherHandle {
    shutdown: DropGuard,
    task: JoinHandle<()>,
    status: watch::Receiver<WatcherStatus>,
}

impl WatcherHandle {
    pub fn status(&self) -> WatcherStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every status change.
    pub fn subscribe(&self) -> watch::Receiver<WatcherStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) {
        let WatcherHandle { shutdown, task, .. } = self;
        drop(shutdown);
        if let Err(e) = task.await {
            warn!(error = %e, "Record watcher task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::MemoryLedger;
    use std::sync::Mutex;

    const FAST: Duration = Duration::from_millis(5);

    #[derive(Clone, Default)]
    struct Collector {
        seen: Arc<Mutex<Vec<u64>>>,
        fail_on: Option<u64>,
    }

    impl Collector {
        fn seen(&self) -> Vec<u64> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl RecordHandler for Collector {
        async fn handle(&mut self, record: &LedgerRecord) -> Result<(), ContentError> {
            self.seen.lock().unwrap().push(record.sequence);
            if self.fail_on == Some(record.sequence) {
                return Err(ContentError::Parse("bad document".into()));
            }
            Ok(())
        }
    }

    fn account() -> Address {
        Address::repeat_byte(0xac)
    }

    fn ledger_with_history(records: usize) -> Arc<MemoryLedger> {
        let ledger = Arc::new(MemoryLedger::new());
        for i in 0..records {
            ledger.append_record(account(), format!("QmOld{i}"));
        }
        ledger
    }

    async fn wait_for_sequence(handle: &WatcherHandle, sequence: u64) {
        let mut status = handle.subscribe();
        tokio::time::timeout(
            Duration::from_secs(2),
            status.wait_for(|s| s.last_seen >= Some(sequence)),
        )
        .await
        .expect("watcher stalled")
        .expect("watcher stopped");
    }

    #[tokio::test]
    async fn initialize_skips_existing_history() {
        let ledger = ledger_with_history(2);
        let mut watcher = RecordWatcher::new(ledger.clone(), account());
        assert_eq!(watcher.status().state, WatcherState::Initializing);

        assert_eq!(watcher.initialize().await.unwrap(), Some(1));
        assert_eq!(
            watcher.status(),
            WatcherStatus {
                state: WatcherState::CaughtUp,
                last_seen: Some(1)
            }
        );

        let mut collector = Collector::default();
        assert_eq!(watcher.rescan(&mut collector).await.unwrap(), 0);
        assert!(collector.seen().is_empty());
    }

    #[tokio::test]
    async fn delivers_in_order_exactly_once() {
        let ledger = ledger_with_history(2);
        let mut watcher = RecordWatcher::new(ledger.clone(), account());
        watcher.initialize().await.unwrap();

        let other = Address::repeat_byte(0x01);
        let heights: Vec<u64> = (0..3)
            .map(|i| {
                ledger.append_record(other, "QmNoise");
                ledger.append_record(account(), format!("QmNew{i}"));
                ledger.height()
            })
            .collect();

        let mut collector = Collector::default();
        for height in &heights {
            watcher.process_block(*height, &mut collector).await.unwrap();
        }
        // Duplicate notifications
        for height in &heights {
            assert_eq!(watcher.process_block(*height, &mut collector).await.unwrap(), 0);
        }

        assert_eq!(collector.seen(), vec![2, 3, 4]);
        assert_eq!(watcher.last_seen(), Some(4));
    }

    #[tokio::test]
    async fn sequence_gap_triggers_rescan() {
        let ledger = ledger_with_history(1);
        let mut watcher = RecordWatcher::new(ledger.clone(), account());
        watcher.initialize().await.unwrap();

        ledger.append_record(account(), "QmMissed");
        let record = ledger.append_record(account(), "QmLatest");
        let height = ledger.height();
        assert_eq!(record.sequence, 2);

        let mut collector = Collector::default();
        assert_eq!(watcher.process_block(height, &mut collector).await.unwrap(), 2);
        assert_eq!(collector.seen(), vec![1, 2]);
        assert_eq!(watcher.status().state, WatcherState::CaughtUp);
    }

    #[tokio::test]
    async fn handler_failure_still_advances() {
        let ledger = ledger_with_history(0);
        let mut watcher = RecordWatcher::new(ledger.clone(), account());
        assert_eq!(watcher.initialize().await.unwrap(), None);

        ledger.append_record(account(), "QmBroken");
        ledger.append_record(account(), "QmGood");

        let mut collector = Collector {
            fail_on: Some(0),
            ..Default::default()
        };
        assert_eq!(watcher.rescan(&mut collector).await.unwrap(), 2);
        assert_eq!(collector.seen(), vec![0, 1]);
        assert_eq!(watcher.last_seen(), Some(1));
    }

    #[tokio::test]
    async fn spawned_watcher_follows_new_blocks() {
        let ledger = ledger_with_history(2);
        let mut watcher = RecordWatcher::new(ledger.clone(), account()).with_poll_interval(FAST);
        watcher.initialize().await.unwrap();

        let collector = Collector::default();
        let handle = watcher.spawn(collector.clone());

        ledger.append_record(account(), "QmA");
        ledger.append_record(account(), "QmB");
        ledger.append_record(account(), "QmC");
        wait_for_sequence(&handle, 4).await;

        assert_eq!(collector.seen(), vec![2, 3, 4]);
        assert_eq!(handle.status().last_seen, Some(4));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn recovers_from_failed_block_scan() {
        let ledger = ledger_with_history(0);
        let collector = Collector::default();
        let handle = RecordWatcher::new(ledger.clone(), account())
            .with_poll_interval(FAST)
            .starting_after(None)
            .spawn(collector.clone());

        // Let the watcher finish start-up before the scan failure is armed
        let mut status = handle.subscribe();
        tokio::time::sleep(Duration::from_millis(30)).await;
        ledger.fail_next_block_scans(1);
        ledger.append_record(account(), "QmA");
        ledger.mine_empty_block();

        tokio::time::timeout(Duration::from_secs(2), status.wait_for(|s| s.last_seen == Some(0)))
            .await
            .expect("watcher stalled")
            .expect("watcher stopped");
        assert_eq!(collector.seen(), vec![0]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_delivery() {
        let ledger = ledger_with_history(0);
        let collector = Collector::default();
        let handle = RecordWatcher::new(ledger.clone(), account())
            .with_poll_interval(FAST)
            .starting_after(None)
            .spawn(collector.clone());

        ledger.append_record(account(), "QmA");
        wait_for_sequence(&handle, 0).await;

        handle.shutdown().await;
        ledger.append_record(account(), "QmB");
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(collector.seen(), vec![0]);
    }

    #[tokio::test]
    async fn rescans_after_connection_loss() {
        let ledger = ledger_with_history(1);
        let mut watcher = RecordWatcher::new(ledger.clone(), account()).with_poll_interval(FAST);
        watcher.initialize().await.unwrap();
        let collector = Collector::default();
        let handle = watcher.spawn(collector.clone());

        ledger.append_record(account(), "QmBefore");
        wait_for_sequence(&handle, 1).await;

        // Appended while the head polls fail
        ledger.fail_next_head_polls(3);
        ledger.append_record(account(), "QmDuring0");
        ledger.append_record(account(), "QmDuring1");
        ledger.append_record(account(), "QmDuring2");
        wait_for_sequence(&handle, 4).await;

        ledger.append_record(account(), "QmAfter");
        wait_for_sequence(&handle, 5).await;

        assert_eq!(collector.seen(), vec![1, 2, 3, 4, 5]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_interrupts_stalled_block_scan() {
        let ledger = ledger_with_history(0);
        let handle = RecordWatcher::new(ledger.clone(), account())
            .with_poll_interval(FAST)
            .starting_after(None)
            .spawn(Collector::default());

        tokio::time::sleep(Duration::from_millis(30)).await;
        ledger.stall_block_scans(true);
        ledger.append_record(account(), "QmA");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());

        tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("shutdown waited on a stalled block scan");
    }
}
