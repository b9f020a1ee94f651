use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    sync::mpsc,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::chain::{ChainBlock, ChainReader};

/*
    Scanners

    Timer-gated fetch loops, one per direction. Each tick walks consecutive
    windows of up to SCAN_WINDOW blocks, pushing fetched blocks onto the
    direction's bounded channel and advancing the in-memory cursor at
    hand-off. A failed window fetch leaves the cursor untouched so the same
    window is retried on the next tick; the bounded channel is the only
    backpressure mechanism.
*/

/// Width of one batched fetch window.
pub const SCAN_WINDOW: u64 = 5;

/// Consecutive windows of at most [`SCAN_WINDOW`] blocks covering
/// `(last_indexed, head]`, in ascending order. Empty when there is nothing
/// above the cursor.
pub(crate) fn forward_windows(last_indexed: u64, head: u64) -> Vec<(u64, u64)> {
    let mut windows = Vec::new();
    let mut start = last_indexed.saturating_add(1);
    while start <= head {
        let end = start.saturating_add(SCAN_WINDOW - 1).min(head);
        windows.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    windows
}

/// Bounds of the next window strictly below `cursor`, clamped at genesis.
/// `None` once the cursor is at 0.
pub(crate) fn backward_window(cursor: u64) -> Option<(u64, u64)> {
    if cursor == 0 {
        return None;
    }
    let high = cursor - 1;
    let low = high.saturating_sub(SCAN_WINDOW - 1);
    Some((low, high))
}

/// Chases the chain head: polls the head on every tick and fetches everything
/// between the forward cursor and the head in ascending windows. Never
/// terminates while the pipeline is live.
pub struct ForwardScanner<C> {
    chain: Arc<C>,
    out: mpsc::Sender<ChainBlock>,
    cursor: u64,
    interval: Duration,
    ingested: Arc<AtomicU64>,
    sample_trigger: mpsc::Sender<u64>,
    min_blocks_per_sample: u64,
    cancel: CancellationToken,
}

impl<C: ChainReader> ForwardScanner<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<C>,
        out: mpsc::Sender<ChainBlock>,
        cursor: u64,
        interval: Duration,
        ingested: Arc<AtomicU64>,
        sample_trigger: mpsc::Sender<u64>,
        min_blocks_per_sample: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            chain,
            out,
            cursor,
            interval,
            ingested,
            sample_trigger,
            min_blocks_per_sample,
            cancel,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(cursor = self.cursor, "starting forward scan");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let head = match self.chain.block_number().await {
                        Ok(head) => head,
                        Err(err) => {
                            error!(%err, "fetch chain head");
                            continue;
                        }
                    };

                    if !self.scan_to(head).await {
                        return;
                    }
                }
            }
        }
    }

    /// Walk windows from the cursor up to `head`. Returns `false` when the
    /// downstream channel is gone (pipeline shutting down).
    async fn scan_to(&mut self, head: u64) -> bool {
        for (start, end) in forward_windows(self.cursor, head) {
            let numbers: Vec<u64> = (start..=end).collect();

            let blocks = match self.chain.blocks(&numbers).await {
                Ok(blocks) => blocks,
                Err(err) => {
                    error!(start, end, %err, "fetch blocks");
                    // cursor untouched, the same window is retried next tick
                    return true;
                }
            };

            for block in blocks {
                let number = block.header.inner.number;

                if self.out.send(block).await.is_err() {
                    return false;
                }

                // advanced at hand-off, not at write; a restart re-derives
                // the cursor from what was actually persisted
                self.cursor = number;

                let ingested = self.ingested.fetch_add(1, Ordering::Relaxed) + 1;
                if ingested >= self.min_blocks_per_sample {
                    let _ = self.sample_trigger.try_send(self.cursor);
                }
            }
        }
        true
    }
}

/// Walks from the initial head down to genesis in descending windows, then
/// terminates. The one finite loop in the pipeline.
pub struct BackwardScanner<C> {
    chain: Arc<C>,
    out: mpsc::Sender<ChainBlock>,
    cursor: u64,
    interval: Duration,
    cancel: CancellationToken,
}

impl<C: ChainReader> BackwardScanner<C> {
    pub fn new(
        chain: Arc<C>,
        out: mpsc::Sender<ChainBlock>,
        cursor: u64,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            chain,
            out,
            cursor,
            interval,
            cancel,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(cursor = self.cursor, "starting backward scan");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if self.cursor == 0 {
                        info!("backward scan complete");
                        return;
                    }

                    if self.scan_down().await {
                        return;
                    }
                }
            }
        }
    }

    /// Walk descending windows until genesis. Returns `true` once the scan is
    /// finished (genesis pushed, or the pipeline is shutting down), `false`
    /// to retry the current window on the next tick after a fetch failure.
    async fn scan_down(&mut self) -> bool {
        while let Some((low, high)) = backward_window(self.cursor) {
            let numbers: Vec<u64> = (low..=high).rev().collect();

            let blocks = match self.chain.blocks(&numbers).await {
                Ok(blocks) => blocks,
                Err(err) => {
                    error!(start = high, end = low, %err, "fetch blocks");
                    return false;
                }
            };

            for block in blocks {
                let number = block.header.inner.number;

                if self.out.send(block).await.is_err() {
                    return true;
                }

                self.cursor = number;

                if number == 0 {
                    info!("backward scan reached genesis");
                    return true;
                }
            }
        }
        true
    }
}
