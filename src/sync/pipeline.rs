use std::{
    sync::{Arc, atomic::AtomicU64},
    time::Duration,
};

use alloy_primitives::Address;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    chain::ChainReader,
    error::{Error, Result},
    store::{DocumentStore, ScanDirection},
    sync::{
        Config,
        processor::BlockProcessor,
        sampler::BalanceSampler,
        scanner::{BackwardScanner, ForwardScanner},
    },
};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
const DEFAULT_MIN_BLOCKS_PER_SAMPLE: u64 = 10;
const DEFAULT_SAMPLE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/*
    Pipeline

    Owns both collaborators, derives the scan cursors from what is already
    persisted, and wires the five long-lived tasks together: forward fetch ->
    forward process and backward fetch -> backward process over one bounded
    channel each, plus the balance sampler fed by the forward scanner's
    threshold signal. `start` blocks until the root token is cancelled.
*/

pub struct Pipeline<C, S> {
    chain: Arc<C>,
    store: Arc<S>,
    config: Config,
    tracked_addresses: Vec<Address>,
}

impl<C, S> Pipeline<C, S>
where
    C: ChainReader + 'static,
    S: DocumentStore + 'static,
{
    pub fn new(config: Config, chain: Arc<C>, store: Arc<S>) -> Result<Self> {
        let tracked_addresses = config
            .tracked_addresses
            .iter()
            .map(|raw| {
                raw.parse::<Address>()
                    .map_err(|err| Error::Custom(format!("invalid tracked address {raw}: {err}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            chain,
            store,
            config,
            tracked_addresses,
        })
    }

    /// Run the pipeline until `cancel` fires. Index creation and the initial
    /// head fetch are the only fatal failures; after that the pipeline
    /// degrades by logging.
    pub async fn start(self, cancel: CancellationToken) -> Result<()> {
        self.store.create_indices().await?;

        let head = self.chain.block_number().await?;
        info!(head, "connected to chain");

        let forward_cursor = self.initial_cursor(ScanDirection::Forward, head).await?;
        let backward_cursor = self.initial_cursor(ScanDirection::Backward, head).await?;

        let poll_interval = Duration::from_secs(
            self.config
                .poll_interval_secs
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        );
        let min_blocks = self
            .config
            .min_blocks_per_sample
            .unwrap_or(DEFAULT_MIN_BLOCKS_PER_SAMPLE);
        let sample_timeout = Duration::from_secs(
            self.config
                .sample_timeout_secs
                .unwrap_or(DEFAULT_SAMPLE_TIMEOUT_SECS),
        );
        let capacity = self
            .config
            .channel_capacity
            .unwrap_or(DEFAULT_CHANNEL_CAPACITY);

        let (forward_tx, forward_rx) = mpsc::channel(capacity);
        let (backward_tx, backward_rx) = mpsc::channel(capacity);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let ingested = Arc::new(AtomicU64::new(0));

        tokio::spawn(
            ForwardScanner::new(
                self.chain.clone(),
                forward_tx,
                forward_cursor,
                poll_interval,
                ingested.clone(),
                trigger_tx,
                min_blocks,
                cancel.clone(),
            )
            .run(),
        );
        tokio::spawn(
            BlockProcessor::new(
                self.chain.clone(),
                self.store.clone(),
                ScanDirection::Forward,
                forward_rx,
                cancel.clone(),
            )
            .run(),
        );
        tokio::spawn(
            BackwardScanner::new(
                self.chain.clone(),
                backward_tx,
                backward_cursor,
                poll_interval,
                cancel.clone(),
            )
            .run(),
        );
        tokio::spawn(
            BlockProcessor::new(
                self.chain.clone(),
                self.store.clone(),
                ScanDirection::Backward,
                backward_rx,
                cancel.clone(),
            )
            .run(),
        );
        tokio::spawn(
            BalanceSampler::new(
                self.chain.clone(),
                self.store.clone(),
                self.tracked_addresses.clone(),
                ingested,
                trigger_rx,
                min_blocks,
                sample_timeout,
                cancel.clone(),
            )
            .run(),
        );

        cancel.cancelled().await;
        info!("pipeline stopped");
        Ok(())
    }

    /// Derive a scan cursor from the store. Resumability lives here: after a
    /// crash the cursor is re-derived from what was durably written, so an
    /// in-memory high-water mark lost with the process does not matter. An
    /// empty store starts just below (forward) or at (backward) the current
    /// head.
    async fn initial_cursor(&self, direction: ScanDirection, head: u64) -> Result<u64> {
        let last = self.store.last_indexed_block(direction).await?;

        let cursor = match (direction, last) {
            (ScanDirection::Forward, 0) => head.saturating_sub(1),
            (ScanDirection::Backward, 0) => head,
            (_, last) => last,
        };

        info!(%direction, last, cursor, "derived scan cursor");
        Ok(cursor)
    }
}
