use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use alloy_primitives::Address;
use itertools::Itertools;
use tokio::{sync::mpsc, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    chain::ChainReader,
    store::{AccountBalanceSnapshot, DocumentStore, timestamp_now},
};

/*
    Balance sampler

    Dual trigger: the forward scanner signals over a bounded channel once its
    advancement counter crosses the configured minimum (the message carries
    the cursor to sample at), and a fallback timer fires a latest-block sample
    whenever no block-triggered sample happened for the configured timeout.
    The advancement counter is shared with the scanner as an atomic and reset
    here after either trigger.
*/

pub struct BalanceSampler<C, S> {
    chain: Arc<C>,
    store: Arc<S>,
    configured: Vec<Address>,
    ingested: Arc<AtomicU64>,
    trigger: mpsc::Receiver<u64>,
    min_blocks_per_sample: u64,
    fallback: Duration,
    cancel: CancellationToken,
}

impl<C: ChainReader, S: DocumentStore> BalanceSampler<C, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<C>,
        store: Arc<S>,
        configured: Vec<Address>,
        ingested: Arc<AtomicU64>,
        trigger: mpsc::Receiver<u64>,
        min_blocks_per_sample: u64,
        fallback: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            chain,
            store,
            configured,
            ingested,
            trigger,
            min_blocks_per_sample,
            fallback,
            cancel,
        }
    }

    pub async fn run(mut self) {
        loop {
            // re-armed after every trigger, so a block-triggered sample also
            // pushes the fallback out
            let fallback = time::sleep(self.fallback);
            tokio::pin!(fallback);

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = &mut fallback => {
                    // block number 0 samples at the latest state
                    self.sample(0).await;
                    self.ingested.store(0, Ordering::Relaxed);
                }
                received = self.trigger.recv() => {
                    let Some(block_number) = received else { return };
                    // the signal may predate a timer-driven reset; re-check
                    if self.ingested.load(Ordering::Relaxed) >= self.min_blocks_per_sample {
                        self.sample(block_number).await;
                    }
                    self.ingested.store(0, Ordering::Relaxed);
                }
            }
        }
    }

    async fn sample(&self, block_number: u64) {
        let observed = match self.store.addresses().await {
            Ok(observed) => observed,
            Err(err) => {
                error!(%err, "fetch observed addresses");
                return;
            }
        };

        let addresses = tracked_set(&self.configured, &observed);
        if addresses.is_empty() {
            debug!("no addresses to sample");
            return;
        }

        let balances = match self.chain.balances(&addresses, block_number).await {
            Ok(balances) => balances,
            Err(err) => {
                error!(block_number, %err, "fetch account balances");
                return;
            }
        };

        let timestamp = timestamp_now();
        let snapshots: Vec<AccountBalanceSnapshot> = balances
            .into_iter()
            .map(|(address, balance)| AccountBalanceSnapshot {
                address: address.to_string(),
                balance: balance.to_string(),
                timestamp: timestamp.clone(),
                block_number,
            })
            .collect();

        match self.store.index_account_balances(&snapshots).await {
            Ok(()) => info!(
                accounts = snapshots.len(),
                block_number, "sampled account balances",
            ),
            Err(err) => error!(block_number, %err, "index account balances"),
        }
    }
}

/// Configured ∪ observed, recomputed per sampling event so growth in observed
/// addresses is picked up automatically.
pub(crate) fn tracked_set(configured: &[Address], observed: &[String]) -> Vec<Address> {
    observed
        .iter()
        .filter_map(|raw| match raw.parse::<Address>() {
            Ok(address) => Some(address),
            Err(_) => {
                warn!(address = %raw, "skipping unparsable observed address");
                None
            }
        })
        .chain(configured.iter().copied())
        .unique()
        .collect()
}
