use std::{collections::HashMap, sync::Arc};

use alloy_consensus::{Transaction as _, TxEnvelope, TxReceipt as _, transaction::SignerRecoverable};
use alloy_primitives::TxHash;
use alloy_rpc_types_eth::TransactionReceipt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    chain::{ChainBlock, ChainReader},
    error::Result,
    store::{BlockRecord, DocumentStore, ScanDirection, TransactionRecord, timestamp_iso_millis},
};

/*
    Processor

    One instance per direction, consuming that direction's block channel.
    The block record is written regardless of how its transactions fare;
    receipt enrichment is best-effort and a missing receipt leaves the
    enrichment fields at their zero values. Nothing here retries: every
    failure is logged and the next block is taken.
*/

pub struct BlockProcessor<C, S> {
    chain: Arc<C>,
    store: Arc<S>,
    direction: ScanDirection,
    blocks: mpsc::Receiver<ChainBlock>,
    cancel: CancellationToken,
    stats: ProcessStats,
}

impl<C: ChainReader, S: DocumentStore> BlockProcessor<C, S> {
    pub fn new(
        chain: Arc<C>,
        store: Arc<S>,
        direction: ScanDirection,
        blocks: mpsc::Receiver<ChainBlock>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            chain,
            store,
            direction,
            blocks,
            cancel,
            stats: ProcessStats::new(),
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                received = self.blocks.recv() => {
                    let Some(block) = received else { return };
                    let number = block.header.inner.number;

                    self.process(block).await;
                    self.stats.block_processed(self.direction);

                    if self.direction == ScanDirection::Backward && number == 0 {
                        info!("backward processing reached genesis");
                        return;
                    }
                }
            }
        }
    }

    async fn process(&self, block: ChainBlock) {
        let number = block.header.inner.number;

        let record = block_record(&block);
        if let Err(err) = self.store.index_block(&record).await {
            error!(direction = %self.direction, number, %err, "index block");
        }

        let (mut records, hashes) = match transaction_records(&block) {
            Ok(parts) => parts,
            Err(err) => {
                // one malformed transaction aborts indexing for the whole
                // block's transaction set; the block record stands
                error!(direction = %self.direction, number, %err, "derive transaction records");
                return;
            }
        };
        if records.is_empty() {
            debug!(direction = %self.direction, number, "indexed empty block");
            return;
        }

        let receipts = match self.chain.receipts(&hashes).await {
            Ok(receipts) => receipts,
            Err(err) => {
                warn!(direction = %self.direction, number, %err, "fetch receipts");
                HashMap::new()
            }
        };
        enrich_with_receipts(&mut records, &hashes, &receipts);

        match self.store.index_transactions(&records).await {
            Ok(()) => {
                debug!(
                    direction = %self.direction,
                    number,
                    transactions = records.len(),
                    receipts = receipts.len(),
                    "indexed block transactions",
                );
            }
            Err(err) => error!(direction = %self.direction, number, %err, "index transactions"),
        }
    }
}

struct ProcessStats {
    processed: usize,
    last_checkpoint: tokio::time::Instant,
}

impl ProcessStats {
    fn new() -> Self {
        Self {
            processed: 0,
            last_checkpoint: tokio::time::Instant::now(),
        }
    }

    fn block_processed(&mut self, direction: ScanDirection) {
        self.processed += 1;

        if self.processed % 1000 == 0 {
            let time_taken = self.last_checkpoint.elapsed();
            info!(
                %direction,
                "last 1000 blocks in {time_taken:?} ({:.0} blk/s)",
                1000f64 / time_taken.as_secs_f64(),
            );
            self.last_checkpoint = tokio::time::Instant::now();
        }
    }
}

pub(crate) fn block_record(block: &ChainBlock) -> BlockRecord {
    let header = &block.header;
    BlockRecord {
        number: header.inner.number,
        hash: header.hash.to_string(),
        parent_hash: header.inner.parent_hash.to_string(),
        root: header.inner.state_root.to_string(),
        nonce: u64::from_be_bytes(header.inner.nonce.0),
        timestamp: timestamp_iso_millis(header.inner.timestamp),
        transactions: block.transactions.len(),
        base_fee: header.inner.base_fee_per_gas.unwrap_or_default(),
        gas_limit: header.inner.gas_limit,
        gas_used: header.inner.gas_used,
        difficulty: header.inner.difficulty.saturating_to::<u64>(),
        extra_data: hex::encode(&header.inner.extra_data),
    }
}

/// Build the record shell for every transaction in the block, plus the hash
/// list for the receipt batch. The sender is recovered from the signature
/// (the scheme is keyed by the transaction's chain id); optional fields are
/// only populated for transaction types that carry them.
pub(crate) fn transaction_records(
    block: &ChainBlock,
) -> Result<(Vec<TransactionRecord>, Vec<TxHash>)> {
    let Some(transactions) = block.transactions.as_transactions() else {
        return Ok((Vec::new(), Vec::new()));
    };

    let block_hash = block.header.hash.to_string();
    let block_number = block.header.inner.number;
    let timestamp = timestamp_iso_millis(block.header.inner.timestamp);

    let mut records = Vec::with_capacity(transactions.len());
    let mut hashes = Vec::with_capacity(transactions.len());

    for tx in transactions {
        let envelope: &TxEnvelope = &tx.inner;
        let from = envelope.recover_signer()?;
        let signature = envelope.signature();
        let hash = *envelope.tx_hash();

        records.push(TransactionRecord {
            hash: hash.to_string(),
            from: from.to_string(),
            to: tx.to().map(|a| a.to_string()),
            gas: tx.gas_limit(),
            gas_price: tx.gas_price(),
            gas_tip_cap: tx.max_priority_fee_per_gas(),
            gas_fee_cap: tx
                .max_priority_fee_per_gas()
                .map(|_| tx.max_fee_per_gas()),
            value: tx.value().to_string(),
            nonce: tx.nonce(),
            block_hash: block_hash.clone(),
            block_number,
            chain_id: tx.chain_id(),
            v: signature.v() as u64,
            r: signature.r().to_string(),
            s: signature.s().to_string(),
            input: hex::encode(tx.input()),
            timestamp: timestamp.clone(),
            status: 0,
            gas_used: 0,
            cumulative_gas_used: 0,
            contract_address: None,
            transaction_index: 0,
            receipt_block_hash: None,
            receipt_block_number: 0,
        });
        hashes.push(hash);
    }

    Ok((records, hashes))
}

/// Merge receipt outcomes into the record shells. Records whose receipt is
/// absent keep their zero values.
pub(crate) fn enrich_with_receipts(
    records: &mut [TransactionRecord],
    hashes: &[TxHash],
    receipts: &HashMap<TxHash, TransactionReceipt>,
) {
    for (record, hash) in records.iter_mut().zip(hashes) {
        let Some(receipt) = receipts.get(hash) else {
            continue;
        };

        record.status = receipt.status() as u64;
        record.gas_used = receipt.gas_used;
        record.cumulative_gas_used = receipt.inner.cumulative_gas_used();
        record.contract_address = receipt.contract_address.map(|a| a.to_string());
        record.transaction_index = receipt.transaction_index.unwrap_or_default();
        record.receipt_block_hash = receipt.block_hash.map(|h| h.to_string());
        record.receipt_block_number = receipt.block_number.unwrap_or_default();

        // the receipt's own block fields double as a consistency check
        // against the block the transaction arrived in
        if let Some(receipt_block_hash) = &record.receipt_block_hash {
            if *receipt_block_hash != record.block_hash {
                warn!(
                    %hash,
                    block = %record.block_hash,
                    receipt_block = %receipt_block_hash,
                    "receipt block differs from owning block",
                );
            }
        }
    }
}
