use std::collections::HashMap;

use alloy_eips::BlockNumberOrTag;
use alloy_primitives::{Address, TxHash, U64, U256};
use alloy_rpc_client::{ClientBuilder, RpcClient};
use alloy_rpc_types_eth::TransactionReceipt;
use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::{
    chain::{ChainBlock, ChainReader},
    error::{Error, Result},
};

/// JSON-RPC implementation of [`ChainReader`] using the client's native
/// request batching, so each scan window and each receipt/balance sweep is a
/// single round trip.
#[derive(Debug, Clone)]
pub struct RpcChainReader {
    client: RpcClient,
}

impl RpcChainReader {
    pub fn new(url: Url) -> Self {
        Self {
            client: ClientBuilder::default().http(url),
        }
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn block_number(&self) -> Result<u64> {
        let number: U64 = self.client.request_noparams("eth_blockNumber").await?;
        Ok(number.to::<u64>())
    }

    async fn blocks(&self, numbers: &[u64]) -> Result<Vec<ChainBlock>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }

        let mut batch = self.client.new_batch();
        let mut pending = Vec::with_capacity(numbers.len());
        for number in numbers {
            let waiter = batch.add_call::<_, Option<ChainBlock>>(
                "eth_getBlockByNumber",
                &(BlockNumberOrTag::Number(*number), true),
            )?;
            pending.push((*number, waiter));
        }
        batch.send().await?;

        let mut blocks = Vec::with_capacity(pending.len());
        for (number, waiter) in pending {
            let block = waiter
                .await?
                .ok_or_else(|| Error::Custom(format!("block {number} not available")))?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    async fn receipts(&self, hashes: &[TxHash]) -> Result<HashMap<TxHash, TransactionReceipt>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }

        let mut batch = self.client.new_batch();
        let mut pending = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let waiter = batch
                .add_call::<_, Option<TransactionReceipt>>("eth_getTransactionReceipt", &(*hash,))?;
            pending.push((*hash, waiter));
        }
        batch.send().await?;

        let mut receipts = HashMap::with_capacity(pending.len());
        for (hash, waiter) in pending {
            match waiter.await {
                Ok(Some(receipt)) => {
                    receipts.insert(receipt.transaction_hash, receipt);
                }
                Ok(None) => debug!(%hash, "no receipt for transaction"),
                Err(err) => debug!(%hash, %err, "receipt lookup failed"),
            }
        }
        Ok(receipts)
    }

    async fn balances(
        &self,
        addresses: &[Address],
        block_number: u64,
    ) -> Result<Vec<(Address, U256)>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let tag = match block_number {
            0 => BlockNumberOrTag::Latest,
            n => BlockNumberOrTag::Number(n),
        };

        let mut batch = self.client.new_batch();
        let mut pending = Vec::with_capacity(addresses.len());
        for address in addresses {
            let waiter = batch.add_call::<_, U256>("eth_getBalance", &(*address, tag))?;
            pending.push((*address, waiter));
        }
        batch.send().await?;

        let mut balances = Vec::with_capacity(pending.len());
        for (address, waiter) in pending {
            balances.push((address, waiter.await?));
        }
        Ok(balances)
    }
}
