use std::collections::HashMap;

use alloy_primitives::{Address, TxHash, U256};
use alloy_rpc_types_eth::{Block, Transaction, TransactionReceipt};
use async_trait::async_trait;

use crate::error::Result;

pub mod rpc;

pub use rpc::RpcChainReader;

/// A chain block with full transaction bodies, as returned by the node.
pub type ChainBlock = Block<Transaction>;

/// Capability interface over the chain RPC endpoint.
///
/// All multi-item operations are single batched calls; the transport beneath
/// is best-effort and failures surface as transient errors retried by the
/// next scan tick. Kept behind a trait so tests can substitute deterministic
/// fixtures.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current chain head number.
    async fn block_number(&self) -> Result<u64>;

    /// Fetch the given block numbers in one batched call. The result order
    /// matches the input order; a block the node cannot return is an error
    /// for the whole window.
    async fn blocks(&self, numbers: &[u64]) -> Result<Vec<ChainBlock>>;

    /// Fetch receipts for the given transaction hashes in one batched call.
    /// Hashes whose receipt is unavailable are simply absent from the map.
    async fn receipts(&self, hashes: &[TxHash]) -> Result<HashMap<TxHash, TransactionReceipt>>;

    /// Fetch balances for the given addresses at `block_number` in one
    /// batched call; `block_number == 0` means latest.
    async fn balances(
        &self,
        addresses: &[Address],
        block_number: u64,
    ) -> Result<Vec<(Address, U256)>>;
}
