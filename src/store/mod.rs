use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

pub mod elastic;
mod records;

pub use records::{
    AccountBalanceSnapshot, BlockRecord, TransactionRecord, timestamp_iso_millis, timestamp_now,
};

/// Scan direction of the ingestion pipeline. Cursors are derived per
/// direction: forward resumes above the highest persisted block, backward
/// resumes below the lowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanDirection {
    Forward,
    Backward,
}

impl ScanDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }
}

impl fmt::Display for ScanDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability interface over the searchable document store.
///
/// Every write is an independent best-effort operation; there is no
/// multi-record transaction. Kept behind a trait so tests can substitute a
/// deterministic in-memory store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the storage indices if they do not exist. Idempotent; must
    /// succeed before any write.
    async fn create_indices(&self) -> Result<()>;

    /// Highest (forward) or lowest (backward) block number already persisted.
    /// Returns 0 when nothing has been indexed yet.
    async fn last_indexed_block(&self, direction: ScanDirection) -> Result<u64>;

    async fn index_block(&self, block: &BlockRecord) -> Result<()>;

    async fn index_transactions(&self, transactions: &[TransactionRecord]) -> Result<()>;

    async fn index_account_balances(&self, balances: &[AccountBalanceSnapshot]) -> Result<()>;

    /// Distinct addresses observed as sender or recipient across all
    /// persisted transactions.
    async fn addresses(&self) -> Result<Vec<String>>;
}
