//! Deterministic doubles for both pipeline collaborators, shared by the sync
//! component tests.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    ops::RangeInclusive,
    sync::Mutex,
};

use alloy_consensus::{
    Eip658Value, Receipt, ReceiptEnvelope, ReceiptWithBloom, SignableTransaction,
    Transaction as _, TxEnvelope, TxLegacy,
    transaction::{Recovered, SignerRecoverable},
};
use alloy_primitives::{Address, B64, B256, Bloom, Bytes, Signature, TxHash, TxKind, U256, address};
use alloy_rpc_types_eth::{Block, BlockTransactions, Header, Transaction, TransactionReceipt};
use async_trait::async_trait;

use crate::{
    chain::{ChainBlock, ChainReader},
    error::{Error, Result},
    store::{
        AccountBalanceSnapshot, BlockRecord, DocumentStore, ScanDirection, TransactionRecord,
    },
};

/// Sender of the canonical EIP-155 example transaction.
pub fn known_sender() -> Address {
    address!("9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f")
}

/// Recipient of the canonical EIP-155 example transaction.
pub fn known_recipient() -> Address {
    address!("3535353535353535353535353535353535353535")
}

/// Signature from the canonical EIP-155 example (chain id 1, v = 37).
fn eip155_signature() -> Signature {
    Signature::new(
        U256::from_str_radix(
            "28ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276",
            16,
        )
        .unwrap(),
        U256::from_str_radix(
            "67cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83",
            16,
        )
        .unwrap(),
        false,
    )
}

fn wrap_envelope(envelope: TxEnvelope, block: &ChainBlock, index: u64) -> Transaction {
    let signer = envelope.recover_signer().unwrap();
    Transaction {
        inner: Recovered::new_unchecked(envelope, signer),
        block_hash: Some(block.header.hash),
        block_number: Some(block.header.inner.number),
        transaction_index: Some(index),
        effective_gas_price: None,
    }
}

/// A validly signed value transfer (the EIP-155 example transaction); its
/// recovered sender is [`known_sender`].
pub fn signed_call_tx(block: &ChainBlock, index: u64) -> Transaction {
    let tx = TxLegacy {
        chain_id: Some(1),
        nonce: 9,
        gas_price: 20_000_000_000,
        gas_limit: 21_000,
        to: TxKind::Call(known_recipient()),
        value: U256::from(10u64).pow(U256::from(18u64)),
        input: Bytes::new(),
    };
    let envelope = TxEnvelope::Legacy(tx.into_signed(eip155_signature()));
    wrap_envelope(envelope, block, index)
}

/// A contract-creation transaction (`to` absent) carrying a well-formed
/// signature.
pub fn contract_creation_tx(block: &ChainBlock, index: u64) -> Transaction {
    let tx = TxLegacy {
        chain_id: Some(1),
        nonce: 0,
        gas_price: 20_000_000_000,
        gas_limit: 1_000_000,
        to: TxKind::Create,
        value: U256::ZERO,
        input: Bytes::from(vec![0x60, 0x80, 0x60, 0x40]),
    };
    let envelope = TxEnvelope::Legacy(tx.into_signed(eip155_signature()));
    wrap_envelope(envelope, block, index)
}

/// A transaction whose signature cannot recover a sender (zero scalars).
pub fn malformed_tx(block: &ChainBlock, index: u64) -> Transaction {
    let tx = TxLegacy {
        chain_id: Some(1),
        nonce: 0,
        gas_price: 20_000_000_000,
        gas_limit: 21_000,
        to: TxKind::Call(known_recipient()),
        value: U256::ZERO,
        input: Bytes::new(),
    };
    let signature = Signature::new(U256::ZERO, U256::ZERO, false);
    let envelope = TxEnvelope::Legacy(tx.into_signed(signature));
    // recovery must fail for this fixture, so bypass it
    Transaction {
        inner: Recovered::new_unchecked(envelope, Address::ZERO),
        block_hash: Some(block.header.hash),
        block_number: Some(block.header.inner.number),
        transaction_index: Some(index),
        effective_gas_price: None,
    }
}

pub fn block_hash(number: u64) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[0] = 0xb1;
    bytes[24..].copy_from_slice(&number.to_be_bytes());
    B256::new(bytes)
}

/// An empty fixture block with deterministic header fields.
pub fn make_block(number: u64) -> ChainBlock {
    let mut block: ChainBlock = Block {
        header: Header {
            hash: block_hash(number),
            inner: alloy_consensus::Header {
                parent_hash: block_hash(number.wrapping_sub(1)),
                number,
                timestamp: 1_700_000_000 + number * 12,
                gas_limit: 30_000_000,
                gas_used: 21_000,
                base_fee_per_gas: Some(7),
                difficulty: U256::from(2u64),
                nonce: B64::ZERO,
                extra_data: Bytes::from(vec![0xca, 0xfe]),
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    };
    block.transactions = BlockTransactions::Full(vec![]);
    block
}

/// A fixture receipt for `tx`, successful, optionally carrying a created
/// contract address.
pub fn make_receipt(tx: &Transaction, contract_address: Option<Address>) -> TransactionReceipt {
    let envelope = ReceiptEnvelope::Legacy(ReceiptWithBloom {
        receipt: Receipt {
            status: Eip658Value::Eip658(true),
            cumulative_gas_used: 42_000,
            logs: vec![],
        },
        logs_bloom: Bloom::ZERO,
    });

    TransactionReceipt {
        inner: envelope,
        transaction_hash: *tx.inner.tx_hash(),
        transaction_index: tx.transaction_index,
        block_hash: tx.block_hash,
        block_number: tx.block_number,
        gas_used: 21_000,
        effective_gas_price: 20_000_000_000,
        blob_gas_used: None,
        blob_gas_price: None,
        from: known_sender(),
        to: tx.to(),
        contract_address,
    }
}

/// Deterministic [`ChainReader`] double backed by fixture blocks; records
/// every window it is asked for.
#[derive(Default)]
pub struct MockChain {
    head: Mutex<u64>,
    blocks: Mutex<BTreeMap<u64, ChainBlock>>,
    receipts: Mutex<HashMap<TxHash, TransactionReceipt>>,
    block_requests: Mutex<Vec<Vec<u64>>>,
    balance_calls: Mutex<Vec<(Vec<Address>, u64)>>,
    fail_windows: Mutex<HashSet<u64>>,
    fail_receipts: Mutex<bool>,
}

impl MockChain {
    pub fn with_blocks(numbers: RangeInclusive<u64>, head: u64) -> Self {
        let chain = Self::default();
        *chain.head.lock().unwrap() = head;
        {
            let mut blocks = chain.blocks.lock().unwrap();
            for number in numbers {
                blocks.insert(number, make_block(number));
            }
        }
        chain
    }

    pub fn insert_receipt(&self, receipt: TransactionReceipt) {
        self.receipts
            .lock()
            .unwrap()
            .insert(receipt.transaction_hash, receipt);
    }

    /// Make the next window containing `number` fail once.
    pub fn fail_window_once(&self, number: u64) {
        self.fail_windows.lock().unwrap().insert(number);
    }

    pub fn fail_receipt_fetches(&self) {
        *self.fail_receipts.lock().unwrap() = true;
    }

    pub fn block_requests(&self) -> Vec<Vec<u64>> {
        self.block_requests.lock().unwrap().clone()
    }

    pub fn balance_calls(&self) -> Vec<(Vec<Address>, u64)> {
        self.balance_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn block_number(&self) -> Result<u64> {
        Ok(*self.head.lock().unwrap())
    }

    async fn blocks(&self, numbers: &[u64]) -> Result<Vec<ChainBlock>> {
        self.block_requests.lock().unwrap().push(numbers.to_vec());

        let mut fail = self.fail_windows.lock().unwrap();
        if numbers.iter().any(|n| fail.contains(n)) {
            for n in numbers {
                fail.remove(n);
            }
            return Err(Error::Custom("injected window failure".into()));
        }
        drop(fail);

        let blocks = self.blocks.lock().unwrap();
        numbers
            .iter()
            .map(|n| {
                blocks
                    .get(n)
                    .cloned()
                    .ok_or_else(|| Error::Custom(format!("block {n} not available")))
            })
            .collect()
    }

    async fn receipts(&self, hashes: &[TxHash]) -> Result<HashMap<TxHash, TransactionReceipt>> {
        if *self.fail_receipts.lock().unwrap() {
            return Err(Error::Custom("injected receipt failure".into()));
        }

        let receipts = self.receipts.lock().unwrap();
        Ok(hashes
            .iter()
            .filter_map(|h| receipts.get(h).cloned().map(|r| (*h, r)))
            .collect())
    }

    async fn balances(
        &self,
        addresses: &[Address],
        block_number: u64,
    ) -> Result<Vec<(Address, U256)>> {
        self.balance_calls
            .lock()
            .unwrap()
            .push((addresses.to_vec(), block_number));
        Ok(addresses
            .iter()
            .map(|a| (*a, U256::from(42u64)))
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryState {
    pub indices_created: bool,
    pub blocks: Vec<BlockRecord>,
    pub transactions: Vec<TransactionRecord>,
    pub balances: Vec<AccountBalanceSnapshot>,
}

/// In-memory [`DocumentStore`] double with per-block write-failure injection.
#[derive(Default)]
pub struct MemoryStore {
    pub state: Mutex<MemoryState>,
    fail_block_writes: Mutex<HashSet<u64>>,
}

impl MemoryStore {
    pub fn seeded(blocks: RangeInclusive<u64>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            for number in blocks {
                state.blocks.push(crate::sync::processor::block_record(&make_block(number)));
            }
        }
        store
    }

    /// Make every `index_block` call for `number` fail.
    pub fn fail_block_write(&self, number: u64) {
        self.fail_block_writes.lock().unwrap().insert(number);
    }

    pub fn block_numbers(&self) -> Vec<u64> {
        let mut numbers: Vec<u64> = self
            .state
            .lock()
            .unwrap()
            .blocks
            .iter()
            .map(|b| b.number)
            .collect();
        numbers.sort_unstable();
        numbers
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create_indices(&self) -> Result<()> {
        self.state.lock().unwrap().indices_created = true;
        Ok(())
    }

    async fn last_indexed_block(&self, direction: ScanDirection) -> Result<u64> {
        let state = self.state.lock().unwrap();
        let numbers = state.blocks.iter().map(|b| b.number);
        Ok(match direction {
            ScanDirection::Forward => numbers.max().unwrap_or(0),
            ScanDirection::Backward => numbers.min().unwrap_or(0),
        })
    }

    async fn index_block(&self, block: &BlockRecord) -> Result<()> {
        if self.fail_block_writes.lock().unwrap().contains(&block.number) {
            return Err(Error::Store(format!(
                "injected write failure for block {}",
                block.number
            )));
        }
        self.state.lock().unwrap().blocks.push(block.clone());
        Ok(())
    }

    async fn index_transactions(&self, transactions: &[TransactionRecord]) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .transactions
            .extend_from_slice(transactions);
        Ok(())
    }

    async fn index_account_balances(&self, balances: &[AccountBalanceSnapshot]) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .balances
            .extend_from_slice(balances);
        Ok(())
    }

    async fn addresses(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        let mut out = BTreeSet::new();
        for tx in &state.transactions {
            out.insert(tx.from.clone());
            if let Some(to) = &tx.to {
                out.insert(to.clone());
            }
        }
        Ok(out.into_iter().collect())
    }
}
