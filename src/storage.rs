//! In-memory ledger for development and tests.
//!
//! `InMemoryLedger` is the read-only handle; `LedgerSigner` is a
//! signer-bound handle sharing the same state. Like the on-chain contract,
//! the ledger checks input proofs on create, checks decryption proofs on
//! verify, and rejects a second revelation of the same record.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::envelope::is_ciphertext_envelope;
use crate::ledger::{PendingTransaction, RecordReader, RecordWriter, TransactionReceipt};
use crate::models::{decode_clear_values, unix_millis, Handle, StoredRecord};
use crate::signature::{verify_decryption_proof, verify_input_proof};
use crate::types::{ChatCipherError, Result, ALREADY_VERIFIED_SIGNATURE};

/// A stored record with its ciphertext.
struct LedgerEntry {
    record: StoredRecord,
    handle: Handle,
}

struct LedgerState {
    contract_address: String,
    gateway_key: [u8; 32],
    entries: RwLock<Vec<LedgerEntry>>,
    block_number: AtomicU64,
    available: AtomicBool,
    drop_next_transaction: AtomicBool,
}

/// Read-only handle to an in-memory record contract.
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<LedgerState>,
}

impl InMemoryLedger {
    /// Creates an empty ledger at `contract_address` that trusts proofs
    /// signed by `gateway_key`.
    pub fn new(contract_address: impl Into<String>, gateway_key: [u8; 32]) -> Self {
        Self {
            state: Arc::new(LedgerState {
                contract_address: contract_address.into(),
                gateway_key,
                entries: RwLock::new(Vec::new()),
                block_number: AtomicU64::new(1),
                available: AtomicBool::new(true),
                drop_next_transaction: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a signer-bound handle sending as `address`.
    pub fn signer(&self, address: impl Into<String>) -> LedgerSigner {
        LedgerSigner {
            state: Arc::clone(&self.state),
            address: address.into(),
        }
    }

    /// Sets what `is_available` reports.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Makes the next transaction drop out before confirmation, as after a reorg.
    pub fn drop_next_transaction(&self) {
        self.state.drop_next_transaction.store(true, Ordering::SeqCst);
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.state.entries.read().await.len()
    }

    /// Returns true if no record is stored.
    pub async fn is_empty(&self) -> bool {
        self.state.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl RecordReader for InMemoryLedger {
    async fn get_all_ids(&self) -> Result<Vec<String>> {
        let entries = self.state.entries.read().await;
        Ok(entries.iter().map(|e| e.record.id.clone()).collect())
    }

    async fn get_record(&self, id: &str) -> Result<StoredRecord> {
        let entries = self.state.entries.read().await;
        entries
            .iter()
            .find(|e| e.record.id == id)
            .map(|e| e.record.clone())
            .ok_or_else(|| ChatCipherError::NotFound(id.to_string()))
    }

    async fn get_encrypted_handle(&self, id: &str) -> Result<Handle> {
        let entries = self.state.entries.read().await;
        entries
            .iter()
            .find(|e| e.record.id == id)
            .map(|e| e.handle)
            .ok_or_else(|| ChatCipherError::NotFound(id.to_string()))
    }

    async fn is_available(&self) -> Result<bool> {
        Ok(self.state.available.load(Ordering::SeqCst))
    }

    async fn contract_address(&self) -> Result<String> {
        Ok(self.state.contract_address.clone())
    }
}

/// Signer-bound handle to an in-memory record contract.
#[derive(Clone)]
pub struct LedgerSigner {
    state: Arc<LedgerState>,
    address: String,
}

impl LedgerSigner {
    /// Address transactions are sent from.
    pub fn address(&self) -> &str {
        &self.address
    }

    fn next_transaction(&self, payload: &[u8]) -> LedgerTransaction {
        let block_number = self.state.block_number.fetch_add(1, Ordering::SeqCst);
        let mut hasher = Sha256::new();
        hasher.update(self.address.as_bytes());
        hasher.update(block_number.to_be_bytes());
        hasher.update(payload);
        LedgerTransaction {
            hash: format!("0x{}", hex::encode(hasher.finalize())),
            block_number,
            dropped: false,
        }
    }

    fn take_drop_flag(&self) -> bool {
        self.state.drop_next_transaction.swap(false, Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RecordWriter for LedgerSigner {
    async fn create_record(
        &self,
        id: &str,
        name: &str,
        ciphertext: &[u8],
        proof: &[u8],
        public_value1: u64,
        public_value2: u64,
        note: &str,
    ) -> Result<Box<dyn PendingTransaction>> {
        if !is_ciphertext_envelope(ciphertext) {
            return Err(ChatCipherError::Ledger(
                "execution reverted: Malformed ciphertext".to_string(),
            ));
        }

        let valid = verify_input_proof(
            ciphertext,
            &self.state.contract_address,
            &self.address,
            &self.state.gateway_key,
            proof,
        )
        .unwrap_or(false);
        if !valid {
            return Err(ChatCipherError::Ledger(
                "execution reverted: Invalid input proof".to_string(),
            ));
        }

        let mut transaction = self.next_transaction(ciphertext);
        if self.take_drop_flag() {
            transaction.dropped = true;
            return Ok(Box::new(transaction));
        }

        let mut entries = self.state.entries.write().await;
        if entries.iter().any(|e| e.record.id == id) {
            return Err(ChatCipherError::Ledger(
                "execution reverted: Record already exists".to_string(),
            ));
        }

        entries.push(LedgerEntry {
            record: StoredRecord {
                id: id.to_string(),
                name: name.to_string(),
                description: note.to_string(),
                public_value1,
                public_value2,
                creator: self.address.clone(),
                timestamp: unix_millis(SystemTime::now()) / 1000,
                is_verified: false,
                decrypted_value: 0,
            },
            handle: Handle::for_ciphertext(ciphertext),
        });

        Ok(Box::new(transaction))
    }

    async fn submit_verification(
        &self,
        id: &str,
        encoded_clear_values: &[u8],
        proof: &[u8],
    ) -> Result<Box<dyn PendingTransaction>> {
        let mut entries = self.state.entries.write().await;
        let entry = entries
            .iter_mut()
            .find(|e| e.record.id == id)
            .ok_or_else(|| ChatCipherError::NotFound(id.to_string()))?;

        if entry.record.is_verified {
            return Err(ChatCipherError::Ledger(format!(
                "execution reverted: {}",
                ALREADY_VERIFIED_SIGNATURE
            )));
        }

        let valid = verify_decryption_proof(
            &[entry.handle],
            encoded_clear_values,
            &self.state.contract_address,
            &self.state.gateway_key,
            proof,
        )
        .unwrap_or(false);
        if !valid {
            return Err(ChatCipherError::Ledger(
                "execution reverted: Invalid decryption proof".to_string(),
            ));
        }

        let values = decode_clear_values(encoded_clear_values)?;
        let value = values.first().copied().ok_or_else(|| {
            ChatCipherError::Ledger("execution reverted: Empty clear values".to_string())
        })?;

        let mut transaction = self.next_transaction(encoded_clear_values);
        if self.take_drop_flag() {
            transaction.dropped = true;
            return Ok(Box::new(transaction));
        }

        entry.record.is_verified = true;
        entry.record.decrypted_value = value;
        Ok(Box::new(transaction))
    }
}

/// A transaction sent to the in-memory ledger.
struct LedgerTransaction {
    hash: String,
    block_number: u64,
    dropped: bool,
}

#[async_trait::async_trait]
impl PendingTransaction for LedgerTransaction {
    fn hash(&self) -> &str {
        &self.hash
    }

    async fn wait(&self) -> Result<TransactionReceipt> {
        if self.dropped {
            return Err(ChatCipherError::ConfirmationError(format!(
                "transaction {} dropped by reorg",
                self.hash
            )));
        }
        Ok(TransactionReceipt {
            hash: self.hash.clone(),
            block_number: self.block_number,
        })
    }
}
