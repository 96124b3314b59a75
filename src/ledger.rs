//! Ledger boundary interfaces.
//!
//! These traits describe the record contract as the client sees it: a
//! read-only handle anyone can query and a signer-bound handle that sends
//! transactions. Implementations can use any chain SDK.

use crate::models::{Handle, StoredRecord};
use crate::types::Result;

/// Receipt of a transaction that reached finality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    /// Transaction hash.
    pub hash: String,
    /// Block the transaction was included in.
    pub block_number: u64,
}

/// A submitted transaction that has not been confirmed yet.
#[async_trait::async_trait]
pub trait PendingTransaction: Send + Sync {
    /// Transaction hash.
    fn hash(&self) -> &str;

    /// Wait until the transaction is final.
    async fn wait(&self) -> Result<TransactionReceipt>;
}

/// Read-only handle to the record contract.
#[async_trait::async_trait]
pub trait RecordReader: Send + Sync {
    /// All record ids, in contract order.
    async fn get_all_ids(&self) -> Result<Vec<String>>;

    /// Public fields of one record.
    async fn get_record(&self, id: &str) -> Result<StoredRecord>;

    /// Handle of the record's stored ciphertext.
    async fn get_encrypted_handle(&self, id: &str) -> Result<Handle>;

    /// Whether the contract reports the FHE system as available.
    async fn is_available(&self) -> Result<bool>;

    /// Address of the contract; the target context for encryption.
    async fn contract_address(&self) -> Result<String>;
}

/// Signer-bound handle to the record contract.
#[async_trait::async_trait]
pub trait RecordWriter: Send + Sync {
    /// Store a new record with its ciphertext and input proof.
    #[allow(clippy::too_many_arguments)]
    async fn create_record(
        &self,
        id: &str,
        name: &str,
        ciphertext: &[u8],
        proof: &[u8],
        public_value1: u64,
        public_value2: u64,
        note: &str,
    ) -> Result<Box<dyn PendingTransaction>>;

    /// Record the revelation of a stored ciphertext.
    async fn submit_verification(
        &self,
        id: &str,
        encoded_clear_values: &[u8],
        proof: &[u8],
    ) -> Result<Box<dyn PendingTransaction>>;
}
