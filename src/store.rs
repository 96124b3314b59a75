//! Record store adapter.
//!
//! Wraps the ledger's read-only and signer-bound handles and maps raw
//! boundary failures onto the crate's error taxonomy.

use tracing::{debug, warn};

use crate::ledger::{PendingTransaction, RecordReader, RecordWriter, TransactionReceipt};
use crate::models::{EncryptedInput, Handle, RecordMetadata, StoredRecord};
use crate::types::{ChatCipherError, Result, USER_REJECTED_SIGNATURE};

/// What a pending transaction was sent for; decides how failures map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionPurpose {
    Create,
    Verification,
}

/// A transaction awaiting confirmation.
pub struct PendingConfirmation {
    inner: Box<dyn PendingTransaction>,
    purpose: TransactionPurpose,
}

impl PendingConfirmation {
    /// Transaction hash.
    pub fn hash(&self) -> &str {
        self.inner.hash()
    }

    /// Waits for finality.
    pub async fn await_confirmation(&self) -> Result<TransactionReceipt> {
        self.inner.wait().await.map_err(|e| {
            warn!("Transaction {} failed to confirm: {}", self.inner.hash(), e);
            if self.purpose == TransactionPurpose::Verification && e.is_already_verified() {
                ChatCipherError::AlreadyVerified(e.to_string())
            } else {
                match e {
                    ChatCipherError::ConfirmationError(_) => e,
                    other => ChatCipherError::ConfirmationError(other.to_string()),
                }
            }
        })
    }
}

/// Adapter over the ledger's record contract.
pub struct RecordStore<R: RecordReader, W: RecordWriter> {
    reader: R,
    writer: W,
}

impl<R: RecordReader, W: RecordWriter> RecordStore<R, W> {
    /// Creates an adapter from a read-only and a signer-bound handle.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Returns the read-only handle.
    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Returns the signer-bound handle.
    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Lists all record ids.
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        self.reader.get_all_ids().await
    }

    /// Fetches one record's public fields.
    pub async fn get_public_fields(&self, id: &str) -> Result<StoredRecord> {
        self.reader.get_record(id).await.map_err(|e| match e {
            ChatCipherError::NotFound(_) => e,
            other if other.to_string().contains("not found") => {
                ChatCipherError::NotFound(id.to_string())
            }
            other => other,
        })
    }

    /// Fetches the handle of a record's ciphertext.
    pub async fn get_encrypted_handle(&self, id: &str) -> Result<Handle> {
        self.reader.get_encrypted_handle(id).await
    }

    /// Whether the FHE system reports itself available.
    pub async fn is_available(&self) -> Result<bool> {
        self.reader.is_available().await
    }

    /// Resolves the target context (contract address).
    pub async fn contract_address(&self) -> Result<String> {
        self.reader.contract_address().await
    }

    /// Submits a new record.
    pub async fn create(
        &self,
        id: &str,
        name: &str,
        input: &EncryptedInput,
        metadata: &RecordMetadata,
    ) -> Result<PendingConfirmation> {
        let inner = self
            .writer
            .create_record(
                id,
                name,
                &input.ciphertext,
                &input.proof,
                metadata.public_value1,
                metadata.public_value2,
                &metadata.note,
            )
            .await
            .map_err(classify_submission_error)?;

        debug!("Record {} submitted in transaction {}", id, inner.hash());
        Ok(PendingConfirmation {
            inner,
            purpose: TransactionPurpose::Create,
        })
    }

    /// Submits revealed clear values and their proof.
    pub async fn submit_verification(
        &self,
        id: &str,
        encoded_clear_values: &[u8],
        proof: &[u8],
    ) -> Result<PendingConfirmation> {
        let inner = self
            .writer
            .submit_verification(id, encoded_clear_values, proof)
            .await
            .map_err(|e| {
                if e.is_already_verified() {
                    ChatCipherError::AlreadyVerified(id.to_string())
                } else if is_user_rejection(&e) {
                    ChatCipherError::UserRejected
                } else {
                    match e {
                        ChatCipherError::NotFound(_) | ChatCipherError::VerificationRejected(_) => e,
                        other => ChatCipherError::VerificationRejected(other.to_string()),
                    }
                }
            })?;

        debug!("Verification for {} submitted in transaction {}", id, inner.hash());
        Ok(PendingConfirmation {
            inner,
            purpose: TransactionPurpose::Verification,
        })
    }
}

fn is_user_rejection(error: &ChatCipherError) -> bool {
    matches!(error, ChatCipherError::UserRejected)
        || error.to_string().contains(USER_REJECTED_SIGNATURE)
}

fn classify_submission_error(error: ChatCipherError) -> ChatCipherError {
    if is_user_rejection(&error) {
        return ChatCipherError::UserRejected;
    }
    match error {
        ChatCipherError::SubmissionError(_) => error,
        other => ChatCipherError::SubmissionError(other.to_string()),
    }
}
