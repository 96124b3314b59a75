//! Data models for ChatCipher.
//!
//! This module defines operation records and their state machine, the
//! stored-record and contact projections, decryption requests, and the
//! opaque handles and proofs exchanged with the collaborators.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{ChatCipherError, Result, ABI_WORD_SIZE, HANDLE_SIZE};

// ============================================================================
// Handles and proofs
// ============================================================================

/// Opaque reference a store uses to locate one stored ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle([u8; HANDLE_SIZE]);

impl Handle {
    /// Wraps raw handle bytes.
    pub fn from_bytes(bytes: [u8; HANDLE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Derives the handle a ledger assigns to a stored ciphertext.
    pub fn for_ciphertext(ciphertext: &[u8]) -> Self {
        let digest: [u8; 32] = Sha256::digest(ciphertext).into();
        Self(digest)
    }

    /// Returns the raw handle bytes.
    pub fn as_bytes(&self) -> &[u8; HANDLE_SIZE] {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Ciphertext and input proof produced for one `(context, identity)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedInput {
    /// Encoded ciphertext envelope.
    pub ciphertext: Vec<u8>,
    /// Proof of well-formedness the ledger checks before accepting it.
    pub proof: Vec<u8>,
}

/// Clear values and the proof a ledger needs to record their revelation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionProof {
    /// Revealed value per handle.
    pub clear_values: HashMap<Handle, u32>,
    /// Clear values as 32-byte big-endian words, in handle order.
    pub encoded_clear_values: Vec<u8>,
    /// Gateway proof over handles and encoded values.
    pub proof: Vec<u8>,
}

/// Encodes clear values as consecutive 32-byte big-endian words.
pub fn encode_clear_values(values: &[u32]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(values.len() * ABI_WORD_SIZE);
    for value in values {
        let mut word = [0u8; ABI_WORD_SIZE];
        word[ABI_WORD_SIZE - 4..].copy_from_slice(&value.to_be_bytes());
        encoded.extend_from_slice(&word);
    }
    encoded
}

/// Decodes 32-byte big-endian words back into clear values.
pub fn decode_clear_values(encoded: &[u8]) -> Result<Vec<u32>> {
    if encoded.len() % ABI_WORD_SIZE != 0 {
        return Err(ChatCipherError::DecryptionError(format!(
            "Encoded clear values must be a multiple of {} bytes, got {}",
            ABI_WORD_SIZE,
            encoded.len()
        )));
    }

    encoded
        .chunks(ABI_WORD_SIZE)
        .map(|word| {
            if word[..ABI_WORD_SIZE - 4].iter().any(|b| *b != 0) {
                return Err(ChatCipherError::DecryptionError(
                    "Clear value exceeds u32 range".to_string(),
                ));
            }
            let mut value = [0u8; 4];
            value.copy_from_slice(&word[ABI_WORD_SIZE - 4..]);
            Ok(u32::from_be_bytes(value))
        })
        .collect()
}

// ============================================================================
// Operation records
// ============================================================================

/// What an operation writes to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// A new contact with an initial encrypted message.
    Contact,
    /// An encrypted message to an existing contact.
    Message,
}

impl OperationKind {
    fn id_prefix(self) -> &'static str {
        match self {
            OperationKind::Contact => "contact",
            OperationKind::Message => "message",
        }
    }
}

/// Progress of one create-or-message operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    /// Created, nothing started.
    Idle,
    /// Waiting on the encryption gateway.
    Encrypting,
    /// Waiting on the store to accept the record.
    Submitting,
    /// Waiting on finality.
    Confirming,
    /// Record is final.
    Succeeded,
    /// A phase failed.
    Failed,
}

impl OperationStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationStatus::Succeeded | OperationStatus::Failed)
    }

    /// Whether the state machine allows `self -> next`.
    pub fn can_transition_to(self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Idle, Encrypting)
                | (Encrypting, Submitting)
                | (Submitting, Confirming)
                | (Confirming, Succeeded)
                | (Encrypting, Failed)
                | (Submitting, Failed)
                | (Confirming, Failed)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationStatus::Idle => "Idle",
            OperationStatus::Encrypting => "Encrypting",
            OperationStatus::Submitting => "Submitting",
            OperationStatus::Confirming => "Confirming",
            OperationStatus::Succeeded => "Succeeded",
            OperationStatus::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Public fields stored next to the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// First public numeric attribute.
    pub public_value1: u64,
    /// Second public numeric attribute.
    pub public_value2: u64,
    /// Free-form note shown as the contact's last message.
    pub note: String,
}

impl RecordMetadata {
    /// Creates record metadata.
    pub fn new(public_value1: u64, public_value2: u64, note: impl Into<String>) -> Self {
        Self {
            public_value1,
            public_value2,
            note: note.into(),
        }
    }
}

/// One create-or-message action and its progress.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    /// Unique, time-based identifier.
    pub id: String,
    /// What the operation writes.
    pub kind: OperationKind,
    /// Record name (contact name).
    pub name: String,
    /// Plaintext value to encrypt.
    pub payload: u32,
    /// Public fields stored with the ciphertext.
    pub metadata: RecordMetadata,
    /// Ciphertext once encryption finished.
    pub ciphertext: Option<Vec<u8>>,
    /// Input proof once encryption finished.
    pub proof: Option<Vec<u8>>,
    /// When the operation was created.
    pub created_at: SystemTime,
    status: OperationStatus,
    transitions: Vec<OperationStatus>,
    error: Option<ChatCipherError>,
}

impl OperationRecord {
    /// Creates an idle operation with a fresh id.
    pub fn new(
        kind: OperationKind,
        name: impl Into<String>,
        payload: u32,
        metadata: RecordMetadata,
    ) -> Self {
        Self {
            id: generate_record_id(kind),
            kind,
            name: name.into(),
            payload,
            metadata,
            ciphertext: None,
            proof: None,
            created_at: SystemTime::now(),
            status: OperationStatus::Idle,
            transitions: vec![OperationStatus::Idle],
            error: None,
        }
    }

    /// Current status.
    pub fn status(&self) -> OperationStatus {
        self.status
    }

    /// Every status visited, starting with `Idle`.
    pub fn transitions(&self) -> &[OperationStatus] {
        &self.transitions
    }

    /// The failure that ended the operation, if any.
    pub fn error(&self) -> Option<&ChatCipherError> {
        self.error.as_ref()
    }

    /// Whether the operation reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to the next status.
    pub fn advance(&mut self, next: OperationStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ChatCipherError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.transitions.push(next);
        Ok(())
    }

    /// Moves to `Failed`, recording the cause.
    pub fn fail(&mut self, error: ChatCipherError) -> Result<()> {
        self.advance(OperationStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Attaches the ciphertext and proof produced for this submission.
    pub fn attach_encryption(&mut self, input: EncryptedInput) {
        self.ciphertext = Some(input.ciphertext);
        self.proof = Some(input.proof);
    }
}

static LAST_ISSUED_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Generates a time-based record id such as `contact-1718000000000`.
///
/// Ids issued by one process are strictly increasing.
pub fn generate_record_id(kind: OperationKind) -> String {
    let now = unix_millis(SystemTime::now());
    let mut last = LAST_ISSUED_MILLIS.load(Ordering::Relaxed);
    let issued = loop {
        let candidate = now.max(last + 1);
        match LAST_ISSUED_MILLIS.compare_exchange_weak(
            last,
            candidate,
            Ordering::SeqCst,
            Ordering::Relaxed,
        ) {
            Ok(_) => break candidate,
            Err(observed) => last = observed,
        }
    };
    format!("{}-{}", kind.id_prefix(), issued)
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

// ============================================================================
// Store projections
// ============================================================================

/// Public fields of a stored record, as the store returns them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// Record identifier.
    pub id: String,
    /// Record name.
    pub name: String,
    /// Note stored with the record.
    pub description: String,
    /// First public numeric attribute.
    pub public_value1: u64,
    /// Second public numeric attribute.
    pub public_value2: u64,
    /// Address that created the record.
    pub creator: String,
    /// Unix time (seconds) the record was created.
    pub timestamp: u64,
    /// Whether the ciphertext has been revealed on the ledger.
    pub is_verified: bool,
    /// Revealed value; zero until verified.
    pub decrypted_value: u32,
}

/// Presentation-only fields, resampled on every reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    /// Unread message badge.
    pub unread: u8,
    /// Online indicator.
    pub is_online: bool,
}

impl Presence {
    /// Samples fresh presentation fields.
    pub fn sample() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            unread: rng.gen_range(0..5),
            is_online: rng.gen_bool(0.5),
        }
    }
}

/// A stored record shaped for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactEntry {
    /// Record identifier.
    pub id: String,
    /// Contact name.
    pub name: String,
    /// Last message preview (the record's note).
    pub last_message: String,
    /// Unix time (seconds) of the record.
    pub timestamp: u64,
    /// First public numeric attribute.
    pub public_value1: u64,
    /// Second public numeric attribute.
    pub public_value2: u64,
    /// Whether the ciphertext has been revealed.
    pub is_verified: bool,
    /// Revealed value, present only once verified.
    pub decrypted_value: Option<u32>,
    /// Presentation-only fields.
    pub presence: Presence,
}

impl ContactEntry {
    /// Projects a stored record, sampling fresh presence fields.
    pub fn from_record(record: StoredRecord) -> Self {
        let decrypted_value = record.is_verified.then_some(record.decrypted_value);
        Self {
            id: record.id,
            name: record.name,
            last_message: record.description,
            timestamp: record.timestamp,
            public_value1: record.public_value1,
            public_value2: record.public_value2,
            is_verified: record.is_verified,
            decrypted_value,
            presence: Presence::sample(),
        }
    }
}

// ============================================================================
// Decryption requests
// ============================================================================

/// One decrypt-and-verify attempt for a stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionRequest {
    /// Record being revealed.
    pub record_id: String,
    /// Handle of the stored ciphertext, once fetched.
    pub encrypted_handle: Option<Handle>,
    /// Revealed value, once resolved.
    pub result_clear_value: Option<u32>,
    /// Whether the value came from an already-verified record.
    pub short_circuited: bool,
}

impl DecryptionRequest {
    /// Creates an unresolved request.
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            encrypted_handle: None,
            result_clear_value: None,
            short_circuited: false,
        }
    }

    /// Resolves from a record that was already verified.
    pub fn resolve_verified(&mut self, value: u32) {
        self.result_clear_value = Some(value);
        self.short_circuited = true;
    }

}

// ============================================================================
// Sent messages
// ============================================================================

/// Delivery state of a sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Confirmed on the ledger.
    Sent,
    /// Seen by the recipient's client.
    Delivered,
    /// Read by the recipient.
    Read,
}

/// A message this client sent, kept for the conversation view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Record identifier.
    pub id: String,
    /// Contact the message was sent to.
    pub contact_id: String,
    /// Text as typed.
    pub content: String,
    /// When the message was confirmed.
    pub timestamp: SystemTime,
    /// Whether the value was encrypted before submission.
    pub is_encrypted: bool,
    /// Whether this client sent it.
    pub is_own: bool,
    /// Delivery state.
    pub delivery: DeliveryState,
}
