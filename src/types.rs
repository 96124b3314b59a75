//! Type definitions, constants, and the error taxonomy for ChatCipher.

use thiserror::Error;

/// Envelope format version byte.
pub const ENVELOPE_VERSION: u8 = 0x01;

/// Envelope scheme ID byte (simulated 32-bit unsigned FHE integer).
pub const SCHEME_EUINT32: u8 = 0x20;

/// Size of the envelope header in bytes (version, scheme, ephemeral key, nonce).
pub const HEADER_SIZE: usize = 46;

/// Size of the authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Size of the nonce in bytes.
pub const NONCE_SIZE: usize = 12;

/// Size of a public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an encrypted handle in bytes.
pub const HANDLE_SIZE: usize = 32;

/// Size of one ABI-encoded clear value word.
pub const ABI_WORD_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// Key derivation salt for the network key.
pub const KEY_DERIVATION_SALT: &[u8] = b"ChatCipher-v1-network";

/// Key derivation info for the network key.
pub const KEY_DERIVATION_INFO: &[u8] = b"x25519-network-key";

/// Encryption info prefix binding a ciphertext to its context and sender.
pub const ENCRYPTION_INFO_PREFIX: &[u8] = b"ChatCipherV1";

/// Domain separator for input proofs.
pub const INPUT_PROOF_DOMAIN: &[u8] = b"ChatCipherV1-InputProof";

/// Domain separator for decryption proofs.
pub const DECRYPTION_PROOF_DOMAIN: &[u8] = b"ChatCipherV1-DecryptionProof";

/// Error text a ledger returns when a record has already been revealed.
pub const ALREADY_VERIFIED_SIGNATURE: &str = "Data already verified";

/// Error text a wallet returns when the user declines to sign.
pub const USER_REJECTED_SIGNATURE: &str = "user rejected transaction";

/// Errors that can occur during ChatCipher operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatCipherError {
    // Session Errors
    /// No identity is connected or the target context is unresolved.
    #[error("Not connected: connect a wallet first")]
    NotConnected,

    // Encryption Errors
    /// The FHE service has not been initialized.
    #[error("Encryption service unavailable")]
    EncryptionUnavailable,

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    EncryptionError(String),

    /// Decryption or reveal failed.
    #[error("Decryption failed: {0}")]
    DecryptionError(String),

    /// Plaintext does not fit the encrypted integer type.
    #[error("Invalid plaintext: {0}")]
    InvalidPlaintext(String),

    /// Invalid public key format.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid seed length.
    #[error("Invalid seed length: expected 32 bytes, got {0}")]
    InvalidSeedLength(usize),

    /// Signature verification failed.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    // Envelope Errors
    /// Invalid envelope data.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Unknown envelope version.
    #[error("Unknown envelope version: {0}")]
    UnknownVersion(u8),

    /// Unknown encryption scheme.
    #[error("Unknown scheme: {0}")]
    UnknownScheme(u8),

    // Submission Errors
    /// The user declined to sign the transaction.
    #[error("Transaction rejected")]
    UserRejected,

    /// The record could not be submitted.
    #[error("Submission failed: {0}")]
    SubmissionError(String),

    /// The submitted transaction did not reach finality.
    #[error("Confirmation failed: {0}")]
    ConfirmationError(String),

    // Verification Errors
    /// The decryption proof was rejected.
    #[error("Verification rejected: {0}")]
    VerificationRejected(String),

    /// The decryption proof was not produced in time.
    #[error("Verification timed out")]
    VerificationTimeout,

    /// Another actor already revealed the record.
    #[error("Record already verified: {0}")]
    AlreadyVerified(String),

    // Store Errors
    /// Record not found in the store.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Raw failure reported by the ledger boundary.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Raw failure reported by the FHE service.
    #[error("Gateway error: {0}")]
    Gateway(String),

    // Tracker Errors
    /// Operation not found in the tracker.
    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    /// A status transition the state machine does not allow.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Status sink I/O failure.
    #[error("Sink failed: {0}")]
    SinkFailed(String),
}

impl ChatCipherError {
    /// Whether this failure means another actor revealed the data first.
    pub fn is_already_verified(&self) -> bool {
        match self {
            ChatCipherError::AlreadyVerified(_) => true,
            other => other.to_string().contains(ALREADY_VERIFIED_SIGNATURE),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatCipherError>;

/// Parses user-entered message text into an encryptable value.
///
/// Text that does not start with a number encrypts as zero; numbers that
/// do not fit a `u32` are rejected.
pub fn parse_message_value(input: &str) -> Result<u32> {
    let trimmed = input.trim();
    let digits: String = trimmed
        .strip_prefix('+')
        .unwrap_or(trimmed)
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    if trimmed.starts_with('-') && trimmed[1..].starts_with(|c: char| c.is_ascii_digit()) {
        return Err(ChatCipherError::InvalidPlaintext(format!(
            "negative value {}",
            trimmed
        )));
    }

    if digits.is_empty() {
        return Ok(0);
    }

    digits
        .parse::<u32>()
        .map_err(|_| ChatCipherError::InvalidPlaintext(format!("{} exceeds u32 range", digits)))
}
