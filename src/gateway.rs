//! Encryption gateway boundary and adapter.
//!
//! `FheService` is the contract the FHE subsystem exposes. Any SDK or
//! relayer client can implement it. `EncryptionGateway` wraps a service,
//! checks readiness, bounds reveal calls with a timeout and maps every
//! failure onto the crate's error taxonomy. It never retries.

use std::time::Duration;

use tracing::{debug, warn};

use crate::models::{DecryptionProof, EncryptedInput, Handle};
use crate::types::{ChatCipherError, Result};

/// Trait for the FHE subsystem.
#[async_trait::async_trait]
pub trait FheService: Send + Sync {
    /// Load keys and parameters. Must succeed before any other call.
    async fn initialize(&self) -> Result<()>;

    /// Whether `initialize` has completed.
    async fn is_initialized(&self) -> bool;

    /// Encrypt `value` for `context` on behalf of `identity`.
    async fn encrypt(&self, context: &str, identity: &str, value: u32) -> Result<EncryptedInput>;

    /// Reveal the values behind `handles` and prove the revelation.
    async fn decrypt_for_verification(
        &self,
        handles: &[Handle],
        context: &str,
    ) -> Result<DecryptionProof>;
}

/// Default bound on a reveal call.
pub const DEFAULT_VERIFICATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Adapter over an `FheService`.
pub struct EncryptionGateway<F: FheService> {
    service: F,
    verification_timeout: Duration,
}

impl<F: FheService> EncryptionGateway<F> {
    /// Wraps a service with the default reveal timeout.
    pub fn new(service: F) -> Self {
        Self {
            service,
            verification_timeout: DEFAULT_VERIFICATION_TIMEOUT,
        }
    }

    /// Sets the reveal timeout.
    pub fn with_verification_timeout(mut self, timeout: Duration) -> Self {
        self.verification_timeout = timeout;
        self
    }

    /// Returns the wrapped service.
    pub fn service(&self) -> &F {
        &self.service
    }

    /// Initializes the wrapped service.
    pub async fn initialize(&self) -> Result<()> {
        self.service.initialize().await.map_err(|e| {
            warn!("FHE service initialization failed: {}", e);
            ChatCipherError::EncryptionUnavailable
        })
    }

    /// Whether the wrapped service is ready.
    pub async fn is_initialized(&self) -> bool {
        self.service.is_initialized().await
    }

    /// Produces a fresh ciphertext and input proof.
    pub async fn encrypt(&self, context: &str, identity: &str, value: u32) -> Result<EncryptedInput> {
        if !self.service.is_initialized().await {
            return Err(ChatCipherError::EncryptionUnavailable);
        }

        debug!("Encrypting value for context {}", context);
        self.service
            .encrypt(context, identity, value)
            .await
            .map_err(classify_encryption_error)
    }

    /// Reveals `handles` and returns the clear values with their proof.
    pub async fn verify_decryption(
        &self,
        handles: &[Handle],
        context: &str,
    ) -> Result<DecryptionProof> {
        if !self.service.is_initialized().await {
            return Err(ChatCipherError::EncryptionUnavailable);
        }

        let proof = tokio::time::timeout(
            self.verification_timeout,
            self.service.decrypt_for_verification(handles, context),
        )
        .await
        .map_err(|_| ChatCipherError::VerificationTimeout)?
        .map_err(classify_verification_error)?;

        if let Some(missing) = handles.iter().find(|h| !proof.clear_values.contains_key(h)) {
            return Err(ChatCipherError::VerificationRejected(format!(
                "No clear value for handle {}",
                missing
            )));
        }

        Ok(proof)
    }
}

fn classify_encryption_error(error: ChatCipherError) -> ChatCipherError {
    match error {
        ChatCipherError::EncryptionUnavailable | ChatCipherError::EncryptionError(_) => error,
        other => ChatCipherError::EncryptionError(other.to_string()),
    }
}

fn classify_verification_error(error: ChatCipherError) -> ChatCipherError {
    if error.is_already_verified() {
        return ChatCipherError::AlreadyVerified(error.to_string());
    }
    match error {
        ChatCipherError::VerificationRejected(_)
        | ChatCipherError::VerificationTimeout
        | ChatCipherError::EncryptionUnavailable => error,
        other => ChatCipherError::VerificationRejected(other.to_string()),
    }
}
