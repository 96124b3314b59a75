//! Local FHE stand-in.
//!
//! `SimulatedFhe` honours the FHE service contract without homomorphic
//! arithmetic: each value is sealed to a network X25519 key with an
//! ephemeral key exchange, and the symmetric key is bound to the
//! `(context, identity)` pair the ciphertext was produced for. The gateway
//! signs input proofs at encryption time and decryption proofs at reveal
//! time, so an `InMemoryLedger` holding its verifying key can check both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::debug;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::envelope::CiphertextEnvelope;
use crate::gateway::FheService;
use crate::keys::{generate_ephemeral_keypair, x25519_ecdh, NetworkKeys};
use crate::models::{encode_clear_values, DecryptionProof, EncryptedInput, Handle};
use crate::signature::{sign_decryption_proof, sign_input_proof};
use crate::types::{
    ChatCipherError, Result, ENCRYPTION_INFO_PREFIX, ENVELOPE_VERSION, NONCE_SIZE,
    SCHEME_EUINT32,
};

fn binding_info(context: &str, identity: &str) -> Vec<u8> {
    let context = context.to_ascii_lowercase();
    let identity = identity.to_ascii_lowercase();
    let mut info = Vec::with_capacity(ENCRYPTION_INFO_PREFIX.len() + 8 + context.len() + identity.len());
    info.extend_from_slice(ENCRYPTION_INFO_PREFIX);
    info.extend_from_slice(&(context.len() as u32).to_be_bytes());
    info.extend_from_slice(context.as_bytes());
    info.extend_from_slice(&(identity.len() as u32).to_be_bytes());
    info.extend_from_slice(identity.as_bytes());
    info
}

fn derive_value_key(shared_secret: &[u8; 32], ephemeral_public: &[u8; 32], info: &[u8]) -> Result<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(Some(ephemeral_public), shared_secret);
    let mut symmetric_key = [0u8; 32];
    hkdf.expand(info, &mut symmetric_key)
        .map_err(|e| ChatCipherError::EncryptionError(format!("HKDF expand failed: {}", e)))?;
    Ok(symmetric_key)
}

/// Seal a value for one `(context, identity)` pair.
pub fn encrypt_value(
    value: u32,
    context: &str,
    identity: &str,
    network_public_key: &PublicKey,
) -> Result<CiphertextEnvelope> {
    let (ephemeral_private, ephemeral_public) = generate_ephemeral_keypair();
    let shared_secret = x25519_ecdh(&ephemeral_private, network_public_key);
    let symmetric_key = derive_value_key(
        &shared_secret,
        ephemeral_public.as_bytes(),
        &binding_info(context, identity),
    )?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(&symmetric_key)
        .map_err(|e| ChatCipherError::EncryptionError(format!("Cipher init failed: {}", e)))?;
    let ciphertext = cipher
        .encrypt(nonce, value.to_be_bytes().as_slice())
        .map_err(|e| ChatCipherError::EncryptionError(format!("Encryption failed: {}", e)))?;

    Ok(CiphertextEnvelope {
        version: ENVELOPE_VERSION,
        scheme: SCHEME_EUINT32,
        ephemeral_public_key: *ephemeral_public.as_bytes(),
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Open a sealed value. Fails when `context` or `identity` differ from the
/// pair the value was sealed for.
pub fn decrypt_value(
    envelope: &CiphertextEnvelope,
    context: &str,
    identity: &str,
    network_private_key: &StaticSecret,
) -> Result<u32> {
    let ephemeral_public = PublicKey::from(envelope.ephemeral_public_key);
    let shared_secret = x25519_ecdh(network_private_key, &ephemeral_public);
    let symmetric_key = derive_value_key(
        &shared_secret,
        &envelope.ephemeral_public_key,
        &binding_info(context, identity),
    )
    .map_err(|e| ChatCipherError::DecryptionError(e.to_string()))?;

    let cipher = ChaCha20Poly1305::new_from_slice(&symmetric_key)
        .map_err(|e| ChatCipherError::DecryptionError(format!("Cipher init failed: {}", e)))?;
    let nonce = Nonce::from_slice(&envelope.nonce);

    let plaintext = cipher
        .decrypt(nonce, envelope.ciphertext.as_slice())
        .map_err(|e| ChatCipherError::DecryptionError(format!("Decryption failed: {}", e)))?;

    let bytes: [u8; 4] = plaintext.as_slice().try_into().map_err(|_| {
        ChatCipherError::DecryptionError(format!(
            "Sealed value must be 4 bytes, got {}",
            plaintext.len()
        ))
    })?;
    Ok(u32::from_be_bytes(bytes))
}

/// A ciphertext the gateway has issued.
struct SealedInput {
    ciphertext: Vec<u8>,
    context: String,
    identity: String,
}

/// In-process FHE service for development and tests.
pub struct SimulatedFhe {
    keys: NetworkKeys,
    initialized: AtomicBool,
    issued: Arc<RwLock<HashMap<Handle, SealedInput>>>,
}

impl SimulatedFhe {
    /// Creates an uninitialized service with keys derived from `seed`.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        Ok(Self::with_keys(NetworkKeys::from_seed(seed)?))
    }

    /// Creates an uninitialized service with fresh random keys.
    pub fn generate() -> Self {
        Self::with_keys(NetworkKeys::generate())
    }

    fn with_keys(keys: NetworkKeys) -> Self {
        Self {
            keys,
            initialized: AtomicBool::new(false),
            issued: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Ed25519 key a ledger uses to check this gateway's proofs.
    pub fn verifying_key(&self) -> [u8; 32] {
        self.keys.verifying_key_bytes()
    }
}

#[async_trait::async_trait]
impl FheService for SimulatedFhe {
    async fn initialize(&self) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn encrypt(&self, context: &str, identity: &str, value: u32) -> Result<EncryptedInput> {
        if !self.is_initialized().await {
            return Err(ChatCipherError::EncryptionUnavailable);
        }

        let envelope = encrypt_value(value, context, identity, &self.keys.encryption_public_key)?;
        let ciphertext = envelope.encode();
        let proof = sign_input_proof(&ciphertext, context, identity, &self.keys.signing_key);

        let handle = Handle::for_ciphertext(&ciphertext);
        debug!("Issued ciphertext {} for context {}", handle, context);
        self.issued.write().await.insert(
            handle,
            SealedInput {
                ciphertext: ciphertext.clone(),
                context: context.to_string(),
                identity: identity.to_string(),
            },
        );

        Ok(EncryptedInput {
            ciphertext,
            proof: proof.to_vec(),
        })
    }

    async fn decrypt_for_verification(
        &self,
        handles: &[Handle],
        context: &str,
    ) -> Result<DecryptionProof> {
        if !self.is_initialized().await {
            return Err(ChatCipherError::EncryptionUnavailable);
        }

        let issued = self.issued.read().await;
        let mut clear_values = HashMap::with_capacity(handles.len());
        let mut ordered = Vec::with_capacity(handles.len());

        for handle in handles {
            let sealed = issued.get(handle).ok_or_else(|| {
                ChatCipherError::VerificationRejected(format!("Unknown handle {}", handle))
            })?;

            if !sealed.context.eq_ignore_ascii_case(context) {
                return Err(ChatCipherError::VerificationRejected(format!(
                    "Handle {} belongs to another context",
                    handle
                )));
            }

            let envelope = CiphertextEnvelope::decode(&sealed.ciphertext)
                .map_err(|e| ChatCipherError::VerificationRejected(format!("Handle {}: {}", handle, e)))?;
            let value = decrypt_value(
                &envelope,
                &sealed.context,
                &sealed.identity,
                &self.keys.encryption_private_key,
            )?;
            clear_values.insert(*handle, value);
            ordered.push(value);
        }

        let encoded_clear_values = encode_clear_values(&ordered);
        let proof = sign_decryption_proof(
            handles,
            &encoded_clear_values,
            context,
            &self.keys.signing_key,
        );

        Ok(DecryptionProof {
            clear_values,
            encoded_clear_values,
            proof: proof.to_vec(),
        })
    }
}
