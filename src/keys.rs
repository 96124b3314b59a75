//! Key derivation for the local FHE stand-in.
//!
//! A single 32-byte seed yields the network encryption key pair (X25519)
//! and the gateway signing key (Ed25519) used for input and decryption
//! proofs.

use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::types::{ChatCipherError, Result, KEY_DERIVATION_INFO, KEY_DERIVATION_SALT};

/// Key material held by a gateway.
pub struct NetworkKeys {
    /// X25519 private key used to open ciphertexts.
    pub encryption_private_key: StaticSecret,
    /// X25519 public key ciphertexts are sealed to.
    pub encryption_public_key: PublicKey,
    /// Ed25519 key that signs input and decryption proofs.
    pub signing_key: SigningKey,
}

impl NetworkKeys {
    /// Derives all network keys from a 32-byte seed.
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        let (encryption_private_key, encryption_public_key) = derive_keys_from_seed(seed)?;
        let seed_bytes: [u8; 32] = seed
            .try_into()
            .map_err(|_| ChatCipherError::InvalidSeedLength(seed.len()))?;

        Ok(Self {
            encryption_private_key,
            encryption_public_key,
            signing_key: SigningKey::from_bytes(&seed_bytes),
        })
    }

    /// Generates fresh random network keys.
    pub fn generate() -> Self {
        let (encryption_private_key, encryption_public_key) = generate_ephemeral_keypair();
        Self {
            encryption_private_key,
            encryption_public_key,
            signing_key: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// Returns the Ed25519 verifying key bytes a ledger checks proofs with.
    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

/// Derive X25519 key pair from a 32-byte seed using HKDF-SHA256.
pub fn derive_keys_from_seed(seed: &[u8]) -> Result<(StaticSecret, PublicKey)> {
    if seed.len() != 32 {
        return Err(ChatCipherError::InvalidSeedLength(seed.len()));
    }

    let hkdf = Hkdf::<Sha256>::new(Some(KEY_DERIVATION_SALT), seed);
    let mut derived_key = [0u8; 32];
    hkdf.expand(KEY_DERIVATION_INFO, &mut derived_key)
        .map_err(|e| ChatCipherError::EncryptionError(format!("HKDF expand failed: {}", e)))?;

    let private_key = StaticSecret::from(derived_key);
    let public_key = PublicKey::from(&private_key);

    Ok((private_key, public_key))
}

/// Generate a random ephemeral X25519 key pair for one ciphertext.
pub fn generate_ephemeral_keypair() -> (StaticSecret, PublicKey) {
    let private_key = StaticSecret::random_from_rng(rand::thread_rng());
    let public_key = PublicKey::from(&private_key);
    (private_key, public_key)
}

/// Perform X25519 ECDH key exchange.
pub fn x25519_ecdh(private_key: &StaticSecret, public_key: &PublicKey) -> [u8; 32] {
    private_key.diffie_hellman(public_key).to_bytes()
}
