//! Input and decryption proofs for the local FHE stand-in.
//!
//! An input proof is the gateway's Ed25519 signature over a ciphertext and
//! the `(context, identity)` pair it was sealed for. A decryption proof is
//! a signature over the revealed clear values and the handles they belong
//! to. A ledger holding the gateway's verifying key accepts neither
//! without a valid signature.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::models::Handle;
use crate::types::{
    ChatCipherError, Result, DECRYPTION_PROOF_DOMAIN, INPUT_PROOF_DOMAIN, SIGNATURE_SIZE,
};

fn absorb(hasher: &mut Sha256, field: &[u8]) {
    hasher.update((field.len() as u32).to_be_bytes());
    hasher.update(field);
}

fn input_digest(ciphertext: &[u8], context: &str, identity: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(INPUT_PROOF_DOMAIN);
    absorb(&mut hasher, ciphertext);
    absorb(&mut hasher, context.to_ascii_lowercase().as_bytes());
    absorb(&mut hasher, identity.to_ascii_lowercase().as_bytes());
    hasher.finalize().into()
}

fn decryption_digest(handles: &[Handle], encoded_clear_values: &[u8], context: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(DECRYPTION_PROOF_DOMAIN);
    hasher.update((handles.len() as u32).to_be_bytes());
    for handle in handles {
        hasher.update(handle.as_bytes());
    }
    absorb(&mut hasher, encoded_clear_values);
    absorb(&mut hasher, context.to_ascii_lowercase().as_bytes());
    hasher.finalize().into()
}

fn parse_verifying_key(bytes: &[u8; 32]) -> Result<VerifyingKey> {
    VerifyingKey::from_bytes(bytes)
        .map_err(|e| ChatCipherError::InvalidPublicKey(format!("Invalid Ed25519 public key: {}", e)))
}

fn parse_signature(signature: &[u8]) -> Result<Signature> {
    if signature.len() != SIGNATURE_SIZE {
        return Err(ChatCipherError::InvalidSignature(format!(
            "Signature must be {} bytes, got {}",
            SIGNATURE_SIZE,
            signature.len()
        )));
    }

    let signature_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| ChatCipherError::InvalidSignature("Invalid signature bytes".into()))?;

    Ok(Signature::from_bytes(&signature_bytes))
}

/// Signs a ciphertext for one `(context, identity)` pair.
pub fn sign_input_proof(
    ciphertext: &[u8],
    context: &str,
    identity: &str,
    signing_key: &SigningKey,
) -> [u8; 64] {
    signing_key
        .sign(&input_digest(ciphertext, context, identity))
        .to_bytes()
}

/// Verifies an input proof.
///
/// Returns `false` when the proof was made for another ciphertext,
/// context, or identity.
pub fn verify_input_proof(
    ciphertext: &[u8],
    context: &str,
    identity: &str,
    verifying_key: &[u8; 32],
    proof: &[u8],
) -> Result<bool> {
    let verifying_key = parse_verifying_key(verifying_key)?;
    let signature = parse_signature(proof)?;
    Ok(verifying_key
        .verify(&input_digest(ciphertext, context, identity), &signature)
        .is_ok())
}

/// Signs revealed clear values for a set of handles.
pub fn sign_decryption_proof(
    handles: &[Handle],
    encoded_clear_values: &[u8],
    context: &str,
    signing_key: &SigningKey,
) -> [u8; 64] {
    signing_key
        .sign(&decryption_digest(handles, encoded_clear_values, context))
        .to_bytes()
}

/// Verifies a decryption proof.
pub fn verify_decryption_proof(
    handles: &[Handle],
    encoded_clear_values: &[u8],
    context: &str,
    verifying_key: &[u8; 32],
    proof: &[u8],
) -> Result<bool> {
    let verifying_key = parse_verifying_key(verifying_key)?;
    let signature = parse_signature(proof)?;
    Ok(verifying_key
        .verify(
            &decryption_digest(handles, encoded_clear_values, context),
            &signature,
        )
        .is_ok())
}
