//! Ciphertext envelope encoding and decoding.

use crate::types::{
    ChatCipherError, Result, ENVELOPE_VERSION, HEADER_SIZE, NONCE_SIZE, PUBLIC_KEY_SIZE,
    SCHEME_EUINT32, TAG_SIZE,
};

/// Sealed ciphertext of one encrypted integer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiphertextEnvelope {
    /// Envelope version.
    pub version: u8,
    /// Encryption scheme of the sealed value.
    pub scheme: u8,
    /// Ephemeral X25519 public key (32 bytes).
    pub ephemeral_public_key: [u8; 32],
    /// Nonce for encryption (12 bytes).
    pub nonce: [u8; 12],
    /// Sealed value plus authentication tag.
    pub ciphertext: Vec<u8>,
}

impl CiphertextEnvelope {
    /// Encode the envelope to bytes.
    ///
    /// Format (46-byte header + ciphertext):
    /// - [0]      version (0x01)
    /// - [1]      scheme (0x20)
    /// - [2-33]   ephemeralPublicKey (32 bytes)
    /// - [34-45]  nonce (12 bytes)
    /// - [46+]    ciphertext (value + 16-byte tag)
    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(HEADER_SIZE + self.ciphertext.len());
        data.push(self.version);
        data.push(self.scheme);
        data.extend_from_slice(&self.ephemeral_public_key);
        data.extend_from_slice(&self.nonce);
        data.extend_from_slice(&self.ciphertext);
        data
    }

    /// Decode bytes into an envelope.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE + TAG_SIZE {
            return Err(ChatCipherError::InvalidEnvelope(format!(
                "Data too short: {} bytes (minimum {})",
                data.len(),
                HEADER_SIZE + TAG_SIZE
            )));
        }

        let version = data[0];
        let scheme = data[1];

        if version != ENVELOPE_VERSION {
            return Err(ChatCipherError::UnknownVersion(version));
        }

        if scheme != SCHEME_EUINT32 {
            return Err(ChatCipherError::UnknownScheme(scheme));
        }

        let mut offset = 2;

        let mut ephemeral_public_key = [0u8; 32];
        ephemeral_public_key.copy_from_slice(&data[offset..offset + PUBLIC_KEY_SIZE]);
        offset += PUBLIC_KEY_SIZE;

        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&data[offset..offset + NONCE_SIZE]);
        offset += NONCE_SIZE;

        let ciphertext = data[offset..].to_vec();

        Ok(Self {
            version,
            scheme,
            ephemeral_public_key,
            nonce,
            ciphertext,
        })
    }
}

/// Check if data looks like a ciphertext envelope.
pub fn is_ciphertext_envelope(data: &[u8]) -> bool {
    if data.len() < HEADER_SIZE + TAG_SIZE {
        return false;
    }
    data[0] == ENVELOPE_VERSION && data[1] == SCHEME_EUINT32
}
