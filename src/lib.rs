//! ChatCipher - Encrypted message lifecycle over an FHE record store
//!
//! Rust implementation of the ChatCipher client: integers are encrypted for
//! a contract context, stored as ciphertext handles, and later revealed
//! through a verified decryption proof.

mod types;
mod keys;
mod envelope;
mod signature;
mod models;
mod crypto;
mod gateway;
mod ledger;
mod store;
mod storage;
mod session;
mod status;
mod operations;
mod client;

pub use types::*;
pub use keys::*;
pub use envelope::*;
pub use signature::*;
pub use models::*;
pub use crypto::{decrypt_value, encrypt_value, SimulatedFhe};
pub use gateway::{EncryptionGateway, FheService, DEFAULT_VERIFICATION_TIMEOUT};
pub use ledger::{PendingTransaction, RecordReader, RecordWriter, TransactionReceipt};
pub use store::{PendingConfirmation, RecordStore};
pub use storage::{InMemoryLedger, LedgerSigner};
pub use session::{ActiveSession, Session};
pub use status::{
    JsonLinesSink, OperationHistory, StatusDetail, StatusEvent, StatusReporter, StatusSink,
    TransactionPhase, TransactionStatus, DEFAULT_EVENT_CAPACITY,
};
pub use operations::{OperationTracker, DEFAULT_MAX_TRACKED};
pub use client::{ChatCipher, ChatCipherConfig};
