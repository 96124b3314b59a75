//! End-to-end lifecycle tests for ChatCipher.
//!
//! These tests drive the client against the simulated FHE service and the
//! in-memory ledger, wrapped in counting adapters so each test can assert
//! exactly which collaborators were called.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatcipher::{
    ChatCipher, ChatCipherConfig, ChatCipherError, DecryptionProof, EncryptedInput, FheService,
    Handle, InMemoryLedger, LedgerSigner, OperationStatus, PendingTransaction, RecordReader,
    RecordWriter, Result, Session, SimulatedFhe, StatusDetail, StoredRecord, TransactionPhase,
};

const CONTRACT: &str = "0xABC";
const USER: &str = "0xUser";

#[derive(Default)]
struct Calls {
    encrypt: AtomicUsize,
    decrypt: AtomicUsize,
    create: AtomicUsize,
    verify: AtomicUsize,
    get_record: AtomicUsize,
    reveal_args: Mutex<Vec<(Vec<Handle>, String)>>,
}

impl Calls {
    fn total(&self) -> usize {
        self.encrypt.load(Ordering::SeqCst)
            + self.decrypt.load(Ordering::SeqCst)
            + self.create.load(Ordering::SeqCst)
            + self.verify.load(Ordering::SeqCst)
            + self.get_record.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Script {
    fail_encrypt: AtomicBool,
    reject_reveal: AtomicBool,
    reveal_delay_ms: AtomicU64,
    reject_create: AtomicBool,
    revert_create: AtomicBool,
    fail_listing: AtomicBool,
    broken_ids: Mutex<Vec<String>>,
    verify_error: Mutex<Option<String>>,
}

struct CountingFhe {
    inner: SimulatedFhe,
    calls: Arc<Calls>,
    script: Arc<Script>,
}

#[async_trait::async_trait]
impl FheService for CountingFhe {
    async fn initialize(&self) -> Result<()> {
        self.inner.initialize().await
    }

    async fn is_initialized(&self) -> bool {
        self.inner.is_initialized().await
    }

    async fn encrypt(&self, context: &str, identity: &str, value: u32) -> Result<EncryptedInput> {
        self.calls.encrypt.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_encrypt.load(Ordering::SeqCst) {
            return Err(ChatCipherError::EncryptionError("relayer unreachable".into()));
        }
        self.inner.encrypt(context, identity, value).await
    }

    async fn decrypt_for_verification(
        &self,
        handles: &[Handle],
        context: &str,
    ) -> Result<DecryptionProof> {
        self.calls.decrypt.fetch_add(1, Ordering::SeqCst);
        self.calls
            .reveal_args
            .lock()
            .unwrap()
            .push((handles.to_vec(), context.to_string()));

        let delay = self.script.reveal_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.script.reject_reveal.load(Ordering::SeqCst) {
            return Err(ChatCipherError::Gateway("KMS refused the decryption request".into()));
        }
        self.inner.decrypt_for_verification(handles, context).await
    }
}

struct CountingReader {
    inner: InMemoryLedger,
    calls: Arc<Calls>,
    script: Arc<Script>,
}

#[async_trait::async_trait]
impl RecordReader for CountingReader {
    async fn get_all_ids(&self) -> Result<Vec<String>> {
        if self.script.fail_listing.load(Ordering::SeqCst) {
            return Err(ChatCipherError::Ledger("rpc timeout".into()));
        }
        self.inner.get_all_ids().await
    }

    async fn get_record(&self, id: &str) -> Result<StoredRecord> {
        self.calls.get_record.fetch_add(1, Ordering::SeqCst);
        if self.script.broken_ids.lock().unwrap().iter().any(|b| b == id) {
            return Err(ChatCipherError::Ledger(format!("cannot decode {}", id)));
        }
        self.inner.get_record(id).await
    }

    async fn get_encrypted_handle(&self, id: &str) -> Result<Handle> {
        self.inner.get_encrypted_handle(id).await
    }

    async fn is_available(&self) -> Result<bool> {
        self.inner.is_available().await
    }

    async fn contract_address(&self) -> Result<String> {
        self.inner.contract_address().await
    }
}

struct CountingWriter {
    inner: LedgerSigner,
    calls: Arc<Calls>,
    script: Arc<Script>,
}

#[async_trait::async_trait]
impl RecordWriter for CountingWriter {
    async fn create_record(
        &self,
        id: &str,
        name: &str,
        ciphertext: &[u8],
        proof: &[u8],
        public_value1: u64,
        public_value2: u64,
        note: &str,
    ) -> Result<Box<dyn PendingTransaction>> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        if self.script.reject_create.load(Ordering::SeqCst) {
            return Err(ChatCipherError::SubmissionError(
                "MetaMask Tx Signature: User denied, user rejected transaction".into(),
            ));
        }
        if self.script.revert_create.load(Ordering::SeqCst) {
            return Err(ChatCipherError::Ledger("execution reverted: out of gas".into()));
        }
        self.inner
            .create_record(id, name, ciphertext, proof, public_value1, public_value2, note)
            .await
    }

    async fn submit_verification(
        &self,
        id: &str,
        encoded_clear_values: &[u8],
        proof: &[u8],
    ) -> Result<Box<dyn PendingTransaction>> {
        self.calls.verify.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.script.verify_error.lock().unwrap().clone() {
            return Err(ChatCipherError::Ledger(message));
        }
        self.inner
            .submit_verification(id, encoded_clear_values, proof)
            .await
    }
}

type TestClient = ChatCipher<CountingReader, CountingWriter, CountingFhe>;

struct Harness {
    client: TestClient,
    ledger: InMemoryLedger,
    calls: Arc<Calls>,
    script: Arc<Script>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness() -> Harness {
    harness_with(
        ChatCipherConfig::new()
            .with_display_windows(Duration::from_secs(5), Duration::from_secs(5))
            .with_verification_timeout(Duration::from_secs(5)),
    )
}

fn harness_with(config: ChatCipherConfig) -> Harness {
    init_tracing();

    let fhe = SimulatedFhe::generate();
    let ledger = InMemoryLedger::new(CONTRACT, fhe.verifying_key());
    let calls = Arc::new(Calls::default());
    let script = Arc::new(Script::default());

    let client = ChatCipher::new(
        CountingReader {
            inner: ledger.clone(),
            calls: Arc::clone(&calls),
            script: Arc::clone(&script),
        },
        CountingWriter {
            inner: ledger.signer(USER),
            calls: Arc::clone(&calls),
            script: Arc::clone(&script),
        },
        CountingFhe {
            inner: fhe,
            calls: Arc::clone(&calls),
            script: Arc::clone(&script),
        },
        config,
    );

    Harness {
        client,
        ledger,
        calls,
        script,
    }
}

async fn connected(harness: &Harness) -> Session {
    let session = harness.client.connect(USER).await.unwrap();
    assert_eq!(session.target_context(), Some(CONTRACT));
    assert!(harness.client.initialize_gateway(&session).await);
    session
}

#[tokio::test]
async fn test_create_then_reveal() {
    let h = harness();
    let session = connected(&h).await;

    let op = h.client.create_contact(&session, "Alice", "42").await.unwrap();
    assert_eq!(op.status(), OperationStatus::Succeeded);
    assert!(op.id.starts_with("contact-"));
    assert!(op.ciphertext.is_some());
    assert_eq!(
        op.transitions(),
        &[
            OperationStatus::Idle,
            OperationStatus::Encrypting,
            OperationStatus::Submitting,
            OperationStatus::Confirming,
            OperationStatus::Succeeded,
        ]
    );

    let contacts = h.client.contacts().await;
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].name, "Alice");
    assert!(!contacts[0].is_verified);
    assert_eq!(contacts[0].decrypted_value, None);

    let history = h.client.reporter().history().await;
    assert_eq!(history.len(), 1);
    assert!(history[0].ends_with(": Created new contact: Alice"));

    let stored_handle = h.ledger.get_encrypted_handle(&op.id).await.unwrap();
    assert_eq!(
        stored_handle,
        Handle::for_ciphertext(op.ciphertext.as_deref().unwrap())
    );

    let value = h.client.request_decryption_and_verify(&session, &op.id).await;
    assert_eq!(value, Some(42));
    assert_eq!(h.calls.decrypt.load(Ordering::SeqCst), 1);
    assert_eq!(h.calls.verify.load(Ordering::SeqCst), 1);
    assert_eq!(
        *h.calls.reveal_args.lock().unwrap(),
        vec![(vec![stored_handle], CONTRACT.to_string())]
    );

    let reveals: Vec<_> = h
        .client
        .reporter()
        .events()
        .await
        .into_iter()
        .filter(|e| matches!(e.detail, StatusDetail::Reveal { .. }))
        .collect();
    assert_eq!(
        reveals[0].detail,
        StatusDetail::Reveal {
            record_id: op.id.clone(),
            handle: Some(stored_handle.to_string()),
            clear_value: 42,
            short_circuited: false,
        }
    );

    let contacts = h.client.contacts().await;
    assert!(contacts[0].is_verified);
    assert_eq!(contacts[0].decrypted_value, Some(42));
    assert!(h.client.reporter().history().await[0].ends_with(&format!(": Decrypted data for {}", op.id)));
}

#[tokio::test]
async fn test_verified_record_short_circuits() {
    let h = harness();
    let session = connected(&h).await;

    let op = h.client.create_contact(&session, "Alice", "42").await.unwrap();
    assert_eq!(
        h.client.request_decryption_and_verify(&session, &op.id).await,
        Some(42)
    );

    let value = h.client.request_decryption_and_verify(&session, &op.id).await;
    assert_eq!(value, Some(42));
    assert_eq!(h.calls.decrypt.load(Ordering::SeqCst), 1);
    assert_eq!(h.calls.verify.load(Ordering::SeqCst), 1);

    let events = h.client.reporter().events().await;
    assert!(matches!(
        events.last().map(|e| &e.detail),
        Some(StatusDetail::Reveal { short_circuited: true, handle: None, clear_value: 42, .. })
    ));
}

async fn assert_reveal_failed(h: &Harness) {
    let reporter = h.client.reporter();
    let status = reporter.current_status().await;
    assert_eq!(status.phase, TransactionPhase::Error);
    assert_eq!(status.message, "Decryption failed");
    assert!(!reporter
        .history()
        .await
        .iter()
        .any(|line| line.contains("Decrypted data")));
    assert!(!reporter
        .events()
        .await
        .iter()
        .any(|e| matches!(e.detail, StatusDetail::Reveal { .. })));
}

#[tokio::test]
async fn test_rejected_reveal_reports_failure() {
    let h = harness();
    let session = connected(&h).await;

    let op = h.client.create_contact(&session, "Alice", "42").await.unwrap();
    h.script.reject_reveal.store(true, Ordering::SeqCst);

    let value = h.client.request_decryption_and_verify(&session, &op.id).await;
    assert_eq!(value, None);
    assert_eq!(h.calls.decrypt.load(Ordering::SeqCst), 1);
    assert_eq!(h.calls.verify.load(Ordering::SeqCst), 0);
    assert_reveal_failed(&h).await;
    assert!(!h.ledger.get_record(&op.id).await.unwrap().is_verified);
}

#[tokio::test]
async fn test_reveal_timeout_reports_failure() {
    let h = harness_with(
        ChatCipherConfig::new()
            .with_display_windows(Duration::from_secs(5), Duration::from_secs(5))
            .with_verification_timeout(Duration::from_millis(50)),
    );
    let session = connected(&h).await;

    let op = h.client.create_contact(&session, "Alice", "42").await.unwrap();
    h.script.reveal_delay_ms.store(500, Ordering::SeqCst);

    let value = h.client.request_decryption_and_verify(&session, &op.id).await;
    assert_eq!(value, None);
    assert_eq!(h.calls.verify.load(Ordering::SeqCst), 0);
    assert_reveal_failed(&h).await;
}

#[tokio::test]
async fn test_dropped_verification_can_be_retried() {
    let h = harness();
    let session = connected(&h).await;

    let op = h.client.create_contact(&session, "Alice", "42").await.unwrap();
    h.ledger.drop_next_transaction();

    let value = h.client.request_decryption_and_verify(&session, &op.id).await;
    assert_eq!(value, None);
    assert_eq!(h.calls.verify.load(Ordering::SeqCst), 1);
    assert_reveal_failed(&h).await;
    assert!(!h.ledger.get_record(&op.id).await.unwrap().is_verified);

    let value = h.client.request_decryption_and_verify(&session, &op.id).await;
    assert_eq!(value, Some(42));
    assert_eq!(h.calls.decrypt.load(Ordering::SeqCst), 2);
    assert_eq!(h.calls.verify.load(Ordering::SeqCst), 2);
    assert!(h.client.contacts().await[0].is_verified);
}

#[tokio::test]
async fn test_encryption_failure_fails_immediately() {
    let h = harness();
    let session = connected(&h).await;
    h.script.fail_encrypt.store(true, Ordering::SeqCst);

    let op = h.client.create_contact(&session, "Alice", "42").await.unwrap();
    assert_eq!(
        op.transitions(),
        &[
            OperationStatus::Idle,
            OperationStatus::Encrypting,
            OperationStatus::Failed
        ]
    );
    assert!(matches!(op.error(), Some(ChatCipherError::EncryptionError(_))));
    assert_eq!(h.calls.create.load(Ordering::SeqCst), 0);
    assert!(h.ledger.is_empty().await);

    let reporter = h.client.reporter();
    assert_eq!(
        reporter.transitions_for(&op.id).await,
        vec![OperationStatus::Encrypting, OperationStatus::Failed]
    );
    let status = reporter.current_status().await;
    assert_eq!(status.phase, TransactionPhase::Error);
    assert!(status.message.starts_with("Creation failed: "));
    assert!(reporter.history().await.is_empty());

    let tracked = h.client.tracker().get(&op.id).await.unwrap();
    assert_eq!(tracked.status(), OperationStatus::Failed);
}

#[tokio::test]
async fn test_user_rejection() {
    let h = harness();
    let session = connected(&h).await;
    h.script.reject_create.store(true, Ordering::SeqCst);

    let op = h.client.create_contact(&session, "Alice", "42").await.unwrap();
    assert_eq!(op.status(), OperationStatus::Failed);
    assert_eq!(op.error(), Some(&ChatCipherError::UserRejected));
    assert_eq!(
        op.transitions(),
        &[
            OperationStatus::Idle,
            OperationStatus::Encrypting,
            OperationStatus::Submitting,
            OperationStatus::Failed
        ]
    );
    assert_eq!(
        h.client.reporter().current_status().await.message,
        "Transaction rejected"
    );
}

#[tokio::test]
async fn test_ledger_revert_fails_submission() {
    let h = harness();
    let session = connected(&h).await;
    h.script.revert_create.store(true, Ordering::SeqCst);

    let op = h.client.create_contact(&session, "Alice", "42").await.unwrap();
    assert_eq!(
        op.transitions(),
        &[
            OperationStatus::Idle,
            OperationStatus::Encrypting,
            OperationStatus::Submitting,
            OperationStatus::Failed
        ]
    );
    assert!(matches!(op.error(), Some(ChatCipherError::SubmissionError(_))));
    assert!(h.ledger.is_empty().await);

    let status = h.client.reporter().current_status().await;
    assert_eq!(status.phase, TransactionPhase::Error);
    assert!(status.message.starts_with("Creation failed: Submission failed"));
    assert!(h.client.reporter().history().await.is_empty());
}

#[tokio::test]
async fn test_dropped_transaction_fails_confirmation() {
    let h = harness();
    let session = connected(&h).await;
    h.ledger.drop_next_transaction();

    let op = h.client.create_contact(&session, "Alice", "42").await.unwrap();
    assert_eq!(
        op.transitions(),
        &[
            OperationStatus::Idle,
            OperationStatus::Encrypting,
            OperationStatus::Submitting,
            OperationStatus::Confirming,
            OperationStatus::Failed
        ]
    );
    assert!(matches!(op.error(), Some(ChatCipherError::ConfirmationError(_))));
    assert!(h.ledger.is_empty().await);
}

#[tokio::test]
async fn test_disconnected_session_calls_nothing() {
    let h = harness();
    let session = Session::disconnected();

    let result = h.client.create_contact(&session, "Alice", "42").await;
    assert_eq!(result.unwrap_err(), ChatCipherError::NotConnected);
    assert!(h.client.tracker().is_empty().await);

    let value = h
        .client
        .request_decryption_and_verify(&session, "contact-1")
        .await;
    assert_eq!(value, None);
    assert_eq!(h.calls.total(), 0);

    let status = h.client.reporter().current_status().await;
    assert_eq!(status.phase, TransactionPhase::Error);
    assert_eq!(status.message, "Please connect wallet first");
}

#[tokio::test]
async fn test_concurrent_verification_is_absorbed() {
    let h = harness();
    let session = connected(&h).await;

    let op = h.client.create_contact(&session, "Alice", "42").await.unwrap();
    *h.script.verify_error.lock().unwrap() =
        Some("execution reverted: Data already verified".to_string());

    let value = h.client.request_decryption_and_verify(&session, &op.id).await;
    assert_eq!(value, None);
    assert_eq!(h.calls.verify.load(Ordering::SeqCst), 1);

    let status = h.client.reporter().current_status().await;
    assert_ne!(status.message, "Decryption failed");
    assert_ne!(status.phase, TransactionPhase::Error);
    assert!(!h
        .client
        .reporter()
        .history()
        .await
        .iter()
        .any(|line| line.contains("Decrypted data")));
}

#[tokio::test]
async fn test_refresh_skips_unreadable_records() {
    let h = harness();
    let session = connected(&h).await;

    let mut ids = Vec::new();
    for (name, text) in [("Alice", "1"), ("Bob", "2"), ("Carol", "3")] {
        let op = h.client.create_contact(&session, name, text).await.unwrap();
        assert_eq!(op.status(), OperationStatus::Succeeded);
        ids.push(op.id);
    }
    h.script.broken_ids.lock().unwrap().push(ids[1].clone());

    let contacts = h.client.refresh_contacts().await;
    assert_eq!(contacts.len(), 2);
    assert!(contacts.iter().all(|c| c.id != ids[1]));
    assert!(h.client.reporter().history().await[0].ends_with(": Loaded 2 contacts"));

    h.script.fail_listing.store(true, Ordering::SeqCst);
    let contacts = h.client.refresh_contacts().await;
    assert_eq!(contacts.len(), 2);
    assert_eq!(
        h.client.reporter().current_status().await.message,
        "Failed to load contacts"
    );
}

#[tokio::test]
async fn test_send_message() {
    let h = harness();
    let session = connected(&h).await;

    h.client.create_contact(&session, "Bob", "5").await.unwrap();
    let bob = h.client.contacts().await.remove(0);

    assert!(matches!(
        h.client.send_message(&session, &bob, "   ").await,
        Err(ChatCipherError::InvalidPlaintext(_))
    ));

    let op = h.client.send_message(&session, &bob, "7").await.unwrap();
    assert_eq!(op.status(), OperationStatus::Succeeded);
    assert!(op.id.starts_with("message-"));
    assert_eq!(op.metadata.public_value2, 7);
    assert_eq!(op.metadata.note, "Message to Bob");

    let messages = h.client.messages_for(&bob.id).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "7");
    assert!(messages[0].is_own);

    assert_eq!(h.client.contacts().await.len(), 2);
    assert!(h.client.reporter().history().await[0].ends_with(": Sent encrypted message to Bob"));
}

#[tokio::test]
async fn test_check_availability() {
    let h = harness();

    assert!(h.client.check_availability().await);
    assert!(h.client.reporter().history().await[0].ends_with(": Checked FHE system availability"));

    h.ledger.set_available(false);
    assert!(!h.client.check_availability().await);
}
