//! Main ChatCipher client.
//!
//! This module drives every encrypted write through
//! encrypt -> submit -> confirm and every reveal through
//! decrypt -> verify, reporting each step to the status reporter.
//! Collaborator failures are mapped and reported here; callers only ever
//! see a terminal operation record, an optional clear value, or a
//! precondition error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::gateway::{EncryptionGateway, FheService, DEFAULT_VERIFICATION_TIMEOUT};
use crate::ledger::{RecordReader, RecordWriter};
use crate::models::{
    unix_millis, ChatMessage, ContactEntry, DecryptionRequest, DeliveryState, OperationKind,
    OperationRecord, OperationStatus, RecordMetadata,
};
use crate::operations::{OperationTracker, DEFAULT_MAX_TRACKED};
use crate::session::{ActiveSession, Session};
use crate::status::{StatusReporter, TransactionPhase, DEFAULT_EVENT_CAPACITY};
use crate::store::RecordStore;
use crate::types::{parse_message_value, ChatCipherError, Result};

/// Configuration for the ChatCipher client.
#[derive(Debug, Clone)]
pub struct ChatCipherConfig {
    /// How long a success status stays visible.
    pub success_display: Duration,
    /// How long an error status stays visible.
    pub error_display: Duration,
    /// Number of history lines kept.
    pub history_capacity: usize,
    /// Bound on one reveal call to the gateway.
    pub verification_timeout: Duration,
    /// Number of operations the tracker keeps.
    pub max_tracked_operations: usize,
    /// Number of status events kept in memory.
    pub max_status_events: usize,
}

impl Default for ChatCipherConfig {
    fn default() -> Self {
        Self {
            success_display: Duration::from_secs(2),
            error_display: Duration::from_secs(3),
            history_capacity: 10,
            verification_timeout: DEFAULT_VERIFICATION_TIMEOUT,
            max_tracked_operations: DEFAULT_MAX_TRACKED,
            max_status_events: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ChatCipherConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the success and error display windows.
    pub fn with_display_windows(mut self, success: Duration, error: Duration) -> Self {
        self.success_display = success;
        self.error_display = error;
        self
    }

    /// Sets the reveal timeout.
    pub fn with_verification_timeout(mut self, timeout: Duration) -> Self {
        self.verification_timeout = timeout;
        self
    }

    /// Sets the number of history lines kept.
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Sets the number of status events kept in memory.
    pub fn with_max_status_events(mut self, capacity: usize) -> Self {
        self.max_status_events = capacity;
        self
    }
}

/// The ChatCipher lifecycle orchestrator.
pub struct ChatCipher<R, W, F>
where
    R: RecordReader,
    W: RecordWriter,
    F: FheService,
{
    /// Configuration.
    config: ChatCipherConfig,
    /// Record store adapter.
    store: RecordStore<R, W>,
    /// Encryption gateway adapter.
    gateway: EncryptionGateway<F>,
    /// Status and history consumer.
    reporter: Arc<StatusReporter>,
    /// Snapshots of every started operation.
    tracker: OperationTracker,
    /// Contact projection, replaced wholesale on reload.
    contacts: Arc<RwLock<Vec<ContactEntry>>>,
    /// Messages this client sent.
    messages: Arc<RwLock<Vec<ChatMessage>>>,
    /// Set while the FHE service is initializing.
    initializing: AtomicBool,
}

impl<R, W, F> ChatCipher<R, W, F>
where
    R: RecordReader,
    W: RecordWriter,
    F: FheService,
{
    /// Creates a client from the ledger handles and the FHE service.
    pub fn new(reader: R, writer: W, fhe: F, config: ChatCipherConfig) -> Self {
        let reporter = StatusReporter::new(
            config.success_display,
            config.error_display,
            config.history_capacity,
        )
        .with_event_capacity(config.max_status_events);

        Self {
            store: RecordStore::new(reader, writer),
            gateway: EncryptionGateway::new(fhe)
                .with_verification_timeout(config.verification_timeout),
            reporter: Arc::new(reporter),
            tracker: OperationTracker::new(config.max_tracked_operations),
            contacts: Arc::new(RwLock::new(Vec::new())),
            messages: Arc::new(RwLock::new(Vec::new())),
            initializing: AtomicBool::new(false),
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ChatCipherConfig {
        &self.config
    }

    /// Returns the status reporter.
    pub fn reporter(&self) -> Arc<StatusReporter> {
        Arc::clone(&self.reporter)
    }

    /// Returns the operation tracker.
    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }

    /// Returns the record store adapter.
    pub fn store(&self) -> &RecordStore<R, W> {
        &self.store
    }

    /// Returns the encryption gateway adapter.
    pub fn gateway(&self) -> &EncryptionGateway<F> {
        &self.gateway
    }

    /// Opens a session for `address` with the target context resolved
    /// from the record contract.
    pub async fn connect(&self, address: &str) -> Result<Session> {
        let mut session = Session::connected(address);
        session.resolve_context(self.store.reader()).await?;
        info!("Connected {} to {:?}", address, session.target_context());
        Ok(session)
    }

    /// Initializes the FHE service once a session is connected.
    ///
    /// Returns whether the service is ready afterwards.
    pub async fn initialize_gateway(&self, session: &Session) -> bool {
        if !session.is_connected() {
            return false;
        }
        if self.gateway.is_initialized().await {
            return true;
        }
        if self.initializing.swap(true, Ordering::SeqCst) {
            debug!("FHE initialization already in progress");
            return false;
        }

        let result = self.gateway.initialize().await;
        self.initializing.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!("FHE service initialized");
                true
            }
            Err(e) => {
                warn!("FHE initialization failed: {}", e);
                self.reporter
                    .show(TransactionPhase::Error, "FHEVM initialization failed")
                    .await;
                false
            }
        }
    }

    /// Encrypts `plaintext`, stores it with `metadata`, and waits for
    /// finality.
    ///
    /// Returns `NotConnected` without touching any collaborator when the
    /// session has no identity or target context. Otherwise returns the
    /// operation in its terminal status; a failed phase is recorded on the
    /// operation, not returned as an error.
    pub async fn submit_encrypted_record(
        &self,
        session: &Session,
        kind: OperationKind,
        name: &str,
        plaintext: u32,
        metadata: RecordMetadata,
    ) -> Result<OperationRecord> {
        let active = match session.require_active() {
            Ok(active) => active,
            Err(e) => {
                self.reporter
                    .show(TransactionPhase::Error, "Please connect wallet first")
                    .await;
                return Err(e);
            }
        };

        let mut operation = OperationRecord::new(kind, name, plaintext, metadata);
        self.tracker.track(&operation).await;
        info!("Starting {:?} operation {}", kind, operation.id);

        if let Err(error) = self.drive(&mut operation, active).await {
            warn!(
                "Operation {} failed during {}: {}",
                operation.id,
                operation.status(),
                error
            );
            match operation.fail(error) {
                Ok(()) => self.publish(&operation).await,
                Err(e) => warn!("Could not mark {} failed: {}", operation.id, e),
            }
            return Ok(operation);
        }

        self.reload_contacts().await;
        let action = match kind {
            OperationKind::Contact => format!("Created new contact: {}", operation.name),
            OperationKind::Message => format!("Sent encrypted message to {}", operation.name),
        };
        self.reporter.record_history(&action).await;

        Ok(operation)
    }

    async fn drive(
        &self,
        operation: &mut OperationRecord,
        active: ActiveSession<'_>,
    ) -> Result<()> {
        self.enter(operation, OperationStatus::Encrypting).await?;
        let input = self
            .gateway
            .encrypt(active.target_context, active.identity, operation.payload)
            .await?;
        operation.attach_encryption(input.clone());

        self.enter(operation, OperationStatus::Submitting).await?;
        let pending = self
            .store
            .create(&operation.id, &operation.name, &input, &operation.metadata)
            .await?;

        self.enter(operation, OperationStatus::Confirming).await?;
        let receipt = pending.await_confirmation().await?;
        debug!(
            "Operation {} confirmed in block {}",
            operation.id, receipt.block_number
        );

        self.enter(operation, OperationStatus::Succeeded).await
    }

    async fn enter(&self, operation: &mut OperationRecord, next: OperationStatus) -> Result<()> {
        operation.advance(next)?;
        self.publish(operation).await;
        Ok(())
    }

    async fn publish(&self, operation: &OperationRecord) {
        if let Err(e) = self.tracker.update(operation).await {
            warn!("Tracker rejected update for {}: {}", operation.id, e);
        }
        self.reporter
            .transition(operation, phase_message(operation))
            .await;
    }

    /// Creates a contact whose initial message is `message_text`
    /// encrypted as an integer.
    pub async fn create_contact(
        &self,
        session: &Session,
        name: &str,
        message_text: &str,
    ) -> Result<OperationRecord> {
        let value = self.parse_or_report(message_text, "Creation failed").await?;
        let (public_value1, public_value2) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..100), rng.gen_range(0..100))
        };

        self.submit_encrypted_record(
            session,
            OperationKind::Contact,
            name,
            value,
            RecordMetadata::new(public_value1, public_value2, "Initial encrypted message"),
        )
        .await
    }

    /// Sends `text` to `contact` as an encrypted integer.
    pub async fn send_message(
        &self,
        session: &Session,
        contact: &ContactEntry,
        text: &str,
    ) -> Result<OperationRecord> {
        if text.trim().is_empty() {
            return Err(ChatCipherError::InvalidPlaintext("message is empty".to_string()));
        }
        let value = self.parse_or_report(text, "Failed to send message").await?;
        let sent_at = SystemTime::now();

        let operation = self
            .submit_encrypted_record(
                session,
                OperationKind::Message,
                &contact.name,
                value,
                RecordMetadata::new(
                    unix_millis(sent_at),
                    u64::from(value),
                    format!("Message to {}", contact.name),
                ),
            )
            .await?;

        if operation.status() == OperationStatus::Succeeded {
            self.messages.write().await.push(ChatMessage {
                id: operation.id.clone(),
                contact_id: contact.id.clone(),
                content: text.to_string(),
                timestamp: sent_at,
                is_encrypted: true,
                is_own: true,
                delivery: DeliveryState::Sent,
            });
        }

        Ok(operation)
    }

    async fn parse_or_report(&self, text: &str, failure: &str) -> Result<u32> {
        match parse_message_value(text) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.reporter
                    .show(TransactionPhase::Error, format!("{}: {}", failure, e))
                    .await;
                Err(e)
            }
        }
    }

    /// Reveals a stored record's value and records the revelation.
    ///
    /// Already-verified records return their stored value without a
    /// gateway call. A record another actor revealed concurrently reloads
    /// the projection and returns `None` quietly; every other failure is
    /// reported and returns `None`.
    pub async fn request_decryption_and_verify(
        &self,
        session: &Session,
        record_id: &str,
    ) -> Option<u32> {
        let active = match session.require_active() {
            Ok(active) => active,
            Err(_) => {
                self.reporter
                    .show(TransactionPhase::Error, "Please connect wallet first")
                    .await;
                return None;
            }
        };

        let mut request = DecryptionRequest::new(record_id);
        match self.reveal(&mut request, active).await {
            Ok(value) => {
                self.reporter.reveal(&request).await;
                Some(value)
            }
            Err(error) if error.is_already_verified() => {
                info!("Record {} was verified by another actor", record_id);
                self.reload_contacts().await;
                None
            }
            Err(error) => {
                warn!("Reveal of {} failed: {}", record_id, error);
                self.reporter
                    .show(TransactionPhase::Error, "Decryption failed")
                    .await;
                None
            }
        }
    }

    async fn reveal(
        &self,
        request: &mut DecryptionRequest,
        active: ActiveSession<'_>,
    ) -> Result<u32> {
        let record = self.store.get_public_fields(&request.record_id).await?;
        if record.is_verified {
            debug!("Record {} already verified", request.record_id);
            request.resolve_verified(record.decrypted_value);
            return Ok(record.decrypted_value);
        }

        let handle = self.store.get_encrypted_handle(&request.record_id).await?;
        request.encrypted_handle = Some(handle);

        let revealed = self
            .gateway
            .verify_decryption(&[handle], active.target_context)
            .await?;

        let pending = self
            .store
            .submit_verification(
                &request.record_id,
                &revealed.encoded_clear_values,
                &revealed.proof,
            )
            .await?;
        pending.await_confirmation().await?;

        let value = revealed.clear_values.get(&handle).copied().ok_or_else(|| {
            ChatCipherError::VerificationRejected(format!("No clear value for handle {}", handle))
        })?;
        request.result_clear_value = Some(value);

        self.reload_contacts().await;
        self.reporter
            .record_history(&format!("Decrypted data for {}", request.record_id))
            .await;

        Ok(value)
    }

    /// Rebuilds the contact projection from the store and logs it in the
    /// history.
    pub async fn refresh_contacts(&self) -> Vec<ContactEntry> {
        match self.load_contacts().await {
            Some(entries) => {
                self.reporter
                    .record_history(&format!("Loaded {} contacts", entries.len()))
                    .await;
                entries
            }
            None => self.contacts().await,
        }
    }

    async fn reload_contacts(&self) {
        self.load_contacts().await;
    }

    async fn load_contacts(&self) -> Option<Vec<ContactEntry>> {
        let ids = match self.store.list_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Failed to list records: {}", e);
                self.reporter
                    .show(TransactionPhase::Error, "Failed to load contacts")
                    .await;
                return None;
            }
        };

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get_public_fields(&id).await {
                Ok(record) => entries.push(ContactEntry::from_record(record)),
                Err(e) => warn!("Error loading contact {}: {}", id, e),
            }
        }

        *self.contacts.write().await = entries.clone();
        debug!("Contact projection rebuilt with {} entries", entries.len());
        Some(entries)
    }

    /// Current contact projection.
    pub async fn contacts(&self) -> Vec<ContactEntry> {
        self.contacts.read().await.clone()
    }

    /// Messages sent to a contact, oldest first.
    pub async fn messages_for(&self, contact_id: &str) -> Vec<ChatMessage> {
        let messages = self.messages.read().await;
        messages
            .iter()
            .filter(|m| m.contact_id == contact_id)
            .cloned()
            .collect()
    }

    /// Asks the contract whether the FHE system is available.
    pub async fn check_availability(&self) -> bool {
        match self.store.is_available().await {
            Ok(true) => {
                self.reporter
                    .show(TransactionPhase::Success, "FHE system is available!")
                    .await;
                self.reporter
                    .record_history("Checked FHE system availability")
                    .await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!("Availability check failed: {}", e);
                self.reporter
                    .show(TransactionPhase::Error, "Availability check failed")
                    .await;
                false
            }
        }
    }
}

fn phase_message(operation: &OperationRecord) -> String {
    match (operation.kind, operation.status()) {
        (_, OperationStatus::Idle) => String::new(),
        (OperationKind::Contact, OperationStatus::Encrypting) => {
            "Creating contact with FHE encryption...".to_string()
        }
        (OperationKind::Message, OperationStatus::Encrypting) => {
            "Encrypting message with FHE...".to_string()
        }
        (_, OperationStatus::Submitting) => "Submitting encrypted record...".to_string(),
        (_, OperationStatus::Confirming) => "Waiting for transaction confirmation...".to_string(),
        (OperationKind::Contact, OperationStatus::Succeeded) => {
            "Contact created successfully!".to_string()
        }
        (OperationKind::Message, OperationStatus::Succeeded) => {
            "Message sent with FHE encryption!".to_string()
        }
        (kind, OperationStatus::Failed) => match (kind, operation.error()) {
            (_, Some(ChatCipherError::UserRejected)) => "Transaction rejected".to_string(),
            (OperationKind::Contact, Some(e)) => format!("Creation failed: {}", e),
            (OperationKind::Contact, None) => "Creation failed: Unknown error".to_string(),
            (OperationKind::Message, _) => "Failed to send message".to_string(),
        },
    }
}
