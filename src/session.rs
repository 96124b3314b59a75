//! Identity and session context.
//!
//! A `Session` is passed into every orchestrator operation. It carries the
//! connected wallet address and the resolved target context (the record
//! contract address), so nothing reads ambient wallet state.

use crate::ledger::RecordReader;
use crate::types::{ChatCipherError, Result};

/// Connection state of one client session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    address: Option<String>,
    target_context: Option<String>,
}

/// Identity and context a write or reveal runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSession<'a> {
    /// Connected wallet address.
    pub identity: &'a str,
    /// Contract address scoping encryption and reveal.
    pub target_context: &'a str,
}

impl Session {
    /// A session with no connected identity.
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// A session connected as `address`, context not yet resolved.
    pub fn connected(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            target_context: None,
        }
    }

    /// Sets the target context explicitly.
    pub fn with_target_context(mut self, context: impl Into<String>) -> Self {
        self.target_context = Some(context.into());
        self
    }

    /// Resolves the target context from the contract handle.
    pub async fn resolve_context<R: RecordReader>(&mut self, reader: &R) -> Result<&str> {
        let address = reader.contract_address().await?;
        Ok(self.target_context.insert(address).as_str())
    }

    /// Disconnects the identity; the resolved context is kept.
    pub fn disconnect(&mut self) {
        self.address = None;
    }

    /// Whether an identity is connected.
    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    /// Connected address, if any.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Resolved target context, if any.
    pub fn target_context(&self) -> Option<&str> {
        self.target_context.as_deref()
    }

    /// Identity and context, or `NotConnected` if either is missing.
    pub fn require_active(&self) -> Result<ActiveSession<'_>> {
        match (self.address.as_deref(), self.target_context.as_deref()) {
            (Some(identity), Some(target_context)) if !target_context.is_empty() => {
                Ok(ActiveSession {
                    identity,
                    target_context,
                })
            }
            _ => Err(ChatCipherError::NotConnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_active() {
        assert_eq!(
            Session::disconnected().require_active(),
            Err(ChatCipherError::NotConnected)
        );
        assert_eq!(
            Session::connected("0xUser").require_active(),
            Err(ChatCipherError::NotConnected)
        );
        assert_eq!(
            Session::connected("0xUser")
                .with_target_context("")
                .require_active(),
            Err(ChatCipherError::NotConnected)
        );

        let session = Session::connected("0xUser").with_target_context("0xABC");
        let active = session.require_active().unwrap();
        assert_eq!(active.identity, "0xUser");
        assert_eq!(active.target_context, "0xABC");
    }

    #[test]
    fn test_disconnect_keeps_context() {
        let mut session = Session::connected("0xUser").with_target_context("0xABC");
        session.disconnect();
        assert!(!session.is_connected());
        assert_eq!(session.target_context(), Some("0xABC"));
        assert!(session.require_active().is_err());
    }
}
