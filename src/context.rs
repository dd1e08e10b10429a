//! Per-message state shared by the input processors.

use crate::bsp::{BspRule, BspRuleHandler};
use crate::derivation::UsernameToken;
use crate::enforcer::PolicyEnforcer;
use crate::error::WssError;
use crate::event::{XmlEvent, XmlEventKind};
use crate::path::ElementPath;
use crate::security_event::{SecurityEvent, TokenKind, TokenRef};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Streaming cursor state of the document being processed.
#[derive(Debug, Clone, Default)]
pub struct DocumentContext {
    /// Path of the innermost open element
    path: ElementPath,
    /// Levels of the elements that opened encrypted content
    encrypted_scopes: Vec<usize>,
    /// Levels of the elements that opened signed content
    signed_scopes: Vec<usize>,
    /// Path of the responsible security header, once seen
    security_header: Option<ElementPath>,
    in_security_header: bool,
    header_complete: bool,
    elements_seen: usize,
    max_level: usize,
}

impl DocumentContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the cursor for an event leaving the source.
    pub fn observe(&mut self, event: &XmlEvent) {
        match event.kind() {
            XmlEventKind::StartElement => {
                self.path = event.path().clone();
                self.elements_seen += 1;
                self.max_level = self.max_level.max(self.path.len());
            }
            XmlEventKind::EndElement => {
                self.path = event.parent_path();
            }
            _ => {}
        }
    }

    pub fn path(&self) -> &ElementPath {
        &self.path
    }

    pub fn document_level(&self) -> usize {
        self.path.len()
    }

    pub fn elements_seen(&self) -> usize {
        self.elements_seen
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    pub fn is_in_encrypted_content(&self) -> bool {
        !self.encrypted_scopes.is_empty()
    }

    pub fn is_in_signed_content(&self) -> bool {
        !self.signed_scopes.is_empty()
    }

    pub fn push_encrypted_scope(&mut self, level: usize) {
        self.encrypted_scopes.push(level);
    }

    pub fn push_signed_scope(&mut self, level: usize) {
        self.signed_scopes.push(level);
    }

    /// Close every scope opened by the element at `level`.
    pub fn pop_scopes(&mut self, level: usize) {
        while self.encrypted_scopes.last() == Some(&level) {
            self.encrypted_scopes.pop();
        }
        while self.signed_scopes.last() == Some(&level) {
            self.signed_scopes.pop();
        }
    }

    pub fn enter_security_header(&mut self, path: ElementPath) {
        self.security_header = Some(path);
        self.in_security_header = true;
    }

    pub fn leave_security_header(&mut self) {
        self.in_security_header = false;
    }

    /// Path of the responsible security header, if one was seen.
    pub fn security_header(&self) -> Option<&ElementPath> {
        self.security_header.as_ref()
    }

    /// True while the security header is open and `path` lies within it.
    pub fn is_in_security_header(&self, path: &ElementPath) -> bool {
        self.in_security_header
            && self
                .security_header
                .as_ref()
                .is_some_and(|header| path.starts_with(header))
    }

    pub fn security_header_open(&self) -> bool {
        self.in_security_header
    }

    pub fn header_complete(&self) -> bool {
        self.header_complete
    }

    pub fn mark_header_complete(&mut self) {
        self.header_complete = true;
    }
}

/// What a reference in the security header did to the referenced node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectionKind {
    /// Covered by a signature reference
    Signed,
    /// Replaced by, or is, an `xenc:EncryptedData`
    Encrypted,
    /// Content already decrypted upstream
    ContentEncrypted,
}

/// A verified protection of the node carrying a given id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Protection {
    pub kind: ProtectionKind,
    pub token: TokenRef,
}

impl Protection {
    pub fn signed(token: TokenRef) -> Self {
        Self {
            kind: ProtectionKind::Signed,
            token,
        }
    }

    pub fn encrypted(token: TokenRef) -> Self {
        Self {
            kind: ProtectionKind::Encrypted,
            token,
        }
    }

    pub fn content_encrypted(token: TokenRef) -> Self {
        Self {
            kind: ProtectionKind::ContentEncrypted,
            token,
        }
    }
}

/// Per-message security state: flags, registries and counters.
#[derive(Debug)]
pub struct SecurityContext {
    transport_security_active: bool,
    bsp: Arc<dyn BspRuleHandler>,
    tokens: HashMap<String, TokenKind>,
    protections: HashMap<String, Vec<Protection>>,
    username_tokens: Vec<UsernameToken>,
    security_events: usize,
    timestamps: usize,
}

impl SecurityContext {
    pub fn new(transport_security_active: bool, bsp: Arc<dyn BspRuleHandler>) -> Self {
        Self {
            transport_security_active,
            bsp,
            tokens: HashMap::new(),
            protections: HashMap::new(),
            username_tokens: Vec::new(),
            security_events: 0,
            timestamps: 0,
        }
    }

    pub fn transport_security_active(&self) -> bool {
        self.transport_security_active
    }

    pub fn bsp(&self) -> &dyn BspRuleHandler {
        self.bsp.as_ref()
    }

    pub fn handle_bsp_rule(&self, rule: BspRule) -> Result<(), WssError> {
        self.bsp.handle_bsp_rule(rule)
    }

    pub fn register_token(&mut self, id: impl Into<String>, kind: TokenKind) {
        self.tokens.insert(id.into(), kind);
    }

    pub fn token_kind(&self, id: &str) -> Option<TokenKind> {
        self.tokens.get(id).copied()
    }

    pub fn register_protection(&mut self, id: impl Into<String>, protection: Protection) {
        self.protections.entry(id.into()).or_default().push(protection);
    }

    pub fn protections_for(&self, id: &str) -> &[Protection] {
        self.protections.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn add_username_token(&mut self, token: UsernameToken) {
        self.username_tokens.push(token);
    }

    pub fn username_tokens(&self) -> &[UsernameToken] {
        &self.username_tokens
    }

    pub fn take_username_tokens(&mut self) -> Vec<UsernameToken> {
        std::mem::take(&mut self.username_tokens)
    }

    /// Count a timestamp and return how many were seen so far.
    pub fn count_timestamp(&mut self) -> usize {
        self.timestamps += 1;
        self.timestamps
    }

    pub fn security_event_count(&self) -> usize {
        self.security_events
    }
}

/// Everything a processor may touch while handling one message.
#[derive(Debug)]
pub struct MessageContext {
    pub document: DocumentContext,
    pub security: SecurityContext,
    pub enforcer: PolicyEnforcer,
}

impl MessageContext {
    pub fn new(security: SecurityContext, enforcer: PolicyEnforcer) -> Self {
        Self {
            document: DocumentContext::new(),
            security,
            enforcer,
        }
    }

    /// Forward a security event to the enforcer.
    ///
    /// Under transport security, signature and encryption facts are dropped:
    /// the channel protects every element.
    pub fn register_security_event(&mut self, event: SecurityEvent) -> Result<(), WssError> {
        if self.security.transport_security_active() && !event.kind().is_required() {
            trace!(event = %event, "dropping protection event under transport security");
            return Ok(());
        }
        self.security.security_events += 1;
        self.enforcer.register_security_event(event)
    }

    /// Record a token presented in the security header.
    pub fn register_token(&mut self, id: Option<&str>, kind: TokenKind) -> Result<(), WssError> {
        if let Some(id) = id {
            self.security.register_token(id, kind);
        }
        self.enforcer.register_token(kind)
    }
}
