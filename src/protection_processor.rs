//! Signed and encrypted scope tracking.

use crate::chain::{ChainCursor, InputProcessor, Phase, ProcessorId};
use crate::context::{MessageContext, ProtectionKind};
use crate::error::WssError;
use crate::event::{XmlEvent, XmlEventKind};
use crate::header_processor::SECURITY_HEADER_PROCESSOR;
use crate::path::ElementPath;
use crate::security_event::{SecurityEvent, SecurityEventKind};
use crate::soap::{SoapNames, XENC_NS, XENC_TYPE_CONTENT, XENC_TYPE_ELEMENT};
use tracing::debug;

pub const PROTECTION_PROCESSOR: ProcessorId = "protection";

/// Emits provenance events for elements covered by a registered protection
/// and keeps the signed/encrypted scopes of the document context.
#[derive(Debug)]
pub struct ProtectionInputProcessor {
    soap: SoapNames,
}

impl ProtectionInputProcessor {
    pub fn new(soap: SoapNames) -> Self {
        Self { soap }
    }

    fn inspect(&self, event: &XmlEvent, ctx: &mut MessageContext) -> Result<(), WssError> {
        match event.kind() {
            XmlEventKind::StartElement => self.on_start(event, ctx),
            XmlEventKind::EndElement => {
                ctx.document.pop_scopes(event.document_level());
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn on_start(&self, event: &XmlEvent, ctx: &mut MessageContext) -> Result<(), WssError> {
        let Some(id) = event.id() else {
            return Ok(());
        };
        let protections = ctx.security.protections_for(id).to_vec();
        if protections.is_empty() {
            return Ok(());
        }

        let path = event.path();
        let level = event.document_level();
        for protection in protections {
            let (kind, target) = match protection.kind {
                ProtectionKind::Signed => {
                    ctx.document.push_signed_scope(level);
                    let kind = if self.is_part(path) {
                        SecurityEventKind::SignedPart
                    } else {
                        SecurityEventKind::SignedElement
                    };
                    (kind, path.clone())
                }
                ProtectionKind::Encrypted => {
                    ctx.document.push_encrypted_scope(level);
                    self.encrypted_target(event)
                }
                ProtectionKind::ContentEncrypted => {
                    ctx.document.push_encrypted_scope(level);
                    (SecurityEventKind::ContentEncryptedElement, path.clone())
                }
            };
            debug!(id = id, kind = %kind, path = %target, "protected element");
            ctx.register_security_event(SecurityEvent::protected(kind, target, protection.token))?;
        }
        Ok(())
    }

    /// Event kind and path for an element referenced by an encryption.
    ///
    /// Content-encrypted `xenc:EncryptedData` protects its parent element.
    fn encrypted_target(&self, event: &XmlEvent) -> (SecurityEventKind, ElementPath) {
        let is_encrypted_data = event.name().is_some_and(|n| n.is(XENC_NS, "EncryptedData"));
        let is_content = is_encrypted_data
            && match event.attribute("", "Type") {
                Some(XENC_TYPE_CONTENT) => true,
                Some(XENC_TYPE_ELEMENT) | None => false,
                Some(other) => {
                    debug!(encryption_type = other, "unknown xenc:EncryptedData type, treated as element");
                    false
                }
            };
        if is_content {
            let parent = event.parent_path();
            let kind = if self.is_part(&parent) {
                SecurityEventKind::EncryptedPart
            } else {
                SecurityEventKind::ContentEncryptedElement
            };
            return (kind, parent);
        }

        let path = event.path();
        let kind = if self.soap.is_body_part(path) || self.soap.is_header_part(path) {
            SecurityEventKind::EncryptedPart
        } else {
            SecurityEventKind::EncryptedElement
        };
        (kind, path.clone())
    }

    fn is_part(&self, path: &ElementPath) -> bool {
        self.soap.is_body(path) || self.soap.is_header_part(path)
    }
}

impl InputProcessor for ProtectionInputProcessor {
    fn id(&self) -> ProcessorId {
        PROTECTION_PROCESSOR
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn after(&self) -> &[ProcessorId] {
        &[SECURITY_HEADER_PROCESSOR]
    }

    fn process_next_header_event(
        &mut self,
        cursor: &mut ChainCursor<'_, '_>,
    ) -> Result<XmlEvent, WssError> {
        let event = cursor.process_header_event()?;
        self.inspect(&event, cursor.context())?;
        Ok(event)
    }

    fn process_next_event(&mut self, cursor: &mut ChainCursor<'_, '_>) -> Result<XmlEvent, WssError> {
        let event = cursor.process_event()?;
        self.inspect(&event, cursor.context())?;
        Ok(event)
    }
}
