//! Emits the unprotected and required facts the policy is checked against,
//! and finalizes the policy at the end of the envelope.

use crate::chain::{ChainCursor, InputProcessor, Phase, ProcessorId};
use crate::context::{MessageContext, ProtectionKind};
use crate::error::WssError;
use crate::event::{XmlEvent, XmlEventKind};
use crate::header_processor::SECURITY_HEADER_PROCESSOR;
use crate::path::ElementPath;
use crate::security_event::{SecurityEvent, SecurityEventKind};
use crate::soap::SoapNames;

pub const POLICY_PROCESSOR: ProcessorId = "policy";

#[derive(Debug)]
pub struct PolicyInputProcessor {
    soap: SoapNames,
    /// Header events outside the security header, held until every
    /// reference in the security header is known
    deferred: Vec<XmlEvent>,
}

impl PolicyInputProcessor {
    pub fn new(soap: SoapNames) -> Self {
        Self {
            soap,
            deferred: Vec::new(),
        }
    }

    fn inspect(
        &mut self,
        event: &XmlEvent,
        ctx: &mut MessageContext,
        header_dispatch: bool,
    ) -> Result<(), WssError> {
        self.test_required(event, ctx)?;

        if self.is_envelope_end(event) {
            self.replay_deferred(ctx)?;
            return ctx.enforcer.do_final();
        }

        if ctx.security.transport_security_active() {
            return Ok(());
        }

        let in_security_header = ctx.document.is_in_security_header(event.path());
        let in_encrypted = ctx.document.is_in_encrypted_content();
        let in_signed = ctx.document.is_in_signed_content();

        if header_dispatch {
            if !in_security_header {
                self.deferred.push(event.clone());
            } else if !in_encrypted {
                self.test_encryption(event, ctx)?;
            }
            return Ok(());
        }
        self.replay_deferred(ctx)?;

        if in_encrypted && in_signed {
            return Ok(());
        }
        if !in_encrypted && !in_security_header {
            self.test_encryption(event, ctx)?;
        }
        if !in_signed {
            self.test_signature(event, ctx)?;
        }
        Ok(())
    }

    /// Test the held header events now that the security header is done.
    ///
    /// Elements whose id a signature or encryption referenced, and their
    /// descendants, count as protected.
    fn replay_deferred(&mut self, ctx: &mut MessageContext) -> Result<(), WssError> {
        if self.deferred.is_empty() {
            return Ok(());
        }
        let deferred = std::mem::take(&mut self.deferred);
        let mut signed: Vec<ElementPath> = Vec::new();
        let mut encrypted: Vec<(ElementPath, bool)> = Vec::new();

        for event in &deferred {
            let path = event.path();
            if event.is_start_element() {
                if let Some(id) = event.id() {
                    for protection in ctx.security.protections_for(id) {
                        match protection.kind {
                            ProtectionKind::Signed => signed.push(path.clone()),
                            ProtectionKind::Encrypted => encrypted.push((path.clone(), true)),
                            ProtectionKind::ContentEncrypted => {
                                encrypted.push((path.clone(), false))
                            }
                        }
                    }
                }
            }

            let in_signed = signed.iter().any(|root| path.starts_with(root));
            let in_encrypted = encrypted.iter().any(|(root, whole)| {
                path.starts_with(root) && (*whole || path != root || !event.is_start_element())
            });
            if !(in_encrypted && in_signed) {
                if !in_encrypted {
                    self.test_encryption(event, ctx)?;
                }
                if !in_signed {
                    self.test_signature(event, ctx)?;
                }
            }

            // Same-named siblings after a protected element are not covered.
            if event.is_end_element() {
                signed.retain(|root| root != path);
                encrypted.retain(|(root, _)| root != path);
            }
        }
        Ok(())
    }

    fn is_envelope_end(&self, event: &XmlEvent) -> bool {
        event.is_end_element()
            && event.document_level() == 1
            && event
                .name()
                .is_some_and(|n| n.local_name == self.soap.envelope().local_name)
    }

    fn test_required(&self, event: &XmlEvent, ctx: &mut MessageContext) -> Result<(), WssError> {
        if !event.is_start_element() {
            return Ok(());
        }
        let path = event.path();
        if self.soap.is_header_part(path) {
            ctx.register_security_event(SecurityEvent::new(
                SecurityEventKind::RequiredPart,
                path.clone(),
            ))?;
            ctx.register_security_event(SecurityEvent::new(
                SecurityEventKind::RequiredElement,
                path.clone(),
            ))?;
        } else if path.len() > 3 {
            ctx.register_security_event(SecurityEvent::new(
                SecurityEventKind::RequiredElement,
                path.clone(),
            ))?;
        }
        Ok(())
    }

    fn test_encryption(&self, event: &XmlEvent, ctx: &mut MessageContext) -> Result<(), WssError> {
        let path = event.path();
        match event.kind() {
            XmlEventKind::StartElement => {
                let level = path.len();
                if level == 3 && (self.soap.is_in_soap_header(path) || self.soap.is_in_soap_body(path)) {
                    ctx.register_security_event(SecurityEvent::new(
                        SecurityEventKind::EncryptedPart,
                        path.clone(),
                    ))?;
                } else if level > 3 {
                    ctx.register_security_event(SecurityEvent::new(
                        SecurityEventKind::EncryptedElement,
                        path.clone(),
                    ))?;
                    ctx.register_security_event(SecurityEvent::new(
                        SecurityEventKind::ContentEncryptedElement,
                        event.parent_path(),
                    ))?;
                }
            }
            XmlEventKind::Characters
            | XmlEventKind::EntityReference
            | XmlEventKind::ProcessingInstruction
                if !path.is_empty() =>
            {
                ctx.register_security_event(SecurityEvent::new(
                    SecurityEventKind::ContentEncryptedElement,
                    path.clone(),
                ))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn test_signature(&self, event: &XmlEvent, ctx: &mut MessageContext) -> Result<(), WssError> {
        if !event.is_start_element() {
            return Ok(());
        }
        let path = event.path();
        let kind = if self.soap.is_header_part(path) || self.soap.is_body(path) {
            SecurityEventKind::SignedPart
        } else if path.len() > 3 {
            SecurityEventKind::SignedElement
        } else {
            return Ok(());
        };
        ctx.register_security_event(SecurityEvent::new(kind, path.clone()))
    }
}

impl InputProcessor for PolicyInputProcessor {
    fn id(&self) -> ProcessorId {
        POLICY_PROCESSOR
    }

    fn phase(&self) -> Phase {
        Phase::Postprocessing
    }

    fn after(&self) -> &[ProcessorId] {
        &[SECURITY_HEADER_PROCESSOR]
    }

    fn process_next_header_event(
        &mut self,
        cursor: &mut ChainCursor<'_, '_>,
    ) -> Result<XmlEvent, WssError> {
        let event = cursor.process_header_event()?;
        self.inspect(&event, cursor.context(), true)?;
        Ok(event)
    }

    fn process_next_event(&mut self, cursor: &mut ChainCursor<'_, '_>) -> Result<XmlEvent, WssError> {
        let event = cursor.process_event()?;
        self.inspect(&event, cursor.context(), false)?;
        Ok(event)
    }
}
