//! Per-message policy validation.

use crate::bsp::BspRuleHandler;
use crate::chain::{InputProcessor, InputProcessorChain};
use crate::config::WssPolicyConfig;
use crate::context::{MessageContext, Protection, SecurityContext};
use crate::derivation::UsernameToken;
use crate::enforcer::{EnforcerState, PolicyEnforcer};
use crate::error::{PolicyViolation, WssError};
use crate::event::XmlEventSource;
use crate::header_processor::SecurityHeaderInputProcessor;
use crate::parser::XmlEventReader;
use crate::policy::Alternative;
use crate::policy_processor::PolicyInputProcessor;
use crate::protection_processor::ProtectionInputProcessor;
use crate::security_event::SecurityEvent;
use crate::soap::SoapNames;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of enforcing the policy on one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// An alternative of the policy was satisfied
    Satisfied,
    /// Every alternative failed
    Violated(PolicyViolation),
    /// The message could not be read to the end of the envelope
    Incomplete(String),
}

impl Verdict {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Per-message observations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMetrics {
    /// Elements streamed
    pub elements: usize,
    /// Deepest element level
    pub max_depth: usize,
    /// Security events registered with the enforcer
    pub security_events: usize,
}

/// Result of validating one message.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub verdict: Verdict,
    /// Security events in arrival order
    pub events: Vec<SecurityEvent>,
    /// Username tokens found in the security header
    pub username_tokens: Vec<UsernameToken>,
    pub metrics: MessageMetrics,
}

/// Per-message overrides.
#[derive(Debug, Clone, Default)]
pub struct MessageOptions {
    /// Overrides `transport.security_active` for this message
    pub transport_security_active: Option<bool>,
    /// Protections verified by an upstream component, keyed by element id
    pub protections: Vec<(String, Protection)>,
}

/// Main policy validator. Holds no per-message state.
#[derive(Debug)]
pub struct PolicyValidator {
    config: WssPolicyConfig,
    soap: SoapNames,
    alternatives: Vec<Alternative>,
    bsp: Arc<dyn BspRuleHandler>,
}

impl PolicyValidator {
    /// Create a validator; the policy is normalized once here.
    pub fn new(config: WssPolicyConfig) -> Result<Self, WssError> {
        config.validate()?;
        let soap = config.envelope.soap_names();
        let alternatives = config.policy.normalize();
        let bsp: Arc<dyn BspRuleHandler> = Arc::new(config.bsp.handler());

        let validator = Self {
            config,
            soap,
            alternatives,
            bsp,
        };
        // Surface ordering problems at construction rather than per message.
        let chain = validator.chain()?;
        debug!(
            alternatives = validator.alternatives.len(),
            processors = ?chain.ids(),
            "policy validator ready"
        );
        Ok(validator)
    }

    pub fn config(&self) -> &WssPolicyConfig {
        &self.config
    }

    /// Normalized policy alternatives.
    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    /// Validate a raw XML message with the configured defaults.
    pub fn validate(&self, data: &[u8]) -> Result<ValidationResult, WssError> {
        self.validate_with(data, MessageOptions::default())
    }

    pub fn validate_with(
        &self,
        data: &[u8],
        options: MessageOptions,
    ) -> Result<ValidationResult, WssError> {
        let mut reader = XmlEventReader::new(data);
        self.validate_events(&mut reader, options)
    }

    /// Validate a message supplied by any event source.
    ///
    /// Read failures yield [`Verdict::Incomplete`]; token, timestamp, BSP
    /// and ordering failures are returned as errors.
    pub fn validate_events(
        &self,
        source: &mut dyn XmlEventSource,
        options: MessageOptions,
    ) -> Result<ValidationResult, WssError> {
        let transport = options
            .transport_security_active
            .unwrap_or(self.config.transport.security_active);

        let mut security = SecurityContext::new(transport, Arc::clone(&self.bsp));
        for (id, protection) in options.protections {
            security.register_protection(id, protection);
        }
        let enforcer = PolicyEnforcer::new(self.alternatives.clone(), self.soap.clone(), transport);
        let mut ctx = MessageContext::new(security, enforcer);
        let mut chain = self.chain()?;

        let verdict = match drive(&mut chain, source, &mut ctx) {
            Ok(()) if ctx.enforcer.state() == EnforcerState::Satisfied => Verdict::Satisfied,
            Ok(()) => Verdict::Incomplete(format!(
                "document ended without closing the {} element",
                self.soap.envelope()
            )),
            Err(WssError::PolicyViolated(violation)) => Verdict::Violated(violation),
            Err(WssError::XmlParse(reason)) => Verdict::Incomplete(reason),
            Err(WssError::Io(e)) => Verdict::Incomplete(e.to_string()),
            Err(e) => {
                warn!(error = %e, code = %e.code(), "message rejected during processing");
                return Err(e);
            }
        };

        let metrics = MessageMetrics {
            elements: ctx.document.elements_seen(),
            max_depth: ctx.document.max_level(),
            security_events: ctx.security.security_event_count(),
        };
        match &verdict {
            Verdict::Satisfied => info!(
                elements = metrics.elements,
                events = metrics.security_events,
                transport = transport,
                "message satisfied security policy"
            ),
            Verdict::Violated(violation) => info!(
                violation = %violation,
                "message violated security policy"
            ),
            Verdict::Incomplete(reason) => warn!(reason = %reason, "message incomplete"),
        }

        Ok(ValidationResult {
            verdict,
            events: ctx.enforcer.take_events(),
            username_tokens: ctx.security.take_username_tokens(),
            metrics,
        })
    }

    /// A fresh processor chain for one message.
    fn chain(&self) -> Result<InputProcessorChain, WssError> {
        let processors: Vec<Box<dyn InputProcessor>> = vec![
            Box::new(PolicyInputProcessor::new(self.soap.clone())),
            Box::new(ProtectionInputProcessor::new(self.soap.clone())),
            Box::new(SecurityHeaderInputProcessor::new(
                self.soap.clone(),
                self.config.settings.actor.clone(),
                self.config.timestamp.clone(),
            )),
        ];
        InputProcessorChain::assemble(processors)
    }
}

/// Pull every event through the chain, switching from header to document
/// dispatch once the security header is complete.
fn drive(
    chain: &mut InputProcessorChain,
    source: &mut dyn XmlEventSource,
    ctx: &mut MessageContext,
) -> Result<(), WssError> {
    let mut cursor = chain.cursor(source, ctx);
    loop {
        let event = if cursor.context().document.header_complete() {
            cursor.process_event()?
        } else {
            cursor.process_header_event()?
        };
        if event.is_end_document() {
            return Ok(());
        }
    }
}
