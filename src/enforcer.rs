//! Policy enforcement state machine.
//!
//! The enforcer keeps every normalized policy alternative alive until a
//! security event falsifies one of its assertions. At the end of the message
//! the surviving alternatives are checked for the evidence their assertions
//! require; the first complete one satisfies the policy.

use crate::assertion::Assertion;
use crate::error::{AlternativeFailure, PolicyViolation, WssError};
use crate::policy::Alternative;
use crate::security_event::{SecurityEvent, SecurityEventKind, TokenKind};
use crate::soap::{SoapNames, WSU_NS};
use tracing::{debug, info};

/// Lifecycle of the enforcer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcerState {
    /// Accepting security events
    Collecting,
    /// Evaluating alternatives
    Finalizing,
    Satisfied,
    Violated,
}

#[derive(Debug, Clone)]
struct AssertionState {
    assertion: Assertion,
    /// One flag per piece of evidence the assertion needs at the end
    evidence: Vec<bool>,
}

impl AssertionState {
    fn new(assertion: Assertion, transport_secured: bool) -> Self {
        let slots = match &assertion {
            Assertion::SignedParts(parts) | Assertion::EncryptedParts(parts) => {
                usize::from(parts.body && !transport_secured)
            }
            Assertion::RequiredParts(required) => required.headers.len(),
            Assertion::RequiredElements(elements) => elements.patterns().len(),
            Assertion::IncludeTimestamp | Assertion::Token(_) => 1,
            Assertion::Wrapper(wrapper) => {
                usize::from(wrapper.token().is_some() && !transport_secured)
            }
            Assertion::SignedElements(_)
            | Assertion::EncryptedElements(_)
            | Assertion::ContentEncryptedElements(_) => 0,
        };
        Self {
            assertion,
            evidence: vec![false; slots],
        }
    }

    /// Apply an event; `Err` carries the reason the assertion is falsified.
    fn observe(&mut self, event: &SecurityEvent, soap: &SoapNames) -> Result<(), String> {
        let path = event.path();
        let kind = event.kind();
        match &self.assertion {
            Assertion::SignedParts(parts) => {
                if kind != SecurityEventKind::SignedPart || !parts.covers(path, soap) {
                    return Ok(());
                }
                if !event.is_protected() {
                    return Err("part is not signed".to_string());
                }
                if parts.body && soap.is_body(path) {
                    self.satisfy(0);
                }
            }
            Assertion::EncryptedParts(parts) => match kind {
                SecurityEventKind::EncryptedPart if parts.covers(path, soap) => {
                    if !event.is_protected() {
                        return Err("part is not encrypted".to_string());
                    }
                    if parts.body && soap.is_body_part(path) {
                        self.satisfy(0);
                    }
                }
                SecurityEventKind::ContentEncryptedElement
                    if event.is_protected() && parts.body && soap.is_body(path) =>
                {
                    self.satisfy(0);
                }
                _ => {}
            },
            Assertion::RequiredParts(required) => {
                if kind == SecurityEventKind::RequiredPart {
                    if let Some(name) = path.last() {
                        let hits: Vec<usize> = required
                            .headers
                            .iter()
                            .enumerate()
                            .filter(|(_, h)| h.matches(name))
                            .map(|(i, _)| i)
                            .collect();
                        for i in hits {
                            self.satisfy(i);
                        }
                    }
                }
            }
            Assertion::RequiredElements(elements) => {
                if kind == SecurityEventKind::RequiredElement {
                    let hits: Vec<usize> = elements
                        .patterns()
                        .iter()
                        .enumerate()
                        .filter(|(_, p)| p.matches(path))
                        .map(|(i, _)| i)
                        .collect();
                    for i in hits {
                        self.satisfy(i);
                    }
                }
            }
            Assertion::SignedElements(elements) => {
                if kind == SecurityEventKind::SignedElement
                    && !event.is_protected()
                    && elements.matches(path)
                {
                    return Err("element is not signed".to_string());
                }
            }
            Assertion::EncryptedElements(elements) => {
                if kind == SecurityEventKind::EncryptedElement
                    && !event.is_protected()
                    && elements.matches(path)
                {
                    return Err("element is not encrypted".to_string());
                }
            }
            Assertion::ContentEncryptedElements(elements) => {
                if kind == SecurityEventKind::ContentEncryptedElement
                    && !event.is_protected()
                    && elements.matches(path)
                {
                    return Err("element content is not encrypted".to_string());
                }
            }
            Assertion::IncludeTimestamp => {
                if kind.is_required() && path.last().is_some_and(|n| n.is(WSU_NS, "Timestamp")) {
                    self.satisfy(0);
                }
            }
            Assertion::Token(token) => {
                if event.token_kind() == Some(token.kind) {
                    self.satisfy(0);
                }
            }
            Assertion::Wrapper(wrapper) => {
                let (Some(expected), Some(used)) = (wrapper.token(), event.token_kind()) else {
                    return Ok(());
                };
                if !wrapper.kind().covers(kind) {
                    return Ok(());
                }
                if used != expected.kind {
                    return Err(format!(
                        "protection used a {} where a {} is required",
                        used, expected.kind
                    ));
                }
                self.satisfy(0);
            }
        }
        Ok(())
    }

    fn note_token(&mut self, kind: TokenKind) {
        if matches!(&self.assertion, Assertion::Token(token) if token.kind == kind) {
            self.satisfy(0);
        }
    }

    fn satisfy(&mut self, slot: usize) {
        if let Some(flag) = self.evidence.get_mut(slot) {
            *flag = true;
        }
    }

    fn is_complete(&self) -> bool {
        self.evidence.iter().all(|e| *e)
    }

    /// Reason the assertion is still incomplete at the end of the message.
    fn missing(&self) -> String {
        match &self.assertion {
            Assertion::SignedParts(_) => "requires a signed SOAP Body".to_string(),
            Assertion::EncryptedParts(_) => "requires an encrypted SOAP Body".to_string(),
            Assertion::RequiredParts(required) => {
                let missing = required
                    .headers
                    .iter()
                    .zip(&self.evidence)
                    .filter(|(_, seen)| !**seen)
                    .map(|(h, _)| match &h.name {
                        Some(name) => format!("{{{}}}{}", h.namespace, name),
                        None => format!("{{{}}}*", h.namespace),
                    })
                    .collect::<Vec<_>>();
                format!("missing required header(s) {}", missing.join(", "))
            }
            Assertion::RequiredElements(elements) => {
                let missing = elements
                    .patterns()
                    .iter()
                    .zip(&self.evidence)
                    .filter(|(_, seen)| !**seen)
                    .map(|(p, _)| p.expression().to_string())
                    .collect::<Vec<_>>();
                format!("missing required element(s) {}", missing.join(", "))
            }
            Assertion::IncludeTimestamp => "requires a wsu:Timestamp".to_string(),
            Assertion::Token(token) => format!("requires a {}", token.kind),
            Assertion::Wrapper(wrapper) => match wrapper.token() {
                Some(token) => format!("requires protection with a {}", token.kind),
                None => "has no token".to_string(),
            },
            Assertion::SignedElements(_)
            | Assertion::EncryptedElements(_)
            | Assertion::ContentEncryptedElements(_) => "is incomplete".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct AlternativeState {
    index: usize,
    assertions: Vec<AssertionState>,
    failure: Option<AlternativeFailure>,
}

/// Accumulates security events and decides the policy verdict exactly once.
#[derive(Debug, Clone)]
pub struct PolicyEnforcer {
    soap: SoapNames,
    alternatives: Vec<AlternativeState>,
    events: Vec<SecurityEvent>,
    state: EnforcerState,
}

impl PolicyEnforcer {
    /// Build an enforcer over normalized alternatives.
    ///
    /// Under transport security the channel supplies the signed/encrypted
    /// evidence for parts and token roles.
    pub fn new(alternatives: Vec<Alternative>, soap: SoapNames, transport_secured: bool) -> Self {
        let alternatives = alternatives
            .into_iter()
            .enumerate()
            .map(|(index, alternative)| AlternativeState {
                index,
                assertions: alternative
                    .assertions()
                    .iter()
                    .cloned()
                    .map(|a| AssertionState::new(a, transport_secured))
                    .collect(),
                failure: None,
            })
            .collect();

        Self {
            soap,
            alternatives,
            events: Vec::new(),
            state: EnforcerState::Collecting,
        }
    }

    pub fn state(&self) -> EnforcerState {
        self.state
    }

    /// Events registered so far, in arrival order.
    pub fn events(&self) -> &[SecurityEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<SecurityEvent> {
        std::mem::take(&mut self.events)
    }

    /// Number of alternatives not yet falsified.
    pub fn viable_alternatives(&self) -> usize {
        self.alternatives.iter().filter(|a| a.failure.is_none()).count()
    }

    pub fn register_security_event(&mut self, event: SecurityEvent) -> Result<(), WssError> {
        if self.state != EnforcerState::Collecting {
            return Err(WssError::Ordering(format!(
                "security event {} registered after the policy was finalized",
                event
            )));
        }

        for alternative in self.alternatives.iter_mut().filter(|a| a.failure.is_none()) {
            for assertion in alternative.assertions.iter_mut() {
                if let Err(reason) = assertion.observe(&event, &self.soap) {
                    let name = assertion.assertion.name();
                    debug!(
                        alternative = alternative.index,
                        assertion = %name.local_name,
                        path = %event.path(),
                        reason = %reason,
                        "policy alternative falsified"
                    );
                    alternative.failure = Some(AlternativeFailure {
                        alternative: alternative.index,
                        assertion: name,
                        path: Some(event.path().clone()),
                        reason,
                    });
                    break;
                }
            }
        }

        self.events.push(event);
        Ok(())
    }

    /// Record that a token of `kind` was presented in the security header.
    pub fn register_token(&mut self, kind: TokenKind) -> Result<(), WssError> {
        if self.state != EnforcerState::Collecting {
            return Err(WssError::Ordering(format!(
                "{} token registered after the policy was finalized",
                kind.local_name()
            )));
        }
        for alternative in self.alternatives.iter_mut() {
            for assertion in alternative.assertions.iter_mut() {
                assertion.note_token(kind);
            }
        }
        Ok(())
    }

    /// Decide the verdict. Must be called exactly once.
    pub fn do_final(&mut self) -> Result<(), WssError> {
        if self.state != EnforcerState::Collecting {
            return Err(WssError::Ordering(
                "policy enforcement was already finalized".to_string(),
            ));
        }
        self.state = EnforcerState::Finalizing;

        for alternative in self.alternatives.iter_mut().filter(|a| a.failure.is_none()) {
            if let Some(incomplete) = alternative.assertions.iter().find(|a| !a.is_complete()) {
                alternative.failure = Some(AlternativeFailure {
                    alternative: alternative.index,
                    assertion: incomplete.assertion.name(),
                    path: None,
                    reason: incomplete.missing(),
                });
            }
        }

        if let Some(satisfied) = self.alternatives.iter().find(|a| a.failure.is_none()) {
            info!(
                alternative = satisfied.index,
                events = self.events.len(),
                "security policy satisfied"
            );
            self.state = EnforcerState::Satisfied;
            return Ok(());
        }

        self.state = EnforcerState::Violated;
        let failures = self
            .alternatives
            .iter()
            .filter_map(|a| a.failure.clone())
            .collect();
        let violation = PolicyViolation::new(failures);
        info!(violation = %violation, "security policy violated");
        Err(WssError::PolicyViolated(violation))
    }
}
