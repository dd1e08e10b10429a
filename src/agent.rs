//! Policy enforcement agent.
//!
//! Wraps the validator for use in front of a SOAP service: applies the body
//! size limit and the configured fail action, renders SOAP faults, counts
//! decisions, and accepts configuration updates at runtime.

use crate::config::{FailAction, SoapVersion, WssPolicyConfig};
use crate::error::{soap_fault_response, SoapFaultVersion, WssError};
use crate::validator::{MessageOptions, PolicyValidator, ValidationResult, Verdict};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// HTTP status used for SOAP faults.
const FAULT_STATUS: u16 = 500;

/// What to do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentDecision {
    /// Forward the message, adding these request headers
    Allow { headers: Vec<(String, String)> },
    /// Answer with a SOAP fault
    Block {
        status: u16,
        body: String,
        content_type: &'static str,
    },
}

impl AgentDecision {
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block { .. })
    }

    /// Value of an added request header.
    pub fn header(&self, name: &str) -> Option<&str> {
        match self {
            Self::Allow { headers } => headers
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            Self::Block { .. } => None,
        }
    }
}

/// Counters exported by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentMetrics {
    pub messages_processed: u64,
    pub messages_blocked: u64,
    pub policy_violations: u64,
}

/// WS-SecurityPolicy agent.
///
/// Safe to share between threads; every message gets its own pipeline.
#[derive(Debug)]
pub struct WssPolicyAgent {
    validator: RwLock<Arc<PolicyValidator>>,
    messages_processed: AtomicU64,
    messages_blocked: AtomicU64,
    policy_violations: AtomicU64,
}

impl WssPolicyAgent {
    /// Create a new agent with the given configuration.
    pub fn new(config: WssPolicyConfig) -> Result<Self, WssError> {
        let validator = PolicyValidator::new(config)?;
        Ok(Self {
            validator: RwLock::new(Arc::new(validator)),
            messages_processed: AtomicU64::new(0),
            messages_blocked: AtomicU64::new(0),
            policy_violations: AtomicU64::new(0),
        })
    }

    /// The validator currently in use.
    pub fn validator(&self) -> Arc<PolicyValidator> {
        let guard = self.validator.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the configuration. The old one stays active on error.
    pub fn configure(&self, config: WssPolicyConfig) -> Result<(), WssError> {
        let validator = PolicyValidator::new(config)?;
        info!(
            version = %validator.config().version,
            alternatives = validator.alternatives().len(),
            "configuration updated"
        );
        let mut guard = self.validator.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(validator);
        Ok(())
    }

    /// Replace the configuration from a JSON document pushed by a proxy.
    pub fn on_configure(&self, config: serde_json::Value) -> Result<(), WssError> {
        let config: WssPolicyConfig =
            serde_json::from_value(config).map_err(|e| WssError::Config(e.to_string()))?;
        self.configure(config)
    }

    pub fn metrics(&self) -> AgentMetrics {
        AgentMetrics {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_blocked: self.messages_blocked.load(Ordering::Relaxed),
            policy_violations: self.policy_violations.load(Ordering::Relaxed),
        }
    }

    /// Enforce the policy on one message body.
    pub fn process_message(&self, body: &[u8], options: MessageOptions) -> AgentDecision {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        let validator = self.validator();
        let settings = &validator.config().settings;

        if body.len() > settings.max_body_size {
            warn!(
                body_size = body.len(),
                max_size = settings.max_body_size,
                "SOAP body too large"
            );
            let error = WssError::MessageTooLarge {
                size: body.len(),
                max: settings.max_body_size,
            };
            return self.reject(&validator, error, Vec::new());
        }

        let result = match validator.validate_with(body, options) {
            Ok(result) => result,
            Err(error) => {
                warn!(code = %error.code(), error = %error, "security processing failed");
                return self.reject(&validator, error, Vec::new());
            }
        };

        let headers = identity_headers(&result);
        match result.verdict {
            Verdict::Satisfied => {
                debug!(
                    events = result.events.len(),
                    "SOAP message passed security policy"
                );
                let mut headers = headers;
                headers.push(("X-WSS-Policy".to_string(), "satisfied".to_string()));
                AgentDecision::Allow { headers }
            }
            Verdict::Violated(violation) => {
                self.policy_violations.fetch_add(1, Ordering::Relaxed);
                for failure in &violation.failures {
                    debug!(failure = %failure, "policy alternative failed");
                }
                self.reject(&validator, WssError::PolicyViolated(violation), headers)
            }
            Verdict::Incomplete(reason) => {
                self.reject(&validator, WssError::XmlParse(reason), headers)
            }
        }
    }

    /// Apply the fail action to an error.
    fn reject(
        &self,
        validator: &PolicyValidator,
        error: WssError,
        mut headers: Vec<(String, String)>,
    ) -> AgentDecision {
        match validator.config().settings.fail_action {
            FailAction::Block => {
                self.messages_blocked.fetch_add(1, Ordering::Relaxed);
                let soap12 = validator.config().envelope.version() == Some(SoapVersion::Soap12);
                let (version, content_type) = if soap12 {
                    (SoapFaultVersion::Soap12, "application/soap+xml; charset=utf-8")
                } else {
                    (SoapFaultVersion::Soap11, "text/xml; charset=utf-8")
                };
                AgentDecision::Block {
                    status: FAULT_STATUS,
                    body: soap_fault_response(&error, version),
                    content_type,
                }
            }
            FailAction::Allow => {
                info!(
                    code = %error.code(),
                    error = %error,
                    "policy failure but allowing message (fail_action=allow)"
                );
                headers.push(("X-WSS-Policy".to_string(), "violated".to_string()));
                headers.push((
                    "X-WSS-Policy-Error".to_string(),
                    error.code().as_str().to_string(),
                ));
                AgentDecision::Allow { headers }
            }
        }
    }
}

fn identity_headers(result: &ValidationResult) -> Vec<(String, String)> {
    result
        .username_tokens
        .first()
        .map(|token| vec![("X-WSS-Username".to_string(), token.username().to_string())])
        .unwrap_or_default()
}
