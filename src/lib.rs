//! WS-SecurityPolicy enforcement for Zentinel
//!
//! Checks streamed SOAP messages against a WS-SecurityPolicy and derives key
//! material from WS-Security UsernameTokens.
//!
//! # Features
//!
//! - Policy trees normalized into alternatives (`all`, `exactly_one`, `optional`)
//! - Pull-based processor chain over namespace-aware XML events
//! - Security header processing (timestamps, tokens, signatures, encryption references)
//! - Signed/encrypted/required parts and elements, token and wrapper assertions
//! - Transport-level security (e.g. TLS) standing in for message protection
//! - Basic Security Profile rule handling, warn or enforce
//! - UsernameToken password key derivation and P_SHA1 secret keys
//! - SOAP Fault response generation
//!
//! # Example
//!
//! ```ignore
//! use zentinel_wss_policy::{PolicyValidator, Verdict, WssPolicyConfig};
//!
//! let config = WssPolicyConfig::from_yaml_str(yaml)?;
//! let validator = PolicyValidator::new(config)?;
//! let result = validator.validate(message)?;
//! assert_eq!(result.verdict, Verdict::Satisfied);
//! ```

pub mod agent;
pub mod assertion;
pub mod bsp;
pub mod chain;
pub mod config;
pub mod context;
pub mod derivation;
pub mod enforcer;
pub mod error;
pub mod event;
pub mod header_processor;
pub mod parser;
pub mod path;
pub mod policy;
pub mod policy_processor;
pub mod protection_processor;
pub mod security_event;
pub mod soap;
pub mod validator;

pub use agent::{AgentDecision, AgentMetrics, WssPolicyAgent};
pub use config::WssPolicyConfig;
pub use derivation::{derive_key_from_password, derive_secret_key, p_sha1, UsernameToken};
pub use error::{ErrorCode, PolicyViolation, WssError};
pub use policy::{Alternative, Policy};
pub use validator::{MessageOptions, PolicyValidator, ValidationResult, Verdict};
