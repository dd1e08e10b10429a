//! Error types for WS-SecurityPolicy enforcement.

use crate::bsp::BspRule;
use crate::path::{ElementPath, QName};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Policy enforcement errors.
#[derive(Error, Debug)]
pub enum WssError {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Ordering error: {0}")]
    Ordering(String),

    #[error("{0} violated: {desc}", desc = .0.description())]
    Bsp(BspRule),

    #[error("Invalid security token: {0}")]
    InvalidToken(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Message expired: {0}")]
    MessageExpired(String),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error(transparent)]
    PolicyViolated(#[from] PolicyViolation),

    #[error("Cryptographic error: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WssError {
    /// Stable fault category for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::XmlParse(_)
            | Self::Config(_)
            | Self::InvalidPolicy(_)
            | Self::Ordering(_)
            | Self::Bsp(_)
            | Self::MessageTooLarge { .. }
            | Self::PolicyViolated(_)
            | Self::Io(_) => ErrorCode::InvalidSecurity,
            Self::InvalidToken(_) => ErrorCode::InvalidSecurityToken,
            Self::InvalidTimestamp(_) => ErrorCode::FailedCheck,
            Self::MessageExpired(_) => ErrorCode::MessageExpired,
            Self::Crypto(_) => ErrorCode::UnsupportedAlgorithm,
        }
    }
}

/// WS-Security fault codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// An error was discovered processing the security header
    InvalidSecurity,
    /// An invalid security token was provided
    InvalidSecurityToken,
    /// The signature or decryption was invalid
    FailedCheck,
    /// An unsupported signature or encryption algorithm was used
    UnsupportedAlgorithm,
    /// The message has expired
    MessageExpired,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSecurity => "INVALID_SECURITY",
            Self::InvalidSecurityToken => "INVALID_SECURITY_TOKEN",
            Self::FailedCheck => "FAILED_CHECK",
            Self::UnsupportedAlgorithm => "UNSUPPORTED_ALGORITHM",
            Self::MessageExpired => "MESSAGE_EXPIRED",
        }
    }

    /// Qualified `wsse:` fault code.
    pub fn fault_code(&self) -> &'static str {
        match self {
            Self::InvalidSecurity => "wsse:InvalidSecurity",
            Self::InvalidSecurityToken => "wsse:InvalidSecurityToken",
            Self::FailedCheck => "wsse:FailedCheck",
            Self::UnsupportedAlgorithm => "wsse:UnsupportedAlgorithm",
            Self::MessageExpired => "wsse:MessageExpired",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one policy alternative could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlternativeFailure {
    /// Index of the alternative in the normalized policy
    pub alternative: usize,
    /// Name of the first assertion that failed
    pub assertion: QName,
    /// Location of the offending event, if an event falsified the assertion
    pub path: Option<ElementPath>,
    /// Human-readable reason
    pub reason: String,
}

impl fmt::Display for AlternativeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "alternative {}: {} {}",
            self.alternative, self.assertion.local_name, self.reason
        )?;
        if let Some(path) = &self.path {
            write!(f, " at {}", path)?;
        }
        Ok(())
    }
}

/// No policy alternative was satisfied by the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyViolation {
    pub failures: Vec<AlternativeFailure>,
}

impl PolicyViolation {
    pub fn new(failures: Vec<AlternativeFailure>) -> Self {
        Self { failures }
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidSecurity
    }

    /// Failures naming the given assertion local name.
    pub fn failures_for<'a>(
        &'a self,
        local_name: &'a str,
    ) -> impl Iterator<Item = &'a AlternativeFailure> + 'a {
        self.failures
            .iter()
            .filter(move |f| f.assertion.local_name == local_name)
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            return write!(f, "security policy has no alternatives");
        }
        write!(f, "no security policy alternative satisfied: ")?;
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for PolicyViolation {}

/// SOAP Fault version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SoapFaultVersion {
    #[default]
    Soap11,
    Soap12,
}

/// Generate a SOAP Fault response for an enforcement error.
pub fn soap_fault_response(error: &WssError, version: SoapFaultVersion) -> String {
    match version {
        SoapFaultVersion::Soap11 => soap_11_fault(error),
        SoapFaultVersion::Soap12 => soap_12_fault(error),
    }
}

fn fault_detail(error: &WssError) -> String {
    match error {
        WssError::PolicyViolated(violation) => violation
            .failures
            .iter()
            .map(|f| {
                format!(
                    "          <zwsp:failure alternative=\"{}\" assertion=\"{}\">{}</zwsp:failure>",
                    f.alternative,
                    xml_escape(&f.assertion.to_string()),
                    xml_escape(&f.to_string())
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => format!(
            "          <zwsp:error code=\"{}\">{}</zwsp:error>",
            other.code().as_str(),
            xml_escape(&other.to_string())
        ),
    }
}

fn soap_11_fault(error: &WssError) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/" xmlns:wsse="{wsse}">
  <soap:Body>
    <soap:Fault>
      <faultcode>{code}</faultcode>
      <faultstring>{reason}</faultstring>
      <detail>
        <zwsp:security xmlns:zwsp="urn:zentinel:wss:policy">
{detail}
        </zwsp:security>
      </detail>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        wsse = crate::soap::WSSE_NS,
        code = error.code().fault_code(),
        reason = xml_escape(&error.to_string()),
        detail = fault_detail(error)
    )
}

fn soap_12_fault(error: &WssError) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:wsse="{wsse}">
  <soap:Body>
    <soap:Fault>
      <soap:Code>
        <soap:Value>soap:Sender</soap:Value>
        <soap:Subcode>
          <soap:Value>{code}</soap:Value>
        </soap:Subcode>
      </soap:Code>
      <soap:Reason>
        <soap:Text xml:lang="en">{reason}</soap:Text>
      </soap:Reason>
      <soap:Detail>
        <zwsp:security xmlns:zwsp="urn:zentinel:wss:policy">
{detail}
        </zwsp:security>
      </soap:Detail>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        wsse = crate::soap::WSSE_NS,
        code = error.code().fault_code(),
        reason = xml_escape(&error.to_string()),
        detail = fault_detail(error)
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
