//! Configuration types for the WS-SecurityPolicy enforcer.

use crate::bsp::{BspEnforcement, BspRule};
use crate::error::WssError;
use crate::policy::Policy;
use crate::soap::{SoapNames, SOAP_11_NS, SOAP_12_NS};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Main configuration for the policy enforcer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WssPolicyConfig {
    /// Config version
    pub version: String,

    /// General settings
    pub settings: SettingsConfig,

    /// Envelope naming
    pub envelope: EnvelopeConfig,

    /// Transport-level protection
    pub transport: TransportConfig,

    /// Timestamp freshness checks
    pub timestamp: TimestampConfig,

    /// Basic Security Profile enforcement
    pub bsp: BspConfig,

    /// The security policy every message must satisfy
    pub policy: Policy,
}

impl Default for WssPolicyConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: SettingsConfig::default(),
            envelope: EnvelopeConfig::default(),
            transport: TransportConfig::default(),
            timestamp: TimestampConfig::default(),
            bsp: BspConfig::default(),
            policy: Policy::default(),
        }
    }
}

impl WssPolicyConfig {
    /// Parse a YAML configuration document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, WssError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| WssError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot bound.
    pub fn validate(&self) -> Result<(), WssError> {
        self.timestamp.future_skew()?;
        self.timestamp.max_age()?;
        Ok(())
    }
}

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsConfig {
    /// Role this node plays; selects the `wsse:Security` header to process.
    /// Absent means the ultimate receiver.
    pub actor: Option<String>,

    /// Action on failure: "block" or "allow"
    pub fail_action: FailAction,

    /// Maximum body size to process (bytes)
    pub max_body_size: usize,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            actor: None,
            fail_action: FailAction::Block,
            max_body_size: 1_048_576, // 1MB
        }
    }
}

/// Failure action when the policy is not satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailAction {
    /// Block the message
    #[default]
    Block,
    /// Allow the message (log only)
    Allow,
}

/// Envelope element naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// SOAP envelope namespace
    pub namespace: String,

    /// Local name of the envelope element
    pub local_name: String,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            namespace: SOAP_11_NS.to_string(),
            local_name: "Envelope".to_string(),
        }
    }
}

impl EnvelopeConfig {
    pub fn soap_names(&self) -> SoapNames {
        SoapNames::new(self.namespace.clone(), self.local_name.clone())
    }

    /// SOAP version implied by the namespace, if it is a standard one.
    pub fn version(&self) -> Option<SoapVersion> {
        SoapVersion::from_namespace(&self.namespace)
    }
}

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[serde(rename = "1.1")]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_NS,
            Self::Soap12 => SOAP_12_NS,
        }
    }

    pub fn from_namespace(namespace: &str) -> Option<Self> {
        match namespace {
            SOAP_11_NS => Some(Self::Soap11),
            SOAP_12_NS => Some(Self::Soap12),
            _ => None,
        }
    }
}

/// Transport-level protection of the channel the message arrived on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// The channel (e.g. TLS) protects the whole message
    pub security_active: bool,
}

/// Upper bound for timestamp windows (100 years).
pub const MAX_TIMESTAMP_WINDOW_SECS: u64 = 3_155_760_000;

/// `wsu:Timestamp` freshness checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// Validate Created/Expires of the security header timestamp
    pub enabled: bool,

    /// Maximum timestamp age in seconds (0 disables the check)
    pub max_age_secs: u64,

    /// Tolerated clock skew for Created values in the future
    pub future_skew_secs: u64,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_secs: 300, // 5 minutes
            future_skew_secs: 60,
        }
    }
}

impl TimestampConfig {
    /// Tolerated skew as a duration.
    pub fn future_skew(&self) -> Result<Duration, WssError> {
        window("timestamp.future_skew_secs", self.future_skew_secs)
    }

    /// Maximum age as a duration; `None` when the check is disabled.
    pub fn max_age(&self) -> Result<Option<Duration>, WssError> {
        if self.max_age_secs == 0 {
            return Ok(None);
        }
        window("timestamp.max_age_secs", self.max_age_secs).map(Some)
    }
}

fn window(field: &str, secs: u64) -> Result<Duration, WssError> {
    if secs > MAX_TIMESTAMP_WINDOW_SECS {
        return Err(WssError::Config(format!(
            "{} = {} exceeds the maximum of {} seconds",
            field, secs, MAX_TIMESTAMP_WINDOW_SECS
        )));
    }
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| WssError::Config(format!("{} = {} is out of range", field, secs)))
}

/// Basic Security Profile rule handling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BspConfig {
    /// Fail processing on violated rules instead of warning
    pub enforce: bool,

    /// Rules never reported
    pub ignored_rules: Vec<BspRule>,
}

impl BspConfig {
    pub fn handler(&self) -> BspEnforcement {
        BspEnforcement::new(self.enforce, self.ignored_rules.iter().copied())
    }
}
