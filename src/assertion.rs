//! WS-SecurityPolicy assertions.

use crate::error::WssError;
use crate::path::{ElementPath, ElementPathPattern, QName};
use crate::policy::Policy;
use crate::security_event::{SecurityEventKind, TokenKind};
use crate::soap::{SoapNames, SP_NS};
use serde::Deserialize;
use std::collections::BTreeMap;

/// A single policy assertion.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assertion {
    /// Parts that must be signed
    SignedParts(PartsAssertion),
    /// Parts that must be encrypted
    EncryptedParts(PartsAssertion),
    /// Header parts that must be present
    RequiredParts(RequiredPartsAssertion),
    SignedElements(ElementsAssertion),
    EncryptedElements(ElementsAssertion),
    ContentEncryptedElements(ElementsAssertion),
    RequiredElements(ElementsAssertion),
    /// A `wsu:Timestamp` must be present in the security header
    IncludeTimestamp,
    /// A token of the given kind must be presented
    Token(TokenAssertion),
    /// A token role constraining the tokens used for protection
    Wrapper(TokenWrapper),
}

impl Assertion {
    /// Qualified WS-SecurityPolicy name of the assertion.
    pub fn name(&self) -> QName {
        let local = match self {
            Self::SignedParts(_) => "SignedParts",
            Self::EncryptedParts(_) => "EncryptedParts",
            Self::RequiredParts(_) => "RequiredParts",
            Self::SignedElements(_) => "SignedElements",
            Self::EncryptedElements(_) => "EncryptedElements",
            Self::ContentEncryptedElements(_) => "ContentEncryptedElements",
            Self::RequiredElements(_) => "RequiredElements",
            Self::IncludeTimestamp => "IncludeTimestamp",
            Self::Token(token) => token.kind.local_name(),
            Self::Wrapper(wrapper) => wrapper.kind().local_name(),
        };
        QName::new(SP_NS, local)
    }
}

/// Identifies a SOAP header block by namespace and optional local name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HeaderSpec {
    /// Local name; absent means every header in the namespace
    #[serde(default)]
    pub name: Option<String>,
    pub namespace: String,
}

impl HeaderSpec {
    pub fn new(namespace: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            namespace: namespace.into(),
        }
    }

    pub fn matches(&self, name: &QName) -> bool {
        self.namespace == name.namespace
            && self.name.as_deref().map_or(true, |n| n == name.local_name)
    }
}

/// `sp:SignedParts` / `sp:EncryptedParts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PartsAssertion {
    /// Protect the SOAP Body
    pub body: bool,
    /// Protect these header blocks
    pub headers: Vec<HeaderSpec>,
}

impl PartsAssertion {
    pub fn body() -> Self {
        Self {
            body: true,
            headers: Vec::new(),
        }
    }

    /// True when `path` names a part this assertion protects.
    pub fn covers(&self, path: &ElementPath, soap: &SoapNames) -> bool {
        if soap.is_body_part(path) {
            return self.body;
        }
        if soap.is_header_part(path) {
            return path
                .last()
                .is_some_and(|name| self.headers.iter().any(|h| h.matches(name)));
        }
        false
    }
}

/// `sp:RequiredParts`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RequiredPartsAssertion {
    pub headers: Vec<HeaderSpec>,
}

/// Serialized form of [`ElementsAssertion`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ElementsSpec {
    pub paths: Vec<String>,
    pub namespaces: BTreeMap<String, String>,
}

/// `sp:SignedElements` and friends: a list of element path patterns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ElementsSpec")]
pub struct ElementsAssertion {
    patterns: Vec<ElementPathPattern>,
}

impl ElementsAssertion {
    /// Compile path expressions; prefixes resolve against `namespaces` and the
    /// built-in WS-Security prefixes.
    pub fn new<S: AsRef<str>>(
        paths: &[S],
        namespaces: &BTreeMap<String, String>,
    ) -> Result<Self, WssError> {
        let patterns = paths
            .iter()
            .map(|p| ElementPathPattern::parse(p.as_ref(), namespaces))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> &[ElementPathPattern] {
        &self.patterns
    }

    pub fn matches(&self, path: &ElementPath) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }
}

impl TryFrom<ElementsSpec> for ElementsAssertion {
    type Error = WssError;

    fn try_from(spec: ElementsSpec) -> Result<Self, Self::Error> {
        Self::new(&spec.paths, &spec.namespaces)
    }
}

/// A token assertion such as `sp:X509Token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TokenAssertion {
    pub kind: TokenKind,
}

impl TokenAssertion {
    pub fn new(kind: TokenKind) -> Self {
        Self { kind }
    }
}

/// Token roles of the WS-SecurityPolicy bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapperKind {
    InitiatorToken,
    RecipientToken,
    SignatureToken,
    EncryptionToken,
    ProtectionToken,
}

impl WrapperKind {
    pub fn local_name(&self) -> &'static str {
        match self {
            Self::InitiatorToken => "InitiatorToken",
            Self::RecipientToken => "RecipientToken",
            Self::SignatureToken => "SignatureToken",
            Self::EncryptionToken => "EncryptionToken",
            Self::ProtectionToken => "ProtectionToken",
        }
    }

    /// Whether events of `kind` are produced with a token in this role.
    pub fn covers(&self, kind: SecurityEventKind) -> bool {
        match self {
            Self::InitiatorToken | Self::SignatureToken => kind.is_signed(),
            Self::RecipientToken | Self::EncryptionToken => kind.is_encrypted(),
            Self::ProtectionToken => kind.is_signed() || kind.is_encrypted(),
        }
    }
}

/// Serialized form of [`TokenWrapper`].
#[derive(Debug, Clone, Deserialize)]
pub struct TokenWrapperSpec {
    pub kind: WrapperKind,
    #[serde(default)]
    pub policy: Policy,
}

/// A token role wrapping a nested policy.
///
/// The nested token is resolved once, at construction, from the first
/// alternative of the nested policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "TokenWrapperSpec")]
pub struct TokenWrapper {
    kind: WrapperKind,
    policy: Policy,
    token: Option<TokenAssertion>,
}

impl TokenWrapper {
    pub fn new(kind: WrapperKind, policy: Policy) -> Result<Self, WssError> {
        let alternatives = policy.normalize();
        let mut token = None;
        if let Some(first) = alternatives.first() {
            for assertion in first.assertions() {
                if let Assertion::Token(candidate) = assertion {
                    if token.is_some() {
                        return Err(WssError::InvalidPolicy(format!(
                            "{} must contain exactly one token assertion",
                            kind.local_name()
                        )));
                    }
                    token = Some(*candidate);
                }
            }
        }

        Ok(Self {
            kind,
            policy,
            token,
        })
    }

    pub fn kind(&self) -> WrapperKind {
        self.kind
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn token(&self) -> Option<&TokenAssertion> {
        self.token.as_ref()
    }
}

impl TryFrom<TokenWrapperSpec> for TokenWrapper {
    type Error = WssError;

    fn try_from(spec: TokenWrapperSpec) -> Result<Self, Self::Error> {
        Self::new(spec.kind, spec.policy)
    }
}
