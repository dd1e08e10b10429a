//! Security events: facts about the message fed to the policy enforcer.

use crate::path::ElementPath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of security token a protection was verified with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    UsernameToken,
    X509Token,
    SamlToken,
    KerberosToken,
    SecurityContextToken,
}

impl TokenKind {
    /// WS-SecurityPolicy local name of the matching token assertion.
    pub fn local_name(&self) -> &'static str {
        match self {
            Self::UsernameToken => "UsernameToken",
            Self::X509Token => "X509Token",
            Self::SamlToken => "SamlToken",
            Self::KerberosToken => "KerberosToken",
            Self::SecurityContextToken => "SecurityContextToken",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.local_name())
    }
}

/// Reference to the token that verified a protection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TokenRef {
    /// `wsu:Id` of the token, when known
    pub id: Option<String>,
    /// Resolved token kind, `None` when the reference could not be resolved
    pub kind: Option<TokenKind>,
}

impl TokenRef {
    pub fn new(id: Option<String>, kind: Option<TokenKind>) -> Self {
        Self { id, kind }
    }

    /// A reference known only by kind.
    pub fn of_kind(kind: TokenKind) -> Self {
        Self { id: None, kind: Some(kind) }
    }
}

/// Kinds of security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SecurityEventKind {
    RequiredPart,
    RequiredElement,
    SignedPart,
    SignedElement,
    EncryptedPart,
    EncryptedElement,
    ContentEncryptedElement,
}

impl SecurityEventKind {
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::SignedPart | Self::SignedElement)
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(
            self,
            Self::EncryptedPart | Self::EncryptedElement | Self::ContentEncryptedElement
        )
    }

    pub fn is_required(&self) -> bool {
        matches!(self, Self::RequiredPart | Self::RequiredElement)
    }
}

impl fmt::Display for SecurityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// An immutable fact about one part or element of the message.
///
/// A signed or encrypted event without a token means the node was observed
/// without the protection; with a token it means the protection was verified
/// upstream with that token. Required events only report presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityEvent {
    kind: SecurityEventKind,
    path: ElementPath,
    token: Option<TokenRef>,
}

impl SecurityEvent {
    /// A fact with no protection attached.
    pub fn new(kind: SecurityEventKind, path: ElementPath) -> Self {
        Self {
            kind,
            path,
            token: None,
        }
    }

    /// A fact whose protection was verified with `token`.
    pub fn protected(kind: SecurityEventKind, path: ElementPath, token: TokenRef) -> Self {
        Self {
            kind,
            path,
            token: Some(token),
        }
    }

    pub fn kind(&self) -> SecurityEventKind {
        self.kind
    }

    pub fn path(&self) -> &ElementPath {
        &self.path
    }

    pub fn token(&self) -> Option<&TokenRef> {
        self.token.as_ref()
    }

    pub fn is_protected(&self) -> bool {
        self.token.is_some()
    }

    pub fn token_kind(&self) -> Option<TokenKind> {
        self.token.as_ref().and_then(|t| t.kind)
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.path)?;
        if let Some(kind) = self.token_kind() {
            write!(f, " ({})", kind)?;
        }
        Ok(())
    }
}
