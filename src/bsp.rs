//! Basic Security Profile compliance rules.

use crate::error::WssError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

/// BSP 1.1 rules checked during processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BspRule {
    /// A security header must not contain more than one timestamp
    R3227,
    /// A derived-key username token must carry a salt
    R4217,
    /// A derived-key username token must use at least 1000 iterations
    R4218,
}

impl BspRule {
    pub fn description(&self) -> &'static str {
        match self {
            Self::R3227 => "security header contains more than one wsu:Timestamp",
            Self::R4217 => "UsernameToken used for key derivation has no wsse11:Salt",
            Self::R4218 => "UsernameToken used for key derivation has fewer than 1000 iterations",
        }
    }
}

impl fmt::Display for BspRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BSP:{:?}", self)
    }
}

/// Decides what happens when a BSP rule is broken.
pub trait BspRuleHandler: fmt::Debug + Send + Sync {
    fn handle_bsp_rule(&self, rule: BspRule) -> Result<(), WssError>;
}

/// Configurable handler: ignore, warn, or fail.
#[derive(Debug, Clone, Default)]
pub struct BspEnforcement {
    enforce: bool,
    ignored: HashSet<BspRule>,
}

impl BspEnforcement {
    pub fn new(enforce: bool, ignored: impl IntoIterator<Item = BspRule>) -> Self {
        Self {
            enforce,
            ignored: ignored.into_iter().collect(),
        }
    }

    /// Fail on every rule.
    pub fn strict() -> Self {
        Self::new(true, [])
    }
}

impl BspRuleHandler for BspEnforcement {
    fn handle_bsp_rule(&self, rule: BspRule) -> Result<(), WssError> {
        if self.ignored.contains(&rule) {
            return Ok(());
        }
        if !self.enforce {
            warn!(rule = %rule, reason = rule.description(), "BSP rule violated");
            return Ok(());
        }
        Err(WssError::Bsp(rule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_display() {
        assert_eq!(BspRule::R4218.to_string(), "BSP:R4218");
    }

    #[test]
    fn test_lenient_handler_warns() {
        let handler = BspEnforcement::default();
        assert!(handler.handle_bsp_rule(BspRule::R4217).is_ok());
    }

    #[test]
    fn test_strict_handler_fails() {
        let handler = BspEnforcement::strict();
        assert!(matches!(
            handler.handle_bsp_rule(BspRule::R3227),
            Err(WssError::Bsp(BspRule::R3227))
        ));
    }

    #[test]
    fn test_ignored_rule_passes_when_enforced() {
        let handler = BspEnforcement::new(true, [BspRule::R4218]);
        assert!(handler.handle_bsp_rule(BspRule::R4218).is_ok());
        assert!(handler.handle_bsp_rule(BspRule::R4217).is_err());
    }
}
