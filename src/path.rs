//! Qualified names, element paths, and element path patterns.

use crate::error::WssError;
use crate::soap::builtin_namespace;
use glob::Pattern;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A namespace-qualified XML name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    /// Namespace URI (empty when unqualified)
    #[serde(default)]
    pub namespace: String,
    /// Local part
    pub local_name: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local_name: local_name.into(),
        }
    }

    /// A name without namespace.
    pub fn unqualified(local_name: impl Into<String>) -> Self {
        Self::new(String::new(), local_name)
    }

    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace == namespace && self.local_name == local_name
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local_name)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local_name)
        }
    }
}

/// Ordered element names from the document root to a node.
///
/// The length of the path is the nesting depth of the node: the root
/// element has depth 1.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ElementPath(Vec<QName>);

impl ElementPath {
    pub fn new(names: Vec<QName>) -> Self {
        Self(names)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&QName> {
        self.0.get(index)
    }

    pub fn last(&self) -> Option<&QName> {
        self.0.last()
    }

    pub fn names(&self) -> &[QName] {
        &self.0
    }

    /// Path of the enclosing element.
    pub fn parent(&self) -> ElementPath {
        let end = self.0.len().saturating_sub(1);
        Self(self.0[..end].to_vec())
    }

    pub fn push(&mut self, name: QName) {
        self.0.push(name);
    }

    pub fn pop(&mut self) -> Option<QName> {
        self.0.pop()
    }

    /// True when `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &ElementPath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl From<Vec<QName>> for ElementPath {
    fn from(names: Vec<QName>) -> Self {
        Self(names)
    }
}

impl fmt::Display for ElementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for name in &self.0 {
            write!(f, "/{}", name)?;
        }
        Ok(())
    }
}

impl Serialize for ElementPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    /// `*`: exactly one element with any name
    AnyElement,
    /// `**`: zero or more elements
    AnyDescendants,
    /// `prefix:local` or `local`, the local part may use glob wildcards
    Name {
        namespace: Option<String>,
        local: Pattern,
    },
}

impl Step {
    fn matches(&self, name: &QName) -> bool {
        match self {
            Step::AnyElement | Step::AnyDescendants => true,
            Step::Name { namespace, local } => {
                namespace.as_deref().map_or(true, |ns| ns == name.namespace)
                    && local.matches(&name.local_name)
            }
        }
    }
}

/// A compiled absolute element path expression such as
/// `/S11:Envelope/S11:Header/wsse:Security/wsu:Timestamp` or
/// `/S11:Envelope/S11:Body/**/Card*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementPathPattern {
    expression: String,
    steps: Vec<Step>,
}

impl ElementPathPattern {
    /// Compile an expression. Prefixes resolve against `namespaces` first and
    /// then against the built-in WS-Security prefixes.
    pub fn parse(expression: &str, namespaces: &BTreeMap<String, String>) -> Result<Self, WssError> {
        let trimmed = expression.trim();
        let body = trimmed.strip_prefix('/').ok_or_else(|| {
            WssError::InvalidPolicy(format!(
                "element path '{}' must be absolute (start with '/')",
                expression
            ))
        })?;

        let mut steps = Vec::new();
        for segment in body.split('/') {
            let step = match segment {
                "" => {
                    return Err(WssError::InvalidPolicy(format!(
                        "element path '{}' contains an empty step",
                        expression
                    )))
                }
                "*" => Step::AnyElement,
                "**" => Step::AnyDescendants,
                _ => {
                    let (namespace, local) = match segment.split_once(':') {
                        Some((prefix, local)) => {
                            let namespace = namespaces
                                .get(prefix)
                                .map(String::as_str)
                                .or_else(|| builtin_namespace(prefix))
                                .ok_or_else(|| {
                                    WssError::InvalidPolicy(format!(
                                        "unknown namespace prefix '{}' in element path '{}'",
                                        prefix, expression
                                    ))
                                })?;
                            (Some(namespace.to_string()), local)
                        }
                        None => (None, segment),
                    };
                    let local = Pattern::new(local).map_err(|e| {
                        WssError::InvalidPolicy(format!(
                            "invalid name pattern '{}' in element path '{}': {}",
                            local, expression, e
                        ))
                    })?;
                    Step::Name { namespace, local }
                }
            };
            steps.push(step);
        }

        Ok(Self {
            expression: trimmed.to_string(),
            steps,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn matches(&self, path: &ElementPath) -> bool {
        match_steps(&self.steps, path.names())
    }
}

fn match_steps(steps: &[Step], names: &[QName]) -> bool {
    match steps.split_first() {
        None => names.is_empty(),
        Some((Step::AnyDescendants, rest)) => {
            (0..=names.len()).any(|skip| match_steps(rest, &names[skip..]))
        }
        Some((step, rest)) => match names.split_first() {
            Some((name, remaining)) => step.matches(name) && match_steps(rest, remaining),
            None => false,
        },
    }
}

impl fmt::Display for ElementPathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::{SOAP_11_NS, WSSE_NS, WSU_NS};

    fn timestamp_path() -> ElementPath {
        ElementPath::new(vec![
            QName::new(SOAP_11_NS, "Envelope"),
            QName::new(SOAP_11_NS, "Header"),
            QName::new(WSSE_NS, "Security"),
            QName::new(WSU_NS, "Timestamp"),
        ])
    }

    fn compile(expression: &str) -> ElementPathPattern {
        ElementPathPattern::parse(expression, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_path_display_and_parent() {
        let path = timestamp_path();
        assert_eq!(path.len(), 4);
        assert_eq!(path.parent().len(), 3);
        assert_eq!(path.parent().last(), Some(&QName::new(WSSE_NS, "Security")));
        assert!(path.to_string().ends_with(&format!("/{{{}}}Timestamp", WSU_NS)));
        assert!(path.starts_with(&path.parent()));
        assert!(!path.parent().starts_with(&path));
    }

    #[test]
    fn test_exact_pattern() {
        let pattern = compile("/S11:Envelope/S11:Header/wsse:Security/wsu:Timestamp");
        assert!(pattern.matches(&timestamp_path()));
        assert!(!pattern.matches(&timestamp_path().parent()));
    }

    #[test]
    fn test_wildcards() {
        assert!(compile("/S11:Envelope/*/*/wsu:Timestamp").matches(&timestamp_path()));
        assert!(compile("/**/wsu:Timestamp").matches(&timestamp_path()));
        assert!(compile("/S11:Envelope/**").matches(&timestamp_path()));
        assert!(compile("/S11:Envelope/S11:Header/**/Time*").matches(&timestamp_path()));
        assert!(!compile("/S11:Envelope/S11:Body/**").matches(&timestamp_path()));
    }

    #[test]
    fn test_unprefixed_step_matches_any_namespace() {
        assert!(compile("/Envelope/Header/Security/Timestamp").matches(&timestamp_path()));
    }

    #[test]
    fn test_custom_prefix() {
        let mut namespaces = BTreeMap::new();
        namespaces.insert("u".to_string(), WSU_NS.to_string());
        let pattern = ElementPathPattern::parse("/**/u:Timestamp", &namespaces).unwrap();
        assert!(pattern.matches(&timestamp_path()));
    }

    #[test]
    fn test_invalid_expressions() {
        let none = BTreeMap::new();
        assert!(ElementPathPattern::parse("S11:Envelope", &none).is_err());
        assert!(ElementPathPattern::parse("/S11:Envelope//x", &none).is_err());
        assert!(ElementPathPattern::parse("/nope:Envelope", &none).is_err());
        assert!(ElementPathPattern::parse("/S11:[Envelope", &none).is_err());
    }
}
