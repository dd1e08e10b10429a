//! Policy trees and their normalization into alternatives.

use crate::assertion::Assertion;
use serde::Deserialize;

/// A policy: a conjunction of components.
///
/// In YAML a policy is a list; each entry is either an operator
/// (`all`, `exactly_one`, `optional`) or an assertion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Policy {
    components: Vec<PolicyComponent>,
}

/// A node of the policy tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyComponent {
    /// Every child must hold
    All(Vec<PolicyComponent>),
    /// Exactly one child must hold
    ExactlyOne(Vec<PolicyComponent>),
    /// The child may hold or be absent
    Optional(Box<PolicyComponent>),
    #[serde(untagged)]
    Assertion(Assertion),
}

/// One way of satisfying a policy: a flat set of assertions that must all hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alternative {
    assertions: Vec<Assertion>,
}

impl Alternative {
    pub fn new(assertions: Vec<Assertion>) -> Self {
        Self { assertions }
    }

    pub fn assertions(&self) -> &[Assertion] {
        &self.assertions
    }

    pub fn is_empty(&self) -> bool {
        self.assertions.is_empty()
    }

    fn merged(&self, other: &Alternative) -> Alternative {
        let mut assertions = self.assertions.clone();
        assertions.extend(other.assertions.iter().cloned());
        Alternative { assertions }
    }
}

impl Policy {
    pub fn new(components: Vec<PolicyComponent>) -> Self {
        Self { components }
    }

    /// A policy with a single alternative made of `assertions`.
    pub fn all_of(assertions: impl IntoIterator<Item = Assertion>) -> Self {
        Self::new(
            assertions
                .into_iter()
                .map(PolicyComponent::Assertion)
                .collect(),
        )
    }

    pub fn components(&self) -> &[PolicyComponent] {
        &self.components
    }

    /// Expand into normal form.
    ///
    /// An empty policy has one empty alternative; an empty `exactly_one` has
    /// none and can never be satisfied.
    pub fn normalize(&self) -> Vec<Alternative> {
        conjunction(&self.components)
    }
}

fn conjunction(components: &[PolicyComponent]) -> Vec<Alternative> {
    let mut result = vec![Alternative::default()];
    for component in components {
        let options = alternatives(component);
        result = result
            .iter()
            .flat_map(|left| options.iter().map(move |right| left.merged(right)))
            .collect();
    }
    result
}

fn alternatives(component: &PolicyComponent) -> Vec<Alternative> {
    match component {
        PolicyComponent::All(children) => conjunction(children),
        PolicyComponent::ExactlyOne(children) => children.iter().flat_map(alternatives).collect(),
        PolicyComponent::Optional(child) => {
            let mut options = alternatives(child);
            options.push(Alternative::default());
            options
        }
        PolicyComponent::Assertion(assertion) => vec![Alternative::new(vec![assertion.clone()])],
    }
}
