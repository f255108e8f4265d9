//! # Label Selectors
//!
//! Typed form of the four match-expression operators, with a pure evaluator.
//!
//! Hook selectors are never evaluated by the reconciler; they are copied into
//! each ScheduledScan for the hook system. The same type doubles as the
//! template target filter, where it is evaluated against the event payload.

use crate::crd::{HookSelector, LabelSelectorRequirementSpec, SelectorOperator};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("selector key must not be empty")]
    EmptyKey,
    #[error("operator {operator} on key '{key}' requires at least one value")]
    MissingValues { key: String, operator: &'static str },
    #[error("operator {operator} on key '{key}' must not have values")]
    UnexpectedValues { key: String, operator: &'static str },
}

/// A single match expression
///
/// Value lists keep their configured order so the wire form round-trips verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelSelectorRequirement {
    /// Label present and its value is one of `values`
    In { key: String, values: Vec<String> },
    /// Label absent, or its value is none of `values`
    NotIn { key: String, values: Vec<String> },
    /// Label present, any value
    Exists { key: String },
    /// Label absent
    DoesNotExist { key: String },
}

impl LabelSelectorRequirement {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            LabelSelectorRequirement::In { key, .. }
            | LabelSelectorRequirement::NotIn { key, .. }
            | LabelSelectorRequirement::Exists { key }
            | LabelSelectorRequirement::DoesNotExist { key } => key,
        }
    }

    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            LabelSelectorRequirement::In { key, values } => labels
                .get(key)
                .is_some_and(|value| values.iter().any(|v| v == value)),
            LabelSelectorRequirement::NotIn { key, values } => labels
                .get(key)
                .is_none_or(|value| values.iter().all(|v| v != value)),
            LabelSelectorRequirement::Exists { key } => labels.contains_key(key),
            LabelSelectorRequirement::DoesNotExist { key } => !labels.contains_key(key),
        }
    }

    #[must_use]
    pub fn to_spec(&self) -> LabelSelectorRequirementSpec {
        let (operator, values) = match self {
            LabelSelectorRequirement::In { values, .. } => (SelectorOperator::In, values.clone()),
            LabelSelectorRequirement::NotIn { values, .. } => {
                (SelectorOperator::NotIn, values.clone())
            }
            LabelSelectorRequirement::Exists { .. } => (SelectorOperator::Exists, Vec::new()),
            LabelSelectorRequirement::DoesNotExist { .. } => {
                (SelectorOperator::DoesNotExist, Vec::new())
            }
        };
        LabelSelectorRequirementSpec {
            key: self.key().to_string(),
            operator,
            values,
        }
    }
}

impl TryFrom<LabelSelectorRequirementSpec> for LabelSelectorRequirement {
    type Error = SelectorError;

    fn try_from(spec: LabelSelectorRequirementSpec) -> Result<Self, Self::Error> {
        let LabelSelectorRequirementSpec {
            key,
            operator,
            values,
        } = spec;

        if key.trim().is_empty() {
            return Err(SelectorError::EmptyKey);
        }

        match operator {
            SelectorOperator::In | SelectorOperator::NotIn if values.is_empty() => {
                Err(SelectorError::MissingValues {
                    key,
                    operator: operator.as_str(),
                })
            }
            SelectorOperator::Exists | SelectorOperator::DoesNotExist if !values.is_empty() => {
                Err(SelectorError::UnexpectedValues {
                    key,
                    operator: operator.as_str(),
                })
            }
            SelectorOperator::In => Ok(LabelSelectorRequirement::In { key, values }),
            SelectorOperator::NotIn => Ok(LabelSelectorRequirement::NotIn { key, values }),
            SelectorOperator::Exists => Ok(LabelSelectorRequirement::Exists { key }),
            SelectorOperator::DoesNotExist => Ok(LabelSelectorRequirement::DoesNotExist { key }),
        }
    }
}

/// Conjunction of match expressions; an empty selector matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    #[must_use]
    pub fn new(requirements: Vec<LabelSelectorRequirement>) -> Self {
        Self { requirements }
    }

    /// Validate and convert wire-form expressions
    pub fn from_specs(
        specs: impl IntoIterator<Item = LabelSelectorRequirementSpec>,
    ) -> Result<Self, SelectorError> {
        let requirements = specs
            .into_iter()
            .map(LabelSelectorRequirement::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }

    #[must_use]
    pub fn requirements(&self) -> &[LabelSelectorRequirement] {
        &self.requirements
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| req.matches(labels))
    }

    #[must_use]
    pub fn to_hook_selector(&self) -> HookSelector {
        HookSelector {
            match_expressions: self
                .requirements
                .iter()
                .map(LabelSelectorRequirement::to_spec)
                .collect(),
        }
    }
}

impl TryFrom<HookSelector> for LabelSelector {
    type Error = SelectorError;

    fn try_from(selector: HookSelector) -> Result<Self, Self::Error> {
        Self::from_specs(selector.match_expressions)
    }
}
