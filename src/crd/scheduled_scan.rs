//! # ScheduledScan Spec
//!
//! The cluster object the reconciler writes: one per (target, template) pair.

use serde::{Deserialize, Serialize};

/// ScheduledScan Custom Resource Definition
///
/// Represents "this target should be scanned this way, this often".
/// The scan engine's operator owns execution; this process only owns the
/// desired state.
///
/// # Example
///
/// ```yaml
/// apiVersion: execution.scanfleet.io/v1
/// kind: ScheduledScan
/// metadata:
///   name: trivy-sbom-3f2a9c0d1e4b5a67
///   namespace: scans
///   labels:
///     scanfleet.io/managed-by: cloud-scan-discovery
///     scanfleet.io/template: trivy-sbom
///     scanfleet.io/target-hash: 9a1b2c3d4e5f6071
///   annotations:
///     scanfleet.io/target-id: 123456789012.dkr.ecr.eu-west-1.amazonaws.com/app@sha256:...
/// spec:
///   interval: 1h
///   scanSpec:
///     scanType: trivy-sbom-image
///     parameters:
///       - 123456789012.dkr.ecr.eu-west-1.amazonaws.com/app@sha256:...
///     hookSelector:
///       matchExpressions:
///         - key: foo
///           operator: In
///           values: [bar, baz]
/// ```
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ScheduledScan",
    group = "execution.scanfleet.io",
    version = "v1",
    namespaced,
    shortname = "sscan",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.scanSpec.scanType"}, {"name":"Interval", "type":"string", "jsonPath":".spec.interval"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledScanSpec {
    /// Repeat interval
    /// Format: duration string using the largest exact unit (e.g., "30m", "1h", "7d")
    pub interval: String,
    /// What to run on every tick
    pub scan_spec: ScanSpec,
}

/// The scan the engine executes on each interval tick
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanSpec {
    /// Scan engine identifier (e.g., "trivy-sbom-image", "nmap")
    pub scan_type: String,
    /// Rendered scanner parameters, in template order
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Selects which post-scan hooks run on the results
    /// Evaluated by the hook system, never by this controller
    #[serde(default)]
    pub hook_selector: HookSelector,
}

/// Label selector restricted to match expressions
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HookSelector {
    /// All expressions are ANDed
    #[serde(default)]
    pub match_expressions: Vec<LabelSelectorRequirementSpec>,
}

/// Wire form of a single selector expression
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirementSpec {
    /// Label key the expression applies to
    pub key: String,
    /// One of In, NotIn, Exists, DoesNotExist
    pub operator: SelectorOperator,
    /// Value set for In/NotIn; must be empty for Exists/DoesNotExist
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl SelectorOperator {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorOperator::In => "In",
            SelectorOperator::NotIn => "NotIn",
            SelectorOperator::Exists => "Exists",
            SelectorOperator::DoesNotExist => "DoesNotExist",
        }
    }
}
