//! # Custom Resource Definitions
//!
//! CRD types written by the discovery reconciler.
//!
//! ## Module Structure
//!
//! - `scheduled_scan.rs` - `ScheduledScan` spec, scan spec and hook selector wire types
//! - `labels.rs` - Identity labels and annotations stamped on every managed object

mod labels;
mod scheduled_scan;

pub use labels::{
    MANAGED_BY_LABEL, MANAGED_BY_VALUE, OWNERS_ANNOTATION, RENDERED_ANNOTATIONS_ANNOTATION,
    RENDERED_LABELS_ANNOTATION, RESERVED_ANNOTATIONS, RESERVED_LABELS, TARGET_HASH_LABEL,
    TARGET_ID_ANNOTATION, TARGET_KIND_ANNOTATION, TEMPLATE_LABEL, managed_target_selector,
};
pub use scheduled_scan::{
    HookSelector, LabelSelectorRequirementSpec, ScanSpec, ScheduledScan, ScheduledScanSpec,
    SelectorOperator,
};
