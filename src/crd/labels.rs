//! # Identity Labels
//!
//! Labels and annotations that make a ScheduledScan's origin recoverable
//! from the object itself.

/// Marks objects owned by this controller
pub const MANAGED_BY_LABEL: &str = "scanfleet.io/managed-by";

pub const MANAGED_BY_VALUE: &str = "cloud-scan-discovery";

/// Name of the catalog template that produced the object
pub const TEMPLATE_LABEL: &str = "scanfleet.io/template";

/// Hash of the target id; label values cannot hold arbitrary ARNs or image refs
pub const TARGET_HASH_LABEL: &str = "scanfleet.io/target-hash";

/// Raw target id, kept verbatim
pub const TARGET_ID_ANNOTATION: &str = "scanfleet.io/target-id";

pub const TARGET_KIND_ANNOTATION: &str = "scanfleet.io/target-kind";

/// Comma-separated, sorted owners holding the target (ECS task ARNs)
pub const OWNERS_ANNOTATION: &str = "scanfleet.io/owners";

/// Label keys the template rendered on the last write
pub const RENDERED_LABELS_ANNOTATION: &str = "scanfleet.io/rendered-labels";

/// Annotation keys the template rendered on the last write
pub const RENDERED_ANNOTATIONS_ANNOTATION: &str = "scanfleet.io/rendered-annotations";

/// Labels templates may not render
pub const RESERVED_LABELS: &[&str] = &[MANAGED_BY_LABEL, TEMPLATE_LABEL, TARGET_HASH_LABEL];

/// Annotations templates may not render
pub const RESERVED_ANNOTATIONS: &[&str] = &[
    TARGET_ID_ANNOTATION,
    TARGET_KIND_ANNOTATION,
    OWNERS_ANNOTATION,
    RENDERED_LABELS_ANNOTATION,
    RENDERED_ANNOTATIONS_ANNOTATION,
];

/// Label selector matching every object this controller created for a target
#[must_use]
pub fn managed_target_selector(target_hash: &str) -> String {
    format!("{MANAGED_BY_LABEL}={MANAGED_BY_VALUE},{TARGET_HASH_LABEL}={target_hash}")
}
