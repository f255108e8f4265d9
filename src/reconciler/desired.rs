//! # Desired State
//!
//! The ScheduledScan a (template, event) pair should produce, and how it is
//! compared against and merged into what the cluster already holds.
//!
//! Bookkeeping annotations ride along with the rendered ones:
//!
//! - the rendered label and annotation keys, so a key dropped from the
//!   template is removed from the object on the next write, while keys set
//!   by other actors are left alone;
//! - the owners holding the target, merged on every upsert and released
//!   one at a time by owner-scoped deletions.

use super::naming::{scan_object_name, target_hash};
use crate::catalog::duration::format_kubernetes_duration;
use crate::catalog::{RenderError, ScanTemplate};
use crate::crd::{
    ScanSpec, ScheduledScan, ScheduledScanSpec, MANAGED_BY_LABEL, MANAGED_BY_VALUE,
    OWNERS_ANNOTATION, RENDERED_ANNOTATIONS_ANNOTATION, RENDERED_LABELS_ANNOTATION,
    TARGET_HASH_LABEL, TARGET_ID_ANNOTATION, TARGET_KIND_ANNOTATION, TEMPLATE_LABEL,
};
use crate::event::ResourceChangeEvent;
use kube::api::ObjectMeta;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq)]
pub struct DesiredScan {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub spec: ScheduledScanSpec,
    /// Owner to add to the object's owner set
    pub owner: Option<String>,
    rendered_labels: BTreeSet<String>,
    rendered_annotations: BTreeSet<String>,
}

impl DesiredScan {
    /// Render `template` for `event` and stamp the identity keys
    pub fn build(
        template: &ScanTemplate,
        event: &ResourceChangeEvent,
        namespace: &str,
    ) -> Result<Self, RenderError> {
        let rendered = template.render(event)?;
        let rendered_labels: BTreeSet<String> = rendered.labels.keys().cloned().collect();
        let rendered_annotations: BTreeSet<String> =
            rendered.annotations.keys().cloned().collect();

        let mut labels = rendered.labels;
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
        labels.insert(TEMPLATE_LABEL.to_string(), template.name().to_string());
        labels.insert(TARGET_HASH_LABEL.to_string(), target_hash(event.target_id()));

        let mut annotations = rendered.annotations;
        annotations.insert(TARGET_ID_ANNOTATION.to_string(), event.target_id().to_string());
        annotations.insert(
            TARGET_KIND_ANNOTATION.to_string(),
            event.target_kind().to_string(),
        );
        annotations.insert(
            RENDERED_LABELS_ANNOTATION.to_string(),
            join_keys(&rendered_labels),
        );
        annotations.insert(
            RENDERED_ANNOTATIONS_ANNOTATION.to_string(),
            join_keys(&rendered_annotations),
        );

        Ok(Self {
            name: scan_object_name(template.name(), event.target_id()),
            namespace: namespace.to_string(),
            labels,
            annotations,
            spec: ScheduledScanSpec {
                interval: format_kubernetes_duration(template.repeat_interval()),
                scan_spec: ScanSpec {
                    scan_type: template.scan_type().to_string(),
                    parameters: rendered.parameters,
                    hook_selector: template.hook_selector().to_hook_selector(),
                },
            },
            owner: event.owner().map(str::to_string),
            rendered_labels,
            rendered_annotations,
        })
    }

    /// Fresh object for a create call
    #[must_use]
    pub fn to_resource(&self) -> ScheduledScan {
        let mut annotations = self.annotations.clone();
        if let Some(owner) = &self.owner {
            annotations.insert(OWNERS_ANNOTATION.to_string(), owner.clone());
        }
        ScheduledScan {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                annotations: Some(annotations),
                ..ObjectMeta::default()
            },
            spec: self.spec.clone(),
        }
    }

    /// Whether `existing` already carries everything this object asks for
    ///
    /// Keys set by other actors are ignored; only the keys we own, the
    /// spec, and membership of our owner are compared. A matching
    /// rendered-keys record means stale keys were pruned by an earlier write.
    #[must_use]
    pub fn is_satisfied_by(&self, existing: &ScheduledScan) -> bool {
        existing.spec == self.spec
            && contains_all(existing.metadata.labels.as_ref(), &self.labels)
            && contains_all(existing.metadata.annotations.as_ref(), &self.annotations)
            && self
                .owner
                .as_ref()
                .is_none_or(|owner| owners_of(existing).contains(owner))
    }

    /// Overlay desired state onto a fetched object, keeping its
    /// `resourceVersion` for the conditional update
    ///
    /// Keys the template rendered last time but no longer does are removed.
    pub fn apply_to(&self, existing: &mut ScheduledScan) {
        let stale_labels = recorded_keys(existing, RENDERED_LABELS_ANNOTATION)
            .into_iter()
            .filter(|key| !self.rendered_labels.contains(key))
            .collect::<Vec<_>>();
        let stale_annotations = recorded_keys(existing, RENDERED_ANNOTATIONS_ANNOTATION)
            .into_iter()
            .filter(|key| !self.rendered_annotations.contains(key))
            .collect::<Vec<_>>();

        let labels = existing.metadata.labels.get_or_insert_with(BTreeMap::new);
        for key in &stale_labels {
            labels.remove(key);
        }
        labels.extend(self.labels.clone());

        let annotations = existing
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new);
        for key in &stale_annotations {
            annotations.remove(key);
        }
        annotations.extend(self.annotations.clone());

        if let Some(owner) = &self.owner {
            let mut owners = owners_of(existing);
            owners.insert(owner.clone());
            set_owners(existing, &owners);
        }
        existing.spec = self.spec.clone();
    }
}

/// Owners recorded on `scan`; empty when it was never owner-tracked
#[must_use]
pub fn owners_of(scan: &ScheduledScan) -> BTreeSet<String> {
    recorded_keys(scan, OWNERS_ANNOTATION)
}

/// Record `owners` on `scan`, dropping the annotation when none remain
pub fn set_owners(scan: &mut ScheduledScan, owners: &BTreeSet<String>) {
    let annotations = scan.metadata.annotations.get_or_insert_with(BTreeMap::new);
    if owners.is_empty() {
        annotations.remove(OWNERS_ANNOTATION);
    } else {
        annotations.insert(OWNERS_ANNOTATION.to_string(), join_keys(owners));
    }
}

fn recorded_keys(scan: &ScheduledScan, annotation: &str) -> BTreeSet<String> {
    scan.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(annotation))
        .map(|value| {
            value
                .split(',')
                .filter(|key| !key.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// Label and annotation keys cannot contain ','; neither can ARNs
fn join_keys(keys: &BTreeSet<String>) -> String {
    keys.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

fn contains_all(
    actual: Option<&BTreeMap<String, String>>,
    wanted: &BTreeMap<String, String>,
) -> bool {
    wanted.iter().all(|(key, value)| {
        actual
            .and_then(|map| map.get(key))
            .is_some_and(|existing| existing == value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, ScanTemplateConfig};
    use crate::crd::{HookSelector, LabelSelectorRequirementSpec, SelectorOperator};
    use crate::event::{ChangeKind, TargetKind};

    fn template_with(
        annotations: BTreeMap<String, String>,
        labels: BTreeMap<String, String>,
    ) -> ScanTemplate {
        let catalog = Catalog::load(vec![ScanTemplateConfig {
            name: "t1".to_string(),
            target_kind: TargetKind::Instance,
            filter: Vec::new(),
            scan_type: "nmap".to_string(),
            repeat_interval: "90m".to_string(),
            annotations,
            labels,
            parameters: vec!["{{ .InstanceID }}".to_string(), "--region={{ .Region }}".to_string()],
            hook_selector: HookSelector {
                match_expressions: vec![LabelSelectorRequirementSpec {
                    key: "foo".to_string(),
                    operator: SelectorOperator::Exists,
                    values: Vec::new(),
                }],
            },
        }])
        .unwrap();
        catalog.templates()[0].clone()
    }

    fn template(labels: BTreeMap<String, String>) -> ScanTemplate {
        template_with(
            BTreeMap::from([("a".to_string(), "{{ .Target.Id }}".to_string())]),
            labels,
        )
    }

    fn event() -> ResourceChangeEvent {
        ResourceChangeEvent::new(
            "i-123",
            TargetKind::Instance,
            ChangeKind::Created,
            BTreeMap::from([
                ("InstanceID".to_string(), "i-123".to_string()),
                ("Region".to_string(), "eu-west-1".to_string()),
            ]),
        )
        .unwrap()
    }

    fn annotations(scan: &ScheduledScan) -> &BTreeMap<String, String> {
        scan.metadata.annotations.as_ref().unwrap()
    }

    #[test]
    fn test_build_renders_and_stamps_identity() {
        let desired = DesiredScan::build(&template(BTreeMap::new()), &event(), "scans").unwrap();

        assert_eq!(desired.name, scan_object_name("t1", "i-123"));
        assert_eq!(desired.spec.interval, "90m");
        assert_eq!(desired.spec.scan_spec.scan_type, "nmap");
        assert_eq!(
            desired.spec.scan_spec.parameters,
            vec!["i-123".to_string(), "--region=eu-west-1".to_string()]
        );
        assert_eq!(desired.annotations["a"], "i-123");
        assert_eq!(desired.annotations[TARGET_ID_ANNOTATION], "i-123");
        assert_eq!(desired.annotations[TARGET_KIND_ANNOTATION], "instance");
        assert_eq!(desired.annotations[RENDERED_ANNOTATIONS_ANNOTATION], "a");
        assert_eq!(desired.annotations[RENDERED_LABELS_ANNOTATION], "");
        assert_eq!(desired.labels[TEMPLATE_LABEL], "t1");
        assert_eq!(desired.labels[MANAGED_BY_LABEL], MANAGED_BY_VALUE);
        assert_eq!(desired.spec.scan_spec.hook_selector.match_expressions.len(), 1);
        assert_eq!(desired.owner, None);
        assert!(!annotations(&desired.to_resource()).contains_key(OWNERS_ANNOTATION));
    }

    #[test]
    fn test_satisfied_ignores_foreign_keys() {
        let desired = DesiredScan::build(&template(BTreeMap::new()), &event(), "scans").unwrap();
        let mut existing = desired.to_resource();
        existing
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("team".to_string(), "platform".to_string());
        assert!(desired.is_satisfied_by(&existing));

        existing.spec.interval = "2h".to_string();
        assert!(!desired.is_satisfied_by(&existing));
    }

    #[test]
    fn test_apply_to_keeps_resource_version_and_foreign_keys() {
        let desired = DesiredScan::build(&template(BTreeMap::new()), &event(), "scans").unwrap();
        let mut existing = desired.to_resource();
        existing.metadata.resource_version = Some("7".to_string());
        existing
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert("note".to_string(), "manual".to_string());
        existing.spec.scan_spec.parameters.clear();

        desired.apply_to(&mut existing);

        assert_eq!(existing.metadata.resource_version.as_deref(), Some("7"));
        assert_eq!(annotations(&existing)["note"], "manual");
        assert!(desired.is_satisfied_by(&existing));
    }

    #[test]
    fn test_apply_to_prunes_keys_dropped_from_template() {
        let before = template_with(
            BTreeMap::from([
                ("a".to_string(), "{{ .Target.Id }}".to_string()),
                ("region".to_string(), "{{ .Region }}".to_string()),
            ]),
            BTreeMap::from([("tier".to_string(), "edge".to_string())]),
        );
        let mut existing = DesiredScan::build(&before, &event(), "scans")
            .unwrap()
            .to_resource();
        existing
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("team".to_string(), "platform".to_string());

        let after = DesiredScan::build(&template(BTreeMap::new()), &event(), "scans").unwrap();
        assert!(!after.is_satisfied_by(&existing));

        after.apply_to(&mut existing);

        let labels = existing.metadata.labels.as_ref().unwrap();
        assert!(!labels.contains_key("tier"));
        assert_eq!(labels["team"], "platform");
        assert!(!annotations(&existing).contains_key("region"));
        assert_eq!(annotations(&existing)["a"], "i-123");
        assert!(after.is_satisfied_by(&existing));
    }

    #[test]
    fn test_owners_are_merged() {
        let owned = |owner: &str| {
            DesiredScan::build(
                &template(BTreeMap::new()),
                &event().with_owner(owner).unwrap(),
                "scans",
            )
            .unwrap()
        };
        let first = owned("task/a");
        let second = owned("task/b");

        let mut existing = first.to_resource();
        assert_eq!(annotations(&existing)[OWNERS_ANNOTATION], "task/a");
        assert!(first.is_satisfied_by(&existing));
        assert!(!second.is_satisfied_by(&existing));

        second.apply_to(&mut existing);

        assert_eq!(annotations(&existing)[OWNERS_ANNOTATION], "task/a,task/b");
        assert!(first.is_satisfied_by(&existing));
        assert!(second.is_satisfied_by(&existing));
    }

    #[test]
    fn test_set_owners_drops_empty_set() {
        let desired = DesiredScan::build(
            &template(BTreeMap::new()),
            &event().with_owner("task/a").unwrap(),
            "scans",
        )
        .unwrap();
        let mut existing = desired.to_resource();

        let mut owners = owners_of(&existing);
        assert!(owners.remove("task/a"));
        set_owners(&mut existing, &owners);

        assert!(owners_of(&existing).is_empty());
        assert!(!annotations(&existing).contains_key(OWNERS_ANNOTATION));
    }
}
