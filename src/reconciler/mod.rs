//! # Reconciler
//!
//! Converges the cluster's ScheduledScans with a single change event.
//!
//! For creations and updates every matching template is upserted under its
//! deterministic name, after checking the event carries every payload field
//! the catalog reads for its kind. For deletions every object this
//! controller ever created for the target is removed, including objects
//! from templates that no longer match or were dropped from the catalog.
//!
//! Events attributed to an owner (an ECS task) are reference counted: an
//! upsert adds the owner to the object's owner set, and an owner's deletion
//! only removes it from the set. The object goes once the set is empty.
//!
//! Reconciling the same event twice leaves the cluster unchanged after the
//! first call, which is what makes at-least-once delivery safe.
//!
//! ## Module Structure
//!
//! - `naming.rs` - Deterministic object names and target fingerprints
//! - `desired.rs` - Desired object construction, comparison and merge
//! - `error.rs` - `ReconcileError` and its retry classification

pub mod desired;
pub mod error;
pub mod naming;

pub use desired::{owners_of, set_owners, DesiredScan};
pub use error::{ErrorClass, ReconcileError};
pub use naming::{scan_object_name, target_hash};

use crate::catalog::{Catalog, ScanTemplate};
use crate::cluster::ScanClient;
use crate::crd::{managed_target_selector, TARGET_ID_ANNOTATION};
use crate::event::ResourceChangeEvent;
use crate::observability;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Read-modify-write attempts before a conflict is reported as retryable
pub const UPSERT_ATTEMPTS: usize = 2;

/// What a single write did to the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMutation {
    Created,
    Updated,
    Unchanged,
    Deleted,
    /// An owner was removed while others still hold the object
    Released,
    AlreadyAbsent,
}

/// Per-event summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub matched_templates: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub released: usize,
}

impl ReconcileOutcome {
    fn record(&mut self, mutation: ScanMutation) {
        match mutation {
            ScanMutation::Created => self.created += 1,
            ScanMutation::Updated => self.updated += 1,
            ScanMutation::Unchanged => self.unchanged += 1,
            ScanMutation::Deleted => self.deleted += 1,
            ScanMutation::Released => self.released += 1,
            ScanMutation::AlreadyAbsent => {}
        }
    }

    /// Whether the cluster was written to
    #[must_use]
    pub fn mutated(&self) -> bool {
        self.created + self.updated + self.deleted + self.released > 0
    }
}

/// Shared by every monitor; holds no per-event state
pub struct Reconciler {
    catalog: Arc<Catalog>,
    client: Arc<dyn ScanClient>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("templates", &self.catalog.len())
            .field("namespace", &self.client.namespace())
            .finish()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(catalog: Arc<Catalog>, client: Arc<dyn ScanClient>) -> Self {
        Self { catalog, client }
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Apply one event; on failure the most severe error is returned
    ///
    /// Templates are processed independently: a failure on one does not stop
    /// the others, so a redelivery only has to redo the failed part.
    pub async fn reconcile(
        &self,
        event: &ResourceChangeEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let span = info_span!(
            "reconcile.event",
            target.id = event.target_id(),
            target.kind = %event.target_kind(),
            change.kind = %event.change_kind(),
        );

        async move {
            let start = Instant::now();
            let result = if event.is_deletion() {
                self.remove_target(event).await
            } else {
                self.upsert_target(event).await
            };
            observability::observe_reconcile_duration(start.elapsed().as_secs_f64());

            match &result {
                Ok(outcome) => {
                    observability::increment_reconciliations("success");
                    if outcome.matched_templates == 0 && !outcome.mutated() {
                        debug!("No scan template matched, event ignored");
                    } else {
                        info!(
                            created = outcome.created,
                            updated = outcome.updated,
                            unchanged = outcome.unchanged,
                            deleted = outcome.deleted,
                            released = outcome.released,
                            "Reconciled event"
                        );
                    }
                }
                Err(e) => observability::increment_reconciliations(e.class().as_str()),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn upsert_target(
        &self,
        event: &ResourceChangeEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        event.require_fields(self.catalog.required_fields(event.target_kind()))?;

        let mut outcome = ReconcileOutcome::default();
        let mut failures = Vec::new();

        for template in self.catalog.matching(event) {
            outcome.matched_templates += 1;
            match self.upsert_one(template, event).await {
                Ok(mutation) => outcome.record(mutation),
                Err(e) => {
                    log_failure(template.name(), &e);
                    failures.push(e);
                }
            }
        }

        most_severe(failures).map_or(Ok(outcome), Err)
    }

    async fn upsert_one(
        &self,
        template: &ScanTemplate,
        event: &ResourceChangeEvent,
    ) -> Result<ScanMutation, ReconcileError> {
        let desired = DesiredScan::build(template, event, self.client.namespace()).map_err(
            |source| ReconcileError::Render {
                template: template.name().to_string(),
                target: event.target_id().to_string(),
                source,
            },
        )?;

        for attempt in 1..=UPSERT_ATTEMPTS {
            let result = match self.client.get(&desired.name).await {
                Ok(mut existing) => {
                    if desired.is_satisfied_by(&existing) {
                        debug!(template = template.name(), scan.name = %desired.name, "ScheduledScan up to date");
                        return Ok(ScanMutation::Unchanged);
                    }
                    desired.apply_to(&mut existing);
                    self.client
                        .update(&existing)
                        .await
                        .map(|_| ScanMutation::Updated)
                }
                Err(e) if e.is_not_found() => self
                    .client
                    .create(&desired.to_resource())
                    .await
                    .map(|_| ScanMutation::Created),
                Err(source) => {
                    return Err(ReconcileError::Cluster {
                        name: desired.name.clone(),
                        source,
                    })
                }
            };

            match result {
                Ok(mutation) => {
                    let operation = if mutation == ScanMutation::Created {
                        "create"
                    } else {
                        "update"
                    };
                    observability::increment_scan_mutations(operation);
                    info!(
                        template = template.name(),
                        scan.name = %desired.name,
                        operation,
                        "ScheduledScan written"
                    );
                    return Ok(mutation);
                }
                // Lost a race with another writer (or the object vanished
                // between read and write); read again and retry
                Err(e) if e.is_conflict() || e.is_not_found() => {
                    debug!(
                        template = template.name(),
                        scan.name = %desired.name,
                        attempt,
                        error = %e,
                        "Write raced, re-reading"
                    );
                }
                Err(source) => {
                    return Err(ReconcileError::Cluster {
                        name: desired.name.clone(),
                        source,
                    })
                }
            }
        }

        Err(ReconcileError::ConflictExhausted {
            name: desired.name,
            attempts: UPSERT_ATTEMPTS,
        })
    }

    async fn remove_target(
        &self,
        event: &ResourceChangeEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mut outcome = ReconcileOutcome::default();
        let mut failures = Vec::new();
        let mut handled = HashSet::new();

        for template in self.catalog.matching(event) {
            outcome.matched_templates += 1;
            let name = scan_object_name(template.name(), event.target_id());
            match self.retire(&name, event.owner()).await {
                Ok(mutation) => outcome.record(mutation),
                Err(e) => {
                    log_failure(template.name(), &e);
                    failures.push(e);
                }
            }
            handled.insert(name);
        }

        // Sweep objects created by templates that no longer match this target
        let selector = managed_target_selector(&target_hash(event.target_id()));
        match self.client.list(&selector).await {
            Ok(leftovers) => {
                for scan in leftovers {
                    let Some(name) = scan.metadata.name.clone() else {
                        continue;
                    };
                    let owned_by_target = scan
                        .metadata
                        .annotations
                        .as_ref()
                        .and_then(|annotations| annotations.get(TARGET_ID_ANNOTATION))
                        .is_some_and(|id| id == event.target_id());
                    if handled.contains(&name) || !owned_by_target {
                        continue;
                    }
                    match self.retire(&name, event.owner()).await {
                        Ok(mutation) => outcome.record(mutation),
                        Err(e) => {
                            warn!(scan.name = %name, error = %e, "Failed to retire orphaned ScheduledScan");
                            failures.push(e);
                        }
                    }
                }
            }
            Err(source) => failures.push(ReconcileError::Cluster {
                name: selector,
                source,
            }),
        }

        most_severe(failures).map_or(Ok(outcome), Err)
    }

    /// Delete the object, or with an owner only drop that owner's hold
    ///
    /// Objects without an owner set (created from owner-less events) go on
    /// any owner's deletion. An owner absent from a non-empty set changes
    /// nothing.
    async fn retire(
        &self,
        name: &str,
        owner: Option<&str>,
    ) -> Result<ScanMutation, ReconcileError> {
        let Some(owner) = owner else {
            return self.delete_one(name).await;
        };

        for attempt in 1..=UPSERT_ATTEMPTS {
            let mut existing = match self.client.get(name).await {
                Ok(scan) => scan,
                Err(e) if e.is_not_found() => {
                    debug!(scan.name = name, "ScheduledScan already absent");
                    return Ok(ScanMutation::AlreadyAbsent);
                }
                Err(source) => {
                    return Err(ReconcileError::Cluster {
                        name: name.to_string(),
                        source,
                    })
                }
            };

            let mut owners = owners_of(&existing);
            if !owners.remove(owner) && !owners.is_empty() {
                debug!(scan.name = name, owner, "Owner holds no claim on ScheduledScan");
                return Ok(ScanMutation::Unchanged);
            }

            // The delete is conditional so an owner added since the read
            // keeps the object alive
            let result = if owners.is_empty() {
                self.client
                    .delete(name, existing.metadata.resource_version.as_deref())
                    .await
                    .map(|()| ScanMutation::Deleted)
            } else {
                set_owners(&mut existing, &owners);
                self.client
                    .update(&existing)
                    .await
                    .map(|_| ScanMutation::Released)
            };

            match result {
                Ok(mutation) => {
                    let operation = if mutation == ScanMutation::Deleted {
                        "delete"
                    } else {
                        "update"
                    };
                    observability::increment_scan_mutations(operation);
                    info!(
                        scan.name = name,
                        owner,
                        remaining_owners = owners.len(),
                        operation,
                        "Owner released ScheduledScan"
                    );
                    return Ok(mutation);
                }
                Err(e) if e.is_not_found() => return Ok(ScanMutation::AlreadyAbsent),
                Err(e) if e.is_conflict() => {
                    debug!(scan.name = name, owner, attempt, error = %e, "Release raced, re-reading");
                }
                Err(source) => {
                    return Err(ReconcileError::Cluster {
                        name: name.to_string(),
                        source,
                    })
                }
            }
        }

        Err(ReconcileError::ConflictExhausted {
            name: name.to_string(),
            attempts: UPSERT_ATTEMPTS,
        })
    }

    async fn delete_one(&self, name: &str) -> Result<ScanMutation, ReconcileError> {
        match self.client.delete(name, None).await {
            Ok(()) => {
                observability::increment_scan_mutations("delete");
                info!(scan.name = name, "ScheduledScan deleted");
                Ok(ScanMutation::Deleted)
            }
            Err(e) if e.is_not_found() => {
                debug!(scan.name = name, "ScheduledScan already absent");
                Ok(ScanMutation::AlreadyAbsent)
            }
            Err(source) => Err(ReconcileError::Cluster {
                name: name.to_string(),
                source,
            }),
        }
    }
}

fn log_failure(template: &str, e: &ReconcileError) {
    match e.class() {
        ErrorClass::Fatal => error!(template, error = %e, "Template reconcile failed"),
        ErrorClass::Retryable | ErrorClass::NonRetryable => {
            warn!(template, error = %e, class = e.class().as_str(), "Template reconcile failed");
        }
    }
}

/// First error of the highest class
pub fn most_severe(failures: Vec<ReconcileError>) -> Option<ReconcileError> {
    let mut worst: Option<ReconcileError> = None;
    for failure in failures {
        if worst
            .as_ref()
            .is_none_or(|current| failure.class() > current.class())
        {
            worst = Some(failure);
        }
    }
    worst
}
