//! # Cluster API Client
//!
//! Typed CRUD over `ScheduledScan` objects in a single namespace.
//!
//! The reconciler only talks to the cluster through [`ScanClient`], which
//! keeps the kube-backed implementation swappable for in-memory stores in
//! tests. No caching: every call goes to the live control plane.

mod kube_client;

pub use kube_client::KubeScanClient;

use crate::crd::ScheduledScan;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("ScheduledScan '{name}' not found")]
    NotFound { name: String },
    #[error("ScheduledScan '{name}' already exists")]
    AlreadyExists { name: String },
    #[error("ScheduledScan '{name}' was modified concurrently (resourceVersion conflict)")]
    Conflict { name: String },
    #[error("ScheduledScan '{name}' was rejected by the API server: {message}")]
    Invalid { name: String, message: String },
    #[error("cluster API call '{operation}' timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },
    #[error("cluster API call '{operation}' failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },
}

impl ClusterError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    /// Optimistic-concurrency failure: a fresh read may succeed
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ClusterError::Conflict { .. } | ClusterError::AlreadyExists { .. }
        )
    }
}

/// Namespaced ScheduledScan store
#[async_trait]
pub trait ScanClient: Send + Sync {
    /// Namespace every call is scoped to
    fn namespace(&self) -> &str;

    async fn get(&self, name: &str) -> Result<ScheduledScan, ClusterError>;

    /// Fails with `AlreadyExists` when the name is taken
    async fn create(&self, scan: &ScheduledScan) -> Result<ScheduledScan, ClusterError>;

    /// Replace an existing object; the caller's `resourceVersion` is the
    /// concurrency precondition (`Conflict` when stale, `NotFound` when gone)
    async fn update(&self, scan: &ScheduledScan) -> Result<ScheduledScan, ClusterError>;

    /// With a `resource_version`, the delete only goes through if the object
    /// was not modified since it was read (`Conflict` otherwise)
    async fn delete(
        &self,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), ClusterError>;

    /// List objects matching a label selector (`key=value,...`)
    async fn list(&self, label_selector: &str) -> Result<Vec<ScheduledScan>, ClusterError>;
}
