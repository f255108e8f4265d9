//! # Kube-backed ScanClient
//!
//! `kube::Api<ScheduledScan>` scoped to the configured namespace, with a
//! per-call deadline.

use super::{ClusterError, ScanClient};
use crate::crd::ScheduledScan;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams, Preconditions};
use kube::Client;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub struct KubeScanClient {
    api: Api<ScheduledScan>,
    namespace: String,
    timeout: Duration,
}

impl std::fmt::Debug for KubeScanClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeScanClient")
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl KubeScanClient {
    #[must_use]
    pub fn new(client: Client, namespace: &str, timeout: Duration) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            timeout,
        }
    }

    /// Bound a single API round-trip by the configured deadline
    async fn call<T>(
        &self,
        operation: &'static str,
        name: &str,
        future: impl Future<Output = Result<T, kube::Error>>,
    ) -> Result<T, ClusterError> {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify_kube_error(operation, name, e)),
            Err(_elapsed) => Err(ClusterError::Timeout {
                operation,
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

/// Map kube errors onto the outcomes the reconciler branches on
fn classify_kube_error(operation: &'static str, name: &str, error: kube::Error) -> ClusterError {
    match error {
        kube::Error::Api(api_err) if api_err.code == 404 => ClusterError::NotFound {
            name: name.to_string(),
        },
        kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            ClusterError::AlreadyExists {
                name: name.to_string(),
            }
        }
        kube::Error::Api(api_err) if api_err.code == 409 => ClusterError::Conflict {
            name: name.to_string(),
        },
        kube::Error::Api(api_err) if api_err.code == 422 => ClusterError::Invalid {
            name: name.to_string(),
            message: api_err.message,
        },
        other => ClusterError::Api {
            operation,
            message: other.to_string(),
        },
    }
}

fn object_name(scan: &ScheduledScan) -> &str {
    scan.metadata.name.as_deref().unwrap_or_default()
}

#[async_trait]
impl ScanClient for KubeScanClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, name: &str) -> Result<ScheduledScan, ClusterError> {
        self.call("get", name, self.api.get(name)).await
    }

    async fn create(&self, scan: &ScheduledScan) -> Result<ScheduledScan, ClusterError> {
        let name = object_name(scan);
        debug!(scan.name = name, namespace = %self.namespace, "cluster.create");
        self.call("create", name, self.api.create(&PostParams::default(), scan))
            .await
    }

    async fn update(&self, scan: &ScheduledScan) -> Result<ScheduledScan, ClusterError> {
        let name = object_name(scan);
        debug!(
            scan.name = name,
            namespace = %self.namespace,
            resource_version = scan.metadata.resource_version.as_deref().unwrap_or("none"),
            "cluster.update"
        );
        self.call(
            "update",
            name,
            self.api.replace(name, &PostParams::default(), scan),
        )
        .await
    }

    async fn delete(
        &self,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), ClusterError> {
        debug!(
            scan.name = name,
            namespace = %self.namespace,
            resource_version = resource_version.unwrap_or("none"),
            "cluster.delete"
        );
        let params = DeleteParams {
            preconditions: resource_version.map(|version| Preconditions {
                resource_version: Some(version.to_string()),
                uid: None,
            }),
            ..DeleteParams::default()
        };
        self.call("delete", name, self.api.delete(name, &params))
            .await
            .map(|_| ())
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<ScheduledScan>, ClusterError> {
        let params = ListParams::default().labels(label_selector);
        self.call("list", label_selector, self.api.list(&params))
            .await
            .map(|list| list.items)
    }
}
