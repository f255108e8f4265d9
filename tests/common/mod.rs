//! Shared test doubles for integration tests
//!
//! - `InMemoryScanClient` - namespaced ScheduledScan store with resource
//!   versions, conflict injection and failure injection
//! - `ChannelEventSource` - queue fed through a channel, recording acknowledgements
//! - `RecordingDeadLetterSink` - captures forwarded poison messages

#![allow(dead_code, reason = "Each test binary uses a different subset of helpers")]

use async_trait::async_trait;
use cloud_scan_discovery::catalog::{Catalog, ScanTemplateConfig};
use cloud_scan_discovery::cluster::{ClusterError, ScanClient};
use cloud_scan_discovery::crd::{
    HookSelector, LabelSelectorRequirementSpec, ScheduledScan, SelectorOperator,
};
use cloud_scan_discovery::event::{ChangeKind, ResourceChangeEvent, TargetKind};
use cloud_scan_discovery::source::{DeadLetterSink, EventSource, QueueMessage, SourceError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Cluster
// ============================================================================

/// Persistent failure applied to every cluster call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Timeout,
    Rejected,
}

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<String, ScheduledScan>,
    next_version: u64,
    mutations: usize,
    pending_update_conflicts: usize,
    pending_create_races: usize,
    failure: Option<Failure>,
}

impl StoreState {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn check_failure(&self, operation: &'static str, name: &str) -> Result<(), ClusterError> {
        match self.failure {
            None => Ok(()),
            Some(Failure::Timeout) => Err(ClusterError::Timeout {
                operation,
                seconds: 30,
            }),
            Some(Failure::Rejected) => Err(ClusterError::Invalid {
                name: name.to_string(),
                message: "metadata.labels: Invalid value".to_string(),
            }),
        }
    }
}

#[derive(Debug)]
pub struct InMemoryScanClient {
    namespace: String,
    state: Mutex<StoreState>,
}

impl InMemoryScanClient {
    pub fn new(namespace: &str) -> Arc<Self> {
        Arc::new(Self {
            namespace: namespace.to_string(),
            state: Mutex::new(StoreState::default()),
        })
    }

    pub fn objects(&self) -> Vec<ScheduledScan> {
        self.state.lock().unwrap().objects.values().cloned().collect()
    }

    pub fn object(&self, name: &str) -> Option<ScheduledScan> {
        self.state.lock().unwrap().objects.get(name).cloned()
    }

    /// Successful create, update and delete calls so far
    pub fn mutation_count(&self) -> usize {
        self.state.lock().unwrap().mutations
    }

    /// Change a stored object as another actor would, bumping its version
    pub fn modify(&self, name: &str, change: impl FnOnce(&mut ScheduledScan)) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump_version();
        let scan = state.objects.get_mut(name).expect("object to modify exists");
        change(scan);
        scan.metadata.resource_version = Some(version);
    }

    /// The next `count` updates lose a race with a concurrent writer
    pub fn inject_update_conflicts(&self, count: usize) {
        self.state.lock().unwrap().pending_update_conflicts = count;
    }

    /// The next `count` creates find the object was just created by someone else
    pub fn inject_create_races(&self, count: usize) {
        self.state.lock().unwrap().pending_create_races = count;
    }

    pub fn fail_with(&self, failure: Failure) {
        self.state.lock().unwrap().failure = Some(failure);
    }

    pub fn clear_failure(&self) {
        self.state.lock().unwrap().failure = None;
    }
}

fn selector_matches(selector: &str, scan: &ScheduledScan) -> bool {
    let labels = scan.metadata.labels.clone().unwrap_or_default();
    selector.split(',').filter(|s| !s.is_empty()).all(|term| {
        let (key, value) = term.split_once('=').expect("equality selector");
        labels.get(key).is_some_and(|v| v == value)
    })
}

#[async_trait]
impl ScanClient for InMemoryScanClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get(&self, name: &str) -> Result<ScheduledScan, ClusterError> {
        let state = self.state.lock().unwrap();
        state.check_failure("get", name)?;
        state
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                name: name.to_string(),
            })
    }

    async fn create(&self, scan: &ScheduledScan) -> Result<ScheduledScan, ClusterError> {
        let name = scan.metadata.name.clone().expect("create needs a name");
        let mut state = self.state.lock().unwrap();
        state.check_failure("create", &name)?;

        if state.pending_create_races > 0 {
            state.pending_create_races -= 1;
            let mut raced = scan.clone();
            raced.metadata.resource_version = Some(state.bump_version());
            state.objects.insert(name.clone(), raced);
            return Err(ClusterError::AlreadyExists { name });
        }
        if state.objects.contains_key(&name) {
            return Err(ClusterError::AlreadyExists { name });
        }

        let mut stored = scan.clone();
        stored.metadata.namespace = Some(self.namespace.clone());
        stored.metadata.resource_version = Some(state.bump_version());
        state.objects.insert(name, stored.clone());
        state.mutations += 1;
        Ok(stored)
    }

    async fn update(&self, scan: &ScheduledScan) -> Result<ScheduledScan, ClusterError> {
        let name = scan.metadata.name.clone().expect("update needs a name");
        let mut state = self.state.lock().unwrap();
        state.check_failure("update", &name)?;

        let Some(current_version) = state
            .objects
            .get(&name)
            .map(|current| current.metadata.resource_version.clone())
        else {
            return Err(ClusterError::NotFound { name });
        };

        if state.pending_update_conflicts > 0 {
            state.pending_update_conflicts -= 1;
            // Another writer got there first
            let version = state.bump_version();
            if let Some(current) = state.objects.get_mut(&name) {
                current.metadata.resource_version = Some(version);
            }
            return Err(ClusterError::Conflict { name });
        }
        if current_version != scan.metadata.resource_version {
            return Err(ClusterError::Conflict { name });
        }

        let mut stored = scan.clone();
        stored.metadata.resource_version = Some(state.bump_version());
        state.objects.insert(name, stored.clone());
        state.mutations += 1;
        Ok(stored)
    }

    async fn delete(
        &self,
        name: &str,
        resource_version: Option<&str>,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().unwrap();
        state.check_failure("delete", name)?;
        let Some(current) = state.objects.get(name) else {
            return Err(ClusterError::NotFound {
                name: name.to_string(),
            });
        };
        if resource_version.is_some_and(|version| {
            current.metadata.resource_version.as_deref() != Some(version)
        }) {
            return Err(ClusterError::Conflict {
                name: name.to_string(),
            });
        }
        state.objects.remove(name);
        state.mutations += 1;
        Ok(())
    }

    async fn list(&self, label_selector: &str) -> Result<Vec<ScheduledScan>, ClusterError> {
        let state = self.state.lock().unwrap();
        state.check_failure("list", label_selector)?;
        Ok(state
            .objects
            .values()
            .filter(|scan| selector_matches(label_selector, scan))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Debug)]
pub struct ChannelEventSource {
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<QueueMessage>>,
    acknowledged: Mutex<Vec<String>>,
    pending_receive_failures: AtomicUsize,
    failing_acks: AtomicUsize,
}

/// Source plus the sender feeding it
pub fn channel_source() -> (mpsc::UnboundedSender<QueueMessage>, Arc<ChannelEventSource>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let source = Arc::new(ChannelEventSource {
        receiver: tokio::sync::Mutex::new(receiver),
        acknowledged: Mutex::new(Vec::new()),
        pending_receive_failures: AtomicUsize::new(0),
        failing_acks: AtomicUsize::new(0),
    });
    (sender, source)
}

impl ChannelEventSource {
    /// Ids of acknowledged messages, in order
    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().unwrap().clone()
    }

    pub fn fail_next_receives(&self, count: usize) {
        self.pending_receive_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_acks(&self, count: usize) {
        self.failing_acks.store(count, Ordering::SeqCst);
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl EventSource for ChannelEventSource {
    fn name(&self) -> &str {
        "test-queue"
    }

    async fn receive(&self, wait: Duration) -> Result<Vec<QueueMessage>, SourceError> {
        if take_one(&self.pending_receive_failures) {
            return Err(SourceError::Receive {
                queue: "test-queue".to_string(),
                message: "connection reset".to_string(),
            });
        }

        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(wait, receiver.recv()).await {
            Ok(Some(first)) => {
                let mut batch = vec![first];
                while batch.len() < 10 {
                    match receiver.try_recv() {
                        Ok(next) => batch.push(next),
                        Err(_) => break,
                    }
                }
                Ok(batch)
            }
            Ok(None) => {
                drop(receiver);
                tokio::time::sleep(wait).await;
                Ok(Vec::new())
            }
            Err(_elapsed) => Ok(Vec::new()),
        }
    }

    async fn acknowledge(&self, message: &QueueMessage) -> Result<(), SourceError> {
        if take_one(&self.failing_acks) {
            return Err(SourceError::Acknowledge {
                message_id: message.message_id.clone(),
                message: "receipt handle expired".to_string(),
            });
        }
        self.acknowledged
            .lock()
            .unwrap()
            .push(message.message_id.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingDeadLetterSink {
    forwarded: Mutex<Vec<(String, String)>>,
    failing: bool,
}

impl RecordingDeadLetterSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            forwarded: Mutex::new(Vec::new()),
            failing: true,
        })
    }

    /// `(message id, drop reason)` pairs
    pub fn forwarded(&self) -> Vec<(String, String)> {
        self.forwarded.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetterSink {
    async fn forward(&self, message: &QueueMessage, reason: &str) -> Result<(), SourceError> {
        if self.failing {
            return Err(SourceError::DeadLetter {
                message_id: message.message_id.clone(),
                message: "access denied".to_string(),
            });
        }
        self.forwarded
            .lock()
            .unwrap()
            .push((message.message_id.clone(), reason.to_string()));
        Ok(())
    }
}

pub fn queue_message(id: &str, body: &str) -> QueueMessage {
    QueueMessage {
        message_id: id.to_string(),
        receipt_handle: format!("receipt-{id}"),
        body: body.to_string(),
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Catalog and events
// ============================================================================

/// Hook selector used by the image templates below
pub fn hook_selector() -> HookSelector {
    HookSelector {
        match_expressions: vec![
            LabelSelectorRequirementSpec {
                key: "foo".to_string(),
                operator: SelectorOperator::In,
                values: vec!["bar".to_string(), "baz".to_string()],
            },
            LabelSelectorRequirementSpec {
                key: "foo".to_string(),
                operator: SelectorOperator::DoesNotExist,
                values: Vec::new(),
            },
        ],
    }
}

pub fn image_template(name: &str) -> ScanTemplateConfig {
    ScanTemplateConfig {
        name: name.to_string(),
        target_kind: TargetKind::Image,
        filter: Vec::new(),
        scan_type: "trivy-sbom-image".to_string(),
        repeat_interval: "1h".to_string(),
        annotations: BTreeMap::from([(
            "testAnnotation".to_string(),
            "{{ .Target.Id }}".to_string(),
        )]),
        labels: BTreeMap::new(),
        parameters: vec!["{{ .ImageID }}".to_string()],
        hook_selector: hook_selector(),
    }
}

pub fn instance_template(name: &str) -> ScanTemplateConfig {
    ScanTemplateConfig {
        name: name.to_string(),
        target_kind: TargetKind::Instance,
        filter: Vec::new(),
        scan_type: "nmap".to_string(),
        repeat_interval: "24h".to_string(),
        annotations: BTreeMap::from([("a".to_string(), "{{ .Target.Id }}".to_string())]),
        labels: BTreeMap::new(),
        parameters: vec!["{{ .InstanceID }}".to_string()],
        hook_selector: HookSelector::default(),
    }
}

pub fn catalog(templates: Vec<ScanTemplateConfig>) -> Arc<Catalog> {
    Arc::new(Catalog::load(templates).expect("test catalog is valid"))
}

pub fn image_event(image_id: &str, change: ChangeKind) -> ResourceChangeEvent {
    let (repository, digest) = image_id.split_once('@').unwrap_or((image_id, ""));
    ResourceChangeEvent::new(
        image_id,
        TargetKind::Image,
        change,
        BTreeMap::from([
            ("ImageID".to_string(), image_id.to_string()),
            ("Image".to_string(), repository.to_string()),
            ("ImageDigest".to_string(), digest.to_string()),
        ]),
    )
    .expect("valid image event")
}

pub fn instance_event(instance_id: &str, change: ChangeKind) -> ResourceChangeEvent {
    ResourceChangeEvent::new(
        instance_id,
        TargetKind::Instance,
        change,
        BTreeMap::from([
            ("InstanceID".to_string(), instance_id.to_string()),
            ("Region".to_string(), "eu-west-1".to_string()),
        ]),
    )
    .expect("valid instance event")
}

/// Normalized envelope body for an image event
pub fn image_envelope(image_id: &str, change: &str) -> String {
    let (repository, digest) = image_id.split_once('@').unwrap_or((image_id, ""));
    serde_json::json!({
        "targetId": image_id,
        "targetKind": "image",
        "changeKind": change,
        "payload": {
            "ImageID": image_id,
            "Image": repository,
            "ImageDigest": digest,
        }
    })
    .to_string()
}
