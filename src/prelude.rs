//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use cloud_scan_discovery::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Events and catalog
pub use crate::catalog::{Catalog, CatalogError, ScanTemplate, ScanTemplateConfig};
pub use crate::event::{ChangeKind, ResourceChangeEvent, TargetKind};

// Seams implemented by adapters and test doubles
pub use crate::cluster::{ClusterError, KubeScanClient, ScanClient};
pub use crate::source::{
    decode_message, DeadLetterSink, DecodeError, EventSource, QueueMessage, SourceError,
};

// Core pipeline
pub use crate::monitor::{DiscoveryMonitor, MessageDisposition, MonitorSettings};
pub use crate::reconciler::{ErrorClass, ReconcileError, ReconcileOutcome, Reconciler};

// Config types
pub use crate::config::{ConfigError, DiscoveryConfig, QueueConfig};
