//! # Cloud Scan Discovery
//!
//! Keeps `ScheduledScan` resources in sync with what is actually running in
//! a cloud account.
//!
//! Cloud change events (ECS task state changes, or any producer speaking
//! the normalized envelope) arrive on SQS. Each event is matched against an
//! operator-defined catalog of scan templates, and the reconciler creates,
//! updates or deletes one `ScheduledScan` per (target, template) pair in a
//! single namespace. The scan engine's own operator takes it from there.
//!
//! ## Module Structure
//!
//! - `event` - Normalized change events and payload schemas
//! - `catalog` - Scan templates, placeholder rendering, label selectors
//! - `source` - Queue abstraction, SQS adapter, message decoding
//! - `cluster` - Namespaced ScheduledScan client
//! - `crd` - The `ScheduledScan` custom resource
//! - `reconciler` - Event to cluster-state convergence
//! - `monitor` - Per-queue consume loop
//! - `config` - YAML config file and environment overrides
//! - `runtime` - Process startup and shutdown
//! - `observability` - Prometheus metrics
//! - `server` - Metrics and probe endpoints

pub mod catalog;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod crd;
pub mod event;
pub mod monitor;
pub mod observability;
pub mod prelude;
pub mod reconciler;
pub mod runtime;
pub mod server;
pub mod source;
