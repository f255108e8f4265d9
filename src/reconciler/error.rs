//! # Reconcile Errors
//!
//! Every failure carries a class that decides what the monitor does with
//! the queue message.

use crate::catalog::RenderError;
use crate::cluster::ClusterError;
use crate::event::EventError;
use thiserror::Error;

/// How the monitor treats a failed message
///
/// Variants are ordered by severity so the worst of several failures can be
/// picked with `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorClass {
    /// Retrying cannot help; drop (dead-letter) and acknowledge
    NonRetryable,
    /// Transient; leave the message for redelivery
    Retryable,
    /// Broken process state; leave the message and alert
    Fatal,
}

impl ErrorClass {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::NonRetryable => "non_retryable",
            ErrorClass::Retryable => "retryable",
            ErrorClass::Fatal => "fatal",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("event cannot be reconciled: {0}")]
    InvalidEvent(#[from] EventError),
    #[error("template '{template}' failed to render for target '{target}': {source}")]
    Render {
        template: String,
        target: String,
        #[source]
        source: RenderError,
    },
    #[error("cluster operation on ScheduledScan '{name}' failed: {source}")]
    Cluster {
        name: String,
        #[source]
        source: ClusterError,
    },
    #[error("ScheduledScan '{name}' still conflicted after {attempts} attempts")]
    ConflictExhausted { name: String, attempts: usize },
}

impl ReconcileError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            ReconcileError::InvalidEvent(_) => ErrorClass::NonRetryable,
            // The catalog was validated at load, so this is a broken invariant
            ReconcileError::Render { .. } => ErrorClass::Fatal,
            // The API server refused the rendered object; it will refuse it again
            ReconcileError::Cluster {
                source: ClusterError::Invalid { .. },
                ..
            } => ErrorClass::NonRetryable,
            ReconcileError::Cluster { .. } | ReconcileError::ConflictExhausted { .. } => {
                ErrorClass::Retryable
            }
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}
