//! # Resource Change Events
//!
//! Normalized representation of a cloud-provider change notification.
//!
//! Every target kind has a fixed payload schema that templates are checked
//! against when the catalog loads. Events themselves may carry only part of
//! it: a deletion needs nothing but the target id, and a creation only has
//! to carry the fields the loaded templates actually reference (see
//! `ResourceChangeEvent::require_fields`).
//!
//! An event may also name an owner, the workload holding the target (for
//! ECS, the task ARN). A deletion with an owner releases that owner's hold
//! instead of removing the target outright.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Payload fields every `image` event carries
pub const IMAGE_PAYLOAD_FIELDS: &[&str] = &["ImageID", "Image", "ImageDigest"];

/// Payload fields every `instance` event carries
pub const INSTANCE_PAYLOAD_FIELDS: &[&str] = &["InstanceID", "Region"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("target id must not be empty")]
    EmptyTargetId,
    #[error("owner must not be empty when given")]
    EmptyOwner,
    #[error("unknown target kind '{0}'")]
    UnknownTargetKind(String),
    #[error("unknown change kind '{0}'")]
    UnknownChangeKind(String),
    #[error("{kind} event for '{target_id}' is missing payload field '{field}'")]
    MissingPayloadField {
        kind: TargetKind,
        target_id: String,
        field: String,
    },
}

/// Kind of cloud resource a change event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Container image (identified by digest-pinned reference)
    Image,
    /// Compute instance
    Instance,
}

impl TargetKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Image => "image",
            TargetKind::Instance => "instance",
        }
    }

    /// Payload fields templates of this kind may reference
    #[must_use]
    pub fn payload_fields(&self) -> &'static [&'static str] {
        match self {
            TargetKind::Image => IMAGE_PAYLOAD_FIELDS,
            TargetKind::Instance => INSTANCE_PAYLOAD_FIELDS,
        }
    }

    #[must_use]
    pub fn has_payload_field(&self, field: &str) -> bool {
        self.payload_fields().contains(&field)
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(TargetKind::Image),
            "instance" => Ok(TargetKind::Instance),
            other => Err(EventError::UnknownTargetKind(other.to_string())),
        }
    }
}

/// What happened to the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" | "create" => Ok(ChangeKind::Created),
            "updated" | "update" => Ok(ChangeKind::Updated),
            "deleted" | "delete" => Ok(ChangeKind::Deleted),
            other => Err(EventError::UnknownChangeKind(other.to_string())),
        }
    }
}

/// A single normalized change notification
///
/// Immutable once decoded. The queue message stays the durable copy until
/// it is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceChangeEvent {
    target_id: String,
    target_kind: TargetKind,
    change_kind: ChangeKind,
    payload: BTreeMap<String, String>,
    owner: Option<String>,
}

impl ResourceChangeEvent {
    pub fn new(
        target_id: impl Into<String>,
        target_kind: TargetKind,
        change_kind: ChangeKind,
        payload: BTreeMap<String, String>,
    ) -> Result<Self, EventError> {
        let target_id = target_id.into();
        if target_id.trim().is_empty() {
            return Err(EventError::EmptyTargetId);
        }
        Ok(Self {
            target_id,
            target_kind,
            change_kind,
            payload,
            owner: None,
        })
    }

    /// Attribute the event to the workload holding the target
    pub fn with_owner(mut self, owner: impl Into<String>) -> Result<Self, EventError> {
        let owner = owner.into();
        if owner.trim().is_empty() {
            return Err(EventError::EmptyOwner);
        }
        self.owner = Some(owner);
        Ok(self)
    }

    /// Fail on the first of `fields` the payload does not carry
    pub fn require_fields<'a>(
        &self,
        fields: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), EventError> {
        match fields
            .into_iter()
            .find(|field| !self.payload.contains_key(*field))
        {
            Some(missing) => Err(EventError::MissingPayloadField {
                kind: self.target_kind,
                target_id: self.target_id.clone(),
                field: missing.to_string(),
            }),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    #[must_use]
    pub fn target_kind(&self) -> TargetKind {
        self.target_kind
    }

    #[must_use]
    pub fn change_kind(&self) -> ChangeKind {
        self.change_kind
    }

    #[must_use]
    pub fn payload(&self) -> &BTreeMap<String, String> {
        &self.payload
    }

    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    #[must_use]
    pub fn is_deletion(&self) -> bool {
        self.change_kind == ChangeKind::Deleted
    }
}
