//! # Message Decoding
//!
//! Turns a raw queue message body into zero or more change events.
//!
//! ## Supported bodies
//!
//! - Normalized envelope: `{"targetId", "targetKind", "changeKind", "payload", "owner"}`
//!   (`payload` and `owner` optional)
//! - EventBridge `ECS Task State Change`: one `image` event per container,
//!   owned by the task
//! - SNS `Notification` wrapping either of the above (unwrapped once)
//!
//! Anything else is a poison message: redelivering it cannot change the
//! outcome.

use crate::event::{ChangeKind, EventError, ResourceChangeEvent, TargetKind};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

const ECS_EVENT_SOURCE: &str = "aws.ecs";
const ECS_TASK_STATE_CHANGE: &str = "ECS Task State Change";
const SNS_NOTIFICATION: &str = "Notification";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("message body is not a recognized event format")]
    UnrecognizedFormat,
    #[error("unsupported EventBridge event '{event_source}' / '{detail_type}'")]
    UnsupportedEvent {
        event_source: String,
        detail_type: String,
    },
    #[error("SNS notification wraps another notification")]
    NestedNotification,
    #[error("malformed event: {0}")]
    Malformed(#[from] EventError),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    target_id: String,
    target_kind: String,
    change_kind: String,
    #[serde(default)]
    payload: BTreeMap<String, String>,
    #[serde(default)]
    owner: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SnsNotification {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct EventBridgeEvent {
    source: String,
    #[serde(rename = "detail-type")]
    detail_type: String,
    #[serde(default)]
    detail: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EcsTaskDetail {
    task_arn: String,
    cluster_arn: String,
    last_status: String,
    #[serde(default)]
    containers: Vec<EcsContainer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EcsContainer {
    name: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    image_digest: Option<String>,
}

/// Decode a queue message body
///
/// An empty result is valid (e.g. an ECS task in a transitional state) and
/// means the message carries nothing to reconcile.
pub fn decode_message(body: &str) -> Result<Vec<ResourceChangeEvent>, DecodeError> {
    let value: Value = serde_json::from_str(body)?;

    if is_sns_notification(&value) {
        let notification: SnsNotification = serde_json::from_value(value)?;
        let inner: Value = serde_json::from_str(&notification.message)?;
        if is_sns_notification(&inner) {
            return Err(DecodeError::NestedNotification);
        }
        return decode_value(inner);
    }

    decode_value(value)
}

fn is_sns_notification(value: &Value) -> bool {
    value.get("Type").and_then(Value::as_str) == Some(SNS_NOTIFICATION)
        && value.get("Message").is_some()
}

fn decode_value(value: Value) -> Result<Vec<ResourceChangeEvent>, DecodeError> {
    if value.get("detail-type").is_some() {
        let event: EventBridgeEvent = serde_json::from_value(value)?;
        if event.source != ECS_EVENT_SOURCE || event.detail_type != ECS_TASK_STATE_CHANGE {
            return Err(DecodeError::UnsupportedEvent {
                event_source: event.source,
                detail_type: event.detail_type,
            });
        }
        let detail: EcsTaskDetail = serde_json::from_value(event.detail)?;
        return decode_ecs_task(detail);
    }

    if value.get("targetId").is_some() {
        let envelope: Envelope = serde_json::from_value(value)?;
        return decode_envelope(envelope).map(|event| vec![event]);
    }

    Err(DecodeError::UnrecognizedFormat)
}

fn decode_envelope(envelope: Envelope) -> Result<ResourceChangeEvent, DecodeError> {
    let target_kind: TargetKind = envelope.target_kind.parse()?;
    let change_kind: ChangeKind = envelope.change_kind.parse()?;
    let event =
        ResourceChangeEvent::new(envelope.target_id, target_kind, change_kind, envelope.payload)?;
    match envelope.owner {
        Some(owner) => Ok(event.with_owner(owner)?),
        None => Ok(event),
    }
}

/// RUNNING takes a hold on each container image for the task, STOPPED
/// releases it; other states carry nothing to reconcile
fn decode_ecs_task(detail: EcsTaskDetail) -> Result<Vec<ResourceChangeEvent>, DecodeError> {
    let change_kind = match detail.last_status.as_str() {
        "RUNNING" => ChangeKind::Created,
        "STOPPED" => ChangeKind::Deleted,
        _ => return Ok(Vec::new()),
    };

    detail
        .containers
        .into_iter()
        .filter_map(|container| {
            let image = container.image.filter(|image| !image.is_empty())?;
            let digest = container.image_digest.unwrap_or_default();
            let image_id = pin_image(&image, &digest);
            let payload = BTreeMap::from([
                ("ImageID".to_string(), image_id.clone()),
                ("Image".to_string(), image),
                ("ImageDigest".to_string(), digest),
                ("TaskArn".to_string(), detail.task_arn.clone()),
                ("ClusterArn".to_string(), detail.cluster_arn.clone()),
                ("ContainerName".to_string(), container.name),
            ]);
            Some(
                ResourceChangeEvent::new(image_id, TargetKind::Image, change_kind, payload)
                    .and_then(|event| event.with_owner(detail.task_arn.clone()))
                    .map_err(DecodeError::from),
            )
        })
        .collect()
}

/// `<repository>@<digest>`, or the image as given when no digest is known
fn pin_image(image: &str, digest: &str) -> String {
    if digest.is_empty() || image.contains('@') {
        return image.to_string();
    }
    // A ':' after the last '/' is a tag; one before it is a registry port
    let repository = match (image.rfind(':'), image.rfind('/')) {
        (Some(colon), Some(slash)) if colon > slash => &image[..colon],
        (Some(colon), None) => &image[..colon],
        _ => image,
    };
    format!("{repository}@{digest}")
}
