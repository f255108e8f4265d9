//! # Template Rendering
//!
//! A deliberately small placeholder language: literal text with
//! `{{ .Path }}` substitutions resolved against a fixed context.
//!
//! ## Context schema
//!
//! | Path           | Value                                      |
//! |----------------|--------------------------------------------|
//! | `.Target.Id`   | target identifier                          |
//! | `.Target.Kind` | target kind (`image`, `instance`)          |
//! | `.ChangeKind`  | `created`, `updated` or `deleted`          |
//! | `.<Field>`     | payload schema field of the target kind    |
//!
//! Templates are parsed and checked against a target kind once, when the
//! catalog loads. Rendering fails only when the event lacks a payload field
//! the template reads, which the reconciler rules out before rendering.

use crate::event::{ChangeKind, ResourceChangeEvent, TargetKind};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(?P<body>[^{}]*)\}\}")
        .expect("placeholder regex is valid - this should never happen")
});

static PAYLOAD_PATH_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.(?P<field>[A-Za-z_][A-Za-z0-9_]*)$")
        .expect("payload path regex is valid - this should never happen")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("unbalanced braces in template '{template}'")]
    Unbalanced { template: String },
    #[error("empty placeholder in template '{template}'")]
    EmptyPlaceholder { template: String },
    #[error("invalid placeholder path '{path}' (expected .Target.Id, .Target.Kind, .ChangeKind or .<Field>)")]
    InvalidPath { path: String },
    #[error("field '{field}' is not available on {kind} targets (available: {available})")]
    UnknownField {
        field: String,
        kind: TargetKind,
        available: String,
    },
    #[error("field '{field}' is missing from the render context")]
    MissingField { field: String },
}

/// A resolvable placeholder path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPath {
    TargetId,
    TargetKind,
    ChangeKind,
    Payload(String),
}

impl FieldPath {
    fn parse(path: &str) -> Result<Self, RenderError> {
        match path {
            ".Target.Id" => Ok(FieldPath::TargetId),
            ".Target.Kind" => Ok(FieldPath::TargetKind),
            ".ChangeKind" => Ok(FieldPath::ChangeKind),
            _ => PAYLOAD_PATH_REGEX
                .captures(path)
                .map(|captures| FieldPath::Payload(captures["field"].to_string()))
                .ok_or_else(|| RenderError::InvalidPath {
                    path: path.to_string(),
                }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(FieldPath),
}

/// Values placeholders resolve against
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub target_id: &'a str,
    pub target_kind: TargetKind,
    pub change_kind: ChangeKind,
    pub payload: &'a BTreeMap<String, String>,
}

impl<'a> From<&'a ResourceChangeEvent> for RenderContext<'a> {
    fn from(event: &'a ResourceChangeEvent) -> Self {
        Self {
            target_id: event.target_id(),
            target_kind: event.target_kind(),
            change_kind: event.change_kind(),
            payload: event.payload(),
        }
    }
}

/// A parsed template string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template syntax without resolving payload fields
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        let mut segments = Vec::new();
        let mut cursor = 0;

        for captures in PLACEHOLDER_REGEX.captures_iter(source) {
            let whole = captures.get(0).ok_or_else(|| RenderError::Unbalanced {
                template: source.to_string(),
            })?;
            push_literal(&mut segments, source, &source[cursor..whole.start()])?;

            let path = captures["body"].trim();
            if path.is_empty() {
                return Err(RenderError::EmptyPlaceholder {
                    template: source.to_string(),
                });
            }
            segments.push(Segment::Field(FieldPath::parse(path)?));
            cursor = whole.end();
        }
        push_literal(&mut segments, source, &source[cursor..])?;

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Parse and verify every placeholder resolves for events of `kind`
    pub fn compile(source: &str, kind: TargetKind) -> Result<Self, RenderError> {
        let template = Self::parse(source)?;
        template.check_fields(kind)?;
        Ok(template)
    }

    pub fn check_fields(&self, kind: TargetKind) -> Result<(), RenderError> {
        for field in self.payload_fields() {
            if !kind.has_payload_field(field) {
                return Err(RenderError::UnknownField {
                    field: field.to_string(),
                    kind,
                    available: kind.payload_fields().join(", "),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Payload fields this template reads
    pub fn payload_fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Field(FieldPath::Payload(field)) => Some(field.as_str()),
            _ => None,
        })
    }

    pub fn render(&self, context: &RenderContext<'_>) -> Result<String, RenderError> {
        let mut rendered = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => rendered.push_str(text),
                Segment::Field(FieldPath::TargetId) => rendered.push_str(context.target_id),
                Segment::Field(FieldPath::TargetKind) => {
                    rendered.push_str(context.target_kind.as_str());
                }
                Segment::Field(FieldPath::ChangeKind) => {
                    rendered.push_str(context.change_kind.as_str());
                }
                Segment::Field(FieldPath::Payload(field)) => {
                    let value =
                        context
                            .payload
                            .get(field)
                            .ok_or_else(|| RenderError::MissingField {
                                field: field.clone(),
                            })?;
                    rendered.push_str(value);
                }
            }
        }
        Ok(rendered)
    }
}

fn push_literal(segments: &mut Vec<Segment>, source: &str, text: &str) -> Result<(), RenderError> {
    if text.contains("{{") || text.contains("}}") {
        return Err(RenderError::Unbalanced {
            template: source.to_string(),
        });
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

/// Render a template string in one step
pub fn render(template: &str, context: &RenderContext<'_>) -> Result<String, RenderError> {
    Template::parse(template)?.render(context)
}
