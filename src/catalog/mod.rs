//! # Scan Template Catalog
//!
//! Operator-supplied rules mapping matched targets to a scan definition.
//!
//! The catalog is loaded once at startup and immutable afterwards. Every
//! check that could fail per event (template syntax, field resolution,
//! selector shape, interval) runs here instead, so a broken catalog stops
//! the process before any message is consumed.
//!
//! Load also records, per target kind, the payload fields any template reads
//! or filters on. Creations and updates must carry those; events missing one
//! cannot be rendered and are dropped.
//!
//! ## Module Structure
//!
//! - `template.rs` - Placeholder parsing and rendering
//! - `selector.rs` - Label selector expressions and evaluation
//! - `duration.rs` - Repeat interval parsing and formatting

pub mod duration;
pub mod selector;
pub mod template;

use crate::crd::{
    HookSelector, LabelSelectorRequirementSpec, RESERVED_ANNOTATIONS, RESERVED_LABELS,
};
use crate::event::{ResourceChangeEvent, TargetKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

pub use selector::{LabelSelector, LabelSelectorRequirement, SelectorError};
pub use template::{render, RenderContext, RenderError, Template};

/// Longest template name; leaves room for the hash suffix in object names
pub const MAX_TEMPLATE_NAME_LEN: usize = 63;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("scan template name '{name}' is invalid: {reason}")]
    InvalidName { name: String, reason: String },
    #[error("scan template name '{name}' is used more than once")]
    DuplicateName { name: String },
    #[error("scan template '{template}' has an empty scanType")]
    EmptyScanType { template: String },
    #[error("scan template '{template}' has an invalid repeatInterval: {reason}")]
    InvalidInterval { template: String, reason: String },
    #[error("scan template '{template}' has a broken template in {location}: {source}")]
    Template {
        template: String,
        location: String,
        #[source]
        source: RenderError,
    },
    #[error("scan template '{template}' has an invalid {location}: {source}")]
    Selector {
        template: String,
        location: &'static str,
        #[source]
        source: SelectorError,
    },
    #[error("scan template '{template}' sets {location} '{key}', which is managed by the controller")]
    ReservedKey {
        template: String,
        location: &'static str,
        key: String,
    },
    #[error("scan template '{template}' filters on '{key}', which {kind} events do not carry")]
    UnknownFilterField {
        template: String,
        key: String,
        kind: TargetKind,
    },
}

/// Catalog entry as written in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScanTemplateConfig {
    /// Template name; part of every object name it produces
    pub name: String,
    /// Target kind this template applies to
    pub target_kind: TargetKind,
    /// Additional predicate over payload fields (ANDed)
    #[serde(default)]
    pub filter: Vec<LabelSelectorRequirementSpec>,
    /// Scan engine identifier
    pub scan_type: String,
    /// Format: duration string (e.g., "1h", "30m", "1h30m")
    pub repeat_interval: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub hook_selector: HookSelector,
}

/// Validated, compiled catalog entry
#[derive(Debug, Clone)]
pub struct ScanTemplate {
    name: String,
    target_kind: TargetKind,
    filter: LabelSelector,
    scan_type: String,
    repeat_interval: Duration,
    annotations: BTreeMap<String, Template>,
    labels: BTreeMap<String, Template>,
    parameters: Vec<Template>,
    hook_selector: LabelSelector,
    payload_fields: BTreeSet<String>,
}

/// Template output for a single event
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderedTemplate {
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub parameters: Vec<String>,
}

impl ScanTemplate {
    pub fn from_config(config: ScanTemplateConfig) -> Result<Self, CatalogError> {
        let ScanTemplateConfig {
            name,
            target_kind,
            filter,
            scan_type,
            repeat_interval,
            annotations,
            labels,
            parameters,
            hook_selector,
        } = config;

        validate_template_name(&name)?;

        let reserved = reserved_key(&labels, RESERVED_LABELS)
            .map(|key| ("label", key))
            .or_else(|| {
                reserved_key(&annotations, RESERVED_ANNOTATIONS).map(|key| ("annotation", key))
            });
        if let Some((location, key)) = reserved {
            return Err(CatalogError::ReservedKey {
                template: name,
                location,
                key,
            });
        }

        if scan_type.trim().is_empty() {
            return Err(CatalogError::EmptyScanType { template: name });
        }

        let repeat_interval = duration::parse_kubernetes_duration(&repeat_interval).map_err(
            |reason| CatalogError::InvalidInterval {
                template: name.clone(),
                reason,
            },
        )?;

        let compile = |location: String, source: &str| {
            Template::compile(source, target_kind).map_err(|source| CatalogError::Template {
                template: name.clone(),
                location,
                source,
            })
        };

        let annotations = annotations
            .iter()
            .map(|(key, value)| Ok((key.clone(), compile(format!("annotations.{key}"), value)?)))
            .collect::<Result<BTreeMap<_, _>, CatalogError>>()?;
        let labels = labels
            .iter()
            .map(|(key, value)| Ok((key.clone(), compile(format!("labels.{key}"), value)?)))
            .collect::<Result<BTreeMap<_, _>, CatalogError>>()?;
        let parameters = parameters
            .iter()
            .enumerate()
            .map(|(index, value)| compile(format!("parameters[{index}]"), value))
            .collect::<Result<Vec<_>, CatalogError>>()?;

        let filter = LabelSelector::from_specs(filter).map_err(|source| CatalogError::Selector {
            template: name.clone(),
            location: "filter",
            source,
        })?;
        if let Some(unknown) = filter
            .requirements()
            .iter()
            .find(|req| !target_kind.has_payload_field(req.key()))
        {
            return Err(CatalogError::UnknownFilterField {
                template: name,
                key: unknown.key().to_string(),
                kind: target_kind,
            });
        }

        let hook_selector =
            LabelSelector::try_from(hook_selector).map_err(|source| CatalogError::Selector {
                template: name.clone(),
                location: "hookSelector",
                source,
            })?;

        let payload_fields = annotations
            .values()
            .chain(labels.values())
            .chain(parameters.iter())
            .flat_map(Template::payload_fields)
            .chain(filter.requirements().iter().map(LabelSelectorRequirement::key))
            .map(str::to_string)
            .collect();

        Ok(Self {
            name,
            target_kind,
            filter,
            scan_type,
            repeat_interval,
            annotations,
            labels,
            parameters,
            hook_selector,
            payload_fields,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn target_kind(&self) -> TargetKind {
        self.target_kind
    }

    #[must_use]
    pub fn scan_type(&self) -> &str {
        &self.scan_type
    }

    #[must_use]
    pub fn repeat_interval(&self) -> Duration {
        self.repeat_interval
    }

    #[must_use]
    pub fn hook_selector(&self) -> &LabelSelector {
        &self.hook_selector
    }

    /// Payload fields rendered or filtered on
    #[must_use]
    pub fn payload_fields(&self) -> &BTreeSet<String> {
        &self.payload_fields
    }

    /// Target kind equality plus the optional payload filter
    #[must_use]
    pub fn matches(&self, event: &ResourceChangeEvent) -> bool {
        self.target_kind == event.target_kind() && self.filter.matches(event.payload())
    }

    pub fn render(&self, event: &ResourceChangeEvent) -> Result<RenderedTemplate, RenderError> {
        let context = RenderContext::from(event);
        let render_map = |templates: &BTreeMap<String, Template>| {
            templates
                .iter()
                .map(|(key, template)| Ok((key.clone(), template.render(&context)?)))
                .collect::<Result<BTreeMap<_, _>, RenderError>>()
        };

        Ok(RenderedTemplate {
            annotations: render_map(&self.annotations)?,
            labels: render_map(&self.labels)?,
            parameters: self
                .parameters
                .iter()
                .map(|template| template.render(&context))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
}

fn reserved_key(keys: &BTreeMap<String, String>, reserved: &[&str]) -> Option<String> {
    keys.keys()
        .find(|key| reserved.iter().any(|taken| *taken == key.as_str()))
        .cloned()
}

/// Template names must be DNS-1123 labels; they prefix object names
fn validate_template_name(name: &str) -> Result<(), CatalogError> {
    let invalid = |reason: &str| CatalogError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_TEMPLATE_NAME_LEN {
        return Err(invalid("must be at most 63 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid(
            "may only contain lowercase letters, digits and '-'",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid("must start and end with a letter or digit"));
    }
    Ok(())
}

/// Ordered, validated set of scan templates
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    templates: Vec<ScanTemplate>,
    required_fields: HashMap<TargetKind, BTreeSet<String>>,
}

impl Catalog {
    /// Compile every entry, failing on the first invalid one
    pub fn load(configs: Vec<ScanTemplateConfig>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        let mut templates = Vec::with_capacity(configs.len());
        let mut required_fields: HashMap<TargetKind, BTreeSet<String>> = HashMap::new();

        for config in configs {
            if !seen.insert(config.name.clone()) {
                return Err(CatalogError::DuplicateName { name: config.name });
            }
            let template = ScanTemplate::from_config(config)?;
            required_fields
                .entry(template.target_kind)
                .or_default()
                .extend(template.payload_fields.iter().cloned());
            templates.push(template);
        }

        Ok(Self {
            templates,
            required_fields,
        })
    }

    /// Payload fields a creation or update of `kind` has to carry
    pub fn required_fields(&self, kind: TargetKind) -> impl Iterator<Item = &str> + '_ {
        self.required_fields
            .get(&kind)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    #[must_use]
    pub fn templates(&self) -> &[ScanTemplate] {
        &self.templates
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ScanTemplate> {
        self.templates.iter().find(|template| template.name == name)
    }

    /// Templates accepting the event, in catalog order
    pub fn matching<'a>(
        &'a self,
        event: &'a ResourceChangeEvent,
    ) -> impl Iterator<Item = &'a ScanTemplate> + 'a {
        self.templates
            .iter()
            .filter(move |template| template.matches(event))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
