//! Catalog of TC program templates
//!
//! A template names a classifier function and where it goes (direction and
//! mode). The registry clones one instance of each selected template onto
//! every instrumented device.

use std::fmt;

use tclens_common::programs;

/// Traffic direction a classifier is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrafficDirection {
    Ingress,
    Egress,
}

impl TrafficDirection {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TrafficDirection::Ingress => "ingress",
            TrafficDirection::Egress => "egress",
        }
    }
}

impl fmt::Display for TrafficDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classifier mode; raw-packet programs use their own filter handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachMode {
    Classifier,
    RawPacket,
}

/// Feature switches deciding which templates are selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    pub ingress_enabled: bool,
    pub raw_packet_enabled: bool,
}

/// Identity of a template, used when reporting per-template failures
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateId {
    pub uid: String,
    pub func_name: String,
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.uid, self.func_name)
    }
}

/// A program that can be cloned onto a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramTemplate {
    pub uid: String,
    pub func_name: String,
    pub direction: TrafficDirection,
    pub mode: AttachMode,
}

impl ProgramTemplate {
    pub fn new(
        uid: impl Into<String>,
        func_name: impl Into<String>,
        direction: TrafficDirection,
        mode: AttachMode,
    ) -> Self {
        Self {
            uid: uid.into(),
            func_name: func_name.into(),
            direction,
            mode,
        }
    }

    pub fn id(&self) -> TemplateId {
        TemplateId {
            uid: self.uid.clone(),
            func_name: self.func_name.clone(),
        }
    }

    /// Ingress templates need `ingress_enabled`, raw-packet ones `raw_packet_enabled`
    pub fn is_selected(&self, flags: FeatureFlags) -> bool {
        let direction_ok = self.direction == TrafficDirection::Egress || flags.ingress_enabled;
        let mode_ok = self.mode == AttachMode::Classifier || flags.raw_packet_enabled;
        direction_ok && mode_ok
    }
}

/// Source of program templates
pub trait ProgramCatalog: Send + Sync {
    /// Templates to attach given the caller's feature flags, in attach order
    fn templates(&self, flags: FeatureFlags) -> Vec<ProgramTemplate>;
}

/// Catalog of the classifiers shipped in the `tc_classifiers` object
#[derive(Debug, Clone)]
pub struct TcCatalog {
    templates: Vec<ProgramTemplate>,
}

impl TcCatalog {
    /// Default classifier set, owned by `uid`
    pub fn new(uid: &str) -> Self {
        Self::with_templates(vec![
            ProgramTemplate::new(
                uid,
                programs::CLASSIFIER_INGRESS,
                TrafficDirection::Ingress,
                AttachMode::Classifier,
            ),
            ProgramTemplate::new(
                uid,
                programs::CLASSIFIER_EGRESS,
                TrafficDirection::Egress,
                AttachMode::Classifier,
            ),
            ProgramTemplate::new(
                uid,
                programs::CLASSIFIER_RAW_PACKET_INGRESS,
                TrafficDirection::Ingress,
                AttachMode::RawPacket,
            ),
            ProgramTemplate::new(
                uid,
                programs::CLASSIFIER_RAW_PACKET_EGRESS,
                TrafficDirection::Egress,
                AttachMode::RawPacket,
            ),
        ])
    }

    pub fn with_templates(templates: Vec<ProgramTemplate>) -> Self {
        Self { templates }
    }
}

impl ProgramCatalog for TcCatalog {
    fn templates(&self, flags: FeatureFlags) -> Vec<ProgramTemplate> {
        self.templates
            .iter()
            .filter(|t| t.is_selected(flags))
            .cloned()
            .collect()
    }
}
