use std::fmt;

use thiserror::Error;

use crate::catalog::TemplateId;

#[derive(Error, Debug)]
pub enum TcLensError {
    #[error("Network namespace error: {0}")]
    NetnsError(String),

    #[error("Metrics error: {0}")]
    MetricsError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Kernel version {version} is too old. Minimum required: {min_version}")]
    KernelVersionTooOld {
        version: String,
        min_version: String,
    },

    #[error("Unsupported feature on this system: {0}")]
    UnsupportedFeature(String),
}

pub type Result<T> = std::result::Result<T, TcLensError>;

/// Error reported by an attachment driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    /// The device could not be resolved at all; nothing can be attached to it
    #[error("link not found: {0}")]
    LinkNotFound(String),

    /// Any other driver failure (resource limits, conflicting hook, load error)
    #[error("{0}")]
    Attach(String),
}

impl AttachError {
    pub fn is_link_not_found(&self) -> bool {
        matches!(self, AttachError::LinkNotFound(_))
    }
}

/// Per-template failures collected during one setup call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachFailures {
    failures: Vec<(TemplateId, AttachError)>,
}

impl AttachFailures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, template: TemplateId, error: AttachError) {
        self.failures.push((template, error));
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(TemplateId, AttachError)> {
        self.failures.iter()
    }

    /// `Ok(())` when nothing was collected
    pub fn into_result(self) -> std::result::Result<(), SetupError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(SetupError::Partial(self))
        }
    }
}

impl fmt::Display for AttachFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} template(s) failed to attach:", self.failures.len())?;
        for (template, error) in &self.failures {
            write!(f, " couldn't clone {}: {};", template, error)?;
        }
        Ok(())
    }
}

/// Outcome of a failed setup call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    /// Aborted at `template`; later templates were not attempted
    #[error("aborted setup at {template}: {error}")]
    LinkNotFound {
        template: TemplateId,
        error: AttachError,
    },

    /// Some templates failed, the others were attached or already present
    #[error("{0}")]
    Partial(AttachFailures),
}

impl SetupError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SetupError::LinkNotFound { .. })
    }
}
