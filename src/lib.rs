//! Lifecycle management for TC classifiers across network namespaces
//!
//! The [`ProbeRegistry`] attaches one instance of every selected program
//! template to each discovered interface, flushes them when a namespace goes
//! away, sweeps out stale ones, and answers concurrent queries. Kernel work is
//! delegated to an [`AttachmentDriver`]; the aya-based one ships in
//! `tclens-agent`.

pub mod catalog;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod names;
pub mod registry;
pub mod selector;

pub use catalog::{AttachMode, FeatureFlags, ProgramCatalog, ProgramTemplate, TcCatalog, TrafficDirection};
pub use config::AgentConfig;
pub use device::{DeviceKey, NetDevice};
pub use driver::{AttachParams, AttachRequest, AttachmentDriver, ConstantEditor, LinkInfo};
pub use error::{AttachError, AttachFailures, Result, SetupError, TcLensError};
pub use names::{ProgramName, ProgramNames};
pub use registry::{ProbeRegistry, ProgramKey, RegistryConfig};
pub use selector::{BestEffortSelector, ProbeSelector, ReconcileReport};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
