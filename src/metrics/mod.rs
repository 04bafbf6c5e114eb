//! Stats sink used by the registry
//!
//! The registry only needs to push gauges; `PrometheusStats` is the bundled
//! implementation, and its text exposition lives in `exporter`.

pub mod collector;
pub mod exporter;

pub use collector::PrometheusStats;
pub use exporter::encode_text;

use crate::Result;

/// Number of TC programs currently attached by the registry
pub const METRIC_TC_PROGRAMS: &str = "tclens_tc_programs";

pub trait StatsClient: Send + Sync {
    fn gauge(&self, name: &str, value: f64, tags: &[String]) -> Result<()>;
}
