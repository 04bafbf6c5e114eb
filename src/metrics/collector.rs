use crate::metrics::StatsClient;
use crate::{Result, TcLensError};
use dashmap::DashMap;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::debug;

const TAGS_LABEL: &str = "tags";

/// `StatsClient` backed by a prometheus registry.
///
/// Gauges are created on first use, one `GaugeVec` per metric name, with the
/// tags joined into a single label value.
pub struct PrometheusStats {
    registry: Registry,
    gauges: DashMap<String, GaugeVec>,
}

impl PrometheusStats {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            gauges: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current value of a gauge, if it was ever set
    pub fn gauge_value(&self, name: &str, tags: &[String]) -> Option<f64> {
        let name = sanitize_name(name);
        let gauge = self.gauges.get(&name)?;
        let label = tags.join(",");
        gauge
            .get_metric_with_label_values(&[label.as_str()])
            .ok()
            .map(|g| g.get())
    }

    fn gauge_vec(&self, name: &str) -> Result<GaugeVec> {
        if let Some(existing) = self.gauges.get(name) {
            return Ok(existing.clone());
        }

        // The entry lock keeps two first callers from registering the same name
        let entry = self.gauges.entry(name.to_string()).or_try_insert_with(|| {
            let vec = GaugeVec::new(
                Opts::new(name, format!("tclens gauge {}", name)),
                &[TAGS_LABEL],
            )
            .map_err(|e| TcLensError::MetricsError(e.to_string()))?;
            self.registry
                .register(Box::new(vec.clone()))
                .map_err(|e| TcLensError::MetricsError(e.to_string()))?;
            debug!(metric = name, "registered gauge");
            Ok::<_, TcLensError>(vec)
        })?;
        Ok(entry.clone())
    }
}

impl Default for PrometheusStats {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsClient for PrometheusStats {
    fn gauge(&self, name: &str, value: f64, tags: &[String]) -> Result<()> {
        let name = sanitize_name(name);
        let label = tags.join(",");
        let gauge = self.gauge_vec(&name)?;
        gauge
            .get_metric_with_label_values(&[label.as_str()])
            .map_err(|e| TcLensError::MetricsError(e.to_string()))?
            .set(value);
        Ok(())
    }
}

/// Prometheus names only allow `[a-zA-Z0-9_:]`
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
