use crate::metrics::PrometheusStats;
use crate::{Result, TcLensError};
use prometheus::{Encoder, TextEncoder};

/// Render every gauge of `stats` in the Prometheus text exposition format
pub fn encode_text(stats: &PrometheusStats) -> Result<String> {
    let families = stats.registry().gather();
    let encoder = TextEncoder::new();

    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| TcLensError::MetricsError(e.to_string()))?;

    String::from_utf8(buffer).map_err(|e| TcLensError::MetricsError(e.to_string()))
}
