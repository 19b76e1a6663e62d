//! # Observability
//!
//! 日志与指标：stderr 上的 tracing 输出，可选的 Prometheus 端点，
//! 以及 `change_notifier_*` 指标的记录函数。
//!
//! stdout 留给分发报告，所以所有日志都写 stderr。

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub use crate::metrics::{
    record_delivery_attempt, record_delivery_outcome, record_enqueue_rejected,
    record_event_enqueued, record_queue_depth, record_retry, record_submit_latency_ms,
    RunningStats, StatsSummary,
};

/// How the process reports on itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_log_level: String,
    /// Prometheus scrape port; `None` keeps metrics in-process only
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            default_log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    /// 每行一个 JSON 对象，带文件与行号
    Json,
}

/// Install the global subscriber, then the Prometheus exporter if a port is set.
///
/// Fails if a subscriber is already installed or the port cannot be bound.
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer(config.log_format))
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .with_context(|| format!("Failed to serve metrics on port {port}"))?;
        tracing::info!(port, "Prometheus metrics endpoint listening");
    }

    tracing::debug!(log_format = ?config.log_format, "Observability initialized");
    Ok(())
}

fn stderr_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer().with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Json => layer
            .json()
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_no_metrics_endpoint() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.default_log_level, "info");
    }

    #[test]
    fn test_every_format_builds_a_layer() {
        for format in [LogFormat::Pretty, LogFormat::Compact, LogFormat::Json] {
            let layer = stderr_layer::<tracing_subscriber::Registry>(format);
            let _subscriber = tracing_subscriber::registry().with(layer);
        }
    }
}
