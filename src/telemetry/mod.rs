//! Logging setup and metric events.
//!
//! Metrics are plain `tracing` events on the `metrics` target so any
//! subscriber can pick them up; nothing is exported by the engine itself.

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::workflow::WorkflowStatus;

/// Target carrying metric events
pub const METRICS_TARGET: &str = "metrics";

/// Logging configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is not set
    pub log_level: String,
    /// Colored output with event targets
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }
}

/// Install the global subscriber writing to stderr, keeping stdout for the
/// interactive console. Fails if a subscriber is already installed.
pub fn init_telemetry(
    config: TelemetryConfig,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_writer(std::io::stderr)
        .with_target(config.ansi)
        .with_ansi(config.ansi)
        .try_init()?;

    tracing::debug!("Logging initialized at {}", config.log_level);
    Ok(())
}

/// Emit one metric with tags
pub fn add_metric(name: &str, value: f64, tags: &[(&str, String)]) {
    let tags = tags
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");

    tracing::info!(
        target: METRICS_TARGET,
        metric_name = %name,
        metric_value = %value,
        metric_tags = %tags,
        "Recorded metric"
    );
}

/// Duration of one settled task attempt
pub fn record_task_attempt(task_name: &str, attempt: u32, success: bool, elapsed: Duration) {
    add_metric(
        "task_duration_ms",
        elapsed.as_millis() as f64,
        &[
            ("task_name", task_name.to_string()),
            ("attempt", attempt.to_string()),
            ("success", success.to_string()),
        ],
    );
}

/// Duration of a workflow run up to its terminal state
pub fn record_workflow_run(workflow_type: &str, status: WorkflowStatus, elapsed: Duration) {
    add_metric(
        "workflow_duration_ms",
        elapsed.as_millis() as f64,
        &[
            ("workflow_type", workflow_type.to_string()),
            ("status", status.to_string()),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_subscriber() {
        record_task_attempt("render_document", 2, false, Duration::from_millis(12));
        record_workflow_run("report", WorkflowStatus::Completed, Duration::from_secs(1));
        add_metric("llm_tokens_total", 420.0, &[("model", "gpt-4o".into())]);
    }

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(config.ansi);
    }
}
