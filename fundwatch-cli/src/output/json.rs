//! JSON output formatting.

use anyhow::Result;
use fundwatch_fetch::{GatewayStats, RecoveryStats};
use fundwatch_modian::BatchReport;
use fundwatch_telemetry::{PerformanceReport, TuningReport};
use serde::Serialize;

// ============================================================================
// Output Types
// ============================================================================

/// JSON output of a batch run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutput {
    pub report: BatchReport,
    pub elapsed_secs: f64,
    pub requests: GatewayStats,
    pub recovery: RecoveryStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tuning: Option<TuningReport>,
}

// ============================================================================
// Formatter
// ============================================================================

/// JSON formatter.
pub struct JsonFormatter {
    pretty: bool,
}

impl JsonFormatter {
    /// Creates a new JSON formatter.
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    /// Formats any serializable value.
    pub fn format<T: Serialize>(&self, data: &T) -> Result<String> {
        let json = if self.pretty {
            serde_json::to_string_pretty(data)?
        } else {
            serde_json::to_string(data)?
        };
        Ok(json)
    }
}
