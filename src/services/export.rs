//! Incident report export
//!
//! CSV and JSON renditions of the last whole-schedule validation report.

use anyhow::{Context, Result};

use crate::types::GlobalValidationReport;

/// Incidents as CSV with a stable column set.
pub fn incidents_to_csv(report: &GlobalValidationReport) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for incident in &report.incidents {
        writer
            .serialize(incident)
            .context("Failed to serialize incident row")?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {e}"))?;
    String::from_utf8(bytes).context("CSV output was not valid UTF-8")
}

/// Full report as pretty-printed JSON.
pub fn incidents_to_json(report: &GlobalValidationReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("Failed to serialize report")
}
