//! Configuration management

use anyhow::{Context, Result};

use crate::defaults::POSITIONING_DEBOUNCE_MS;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// OSRM routing engine URL (optional, falls back to mock if unavailable)
    pub osrm_url: Option<String>,

    /// Directory for schedule snapshots
    pub snapshot_dir: String,

    /// Debounce window for positioning refreshes, in milliseconds
    pub positioning_debounce_ms: u64,

    /// Run the reassignment pass automatically after a whole-schedule
    /// validation that reports error incidents
    pub auto_reassign: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let osrm_url = std::env::var("OSRM_URL").ok().filter(|v| !v.is_empty());

        let snapshot_dir =
            std::env::var("SNAPSHOT_DIR").unwrap_or_else(|_| "./snapshots".to_string());

        let positioning_debounce_ms = match std::env::var("POSITIONING_DEBOUNCE_MS") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("POSITIONING_DEBOUNCE_MS must be a number, got '{raw}'"))?,
            Err(_) => POSITIONING_DEBOUNCE_MS,
        };

        let auto_reassign = matches!(
            std::env::var("AUTO_REASSIGN").as_deref(),
            Ok("1") | Ok("true") | Ok("yes")
        );

        Ok(Self {
            osrm_url,
            snapshot_dir,
            positioning_debounce_ms,
            auto_reassign,
        })
    }
}
