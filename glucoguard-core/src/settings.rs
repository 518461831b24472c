//! Engine settings
//!
//! Settings are an external collaborator: the host deserializes them once
//! and the engine consumes them read-only. Thresholds are always stored in
//! mg/dL regardless of the display unit system; the unit system only
//! affects how properties are rendered.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::units::Units;

/// BG boundaries driving alarm evaluation, in mg/dL
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thresholds {
    /// Urgent-high boundary
    pub bg_high: f64,
    /// Top of the target range (warn-high boundary)
    pub bg_target_top: f64,
    /// Bottom of the target range (warn-low boundary)
    pub bg_target_bottom: f64,
    /// Urgent-low boundary
    pub bg_low: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            bg_high: 260.0,
            bg_target_top: 180.0,
            bg_target_bottom: 80.0,
            bg_low: 55.0,
        }
    }
}

/// Read-only engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Display unit system
    pub units: Units,

    /// BG alarm boundaries
    pub thresholds: Thresholds,

    /// Urgent-high BG alarm enabled
    pub alarm_urgent_high: bool,
    /// Warn-high BG alarm enabled
    pub alarm_high: bool,
    /// Warn-low BG alarm enabled
    pub alarm_low: bool,
    /// Urgent-low BG alarm enabled
    pub alarm_urgent_low: bool,

    /// Stale-data warn alarm enabled
    pub alarm_timeago_warn: bool,
    /// Minutes without a reading before the warn alarm fires
    pub alarm_timeago_warn_mins: u64,
    /// Stale-data urgent alarm enabled
    pub alarm_timeago_urgent: bool,
    /// Minutes without a reading before the urgent alarm fires
    pub alarm_timeago_urgent_mins: u64,

    /// Names of the plugins that run each cycle, in registration order
    pub enabled_plugins: Vec<String>,

    /// Per-plugin extended settings, keyed by plugin name
    pub extended: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            units: Units::MgDl,
            thresholds: Thresholds::default(),
            alarm_urgent_high: true,
            alarm_high: true,
            alarm_low: true,
            alarm_urgent_low: true,
            alarm_timeago_warn: true,
            alarm_timeago_warn_mins: 15,
            alarm_timeago_urgent: true,
            alarm_timeago_urgent_mins: 30,
            enabled_plugins: [
                "bgnow",
                "direction",
                "iob",
                "cob",
                "rawbg",
                "ar2",
                "timeago",
                "errorcodes",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            extended: HashMap::new(),
        }
    }
}

impl Settings {
    /// Whether the named plugin should run this cycle.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled_plugins.iter().any(|p| p == name)
    }

    /// Extended settings for the named plugin, if any were configured.
    pub fn extended_for(&self, name: &str) -> Option<&serde_json::Value> {
        self.extended.get(name)
    }

    /// Fetch a single numeric extended setting, falling back to `default`.
    pub fn extended_f64(&self, plugin: &str, key: &str, default: f64) -> f64 {
        self.extended_for(plugin)
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_f64())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_clinical_boundaries() {
        let settings = Settings::default();
        assert_eq!(settings.thresholds.bg_high, 260.0);
        assert_eq!(settings.thresholds.bg_low, 55.0);
        assert!(settings.is_enabled("iob"));
        assert!(!settings.is_enabled("nonexistent"));
    }

    #[test]
    fn extended_settings_lookup() {
        let mut settings = Settings::default();
        settings.extended.insert(
            "ar2".into(),
            serde_json::json!({ "coneFactor": 0.5 }),
        );

        assert_eq!(settings.extended_f64("ar2", "coneFactor", 2.0), 0.5);
        assert_eq!(settings.extended_f64("ar2", "missing", 2.0), 2.0);
        assert_eq!(settings.extended_f64("iob", "coneFactor", 2.0), 2.0);
    }

    #[test]
    fn deserializes_partial_documents() {
        let settings: Settings =
            serde_json::from_str(r#"{ "units": "mmol", "alarmHigh": false }"#).unwrap();
        assert_eq!(settings.units, Units::Mmol);
        assert!(!settings.alarm_high);
        // Unspecified fields keep their defaults
        assert!(settings.alarm_urgent_high);
    }
}
