//! Trend arrow
//!
//! Maps the uploader-reported direction of the latest reading to a display
//! entity. Readings below the error-code boundary carry no meaningful
//! trend and publish nothing.

use crate::errors::PluginResult;
use crate::pipeline::Plugin;
use crate::plugins::bgnow::MIN_VALID_MGDL;
use crate::sandbox::{PropertyValue, Sandbox};

/// Published trend property
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionProperty {
    /// Uploader direction string ("Flat", "SingleUp", ...)
    pub value: String,
    /// Display arrow
    pub entity: &'static str,
    /// One-line rendering
    pub display_line: String,
}

/// Display arrow for an uploader direction string.
pub fn arrow_for(direction: &str) -> Option<&'static str> {
    match direction {
        "DoubleUp" => Some("⇈"),
        "SingleUp" => Some("↑"),
        "FortyFiveUp" => Some("↗"),
        "Flat" => Some("→"),
        "FortyFiveDown" => Some("↘"),
        "SingleDown" => Some("↓"),
        "DoubleDown" => Some("⇊"),
        "NOT COMPUTABLE" => Some("-"),
        "RATE OUT OF RANGE" => Some("⇕"),
        "NONE" => Some("⇼"),
        _ => None,
    }
}

/// Publishes `direction`
#[derive(Debug, Default)]
pub struct DirectionPlugin;

impl Plugin for DirectionPlugin {
    fn name(&self) -> &'static str {
        "direction"
    }

    fn set_properties(&self, sbx: &mut Sandbox) -> PluginResult<()> {
        let Some(entry) = sbx.last_sgv() else {
            return Ok(());
        };
        if entry.mgdl < MIN_VALID_MGDL {
            return Ok(());
        }
        let Some(value) = entry.direction.clone() else {
            return Ok(());
        };
        let Some(entity) = arrow_for(&value) else {
            return Ok(());
        };

        sbx.offer_property("direction", || {
            Some(PropertyValue::Direction(DirectionProperty {
                display_line: format!("Direction: {}", entity),
                value,
                entity,
            }))
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarms::AlarmEngine;
    use crate::pipeline::Pipeline;
    use crate::profile::ProfileResolver;
    use crate::records::{Entry, RecordStore};
    use crate::settings::Settings;

    fn run(entry: Entry) -> crate::sandbox::Properties {
        let mut store = RecordStore::new();
        store.sgvs = vec![entry];
        let profile = ProfileResolver::new();
        let settings = Settings::default();
        let mut alarms = AlarmEngine::new();
        let mut pipeline = Pipeline::new();
        pipeline.register(Box::new(DirectionPlugin));
        let (properties, _) = pipeline.run_cycle(2000, &store, &profile, &settings, &mut alarms);
        properties
    }

    #[test]
    fn maps_direction_to_arrow() {
        let mut entry = Entry::new(1000, 120.0);
        entry.direction = Some("FortyFiveUp".into());

        let properties = run(entry);
        match properties.get("direction") {
            Some(PropertyValue::Direction(d)) => {
                assert_eq!(d.entity, "↗");
                assert_eq!(d.display_line, "Direction: ↗");
            }
            other => panic!("unexpected property {:?}", other),
        }
    }

    #[test]
    fn error_code_reading_publishes_nothing() {
        let mut entry = Entry::new(1000, 9.0);
        entry.direction = Some("Flat".into());

        let properties = run(entry);
        assert!(properties.get("direction").is_none());
    }

    #[test]
    fn unknown_direction_publishes_nothing() {
        let mut entry = Entry::new(1000, 120.0);
        entry.direction = Some("Sideways".into());

        let properties = run(entry);
        assert!(properties.get("direction").is_none());
    }
}
