//! Reading freshness and stale-data alarms
//!
//! Publishes how long ago the last reading arrived, and raises the
//! stale-data alarms when the feed goes quiet: a warning after
//! `alarm_timeago_warn_mins` (default 15) and an urgent alarm after
//! `alarm_timeago_urgent_mins` (default 30), each behind its enable flag.

use crate::alarms::{Level, Notify};
use crate::errors::PluginResult;
use crate::pipeline::Plugin;
use crate::sandbox::{PropertyValue, Sandbox};
use crate::time::{mins_to_ms, Timestamp, MS_PER_DAY, MS_PER_HOUR, MS_PER_MINUTE};

/// Published freshness property
#[derive(Debug, Clone, PartialEq)]
pub struct TimeAgoProperty {
    /// Magnitude in `shorthand` units
    pub value: u64,
    /// Unit shorthand: "s", "m", "h", "d"
    pub shorthand: &'static str,
    /// The reading this measures from
    pub mills: Timestamp,
    /// One-line rendering ("5m ago")
    pub display_line: String,
}

/// Break an age in milliseconds into a display magnitude and unit.
pub fn age_display(age_ms: u64) -> (u64, &'static str) {
    if age_ms < MS_PER_MINUTE {
        (age_ms / 1000, "s")
    } else if age_ms < MS_PER_HOUR {
        (age_ms / MS_PER_MINUTE, "m")
    } else if age_ms < MS_PER_DAY {
        (age_ms / MS_PER_HOUR, "h")
    } else {
        (age_ms / MS_PER_DAY, "d")
    }
}

/// Publishes `timeago` and raises stale-data alarms
#[derive(Debug, Default)]
pub struct TimeAgoPlugin;

impl Plugin for TimeAgoPlugin {
    fn name(&self) -> &'static str {
        "timeago"
    }

    fn set_properties(&self, sbx: &mut Sandbox) -> PluginResult<()> {
        let Some(entry) = sbx.last_sgv() else {
            return Ok(());
        };
        let age = sbx.time.saturating_sub(entry.mills);
        let (value, shorthand) = age_display(age);
        let mills = entry.mills;

        sbx.offer_property("timeago", || {
            Some(PropertyValue::TimeAgo(TimeAgoProperty {
                value,
                shorthand,
                mills,
                display_line: format!("{}{} ago", value, shorthand),
            }))
        });
        Ok(())
    }

    fn check_notifications(&self, sbx: &mut Sandbox) -> PluginResult<()> {
        let Some(entry) = sbx.last_sgv() else {
            return Ok(());
        };
        let age = sbx.time.saturating_sub(entry.mills);
        let (value, shorthand) = age_display(age);

        let urgent_after = mins_to_ms(sbx.settings.alarm_timeago_urgent_mins);
        let warn_after = mins_to_ms(sbx.settings.alarm_timeago_warn_mins);

        let level = if sbx.settings.alarm_timeago_urgent && age >= urgent_after {
            Some(Level::Urgent)
        } else if sbx.settings.alarm_timeago_warn && age >= warn_after {
            Some(Level::Warn)
        } else {
            None
        };

        if let Some(level) = level {
            sbx.request_notify(Notify::new(
                level,
                "Stale data, check rig?",
                format!("Last received: {}{} ago", value, shorthand),
                "timeago",
            ));
        }
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

    const T: Timestamp = 1_000_000_000;

    #[test]
    fn age_units() {
        assert_eq!(age_display(30_000), (30, "s"));
        assert_eq!(age_display(5 * MS_PER_MINUTE), (5, "m"));
        assert_eq!(age_display(3 * MS_PER_HOUR), (3, "h"));
        assert_eq!(age_display(2 * MS_PER_DAY + MS_PER_HOUR), (2, "d"));
    }

    fn run_at(age_mins: u64, settings: &Settings) -> Vec<crate::alarms::AlarmEvent> {
        let mut store = RecordStore::new();
        store.sgvs = vec![Entry::new(T - age_mins * MS_PER_MINUTE, 100.0)];
        let profile = ProfileResolver::new();
        let mut alarms = AlarmEngine::new();
        let mut pipeline = Pipeline::new();
        pipeline.register(Box::new(TimeAgoPlugin));
        let (_, events) = pipeline.run_cycle(T, &store, &profile, settings, &mut alarms);
        events
    }

    #[test]
    fn fresh_data_raises_nothing() {
        assert!(run_at(5, &Settings::default()).is_empty());
    }

    #[test]
    fn warn_then_urgent_as_data_ages() {
        let settings = Settings::default();

        let warn = run_at(16, &settings);
        assert_eq!(warn.len(), 1);
        assert_eq!(warn[0].level, Level::Warn);

        let urgent = run_at(31, &settings);
        assert_eq!(urgent.len(), 1);
        assert_eq!(urgent[0].level, Level::Urgent);
    }

    #[test]
    fn disabled_flags_suppress_alarms() {
        let settings = Settings {
            alarm_timeago_warn: false,
            alarm_timeago_urgent: false,
            ..Settings::default()
        };
        assert!(run_at(60, &settings).is_empty());
    }
}
