//! Per-cycle evaluation sandbox
//!
//! ## Overview
//!
//! A sandbox is the immutable-per-cycle container a plugin computes from:
//! the evaluation time (which may be historical during retro playback),
//! the record store, the profile resolver, settings, and the write-once
//! property bag. A fresh sandbox is built for every cycle; properties
//! never leak between cycles.
//!
//! ## Write-once properties
//!
//! [`Properties::offer`] is a guarded insert: the first plugin whose
//! computation returns a value claims the name for the cycle, and later
//! offers for the same name are silently ignored. A computation that
//! returns `None` stores nothing *and does not claim the slot* - a later,
//! lower-priority plugin may still fill it. Priority is therefore
//! registration order among the plugins that successfully compute a value.
//! The IOB pipeline depends on this: device-reported IOB only yields to
//! the treatment-derived estimate when the former is absent.

use std::collections::BTreeMap;

use crate::alarms::{NotificationRequests, Notify, Snooze};
use crate::plugins::bgnow::{BgNowProperty, DeltaProperty};
use crate::plugins::cob::CobProperty;
use crate::plugins::direction::DirectionProperty;
use crate::plugins::iob::IobProperty;
use crate::plugins::rawbg::RawBgProperty;
use crate::plugins::timeago::TimeAgoProperty;
use crate::plugins::ForecastProperty;
use crate::profile::ProfileResolver;
use crate::records::{Entry, RecordStore};
use crate::settings::Settings;
use crate::time::{Timestamp, FIFTEEN_MINS_MS};
use crate::units::{format_scaled, scale_mgdl};

/// A derived value published by a plugin
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Insulin on board
    Iob(IobProperty),
    /// Carbs on board
    Cob(CobProperty),
    /// Current bucketed glucose
    BgNow(BgNowProperty),
    /// Smoothed delta between the two most recent buckets
    Delta(DeltaProperty),
    /// Trend arrow
    Direction(DirectionProperty),
    /// Calibration-derived raw glucose
    RawBg(RawBgProperty),
    /// Freshness of the last reading
    TimeAgo(TimeAgoProperty),
    /// Short-horizon forecast
    Forecast(ForecastProperty),
    /// Escape hatch for host-defined plugins
    Custom(serde_json::Value),
}

/// Write-once, per-cycle property bag
#[derive(Debug, Default)]
pub struct Properties {
    map: BTreeMap<&'static str, PropertyValue>,
}

impl Properties {
    /// Guarded insert: runs `compute` only if `name` is unclaimed, and
    /// stores the result only if the computation produced one.
    pub fn offer<F>(&mut self, name: &'static str, compute: F)
    where
        F: FnOnce() -> Option<PropertyValue>,
    {
        if self.map.contains_key(name) {
            return;
        }
        if let Some(value) = compute() {
            self.map.insert(name, value);
        }
    }

    /// Look up a published property.
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.map.get(name)
    }

    /// Whether `name` has been claimed this cycle.
    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Names published so far, in name order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.map.keys().copied()
    }

    /// The published IOB property, if any.
    pub fn iob(&self) -> Option<&IobProperty> {
        match self.get("iob") {
            Some(PropertyValue::Iob(p)) => Some(p),
            _ => None,
        }
    }

    /// The published COB property, if any.
    pub fn cob(&self) -> Option<&CobProperty> {
        match self.get("cob") {
            Some(PropertyValue::Cob(p)) => Some(p),
            _ => None,
        }
    }

    /// The published bucketed-glucose property, if any.
    pub fn bgnow(&self) -> Option<&BgNowProperty> {
        match self.get("bgnow") {
            Some(PropertyValue::BgNow(p)) => Some(p),
            _ => None,
        }
    }

    /// The published delta property, if any.
    pub fn delta(&self) -> Option<&DeltaProperty> {
        match self.get("delta") {
            Some(PropertyValue::Delta(p)) => Some(p),
            _ => None,
        }
    }

    /// The published forecast property, if any.
    pub fn forecast(&self) -> Option<&ForecastProperty> {
        match self.get("ar2") {
            Some(PropertyValue::Forecast(p)) => Some(p),
            _ => None,
        }
    }
}

/// Immutable-per-cycle plugin evaluation context
pub struct Sandbox<'a> {
    /// Evaluation time; historical during retro playback
    pub time: Timestamp,
    /// Canonical records
    pub store: &'a RecordStore,
    /// Therapy profile resolver
    pub profile: &'a ProfileResolver,
    /// Read-only configuration
    pub settings: &'a Settings,
    /// Write-once derived values
    pub properties: Properties,
    /// This cycle's notification/snooze requests
    pub requests: NotificationRequests,
}

impl<'a> Sandbox<'a> {
    /// Build a fresh sandbox for one cycle.
    pub fn new(
        time: Timestamp,
        store: &'a RecordStore,
        profile: &'a ProfileResolver,
        settings: &'a Settings,
    ) -> Self {
        Self {
            time,
            store,
            profile,
            settings,
            properties: Properties::default(),
            requests: NotificationRequests::new(),
        }
    }

    /// Latest glucose reading at or before the evaluation time.
    pub fn last_sgv(&self) -> Option<&'a Entry> {
        self.store.last_sgv_before(self.time)
    }

    /// Whether a record timestamped `mills` is within the 15-minute
    /// freshness horizon of the evaluation time.
    pub fn is_current(&self, mills: Timestamp) -> bool {
        (self.time as i64 - mills as i64).unsigned_abs() <= FIFTEEN_MINS_MS
    }

    /// Scale a canonical mg/dL value into the configured display units.
    pub fn scale(&self, mgdl: f64) -> f64 {
        scale_mgdl(mgdl, self.settings.units)
    }

    /// Format a canonical mg/dL value for display.
    pub fn display_bg(&self, mgdl: f64) -> String {
        format_scaled(mgdl, self.settings.units)
    }

    /// Default notification message: current BG, arrow, and freshness.
    pub fn default_message(&self) -> String {
        match self.last_sgv() {
            Some(entry) => {
                let arrow = entry
                    .direction
                    .as_deref()
                    .and_then(crate::plugins::direction::arrow_for)
                    .unwrap_or("-");
                let mins = (self.time.saturating_sub(entry.mills)) / 60_000;
                format!(
                    "BG Now: {} {} ({}m ago)",
                    self.display_bg(entry.mgdl),
                    arrow,
                    mins
                )
            }
            None => "BG Now: no data".to_string(),
        }
    }

    /// Offer a property; see [`Properties::offer`].
    pub fn offer_property<F>(&mut self, name: &'static str, compute: F)
    where
        F: FnOnce() -> Option<PropertyValue>,
    {
        self.properties.offer(name, compute);
    }

    /// Request a notification for this cycle.
    pub fn request_notify(&mut self, notify: Notify) {
        self.requests.request_notify(notify);
    }

    /// Request a snooze for this cycle.
    pub fn request_snooze(&mut self, snooze: Snooze) {
        self.requests.request_snooze(snooze);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_successful_offer_wins() {
        let mut properties = Properties::default();

        properties.offer("iob", || {
            Some(PropertyValue::Custom(serde_json::json!({ "v": 1 })))
        });
        properties.offer("iob", || {
            Some(PropertyValue::Custom(serde_json::json!({ "v": 2 })))
        });

        match properties.get("iob") {
            Some(PropertyValue::Custom(v)) => assert_eq!(v["v"], 1),
            other => panic!("unexpected property {:?}", other),
        }
    }

    #[test]
    fn failed_offer_does_not_claim_the_slot() {
        let mut properties = Properties::default();

        properties.offer("iob", || None);
        assert!(!properties.contains("iob"));

        // A later, lower-priority plugin may still fill it
        properties.offer("iob", || {
            Some(PropertyValue::Custom(serde_json::json!({ "v": 2 })))
        });
        match properties.get("iob") {
            Some(PropertyValue::Custom(v)) => assert_eq!(v["v"], 2),
            other => panic!("unexpected property {:?}", other),
        }
    }

    #[test]
    fn claimed_slot_skips_later_computation() {
        let mut properties = Properties::default();
        properties.offer("x", || Some(PropertyValue::Custom(serde_json::json!(1))));

        let mut ran = false;
        properties.offer("x", || {
            ran = true;
            None
        });
        assert!(!ran, "computation must not run for a claimed name");
    }

    #[test]
    fn freshness_horizon() {
        let store = RecordStore::new();
        let profile = ProfileResolver::new();
        let settings = Settings::default();
        let sbx = Sandbox::new(1_000_000, &store, &profile, &settings);

        assert!(sbx.is_current(1_000_000));
        assert!(sbx.is_current(1_000_000 - FIFTEEN_MINS_MS));
        assert!(!sbx.is_current(1_000_000 - FIFTEEN_MINS_MS - 1));
    }
}
