//! Therapy profile documents
//!
//! A profile document carries one or more named segment sets, each mapping
//! a time of day to therapy values: insulin sensitivity, carb ratio, basal
//! rate, target range, DIA, carb absorption rate. Documents are uploaded
//! with an ISO `startDate`; `mills` is derived from it exactly once at load
//! time and is immutable thereafter. Segment times ("HH:MM") are likewise
//! preprocessed once into seconds-since-midnight so lookups compare
//! integers instead of parsing strings.

use std::collections::BTreeMap;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::errors::ProfileError;
use crate::time::Timestamp;
use crate::units::Units;

use super::Timestamped;

/// One time-of-day segment of a therapy value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Segment {
    /// Time of day as uploaded, "HH:MM"
    pub time: String,
    /// Seconds since midnight, attached once at load
    #[serde(rename = "timeAsSeconds", skip_serializing_if = "Option::is_none")]
    pub time_as_seconds: Option<u32>,
    /// The therapy value active from this time of day
    pub value: f64,
}

impl Segment {
    /// Parse "HH:MM" (or "HH:MM:SS") into seconds since midnight.
    fn parse_time(&self) -> Option<u32> {
        let mut parts = self.time.split(':');
        let hours: u32 = parts.next()?.trim().parse().ok()?;
        let minutes: u32 = parts.next()?.trim().parse().ok()?;
        let seconds: u32 = match parts.next() {
            Some(s) => s.trim().parse().ok()?,
            None => 0,
        };
        if hours >= 24 || minutes >= 60 || seconds >= 60 {
            return None;
        }
        Some(hours * 3600 + minutes * 60 + seconds)
    }

    /// Attach `time_as_seconds` if the uploader did not already.
    fn prepare(&mut self) {
        if self.time_as_seconds.is_none() {
            self.time_as_seconds = self.parse_time();
        }
    }

    /// Seconds since midnight, 0 when unparseable.
    pub fn seconds(&self) -> u32 {
        self.time_as_seconds.unwrap_or(0)
    }
}

/// A therapy value: either one fixed number or a time-of-day schedule
///
/// Uploaders send DIA and carb absorption as scalars but sensitivity, carb
/// ratio, basal and targets as segment arrays; both shapes appear for every
/// field in the wild, so every field accepts both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSpan {
    /// Single value for the whole day
    Fixed(f64),
    /// Time-of-day schedule, scanned by seconds-since-midnight
    Segmented(Vec<Segment>),
}

impl ValueSpan {
    /// Resolve the value active at `seconds` since local midnight.
    ///
    /// Takes the last segment whose start is at or before `seconds`,
    /// falling back to the first segment (schedules are expected to start
    /// at 00:00, but uploads are not validated).
    pub fn value_at(&self, seconds: u32) -> Option<f64> {
        match self {
            ValueSpan::Fixed(v) => Some(*v),
            ValueSpan::Segmented(segments) => {
                let mut current = segments.first().map(|s| s.value);
                for segment in segments {
                    if segment.seconds() <= seconds {
                        current = Some(segment.value);
                    }
                }
                current
            }
        }
    }

    fn prepare(&mut self) {
        if let ValueSpan::Segmented(segments) = self {
            for segment in segments {
                segment.prepare();
            }
        }
    }
}

/// One named segment set inside a profile document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileSegmentSet {
    /// Insulin sensitivity, mg/dL per unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sens: Option<ValueSpan>,
    /// Carb ratio, grams per unit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbratio: Option<ValueSpan>,
    /// Scheduled basal rate, U/h
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basal: Option<ValueSpan>,
    /// Bottom of target range, mg/dL
    #[serde(rename = "target_low", skip_serializing_if = "Option::is_none")]
    pub target_low: Option<ValueSpan>,
    /// Top of target range, mg/dL
    #[serde(rename = "target_high", skip_serializing_if = "Option::is_none")]
    pub target_high: Option<ValueSpan>,
    /// Duration of insulin action, hours
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dia: Option<ValueSpan>,
    /// Carb absorption rate, grams per hour
    #[serde(rename = "carbs_hr", skip_serializing_if = "Option::is_none")]
    pub carbs_hr: Option<ValueSpan>,
    /// IANA timezone name as uploaded; informational unless an offset is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// UTC offset in minutes; drives local-midnight math when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utc_offset: Option<i32>,
    /// Unit system the profile was authored in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<Units>,
}

impl ProfileSegmentSet {
    fn prepare(&mut self) {
        for span in [
            &mut self.sens,
            &mut self.carbratio,
            &mut self.basal,
            &mut self.target_low,
            &mut self.target_high,
            &mut self.dia,
            &mut self.carbs_hr,
        ]
        .into_iter()
        .flatten()
        {
            span.prepare();
        }
    }
}

/// A therapy profile document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileRecord {
    /// Stable identity
    #[serde(rename = "_id", alias = "id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Effective-from time, derived once from `start_date` at load
    pub mills: Timestamp,
    /// ISO 8601 effective-from date as uploaded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// Which named segment set applies when no switch is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,
    /// Named segment sets; BTreeMap for deterministic iteration
    pub store: BTreeMap<String, ProfileSegmentSet>,
}

impl ProfileRecord {
    /// Derive `mills` from `start_date` and preprocess all segment times.
    ///
    /// Called once when the record enters the store. A record whose
    /// `mills` is already set keeps it - the derivation is never repeated.
    pub fn prepare(&mut self) -> Result<(), ProfileError> {
        if self.mills == 0 {
            if let Some(start) = &self.start_date {
                let parsed = DateTime::parse_from_rfc3339(start)
                    .map_err(|_| ProfileError::BadStartDate(start.clone()))?;
                self.mills = parsed.timestamp_millis().max(0) as Timestamp;
            }
        }
        for set in self.store.values_mut() {
            set.prepare();
        }
        Ok(())
    }

    /// The segment set a lookup should use: `name` if present, else the
    /// default, else the first stored set.
    pub fn segment_set(&self, name: Option<&str>) -> Option<(&str, &ProfileSegmentSet)> {
        if let Some(name) = name {
            if let Some((key, set)) = self.store.get_key_value(name) {
                return Some((key.as_str(), set));
            }
        }
        if let Some(default) = &self.default_profile {
            if let Some(set) = self.store.get(default) {
                return Some((default.as_str(), set));
            }
        }
        self.store
            .iter()
            .next()
            .map(|(name, set)| (name.as_str(), set))
    }
}

impl Timestamped for ProfileRecord {
    fn mills(&self) -> Timestamp {
        self.mills
    }
}
