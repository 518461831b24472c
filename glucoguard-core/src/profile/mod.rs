//! Point-in-time therapy profile resolution
//!
//! ## Overview
//!
//! Profile documents describe therapy values as time-of-day schedules;
//! treatments overlay them with profile switches, temp basals and combo
//! boluses. The resolver answers "what was the sensitivity / carb ratio /
//! basal rate at time T" for arbitrary T - including historical T during
//! retro playback - in O(log n), with a short-lived cache in front.
//!
//! ## Resolution order
//!
//! ```text
//! value_at(T, kind):
//!   1. cache probe (key = containing minute + kind, TTL 5s)
//!   2. latest ProfileRecord with mills <= T   (else earliest)
//!   3. active Profile Switch treatment at T   (bounded by the record)
//!   4. circadian percentage/timeshift override from the switch
//!   5. segment scan by seconds-since-local-midnight
//! ```
//!
//! ## Caching
//!
//! Three caches, all invalidated by [`ProfileResolver::update_treatments`]:
//! the value cache (minute-keyed, 5s TTL against the injected clock), and
//! the two single-slot span caches inside the temp-basal and combo-bolus
//! interval indexes. None of them are thread-safe; a host serving
//! concurrent sessions gives each session its own resolver.
//!
//! ## Timezone handling
//!
//! Local midnight is computed from the profile's declared UTC offset when
//! present. A profile that names a timezone without declaring an offset
//! gets the process-local zone and a configuration warning - a known
//! source of skew for server-side evaluation, surfaced rather than
//! silently defaulted.

pub mod tempbasal;

pub use tempbasal::SpanIndex;

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::{FixedOffset, Local, TimeZone, Timelike, Utc};
use log::warn;

use crate::records::{process_durations, ProfileRecord, ProfileSegmentSet, Treatment, ValueSpan};
use crate::time::{Timestamp, TimeSource, SystemClock, MS_PER_MINUTE};

/// Value cache time-to-live.
const CACHE_TTL_MS: u64 = 5000;

/// Which therapy value a lookup resolves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Insulin sensitivity, mg/dL per unit
    Sens,
    /// Carb ratio, grams per unit
    CarbRatio,
    /// Scheduled basal rate, U/h
    Basal,
    /// Bottom of target range, mg/dL
    TargetLow,
    /// Top of target range, mg/dL
    TargetHigh,
    /// Duration of insulin action, hours
    Dia,
    /// Carb absorption rate, g/h
    CarbsHr,
}

impl ValueKind {
    fn span(self, set: &ProfileSegmentSet) -> Option<&ValueSpan> {
        match self {
            ValueKind::Sens => set.sens.as_ref(),
            ValueKind::CarbRatio => set.carbratio.as_ref(),
            ValueKind::Basal => set.basal.as_ref(),
            ValueKind::TargetLow => set.target_low.as_ref(),
            ValueKind::TargetHigh => set.target_high.as_ref(),
            ValueKind::Dia => set.dia.as_ref(),
            ValueKind::CarbsHr => set.carbs_hr.as_ref(),
        }
    }

    /// Whether the circadian percentage scales this value, and in which
    /// direction. Basal scales directly; sensitivity and carb ratio scale
    /// inversely (a 200% profile needs half the ratio).
    fn percentage_mode(self) -> PercentageMode {
        match self {
            ValueKind::Basal => PercentageMode::Direct,
            ValueKind::Sens | ValueKind::CarbRatio => PercentageMode::Inverse,
            _ => PercentageMode::Unscaled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PercentageMode {
    Direct,
    Inverse,
    Unscaled,
}

#[derive(Debug, Clone, Copy)]
struct CachedValue {
    value: Option<f64>,
    inserted: Timestamp,
}

/// Basal state at a point in time
#[derive(Debug, Clone, Default)]
pub struct BasalState {
    /// Scheduled rate from the profile, U/h
    pub basal: Option<f64>,
    /// Rate after the active temp basal is applied, U/h
    pub temp_basal: Option<f64>,
    /// Additive rate from an active combo bolus, U/h
    pub combo_basal: f64,
    /// `temp_basal + combo_basal`
    pub total_basal: Option<f64>,
    /// The temp basal treatment in effect, if any
    pub treatment: Option<Treatment>,
    /// The combo bolus treatment in effect, if any
    pub combo_treatment: Option<Treatment>,
}

/// Resolves therapy values at arbitrary points in time
pub struct ProfileResolver {
    records: Vec<ProfileRecord>,
    clock: Box<dyn TimeSource>,
    value_cache: RefCell<HashMap<(Timestamp, ValueKind), CachedValue>>,
    profile_switches: Vec<Treatment>,
    temp_basals: SpanIndex,
    combo_boluses: SpanIndex,
}

impl Default for ProfileResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileResolver {
    /// Create an empty resolver driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Box::new(SystemClock))
    }

    /// Create an empty resolver with an injected clock (tests, replay).
    pub fn with_clock(clock: Box<dyn TimeSource>) -> Self {
        Self {
            records: Vec::new(),
            clock,
            value_cache: RefCell::new(HashMap::new()),
            profile_switches: Vec::new(),
            temp_basals: SpanIndex::default(),
            combo_boluses: SpanIndex::default(),
        }
    }

    /// Whether any profile document is loaded.
    pub fn has_data(&self) -> bool {
        !self.records.is_empty()
    }

    /// Replace the loaded profile documents.
    ///
    /// Records must already be prepared (mills derived, segments
    /// preprocessed) - the store does this on ingest. Emits the
    /// missing-offset configuration warning once per load.
    pub fn set_profiles(&mut self, records: Vec<ProfileRecord>) {
        for record in &records {
            for (name, set) in &record.store {
                if set.timezone.is_some() && set.utc_offset.is_none() {
                    warn!(
                        "profile `{}` declares timezone {:?} without utcOffset; \
                         falling back to the process-local zone for schedule lookups",
                        name, set.timezone
                    );
                }
            }
        }
        self.records = records;
        self.records.sort_by_key(|r| r.mills);
        self.value_cache.borrow_mut().clear();
    }

    /// Rebuild the treatment overlays (switches, temp basals, combos).
    ///
    /// Invalidates all three caches: stale cache entries would otherwise
    /// outlive the treatments they were computed from.
    pub fn update_treatments(&mut self, treatments: &[Treatment]) {
        let mut switches: Vec<Treatment> = treatments
            .iter()
            .filter(|t| t.is_profile_switch())
            .cloned()
            .collect();
        switches.sort_by_key(|t| t.mills);
        self.profile_switches = switches;

        let temps: Vec<Treatment> = treatments
            .iter()
            .filter(|t| t.is_temp_basal())
            .cloned()
            .collect();
        self.temp_basals = SpanIndex::new(process_durations(temps, false));

        let combos: Vec<Treatment> = treatments
            .iter()
            .filter(|t| t.is_combo_bolus())
            .cloned()
            .collect();
        self.combo_boluses = SpanIndex::new(process_durations(combos, false));

        self.value_cache.borrow_mut().clear();
    }

    /// The profile record governing `time`: latest with `mills <= time`,
    /// falling back to the earliest record.
    pub fn record_at(&self, time: Timestamp) -> Option<&ProfileRecord> {
        self.records
            .iter()
            .rev()
            .find(|r| r.mills <= time)
            .or_else(|| self.records.first())
    }

    /// The profile switch treatment effective at `time`, bounded below by
    /// the owning record's `mills`. A switch with a duration covers only
    /// that interval; a zero-duration switch is open-ended until
    /// superseded by a later one.
    fn active_switch(&self, time: Timestamp, record_mills: Timestamp) -> Option<&Treatment> {
        self.profile_switches.iter().rev().find(|s| {
            s.mills <= time
                && s.mills >= record_mills
                && (!s.has_duration() || time < s.end_mills())
        })
    }

    /// Resolve one therapy value at `time`, through the cache.
    pub fn value_at(&self, time: Timestamp, kind: ValueKind) -> Option<f64> {
        let minute = (time / MS_PER_MINUTE) * MS_PER_MINUTE;
        let now = self.clock.now();

        if let Some(cached) = self.value_cache.borrow().get(&(minute, kind)) {
            if now.saturating_sub(cached.inserted) < CACHE_TTL_MS {
                return cached.value;
            }
        }

        let value = self.resolve(time, kind);
        self.value_cache
            .borrow_mut()
            .insert((minute, kind), CachedValue { value, inserted: now });
        value
    }

    fn resolve(&self, time: Timestamp, kind: ValueKind) -> Option<f64> {
        let record = self.record_at(time)?;
        let switch = self.active_switch(time, record.mills);

        let name = switch.and_then(|s| s.profile.as_deref());
        let (_, set) = record.segment_set(name)?;

        // Circadian override: shift the clock before the segment scan,
        // scale the value after it
        let shifted = match switch.and_then(|s| s.timeshift) {
            Some(hours) => {
                let shift_ms = (hours * 3_600_000.0) as i64;
                (time as i64 + shift_ms).max(0) as Timestamp
            }
            None => time,
        };

        let seconds = self.seconds_from_midnight(shifted, set);
        let mut value = kind.span(set)?.value_at(seconds)?;

        if let Some(pct) = switch.and_then(|s| s.percentage) {
            if pct > 0.0 && (pct - 100.0).abs() > f64::EPSILON {
                match kind.percentage_mode() {
                    PercentageMode::Direct => value *= pct / 100.0,
                    PercentageMode::Inverse => value *= 100.0 / pct,
                    PercentageMode::Unscaled => {}
                }
            }
        }

        Some(value)
    }

    /// Seconds since local midnight of `time`, under the profile's
    /// declared UTC offset when present, else the process-local zone.
    fn seconds_from_midnight(&self, time: Timestamp, set: &ProfileSegmentSet) -> u32 {
        if let Some(offset_mins) = set.utc_offset {
            match FixedOffset::east_opt(offset_mins * 60) {
                Some(offset) => {
                    if let Some(utc) = Utc.timestamp_millis_opt(time as i64).single() {
                        return utc.with_timezone(&offset).time().num_seconds_from_midnight();
                    }
                }
                None => warn!("profile utcOffset {} minutes is out of range", offset_mins),
            }
        }
        Local
            .timestamp_millis_opt(time as i64)
            .single()
            .map(|dt| dt.time().num_seconds_from_midnight())
            .unwrap_or(0)
    }

    /// Basal state at `time`: scheduled rate, temp-basal override
    /// (absolute replaces outright, including zero; percent scales), and
    /// combo-bolus additive rate.
    pub fn basal_state_at(&self, time: Timestamp) -> BasalState {
        let basal = self.value_at(time, ValueKind::Basal);
        let treatment = self.temp_basals.at(time).cloned();
        let combo_treatment = self.combo_boluses.at(time).cloned();

        let temp_basal = match &treatment {
            Some(t) if t.absolute.is_some() => t.absolute,
            Some(t) if t.percent.is_some() => {
                basal.map(|b| b * (100.0 + t.percent.unwrap_or(0.0)) / 100.0)
            }
            _ => basal,
        };

        let combo_basal = combo_treatment
            .as_ref()
            .and_then(|c| c.relative)
            .unwrap_or(0.0);

        BasalState {
            basal,
            temp_basal,
            combo_basal,
            total_basal: temp_basal.map(|t| t + combo_basal),
            treatment,
            combo_treatment,
        }
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.value_cache.borrow().len()
    }
}

impl std::fmt::Debug for ProfileResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileResolver")
            .field("records", &self.records.len())
            .field("profile_switches", &self.profile_switches.len())
            .field("temp_basals", &self.temp_basals.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{event_types, Segment};
    use crate::time::FixedTime;
    use std::collections::BTreeMap;

    fn segmented(values: &[(u32, f64)]) -> ValueSpan {
        ValueSpan::Segmented(
            values
                .iter()
                .map(|(seconds, value)| Segment {
                    time: String::new(),
                    time_as_seconds: Some(*seconds),
                    value: *value,
                })
                .collect(),
        )
    }

    fn profile_record(mills: Timestamp) -> ProfileRecord {
        let mut store = BTreeMap::new();
        store.insert(
            "Default".to_string(),
            ProfileSegmentSet {
                sens: Some(segmented(&[(0, 90.0)])),
                carbratio: Some(segmented(&[(0, 10.0)])),
                basal: Some(segmented(&[(0, 1.0), (6 * 3600, 1.5)])),
                target_low: Some(segmented(&[(0, 80.0)])),
                target_high: Some(segmented(&[(0, 180.0)])),
                dia: Some(ValueSpan::Fixed(3.0)),
                carbs_hr: Some(ValueSpan::Fixed(30.0)),
                utc_offset: Some(0),
                ..ProfileSegmentSet::default()
            },
        );
        store.insert(
            "Exercise".to_string(),
            ProfileSegmentSet {
                sens: Some(segmented(&[(0, 120.0)])),
                carbratio: Some(segmented(&[(0, 15.0)])),
                basal: Some(segmented(&[(0, 0.5)])),
                dia: Some(ValueSpan::Fixed(4.0)),
                utc_offset: Some(0),
                ..ProfileSegmentSet::default()
            },
        );
        ProfileRecord {
            mills,
            default_profile: Some("Default".into()),
            store,
            ..ProfileRecord::default()
        }
    }

    fn resolver_at(clock_time: Timestamp) -> ProfileResolver {
        let mut resolver = ProfileResolver::with_clock(Box::new(FixedTime::new(clock_time)));
        resolver.set_profiles(vec![profile_record(0)]);
        resolver
    }

    // Noon UTC on an arbitrary day
    const NOON: Timestamp = 1_700_000_000_000 - (1_700_000_000_000 % 86_400_000) + 12 * 3_600_000;

    #[test]
    fn resolves_segment_by_time_of_day() {
        let resolver = resolver_at(NOON);

        // Midnight segment
        let midnight = NOON - 12 * 3_600_000;
        assert_eq!(resolver.value_at(midnight, ValueKind::Basal), Some(1.0));
        // After the 06:00 boundary
        assert_eq!(resolver.value_at(NOON, ValueKind::Basal), Some(1.5));
        assert_eq!(resolver.value_at(NOON, ValueKind::Sens), Some(90.0));
        assert_eq!(resolver.value_at(NOON, ValueKind::Dia), Some(3.0));
    }

    #[test]
    fn cache_keys_by_minute_and_kind() {
        let resolver = resolver_at(NOON);

        resolver.value_at(NOON, ValueKind::Sens);
        resolver.value_at(NOON + 1000, ValueKind::Sens); // same minute
        assert_eq!(resolver.cached_entries(), 1);

        resolver.value_at(NOON + MS_PER_MINUTE, ValueKind::Sens);
        resolver.value_at(NOON, ValueKind::Basal);
        assert_eq!(resolver.cached_entries(), 3);
    }

    #[test]
    fn update_treatments_invalidates_value_cache() {
        let mut resolver = resolver_at(NOON);
        assert_eq!(resolver.value_at(NOON, ValueKind::Sens), Some(90.0));

        let switch = Treatment {
            mills: NOON - 1000,
            event_type: event_types::PROFILE_SWITCH.into(),
            profile: Some("Exercise".into()),
            ..Treatment::default()
        };
        resolver.update_treatments(&[switch]);

        // A stale cache would still say 90
        assert_eq!(resolver.value_at(NOON, ValueKind::Sens), Some(120.0));
    }

    #[test]
    fn bounded_switch_expires() {
        let mut resolver = resolver_at(NOON);
        let switch = Treatment {
            mills: NOON - 2 * 3_600_000,
            duration: Some(60.0),
            event_type: event_types::PROFILE_SWITCH.into(),
            profile: Some("Exercise".into()),
            ..Treatment::default()
        };
        resolver.update_treatments(&[switch]);

        // Inside the hour-long switch
        assert_eq!(
            resolver.value_at(NOON - 90 * 60_000, ValueKind::Sens),
            Some(120.0)
        );
        // After it expired
        assert_eq!(resolver.value_at(NOON, ValueKind::Sens), Some(90.0));
    }

    #[test]
    fn percentage_scales_by_kind() {
        let mut resolver = resolver_at(NOON);
        let switch = Treatment {
            mills: NOON - 1000,
            event_type: event_types::PROFILE_SWITCH.into(),
            percentage: Some(200.0),
            ..Treatment::default()
        };
        resolver.update_treatments(&[switch]);

        // Basal doubles, sensitivity and carb ratio halve
        assert_eq!(resolver.value_at(NOON, ValueKind::Basal), Some(3.0));
        assert_eq!(resolver.value_at(NOON, ValueKind::Sens), Some(45.0));
        assert_eq!(resolver.value_at(NOON, ValueKind::CarbRatio), Some(5.0));
        // Targets are never percentage-scaled
        assert_eq!(resolver.value_at(NOON, ValueKind::TargetHigh), Some(180.0));
    }

    #[test]
    fn absolute_temp_basal_overrides_to_zero() {
        let mut resolver = resolver_at(NOON);
        let temp = Treatment {
            mills: NOON - 10 * 60_000,
            duration: Some(30.0),
            event_type: event_types::TEMP_BASAL.into(),
            absolute: Some(0.0),
            ..Treatment::default()
        };
        resolver.update_treatments(&[temp]);

        let state = resolver.basal_state_at(NOON);
        assert_eq!(state.basal, Some(1.5));
        assert_eq!(state.temp_basal, Some(0.0));
        assert_eq!(state.total_basal, Some(0.0));
    }

    #[test]
    fn percent_temp_basal_scales_and_combo_adds() {
        let mut resolver = resolver_at(NOON);
        let temp = Treatment {
            mills: NOON - 10 * 60_000,
            duration: Some(30.0),
            event_type: event_types::TEMP_BASAL.into(),
            percent: Some(-50.0),
            ..Treatment::default()
        };
        let combo = Treatment {
            mills: NOON - 5 * 60_000,
            duration: Some(60.0),
            event_type: event_types::COMBO_BOLUS.into(),
            relative: Some(0.4),
            ..Treatment::default()
        };
        resolver.update_treatments(&[temp, combo]);

        let state = resolver.basal_state_at(NOON);
        assert_eq!(state.temp_basal, Some(0.75));
        assert_eq!(state.combo_basal, 0.4);
        assert!((state.total_basal.unwrap() - 1.15).abs() < 1e-9);
    }

    #[test]
    fn falls_back_to_earliest_record() {
        let clock = FixedTime::new(NOON);
        let mut resolver = ProfileResolver::with_clock(Box::new(clock));
        resolver.set_profiles(vec![profile_record(NOON)]);

        // Query before the only record's start still resolves
        assert_eq!(resolver.value_at(NOON - 1000, ValueKind::Sens), Some(90.0));
    }
}
