//! Canonical record store and delta-merge reconciliation
//!
//! ## Merge strategies
//!
//! Two strategies, selected by the payload's `delta` flag:
//!
//! ```text
//! delta=false   Full replace: each non-empty incoming array replaces the
//!               stored array wholesale. No retention windowing.
//!
//! delta=true    Incremental merge:
//!               - time-keyed kinds (sgvs, mbgs, cals, devicestatus):
//!                 retain records newer than now - max_age, replace
//!                 retained records whose mills match an incoming one,
//!                 append the rest, re-sort ascending
//!               - identity-keyed kinds (treatments, food): no action tag
//!                 appends, action=remove deletes by id, action=update
//!                 replaces by id (tag stripped before storage)
//! ```
//!
//! Both merges are idempotent: applying the same delta twice equals
//! applying it once, and an empty delta leaves the store unchanged.
//!
//! ## Derived views
//!
//! Duration-bearing treatments are never mutated in the canonical array;
//! [`process_durations`] produces a copy where end events truncate the
//! intervals they fall inside, for consumers that need non-overlapping
//! spans (basal rendering, interval lookups).

use log::{debug, info};

use crate::time::{Timestamp, TWO_DAYS_MS};

use super::{
    Calibration, DeviceStatus, Entry, Food, MergeAction, MeterReading, Payload, ProfileRecord,
    Timestamped, Treatment,
};

/// Holds the canonical, time-ordered record arrays
#[derive(Debug)]
pub struct RecordStore {
    /// Glucose readings, ascending by mills
    pub sgvs: Vec<Entry>,
    /// Meter readings, ascending by mills
    pub mbgs: Vec<MeterReading>,
    /// Calibrations, ascending by mills
    pub cals: Vec<Calibration>,
    /// Treatments, ascending by mills
    pub treatments: Vec<Treatment>,
    /// Food entries
    pub food: Vec<Food>,
    /// Device status documents, ascending by mills
    pub device_statuses: Vec<DeviceStatus>,
    /// Therapy profiles, ascending by mills
    pub profiles: Vec<ProfileRecord>,
    /// Retention window for incremental time-series merges
    max_age: u64,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    /// Create a store with the default two-day retention window.
    pub fn new() -> Self {
        Self::with_max_age(TWO_DAYS_MS)
    }

    /// Create a store with a custom retention window.
    pub fn with_max_age(max_age: u64) -> Self {
        Self {
            sgvs: Vec::new(),
            mbgs: Vec::new(),
            cals: Vec::new(),
            treatments: Vec::new(),
            food: Vec::new(),
            device_statuses: Vec::new(),
            profiles: Vec::new(),
            max_age,
        }
    }

    /// Reconcile an incoming payload into the canonical state.
    ///
    /// `now` anchors the retention window; in retro playback it is the
    /// playback time, not the wall clock.
    pub fn apply(&mut self, payload: Payload, now: Timestamp) {
        let Payload {
            delta,
            sgvs,
            mbgs,
            cals,
            mut treatments,
            food,
            devicestatus,
            mut profiles,
            dbstats: _,
        } = payload;

        for treatment in &mut treatments {
            treatment.normalize_temp_target();
        }
        for profile in &mut profiles {
            if let Err(e) = profile.prepare() {
                log::warn!("dropping malformed profile record: {}", e);
            }
        }
        profiles.retain(|p| p.mills > 0 || p.start_date.is_none());

        if delta {
            debug!(
                "delta update: {} sgvs, {} treatments, {} devicestatus",
                sgvs.len(),
                treatments.len(),
                devicestatus.len()
            );
            merge_by_mills(&mut self.sgvs, sgvs, now, self.max_age);
            merge_by_mills(&mut self.mbgs, mbgs, now, self.max_age);
            merge_by_mills(&mut self.cals, cals, now, self.max_age);
            merge_by_mills(&mut self.device_statuses, devicestatus, now, self.max_age);
            merge_by_id(&mut self.treatments, treatments);
            merge_by_id(&mut self.food, food);
            // Profiles arrive as complete documents even inside deltas
            if !profiles.is_empty() {
                self.profiles = profiles;
                self.profiles.sort_by_key(|r| r.mills);
            }
        } else {
            info!("full data refresh");
            replace_if_present(&mut self.sgvs, sgvs);
            replace_if_present(&mut self.mbgs, mbgs);
            replace_if_present(&mut self.cals, cals);
            replace_if_present(&mut self.device_statuses, devicestatus);
            replace_if_present(&mut self.treatments, treatments);
            replace_if_present(&mut self.food, food);
            replace_if_present(&mut self.profiles, profiles);
            self.sort_all();
        }
    }

    fn sort_all(&mut self) {
        self.sgvs.sort_by_key(|r| r.mills);
        self.mbgs.sort_by_key(|r| r.mills);
        self.cals.sort_by_key(|r| r.mills);
        self.device_statuses.sort_by_key(|r| r.mills);
        self.treatments.sort_by_key(|r| r.mills);
        self.food.sort_by_key(|r| r.mills);
        self.profiles.sort_by_key(|r| r.mills);
    }

    /// Latest glucose reading at or before `time`.
    pub fn last_sgv_before(&self, time: Timestamp) -> Option<&Entry> {
        self.sgvs.iter().rev().find(|e| e.mills <= time)
    }

    /// Latest calibration at or before `time`.
    pub fn last_cal_before(&self, time: Timestamp) -> Option<&Calibration> {
        self.cals.iter().rev().find(|c| c.mills <= time)
    }

    /// Treatments with the given event type, preserving time order.
    pub fn treatments_by_event_type(&self, event_type: &str) -> Vec<&Treatment> {
        self.treatments
            .iter()
            .filter(|t| t.event_type == event_type)
            .collect()
    }
}

fn replace_if_present<T>(stored: &mut Vec<T>, incoming: Vec<T>) {
    if !incoming.is_empty() {
        *stored = incoming;
    }
}

/// Time-series incremental merge, keyed by `mills`.
///
/// Retains stored records newer than `now - max_age`, replaces retained
/// records whose `mills` matches an incoming record, appends the rest, and
/// re-sorts ascending. Records older than the window survive only if the
/// incoming delta itself carries them.
fn merge_by_mills<T: Timestamped>(
    stored: &mut Vec<T>,
    incoming: Vec<T>,
    now: Timestamp,
    max_age: u64,
) {
    if incoming.is_empty() {
        return;
    }

    let horizon = now.saturating_sub(max_age);
    stored.retain(|r| r.mills() > horizon);

    for record in incoming {
        match stored.iter_mut().find(|r| r.mills() == record.mills()) {
            Some(slot) => *slot = record,
            None => stored.push(record),
        }
    }
    stored.sort_by_key(|r| r.mills());
}

/// Identity-based incremental merge for action-tagged record kinds.
///
/// An update or remove referencing an unknown id is a logged no-op, not an
/// error. The action tag never reaches storage.
fn merge_by_id<T: Identified>(stored: &mut Vec<T>, incoming: Vec<T>) {
    for mut record in incoming {
        match record.take_action() {
            None => stored.push(record),
            Some(MergeAction::Remove) => {
                let id = record.id().map(str::to_owned);
                match id {
                    Some(id) => {
                        let before = stored.len();
                        stored.retain(|r| r.id() != Some(id.as_str()));
                        if stored.len() == before {
                            debug!("remove for unknown id {}, ignoring", id);
                        }
                    }
                    None => debug!("remove action without an id, ignoring"),
                }
            }
            Some(MergeAction::Update) => {
                let id = record.id().map(str::to_owned);
                match id {
                    Some(id) => match stored.iter_mut().find(|r| r.id() == Some(id.as_str())) {
                        Some(slot) => *slot = record,
                        None => debug!("update for unknown id {}, ignoring", id),
                    },
                    None => debug!("update action without an id, ignoring"),
                }
            }
        }
    }
    stored.sort_by_key(|r| r.mills());
}

/// Record kinds that merge by stable identity
trait Identified: Timestamped {
    fn id(&self) -> Option<&str>;
    fn take_action(&mut self) -> Option<MergeAction>;
}

impl Identified for Treatment {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
    fn take_action(&mut self) -> Option<MergeAction> {
        self.action.take()
    }
}

impl Identified for Food {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
    fn take_action(&mut self) -> Option<MergeAction> {
        self.action.take()
    }
}

/// Truncate overlapping durations against their end events.
///
/// For every record with positive duration, the earliest end event (same
/// set, `duration` falsy) whose timestamp falls strictly inside
/// `[start, start + duration)` truncates the record to end exactly there;
/// both records are tagged with cross-references. The pass runs twice -
/// once against explicit end events, once against the other
/// duration-bearing records of the set - so overlapping same-type events
/// also mutually truncate. Only the most restrictive (earliest) end
/// applies.
///
/// `keep_zero_duration` controls whether the zero-duration records survive
/// into the returned view.
pub fn process_durations(mut records: Vec<Treatment>, keep_zero_duration: bool) -> Vec<Treatment> {
    records.sort_by_key(|r| r.mills);

    cut_against(&mut records, |r| !r.has_duration());
    cut_against(&mut records, |r| r.has_duration());

    if !keep_zero_duration {
        records.retain(|r| r.has_duration());
    }
    records
}

/// One truncation pass: records matching `is_cutter` end the
/// duration-bearing records they fall inside.
fn cut_against(records: &mut [Treatment], is_cutter: impl Fn(&Treatment) -> bool) {
    let cutters: Vec<Timestamp> = records
        .iter()
        .filter(|r| is_cutter(r))
        .map(|r| r.mills)
        .collect();

    for record in records.iter_mut() {
        if !record.has_duration() {
            continue;
        }
        // Earliest cutter strictly inside the interval is the binding one
        let cut = cutters
            .iter()
            .copied()
            .filter(|&c| c > record.mills && c < record.end_mills())
            .min();
        if let Some(cut_mills) = cut {
            record.duration = Some((cut_mills - record.mills) as f64 / 60_000.0);
            record.cut_by = Some(cut_mills);
        }
    }

    // Tag the cutters with what they truncated
    let cuts: Vec<(Timestamp, Timestamp)> = records
        .iter()
        .filter_map(|r| r.cut_by.map(|c| (c, r.mills)))
        .collect();
    for record in records.iter_mut() {
        if let Some(&(_, victim)) = cuts.iter().find(|&&(c, _)| c == record.mills) {
            record.cutting = Some(victim);
        }
    }
}
