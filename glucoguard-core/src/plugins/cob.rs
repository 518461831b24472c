//! Carbs on board
//!
//! ## Model
//!
//! Carbs decay linearly at the profile's absorption rate (g/h) after a
//! 20-minute onset delay. Entries are serialized: carbs logged before the
//! previous entry finished decaying stack on top of the remaining grams
//! rather than absorbing in parallel.
//!
//! Concurrent insulin activity delays absorption onset - the liver
//! buffers incoming carbohydrate while insulin is active:
//!
//! ```text
//! delayed_carbs = avg_activity * LIVER_SENS_RATIO / sens * carb_ratio
//! delay_minutes = round(delayed_carbs / carbs_hr * 60)
//! ```
//!
//! where `avg_activity` is the mean of total insulin activity at decay
//! start and at the projected decay end. The completion time is pushed
//! out by the delay before the remaining-carb calculation runs.
//!
//! Total COB sums `min(carbs_given, hours_remaining * absorption_rate)`
//! across still-active entries; an entry that has fully decayed resets
//! the running total (the most recent absorption state wins).
//!
//! Device-reported COB (OpenAPS/Loop, 30-minute recency) takes priority
//! over the treatment-derived estimate, which is retained for display.

use log::warn;

use crate::errors::{PluginError, PluginResult};
use crate::pipeline::Plugin;
use crate::plugins::iob;
use crate::profile::{ProfileResolver, ValueKind};
use crate::records::{DeviceStatus, RecordStore, Treatment};
use crate::sandbox::{PropertyValue, Sandbox};
use crate::time::{Timestamp, MS_PER_HOUR, MS_PER_MINUTE};

/// Liver buffering factor applied to insulin activity.
const LIVER_SENS_RATIO: f64 = 8.0;

/// Absorption onset delay, minutes.
const ABSORPTION_DELAY_MINS: f64 = 20.0;

/// Entries fully decayed more than this many hours ago are skipped.
const DECAY_CUTOFF_HOURS: f64 = -10.0;

/// Where a COB number came from
#[derive(Debug, Clone, PartialEq)]
pub enum CobSource {
    /// Computed from the treatment log
    Treatments,
    /// Reported by a looping controller
    Device {
        /// The reporting device identifier
        device: String,
    },
}

/// Published COB property
#[derive(Debug, Clone, PartialEq)]
pub struct CobProperty {
    /// Authoritative COB, grams
    pub cob: f64,
    /// Treatment-derived COB, always computed, for cross-checking
    pub treatment_cob: f64,
    /// Which source produced `cob`
    pub source: CobSource,
    /// Whether absorption is currently under way
    pub is_decaying: bool,
    /// Time of the newest still-active carb entry
    pub last_carbs_mills: Option<Timestamp>,
    /// One-line rendering
    pub display_line: String,
}

/// Treatment-derived totals
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CobTotals {
    /// Carbs on board, grams
    pub cob: f64,
    /// Whether absorption is under way
    pub is_decaying: bool,
    /// Time of the newest contributing carb entry
    pub last_carbs_mills: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy)]
struct CarbDecay {
    /// Effective grams entering decay (given + carry-over)
    initial_carbs: f64,
    /// Projected completion, epoch ms as float
    decayed_by: f64,
    is_decaying: bool,
}

/// Decay window of a single carb entry, serialized behind the previous
/// entry's completion time.
fn cob_calc(
    carbs: f64,
    carb_time: Timestamp,
    carbs_hr: f64,
    last_decayed_by: f64,
    time: Timestamp,
) -> CarbDecay {
    let carbs_min = carbs_hr / 60.0;
    let carb_time = carb_time as f64;
    let minutes_left = (last_decayed_by - carb_time) / MS_PER_MINUTE as f64;

    let mut decayed_by =
        carb_time + ABSORPTION_DELAY_MINS.max(minutes_left) * MS_PER_MINUTE as f64;
    let initial_carbs = if ABSORPTION_DELAY_MINS > minutes_left {
        carbs
    } else {
        // Still digesting the previous entry: stack on the remainder
        carbs + minutes_left * carbs_min
    };

    let start_decay = decayed_by;
    let time = time as f64;
    let is_decaying = time < last_decayed_by || time > start_decay;

    decayed_by += initial_carbs / carbs_min * MS_PER_MINUTE as f64;

    CarbDecay {
        initial_carbs,
        decayed_by,
        is_decaying,
    }
}

/// Treatment-derived COB at `time`.
///
/// Errors when the profile cannot supply absorption rate, sensitivity or
/// carb ratio - the caller logs and publishes nothing.
pub fn calc_total(
    treatments: &[Treatment],
    profile: &ProfileResolver,
    time: Timestamp,
) -> Result<CobTotals, PluginError> {
    let mut totals = CobTotals::default();
    let mut last_decayed_by: f64 = 0.0;

    for treatment in treatments {
        let Some(carbs) = treatment.carbs else {
            continue;
        };
        if carbs <= 0.0 || treatment.mills > time {
            continue;
        }

        let carbs_hr = profile
            .value_at(treatment.mills, ValueKind::CarbsHr)
            .ok_or(PluginError::MissingProfile { field: "carbs_hr" })?;
        let sens = profile
            .value_at(treatment.mills, ValueKind::Sens)
            .ok_or(PluginError::MissingProfile { field: "sens" })?;
        let carb_ratio = profile
            .value_at(treatment.mills, ValueKind::CarbRatio)
            .ok_or(PluginError::MissingProfile { field: "carbratio" })?;
        if carbs_hr <= 0.0 || sens <= 0.0 || carb_ratio <= 0.0 {
            return Err(PluginError::MissingProfile { field: "carbs_hr" });
        }

        let mut decay = cob_calc(carbs, treatment.mills, carbs_hr, last_decayed_by, time);
        let mut decays_in_hr = (decay.decayed_by - time as f64) / MS_PER_HOUR as f64;

        if decays_in_hr > DECAY_CUTOFF_HOURS {
            // Liver buffering: concurrent insulin activity pushes the
            // completion time out
            let act_start =
                iob::calc_total(treatments, profile, last_decayed_by.max(0.0) as Timestamp)
                    .activity;
            let act_end =
                iob::calc_total(treatments, profile, decay.decayed_by.max(0.0) as Timestamp)
                    .activity;
            let avg_activity = (act_start + act_end) / 2.0;

            let delayed_carbs = avg_activity * LIVER_SENS_RATIO / sens * carb_ratio;
            let delay_mins = (delayed_carbs / carbs_hr * 60.0).round();
            if delay_mins > 0.0 {
                decay.decayed_by += delay_mins * MS_PER_MINUTE as f64;
                decays_in_hr = (decay.decayed_by - time as f64) / MS_PER_HOUR as f64;
            }
        }

        last_decayed_by = decay.decayed_by;

        if decays_in_hr > 0.0 {
            totals.cob += carbs.min(decays_in_hr * carbs_hr);
            totals.is_decaying = decay.is_decaying;
            totals.last_carbs_mills = Some(treatment.mills);
        } else {
            totals.cob = 0.0;
        }
    }

    Ok(totals)
}

/// The most recent device-reported COB within the recency window.
pub fn recent_device_cob(store: &RecordStore, time: Timestamp) -> Option<(f64, String)> {
    store
        .device_statuses
        .iter()
        .rev()
        .filter_map(|status| {
            let block = status.cob_block()?;
            let at = status.field_mills(block.mills);
            if !DeviceStatus::is_recent(at, time) {
                return None;
            }
            let cob = block.cob?;
            let device = status
                .device
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            Some((at, cob, device))
        })
        .max_by_key(|(at, _, _)| *at)
        .map(|(_, cob, device)| (cob, device))
}

/// Publishes `cob`
#[derive(Debug, Default)]
pub struct CobPlugin;

impl Plugin for CobPlugin {
    fn name(&self) -> &'static str {
        "cob"
    }

    fn set_properties(&self, sbx: &mut Sandbox) -> PluginResult<()> {
        let totals = match calc_total(&sbx.store.treatments, sbx.profile, sbx.time) {
            Ok(totals) => totals,
            Err(e) => {
                // Carb entries exist but the profile cannot price them
                warn!("cob: {}", e);
                return Err(e);
            }
        };

        let device = recent_device_cob(sbx.store, sbx.time);
        let property = match device {
            Some((cob, device)) => CobProperty {
                cob,
                treatment_cob: totals.cob,
                source: CobSource::Device { device },
                is_decaying: totals.is_decaying,
                last_carbs_mills: totals.last_carbs_mills,
                display_line: format!("COB: {:.0}g", cob),
            },
            None => CobProperty {
                cob: totals.cob,
                treatment_cob: totals.cob,
                source: CobSource::Treatments,
                is_decaying: totals.is_decaying,
                last_carbs_mills: totals.last_carbs_mills,
                display_line: format!("COB: {:.0}g", totals.cob),
            },
        };

        sbx.offer_property("cob", || Some(PropertyValue::Cob(property)));
        Ok(())
    }
}
