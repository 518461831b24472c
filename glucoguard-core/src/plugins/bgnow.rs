//! Current glucose and smoothed delta
//!
//! ## Overview
//!
//! Raw CGM cadence is nominally five minutes but real feeds jitter, drop
//! readings, and occasionally deliver from two uploaders at once. Instead
//! of comparing the last two raw readings, recent readings are folded into
//! five-minute buckets walking back from the evaluation time; the bucket
//! means give a smoothed "now" value and a delta that tolerates duplicate
//! and missing readings.
//!
//! When the gap between the two most recent buckets is wider than one
//! cadence step, the delta is interpolated back to a five-minute change so
//! downstream consumers (forecast seeding, display) always see a
//! per-five-minutes number.
//!
//! This plugin also evaluates the plain threshold alarms against the
//! bucketed mean: urgent low/high outside `bg_low`/`bg_high`, warning
//! low/high outside the target range.

use log::debug;

use crate::alarms::{Level, Notify};
use crate::errors::PluginResult;
use crate::pipeline::Plugin;
use crate::records::Entry;
use crate::sandbox::{PropertyValue, Sandbox};
use crate::time::{Timestamp, FIVE_MINS_MS, MS_PER_MINUTE};

/// Readings below this are CGM error codes, not glucose.
pub const MIN_VALID_MGDL: f64 = 39.0;

/// How many five-minute buckets to fold readings into.
const BUCKET_COUNT: u64 = 4;

/// Gap (minutes) beyond which the delta is interpolated.
const INTERPOLATION_GAP_MINS: f64 = 9.0;

/// Bucketed "now" glucose
#[derive(Debug, Clone, PartialEq)]
pub struct BgNowProperty {
    /// Mean of the in-range readings in the newest non-empty bucket
    pub mean: f64,
    /// Most recent reading in that bucket, mg/dL
    pub last: f64,
    /// Mean reading time of that bucket
    pub mills: Timestamp,
    /// Number of readings folded into the bucket
    pub count: usize,
    /// One-line rendering
    pub display_line: String,
}

/// Smoothed change between the two newest buckets
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaProperty {
    /// Raw difference of bucket means, mg/dL
    pub absolute: f64,
    /// Minutes between the two bucket mean times
    pub elapsed_mins: f64,
    /// Whether the gap forced interpolation
    pub interpolated: bool,
    /// Backcast mean five minutes before the newest bucket
    pub mean5m_ago: f64,
    /// Change over five minutes, mg/dL
    pub change5m: f64,
    /// Signed display string in display units ("+5", "-0.3")
    pub display: String,
}

#[derive(Debug, Clone)]
struct Bucket {
    mean: f64,
    last: f64,
    mills: Timestamp,
    count: usize,
}

/// Fold in-range readings into five-minute buckets back from `time`.
///
/// Bucket 0 covers `(time - 5m, time]`, bucket 1 the five minutes before
/// it, and so on. Returns buckets oldest-last, skipping empty ones.
fn bucket_readings(sgvs: &[Entry], time: Timestamp) -> Vec<Bucket> {
    let mut sums = vec![(0.0f64, 0.0f64, 0.0f64, 0usize); BUCKET_COUNT as usize];

    for entry in sgvs.iter().rev() {
        if entry.mills > time || entry.mgdl < MIN_VALID_MGDL {
            continue;
        }
        let age = time - entry.mills;
        let idx = (age / FIVE_MINS_MS) as usize;
        if idx >= BUCKET_COUNT as usize {
            break;
        }
        let slot = &mut sums[idx];
        slot.0 += entry.mgdl;
        slot.1 += entry.mills as f64;
        if slot.3 == 0 {
            // First hit walking backwards is the newest reading in the bucket
            slot.2 = entry.mgdl;
        }
        slot.3 += 1;
    }

    sums.into_iter()
        .filter(|(_, _, _, count)| *count > 0)
        .map(|(sum, mills_sum, last, count)| Bucket {
            mean: sum / count as f64,
            last,
            mills: (mills_sum / count as f64) as Timestamp,
            count,
        })
        .collect()
}

fn calc_delta(recent: &Bucket, previous: &Bucket, sbx: &Sandbox) -> DeltaProperty {
    let absolute = recent.mean - previous.mean;
    let elapsed_mins = (recent.mills as f64 - previous.mills as f64) / MS_PER_MINUTE as f64;
    let interpolated = elapsed_mins > INTERPOLATION_GAP_MINS;

    let mean5m_ago = if interpolated {
        recent.mean - absolute / elapsed_mins * 5.0
    } else {
        previous.mean
    };
    let change5m = recent.mean - mean5m_ago;

    let scaled_change = sbx.scale(recent.mean) - sbx.scale(mean5m_ago);
    let display = if scaled_change >= 0.0 {
        format!("+{}", trim_number(scaled_change))
    } else {
        format!("-{}", trim_number(-scaled_change))
    };

    DeltaProperty {
        absolute,
        elapsed_mins,
        interpolated,
        mean5m_ago,
        change5m,
        display,
    }
}

fn trim_number(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else {
        format!("{:.1}", value)
    }
}

/// Publishes `bgnow` and `delta`, and raises the plain threshold alarms
#[derive(Debug, Default)]
pub struct BgNowPlugin;

impl Plugin for BgNowPlugin {
    fn name(&self) -> &'static str {
        "bgnow"
    }

    fn set_properties(&self, sbx: &mut Sandbox) -> PluginResult<()> {
        let buckets = bucket_readings(&sbx.store.sgvs, sbx.time);
        if buckets.is_empty() {
            debug!("no readings within the bucket window");
            return Ok(());
        }

        let recent = buckets[0].clone();
        let delta = buckets.get(1).map(|previous| calc_delta(&recent, previous, sbx));

        let display_line = format!("BG Now: {}", sbx.display_bg(recent.mean));
        sbx.offer_property("bgnow", || {
            Some(PropertyValue::BgNow(BgNowProperty {
                mean: recent.mean,
                last: recent.last,
                mills: recent.mills,
                count: recent.count,
                display_line,
            }))
        });

        if let Some(delta) = delta {
            sbx.offer_property("delta", || Some(PropertyValue::Delta(delta)));
        }
        Ok(())
    }

    fn check_notifications(&self, sbx: &mut Sandbox) -> PluginResult<()> {
        let (mean, mills) = match sbx.properties.bgnow() {
            Some(bgnow) => (bgnow.mean, bgnow.mills),
            None => return Ok(()),
        };
        if !sbx.is_current(mills) {
            return Ok(());
        }

        let thresholds = sbx.settings.thresholds;
        let message = sbx.default_message();

        let request = if sbx.settings.alarm_urgent_low && mean < thresholds.bg_low {
            Some((Level::Urgent, "Urgent LOW"))
        } else if sbx.settings.alarm_low && mean < thresholds.bg_target_bottom {
            Some((Level::Warn, "Low"))
        } else if sbx.settings.alarm_urgent_high && mean > thresholds.bg_high {
            Some((Level::Urgent, "Urgent HIGH"))
        } else if sbx.settings.alarm_high && mean > thresholds.bg_target_top {
            Some((Level::Warn, "High"))
        } else {
            None
        };

        if let Some((level, title)) = request {
            let title = format!("{}: {}", title, sbx.display_bg(mean));
            sbx.request_notify(Notify::new(level, title, message, "bgnow"));
        }
        Ok(())
    }
}
