//! Insulin on board
//!
//! ## Model
//!
//! Each bolus decays along a fixed bilinear/quadratic curve with its peak
//! at 75 scaled minutes and full exhaustion at 180. Elapsed time is
//! scaled by `3 / DIA` so a longer insulin action stretches the same
//! curve:
//!
//! ```text
//! min_ago = (3 / dia) * elapsed_minutes
//!
//! min_ago < 75:    x = min_ago/5 + 1
//!                  iob = insulin * (1 - 0.001852*x^2 + 0.001852*x)
//! 75 <= t < 180:   x = (min_ago - 75)/5
//!                  iob = insulin * (0.001323*x^2 - 0.054233*x + 0.55556)
//! min_ago >= 180:  iob = 0
//! ```
//!
//! Activity - the rate at which the remaining insulin is lowering glucose,
//! in mg/dL per minute - follows a matching piecewise ramp scaled by the
//! sensitivity at the treatment time.
//!
//! ## Sources
//!
//! A looping controller's own IOB report (recency-windowed to 30 minutes)
//! takes priority over the treatment-derived estimate when present; the
//! treatment-derived value is still computed and exposed alongside for
//! display and cross-checking.

use log::warn;

use crate::errors::PluginResult;
use crate::pipeline::Plugin;
use crate::profile::{ProfileResolver, ValueKind};
use crate::records::{DeviceStatus, RecordStore, Treatment};
use crate::sandbox::{PropertyValue, Sandbox};
use crate::time::{Timestamp, MS_PER_MINUTE};

/// Curve peak, scaled minutes.
const PEAK_MINS: f64 = 75.0;

/// Full exhaustion, scaled minutes.
const END_MINS: f64 = 180.0;

/// First zero of the tail quadratic, scaled minutes. The polynomial dips
/// a hair below zero here and bounces back before 180; the model treats
/// the first crossing as exhaustion so IOB decays monotonically.
const TAIL_ZERO_MINS: f64 = 175.5;

/// DIA assumed when the profile does not provide one, hours.
pub const DEFAULT_DIA_HOURS: f64 = 3.0;

/// Where an IOB number came from
#[derive(Debug, Clone, PartialEq)]
pub enum IobSource {
    /// Computed from the treatment log
    Treatments,
    /// Reported by a looping controller or pump
    Device {
        /// The reporting device identifier
        device: String,
    },
}

/// Published IOB property
#[derive(Debug, Clone, PartialEq)]
pub struct IobProperty {
    /// Authoritative IOB, units
    pub iob: f64,
    /// Insulin activity, mg/dL per minute
    pub activity: f64,
    /// Which source produced `iob`
    pub source: IobSource,
    /// Treatment-derived IOB, always computed, for cross-checking
    pub treatment_iob: f64,
    /// One-line rendering
    pub display_line: String,
}

/// One treatment's contribution at `time`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IobContrib {
    /// Remaining insulin, units
    pub iob: f64,
    /// Glucose-lowering rate, mg/dL per minute
    pub activity: f64,
}

/// Decay contribution of a single treatment.
///
/// `sens` is the sensitivity at the treatment time; activity is zero when
/// it is unknown (the IOB number itself does not need it).
pub fn calc_treatment(
    treatment: &Treatment,
    dia: f64,
    sens: f64,
    time: Timestamp,
) -> IobContrib {
    let Some(insulin) = treatment.insulin else {
        return IobContrib::default();
    };
    if insulin <= 0.0 || treatment.mills > time {
        return IobContrib::default();
    }

    let dia = if dia > 0.0 { dia } else { DEFAULT_DIA_HOURS };
    let scale_factor = 3.0 / dia;
    let min_ago = scale_factor * (time - treatment.mills) as f64 / MS_PER_MINUTE as f64;

    if min_ago < PEAK_MINS {
        let x = min_ago / 5.0 + 1.0;
        IobContrib {
            iob: insulin * (1.0 - 0.001852 * x * x + 0.001852 * x),
            activity: sens * insulin * (2.0 / dia / 60.0 / PEAK_MINS) * min_ago,
        }
    } else if min_ago < END_MINS {
        let x = (min_ago - PEAK_MINS) / 5.0;
        let remaining = if min_ago < TAIL_ZERO_MINS {
            (0.001323 * x * x - 0.054233 * x + 0.55556).max(0.0)
        } else {
            0.0
        };
        IobContrib {
            iob: insulin * remaining,
            activity: sens
                * insulin
                * (2.0 / dia / 60.0
                    - (min_ago - PEAK_MINS) * 2.0 / dia / 60.0 / (END_MINS - PEAK_MINS)),
        }
    } else {
        IobContrib::default()
    }
}

/// Treatment-derived totals at `time`: the sum over every insulin-bearing
/// treatment delivered at or before it.
pub fn calc_total(
    treatments: &[Treatment],
    profile: &ProfileResolver,
    time: Timestamp,
) -> IobContrib {
    let dia = profile
        .value_at(time, ValueKind::Dia)
        .unwrap_or(DEFAULT_DIA_HOURS);

    let mut total = IobContrib::default();
    for treatment in treatments {
        if treatment.insulin.is_none() || treatment.mills > time {
            continue;
        }
        let sens = profile
            .value_at(treatment.mills, ValueKind::Sens)
            .unwrap_or(0.0);
        let contrib = calc_treatment(treatment, dia, sens, time);
        total.iob += contrib.iob;
        total.activity += contrib.activity;
    }
    total
}

/// The most recent device-reported IOB within the recency window.
pub fn recent_device_iob(
    store: &RecordStore,
    time: Timestamp,
) -> Option<(f64, Option<f64>, String)> {
    store
        .device_statuses
        .iter()
        .rev()
        .filter_map(|status| {
            let block = status.iob_block()?;
            let at = status.field_mills(block.mills);
            if !DeviceStatus::is_recent(at, time) {
                return None;
            }
            let amount = block.amount()?;
            let device = status
                .device
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            Some((at, amount, block.activity, device))
        })
        .max_by_key(|(at, _, _, _)| *at)
        .map(|(_, amount, activity, device)| (amount, activity, device))
}

/// Publishes `iob`
#[derive(Debug, Default)]
pub struct IobPlugin;

impl Plugin for IobPlugin {
    fn name(&self) -> &'static str {
        "iob"
    }

    fn set_properties(&self, sbx: &mut Sandbox) -> PluginResult<()> {
        if !sbx.profile.has_data() {
            warn!("iob: no profile loaded, assuming {}h DIA", DEFAULT_DIA_HOURS);
        }

        let treatment_totals = calc_total(&sbx.store.treatments, sbx.profile, sbx.time);
        let device = recent_device_iob(sbx.store, sbx.time);

        let property = match device {
            Some((amount, activity, device)) => IobProperty {
                iob: amount,
                activity: activity.unwrap_or(treatment_totals.activity),
                source: IobSource::Device { device },
                treatment_iob: treatment_totals.iob,
                display_line: format!("IOB: {:.2}U", amount),
            },
            None => IobProperty {
                iob: treatment_totals.iob,
                activity: treatment_totals.activity,
                source: IobSource::Treatments,
                treatment_iob: treatment_totals.iob,
                display_line: format!("IOB: {:.2}U", treatment_totals.iob),
            },
        };

        sbx.offer_property("iob", || Some(PropertyValue::Iob(property)));
        Ok(())
    }
}
