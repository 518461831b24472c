//! Calibration-derived raw glucose
//!
//! Reconstructs an unfiltered glucose estimate from the sensor's raw
//! channels and the latest calibration record. When the displayed reading
//! is clean the filtered channel anchors a correction ratio; during
//! error-code readings or very low values only the unfiltered channel is
//! usable.

use crate::errors::PluginResult;
use crate::pipeline::Plugin;
use crate::records::{Calibration, Entry};
use crate::sandbox::{PropertyValue, Sandbox};
use crate::time::Timestamp;

/// Readings below this anchor on the unfiltered channel alone.
const CLEAN_MGDL: f64 = 40.0;

/// Published raw-BG property
#[derive(Debug, Clone, PartialEq)]
pub struct RawBgProperty {
    /// Reconstructed raw glucose, mg/dL
    pub raw: f64,
    /// Calibration record used
    pub cal_mills: Timestamp,
    /// Sensor noise level carried from the reading
    pub noise: Option<u8>,
    /// One-line rendering
    pub display_line: String,
}

/// Reconstruct raw glucose from a reading and a calibration.
///
/// Returns 0 when the calibration or raw channels are unusable.
pub fn calc_raw(entry: &Entry, cal: &Calibration) -> f64 {
    let unfiltered = entry.unfiltered.unwrap_or(0.0);
    let filtered = entry.filtered.unwrap_or(0.0);

    let raw = if cal.slope == 0.0 || unfiltered == 0.0 || cal.scale == 0.0 {
        0.0
    } else if filtered == 0.0 || entry.mgdl < CLEAN_MGDL {
        cal.scale * (unfiltered - cal.intercept) / cal.slope
    } else {
        let ratio = cal.scale * (filtered - cal.intercept) / cal.slope / entry.mgdl;
        cal.scale * (unfiltered - cal.intercept) / cal.slope / ratio
    };
    raw.round()
}

/// Publishes `rawbg`
#[derive(Debug, Default)]
pub struct RawBgPlugin;

impl Plugin for RawBgPlugin {
    fn name(&self) -> &'static str {
        "rawbg"
    }

    fn set_properties(&self, sbx: &mut Sandbox) -> PluginResult<()> {
        let Some(entry) = sbx.last_sgv() else {
            return Ok(());
        };
        let Some(cal) = sbx.store.last_cal_before(sbx.time) else {
            return Ok(());
        };

        let raw = calc_raw(entry, cal);
        if raw == 0.0 {
            return Ok(());
        }

        let property = RawBgProperty {
            raw,
            cal_mills: cal.mills,
            noise: entry.noise,
            display_line: format!("Raw BG: {}", sbx.display_bg(raw)),
        };
        sbx.offer_property("rawbg", || Some(PropertyValue::RawBg(property)));
        Ok(())
    }
}
