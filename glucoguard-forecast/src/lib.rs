//! Short-Horizon Glucose Forecasting for GlucoGuard
//!
//! ## Overview
//!
//! This crate provides the AR2 forecast plugin: a second-order
//! autoregressive model over log-transformed glucose that projects the
//! next half hour from the two most recent smoothed readings. It layers
//! on `glucoguard-core` the way any other plugin does - consuming the
//! sandbox, publishing one property, and filing notification requests.
//!
//! ## Why AR2?
//!
//! Glucose dynamics over a 30-minute horizon are dominated by momentum:
//! where you are and how fast you were just moving. A second-order
//! autoregression on `ln(bg / 140)` captures exactly that with two fixed
//! coefficients, no per-user training, and arithmetic cheap enough to run
//! every cycle:
//!
//! ```text
//! y[t] = -0.723 * y[t-2] + 1.716 * y[t-1]      y = ln(bg / 140)
//! ```
//!
//! The log transform makes the model multiplicative in glucose space -
//! swings at 300 mg/dL are proportionally larger than at 80 - and the
//! reference of 140 centers the fixed point near the top of target range.
//!
//! ## Alarming
//!
//! Six five-minute steps feed alarm evaluation. The loss statistic is the
//! mean squared log-deviation from 120 mg/dL across the window:
//! crossing 0.05 marks a warning-grade excursion, 0.10 urgent-grade. A
//! directional notification fires only when the corresponding alarm flag
//! is enabled *and* the 20-minute-ahead point has crossed the relevant
//! target boundary - loss alone says "far from center", the boundary
//! check says in which direction it matters.
//!
//! Forecasting is suppressed entirely when the feed is stale (no delta
//! available) or the current value is below the minimum physiologically
//! valid glucose.
//!
//! ## Display cone
//!
//! For rendering, a cone of uncertainty widens linearly with the step
//! index in log space, scaled by the `coneFactor` extended setting
//! (0 disables the spread and yields a single line).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use heapless::Vec as BoundedVec;
use libm::{exp, log};

use glucoguard_core::alarms::{Level, Notify};
use glucoguard_core::errors::PluginResult;
use glucoguard_core::pipeline::Plugin;
use glucoguard_core::plugins::{ForecastPoint, ForecastProperty};
use glucoguard_core::sandbox::{PropertyValue, Sandbox};
use glucoguard_core::time::FIVE_MINS_MS;

/// Fixed autoregression coefficients `[lag-2, lag-1]`.
pub const AR: [f64; 2] = [-0.723, 1.716];

/// Log-space reference glucose, mg/dL.
pub const BG_REF: f64 = 140.0;

/// Minimum physiologically valid glucose, mg/dL.
pub const BG_MIN: f64 = 36.0;

/// Ceiling applied to forecast points, mg/dL.
pub const BG_MAX: f64 = 400.0;

/// Loss threshold for a warning-grade excursion.
pub const WARN_LOSS: f64 = 0.05;

/// Loss threshold for an urgent-grade excursion.
pub const URGENT_LOSS: f64 = 0.10;

/// Loss is measured against this center, mg/dL.
const LOSS_REF: f64 = 120.0;

/// Steps fed to alarm evaluation (30 minutes at CGM cadence).
const ALARM_STEPS: usize = 6;

/// Cone half-width per step, log space, before the cone factor.
const CONE_STEP: f64 = 0.02;

/// Default cone factor when the extended setting is absent.
const DEFAULT_CONE_FACTOR: f64 = 2.0;

/// The AR2 forecast plugin; publishes `ar2`
#[derive(Debug, Default)]
pub struct Ar2Plugin;

impl Plugin for Ar2Plugin {
    fn name(&self) -> &'static str {
        "ar2"
    }

    fn set_properties(&self, sbx: &mut Sandbox) -> PluginResult<()> {
        if let Some(property) = forecast(sbx) {
            sbx.offer_property("ar2", || Some(PropertyValue::Forecast(property)));
        }
        Ok(())
    }

    fn check_notifications(&self, sbx: &mut Sandbox) -> PluginResult<()> {
        let Some((avg_loss, point20)) = sbx
            .properties
            .forecast()
            .and_then(|f| f.predicted.get(3).map(|p| (f.avg_loss, p.mgdl)))
        else {
            return Ok(());
        };

        let level = if avg_loss > URGENT_LOSS {
            Level::Urgent
        } else if avg_loss > WARN_LOSS {
            Level::Warn
        } else {
            return Ok(());
        };

        let thresholds = sbx.settings.thresholds;
        let high_enabled = match level {
            Level::Urgent => sbx.settings.alarm_urgent_high,
            _ => sbx.settings.alarm_high,
        };
        let low_enabled = match level {
            Level::Urgent => sbx.settings.alarm_urgent_low,
            _ => sbx.settings.alarm_low,
        };

        let direction = if point20 > thresholds.bg_target_top && high_enabled {
            Some("high")
        } else if point20 < thresholds.bg_target_bottom && low_enabled {
            Some("low")
        } else {
            None
        };

        if let Some(direction) = direction {
            let title = format!(
                "Forecast: {} glucose in 20 minutes ({})",
                direction,
                sbx.display_bg(point20)
            );
            let message = sbx.default_message();
            sbx.request_notify(Notify::new(level, title, message, "ar2"));
        }
        Ok(())
    }
}

/// Run the model against the sandbox's bucketed glucose state.
///
/// Returns `None` when forecasting is suppressed: no current bucketed
/// reading, no delta (stale feed), or a current value below [`BG_MIN`].
pub fn forecast(sbx: &Sandbox) -> Option<ForecastProperty> {
    let bgnow = sbx.properties.bgnow()?;
    let delta = sbx.properties.delta()?;
    if !sbx.is_current(bgnow.mills) {
        return None;
    }

    let current = bgnow.mean;
    let previous = delta.mean5m_ago;
    if current < BG_MIN || previous < BG_MIN {
        log::debug!("ar2: below the valid glucose floor, suppressing forecast");
        return None;
    }

    let mut y = [log(previous / BG_REF), log(current / BG_REF)];
    let mut points: BoundedVec<ForecastPoint, ALARM_STEPS> = BoundedVec::new();
    let mut avg_loss = 0.0;

    for step in 0..ALARM_STEPS {
        y = [y[1], AR[0] * y[0] + AR[1] * y[1]];
        let mgdl = (BG_REF * exp(y[1])).round().clamp(BG_MIN, BG_MAX);
        let point = ForecastPoint {
            mills: bgnow.mills + (step as u64 + 1) * FIVE_MINS_MS,
            mgdl,
        };
        // Capacity equals the step count; the push cannot fail
        let _ = points.push(point);
        avg_loss += sq(log(mgdl / LOSS_REF)) / ALARM_STEPS as f64;
    }

    let predicted: Vec<ForecastPoint> = points.iter().copied().collect();
    let cone_factor = sbx
        .settings
        .extended_f64("ar2", "coneFactor", DEFAULT_CONE_FACTOR)
        .max(0.0);
    let cone = build_cone(&predicted, cone_factor);

    let display_line = format!(
        "AR2 Forecast: {}",
        sbx.display_bg(predicted[ALARM_STEPS - 1].mgdl)
    );

    Some(ForecastProperty {
        predicted,
        cone,
        avg_loss,
        display_line,
    })
}

/// Display cone: per step, a lower/upper pair spread by
/// `cone_factor * CONE_STEP * (step + 1)` in log space. A zero factor
/// collapses to the forecast line itself.
fn build_cone(predicted: &[ForecastPoint], cone_factor: f64) -> Vec<ForecastPoint> {
    if cone_factor == 0.0 {
        return predicted.to_vec();
    }

    let mut cone = Vec::with_capacity(predicted.len() * 2);
    for (step, point) in predicted.iter().enumerate() {
        let center = log(point.mgdl / BG_REF);
        let half_width = cone_factor * CONE_STEP * (step as f64 + 1.0);
        for offset in [-half_width, half_width] {
            cone.push(ForecastPoint {
                mills: point.mills,
                mgdl: (BG_REF * exp(center + offset)).round().clamp(BG_MIN, BG_MAX),
            });
        }
    }
    cone
}

fn sq(value: f64) -> f64 {
    value * value
}
